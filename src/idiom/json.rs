use super::Idiom;
use crate::error::{AppError, RestError};
use serde_json::Value as Json;

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonIdiom;

impl Idiom for JsonIdiom {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn decode(&self, body: &[u8]) -> Result<Option<Json>, RestError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(body)
            .map(Some)
            .map_err(|e| RestError::BadRequest(format!("JSON Error in payload: {}", e)))
    }

    fn render(&self, data: &Json) -> Result<Vec<u8>, AppError> {
        serde_json::to_vec(data).map_err(|e| AppError::Encode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode() {
        assert_eq!(JsonIdiom.decode(b"").unwrap(), None);
        assert_eq!(JsonIdiom.decode(b"{\"a\": 1}").unwrap(), Some(json!({"a": 1})));
        let err = JsonIdiom.decode(b"{\"a\": ").unwrap_err();
        assert!(err.to_string().starts_with("JSON Error in payload: "));
    }
}
