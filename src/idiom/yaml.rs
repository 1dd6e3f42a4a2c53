use super::Idiom;
use crate::error::{AppError, RestError};
use serde_json::Value as Json;

#[derive(Debug, Clone, Copy, Default)]
pub struct YamlIdiom;

impl Idiom for YamlIdiom {
    fn content_type(&self) -> &'static str {
        "text/yaml"
    }

    fn decode(&self, body: &[u8]) -> Result<Option<Json>, RestError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_yaml::from_slice(body)
            .map(Some)
            .map_err(|e| RestError::BadRequest(format!("YAML Error in payload: {}", e)))
    }

    fn render(&self, data: &Json) -> Result<Vec<u8>, AppError> {
        serde_yaml::to_string(data)
            .map(String::into_bytes)
            .map_err(|e| AppError::Encode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_yaml_round_trip() {
        let data = json!({"occurences": 1, "objects": [{"id": 1, "name": "pine"}]});
        let rendered = YamlIdiom.render(&data).unwrap();
        assert_eq!(YamlIdiom.decode(&rendered).unwrap(), Some(data));
        assert!(YamlIdiom.decode(b"  \n").unwrap().is_none());
        assert!(YamlIdiom.decode(b"a: [1, 2").is_err());
    }
}
