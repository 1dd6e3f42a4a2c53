//! Wire encodings ("idioms"). An idiom turns request bodies into generic values and
//! results into responses.

mod json;
mod yaml;

pub use json::JsonIdiom;
pub use yaml::YamlIdiom;

use crate::error::{AppError, RestError};
use crate::framework::RawResponse;
use crate::method::Method;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::sync::Arc;

pub trait Idiom: Send + Sync {
    fn content_type(&self) -> &'static str;

    /// `None` for an empty body. Malformed input is a 400.
    fn decode(&self, body: &[u8]) -> Result<Option<Json>, RestError>;

    fn render(&self, data: &Json) -> Result<Vec<u8>, AppError>;

    /// Encode `data`. A GET that matched nothing becomes a 404 when `empty_get_as_404` is set.
    fn encode(
        &self,
        data: &Json,
        method: Method,
        status: StatusCode,
        empty_get_as_404: bool,
    ) -> Result<RawResponse, AppError> {
        let status = if method == Method::Get && empty_get_as_404 && is_empty_envelope(data) {
            StatusCode::NOT_FOUND
        } else {
            status
        };
        Ok(RawResponse::new(status, self.content_type(), self.render(data)?))
    }
}

fn is_empty_envelope(data: &Json) -> bool {
    data.get("occurences").and_then(Json::as_u64) == Some(0)
}

/// Idiom selection in settings and config files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdiomKind {
    #[default]
    Json,
    Yaml,
}

impl IdiomKind {
    pub fn build(self) -> Arc<dyn Idiom> {
        match self {
            IdiomKind::Json => Arc::new(JsonIdiom),
            IdiomKind::Yaml => Arc::new(YamlIdiom),
        }
    }
}

impl std::str::FromStr for IdiomKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(IdiomKind::Json),
            "yaml" | "yml" => Ok(IdiomKind::Yaml),
            other => Err(format!("unknown idiom '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_get_as_404_only_for_get() {
        let idiom = JsonIdiom;
        let empty = json!({"occurences": 0, "objects": []});
        let r = idiom.encode(&empty, Method::Get, StatusCode::OK, true).unwrap();
        assert_eq!(r.status, StatusCode::NOT_FOUND);
        let r = idiom.encode(&empty, Method::Get, StatusCode::OK, false).unwrap();
        assert_eq!(r.status, StatusCode::OK);
        let r = idiom.encode(&empty, Method::Delete, StatusCode::OK, true).unwrap();
        assert_eq!(r.status, StatusCode::OK);
        let full = json!({"occurences": 1, "objects": [{}]});
        let r = idiom.encode(&full, Method::Get, StatusCode::OK, true).unwrap();
        assert_eq!(r.status, StatusCode::OK);
    }

    #[test]
    fn test_idiom_kind_parses() {
        assert_eq!("YAML".parse::<IdiomKind>().unwrap(), IdiomKind::Yaml);
        assert!("xml".parse::<IdiomKind>().is_err());
    }
}
