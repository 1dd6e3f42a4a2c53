//! Web framework seam. Resources hand the framework a path, a verb, the key names and a
//! synchronous handler; the framework owns routing, threading and the wire.

mod axum;

pub use self::axum::AxumFramework;

use crate::error::AppError;
use crate::method::Method;
use ::axum::body::Bytes;
use ::axum::http::{HeaderMap, HeaderValue, StatusCode};
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::Arc;

/// What a handler needs from one HTTP request. `keys` holds the raw path segments by key name.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub method: Method,
    pub keys: HashMap<String, String>,
    pub body: Bytes,
    pub headers: HeaderMap,
}

/// Encoded response, ready for the wire.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RawResponse {
    pub fn new(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(::axum::http::header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        RawResponse {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn json(status: StatusCode, value: &Json) -> Result<Self, AppError> {
        let body = serde_json::to_vec(value).map_err(|e| AppError::Encode(e.to_string()))?;
        Ok(RawResponse::new(status, "application/json", body))
    }
}

pub type RouteHandler = Arc<dyn Fn(RouteRequest) -> Result<RawResponse, AppError> + Send + Sync>;

/// Builds the description served on OPTIONS.
pub type DescribeFn = Arc<dyn Fn() -> Json + Send + Sync>;

pub trait Framework {
    /// Route prefix without slashes, used in route names.
    fn prefix(&self) -> &str;

    /// Mount `handler` for `method` on `path` and on `path/<key>/<key>...`.
    fn register_route(&mut self, path: &str, method: Method, key_names: &[String], handler: RouteHandler);

    /// Mount an OPTIONS responder on `path` (and its keyed form when `key_names` is not empty).
    fn register_options(&mut self, path: &str, key_names: &[String], describe: DescribeFn);

    /// Unique route name for diagnostics.
    fn route_name(&self, name: &str) -> String {
        format!("autocrud__{}__{}", self.prefix(), name)
    }
}
