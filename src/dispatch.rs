//! Request pipeline around a resource verb: keys, body, auth, verb, encoding.
//!
//! Business errors (`AppError::Rest`) become error payloads here. Everything else is
//! returned to the framework adapter untouched.

use crate::error::AppError;
use crate::framework::{RawResponse, RouteRequest};
use crate::idiom::Idiom;
use crate::resource::Resource;
use crate::response::Envelope;

pub fn dispatch(
    resource: &Resource,
    idiom: &dyn Idiom,
    empty_get_as_404: bool,
    request: RouteRequest,
) -> Result<RawResponse, AppError> {
    let method = request.method;
    match run(resource, idiom, &request) {
        Ok(envelope) => idiom.encode(&envelope.into_value(), method, axum::http::StatusCode::OK, empty_get_as_404),
        Err(AppError::Rest(e)) => {
            tracing::debug!(resource = %resource.name(), method = %method, status = %e.status(), error = %e, "rest error");
            idiom.encode(&e.body(), method, e.status(), false)
        }
        Err(other) => Err(other),
    }
}

fn run(resource: &Resource, idiom: &dyn Idiom, request: &RouteRequest) -> Result<Envelope, AppError> {
    let keys = resource.keys_from_strings(&request.keys)?;
    let payload = idiom.decode(&request.body)?;
    resource.authorize(request.method, &keys, &request.headers)?;
    resource.handle(request.method, payload.as_ref(), &keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RestError;
    use crate::idiom::{JsonIdiom, YamlIdiom};
    use crate::method::Method;
    use crate::resource::tests::tree;
    use axum::body::Bytes;
    use axum::http::{HeaderMap, StatusCode};
    use serde_json::{json, Value};
    use std::collections::HashMap;

    fn request(method: Method, id: Option<&str>, body: &str) -> RouteRequest {
        let mut keys = HashMap::new();
        if let Some(id) = id {
            keys.insert("id".to_string(), id.to_string());
        }
        RouteRequest {
            method,
            keys,
            body: Bytes::from(body.to_string()),
            headers: HeaderMap::new(),
        }
    }

    fn body(r: &RawResponse) -> Value {
        serde_json::from_slice(&r.body).unwrap()
    }

    #[test]
    fn test_not_found_becomes_payload() {
        let r = tree(|b| b);
        let resp = dispatch(&r, &JsonIdiom, false, request(Method::Get, Some("6"), "")).unwrap();
        assert_eq!(resp.status, StatusCode::NOT_FOUND);
        assert_eq!(body(&resp), json!({"message": "tree(id=6) not found"}));
    }

    #[test]
    fn test_bad_payload_and_bad_key_are_400() {
        let r = tree(|b| b.methods(&[Method::Get, Method::Put]));
        let resp = dispatch(&r, &JsonIdiom, false, request(Method::Put, Some("1"), "{nope")).unwrap();
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
        let resp = dispatch(&r, &JsonIdiom, false, request(Method::Get, Some("x"), "")).unwrap();
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_batch_not_allowed_propagates() {
        let r = tree(|b| b.methods(&[Method::Delete]));
        let err = dispatch(&r, &JsonIdiom, false, request(Method::Delete, None, "")).unwrap_err();
        assert!(matches!(err, AppError::BatchNotAllowed(_)));
    }

    #[test]
    fn test_auth_runs_before_verb() {
        let r = tree(|b| b.auth(|_| Err(RestError::Unauthorized("Unauthorized".into()))));
        let resp = dispatch(&r, &JsonIdiom, false, request(Method::Get, Some("6"), "")).unwrap();
        assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_empty_collection_as_404() {
        let r = tree(|b| b.allow_batch(true));
        dispatch(&r, &JsonIdiom, true, request(Method::Delete, None, "")).unwrap();
        let resp = dispatch(&r, &JsonIdiom, true, request(Method::Get, None, "")).unwrap();
        assert_eq!(resp.status, StatusCode::NOT_FOUND);
        assert_eq!(body(&resp), json!({"occurences": 0, "objects": []}));
    }

    #[test]
    fn test_yaml_idiom() {
        let r = tree(|b| b.methods(&[Method::Get, Method::Put]));
        let resp = dispatch(&r, &YamlIdiom, false, request(Method::Put, Some("2"), "name: elm\n")).unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.headers["content-type"], "text/yaml");
        let decoded: Value = serde_yaml::from_slice(&resp.body).unwrap();
        assert_eq!(decoded["objects"][0]["name"], "elm");
        assert_eq!(decoded["objects"][0]["height"], 15.5);
    }
}
