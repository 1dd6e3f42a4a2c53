#![allow(dead_code)]

use autocrud::{
    ApiSettings, AxumFramework, Column, MemoryStore, RestApi, Row, Table, TypeTag,
};
use axum::body::{to_bytes, Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use serde_json::Value as Json;
use std::sync::Arc;
use tower::ServiceExt;

/// `tree` (pine, maple, oak) and an empty `fruit` table.
pub fn store() -> Arc<MemoryStore> {
    let store = MemoryStore::new()
        .with_table(
            Table::new("tree")
                .column(Column::primary("id", TypeTag::Integer))
                .column(Column::new("name", TypeTag::String))
                .column(Column::new("height", TypeTag::Float)),
        )
        .with_table(
            Table::new("fruit")
                .column(Column::primary("fruit_id", TypeTag::Integer))
                .column(Column::new("color", TypeTag::String))
                .column(Column::new("size", TypeTag::Numeric))
                .column(Column::new("age", TypeTag::Interval))
                .column(Column::new("tree_id", TypeTag::Integer)),
        );
    store
        .insert(
            "tree",
            vec![
                Row::default().with("id", 1).with("name", "pine").with("height", 20.0),
                Row::default().with("id", 2).with("name", "maple").with("height", 15.5),
                Row::default().with("id", 3).with("name", "oak").with("height", 30.0),
            ],
        )
        .expect("seed trees");
    Arc::new(store)
}

pub fn api_with(settings: ApiSettings) -> RestApi<AxumFramework> {
    let framework = AxumFramework::new(&settings.root());
    RestApi::new(store(), framework, settings)
}

pub fn api() -> RestApi<AxumFramework> {
    api_with(ApiSettings::default())
}

pub async fn send_raw(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, HeaderMap, Bytes) {
    send_with(app, method, uri, body, &[]).await
}

pub async fn send_with(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<&str>,
    headers: &[(&str, &str)],
) -> (StatusCode, HeaderMap, Bytes) {
    let mut req = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        req = req.header(*name, *value);
    }
    let req = req
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, headers, bytes)
}

/// JSON body, or `Json::Null` when the body is empty.
pub async fn send(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Json) {
    let (status, _, bytes) = send_raw(app, method, uri, body).await;
    let json = if bytes.is_empty() {
        Json::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

pub fn names(body: &Json) -> Vec<String> {
    body["objects"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["name"].as_str().unwrap().to_string())
        .collect()
}
