//! Example consumer: a separate Rust project that uses autocrud as a dependency.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! Or from this directory: `cargo run`

use autocrud::{
    common_routes_with_ready, ApiSettings, AppState, AxumFramework, Column, Filter, MemoryStore, Method,
    RestApi, RestError, Row, Table, TypeTag, ValidationFailure,
};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("autocrud=info")),
        )
        .init();

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
                .column(Column::new("tree_id", TypeTag::Integer)),
        );
    store.insert(
        "tree",
        vec![
            Row::default().with("id", 1).with("name", "pine").with("height", 20.0),
            Row::default().with("id", 2).with("name", "maple").with("height", 15.5),
        ],
    )?;
    let store = Arc::new(store);
    let settings = ApiSettings::from_env()?;

    let mut api = RestApi::new(store.clone(), AxumFramework::new(&settings.root()), settings.clone());
    let tree = api
        .resource("tree")?
        .methods(&Method::ALL)
        .allow_batch(true)
        .validator("name", |field| match field.value.as_str() {
            Some(name) if !name.trim().is_empty() => Ok(field.value.clone()),
            _ => Err(ValidationFailure::new("Name must not be empty")),
        });
    let tree = api.register(tree)?;
    api.sub(&tree, Filter::gt("height", 18.0), Some("tall"))?;

    let blue = api
        .resource("fruit")?
        .name("blueberry")
        .methods(&[Method::Get, Method::Post, Method::Put])
        .fixed("color", "blue")
        .write_auth(|ctx| match ctx.headers.get("x-api-key") {
            Some(_) => Ok(()),
            None => Err(RestError::Unauthorized("Unauthorized".into())),
        });
    api.register(blue)?;

    let app = Router::new()
        .merge(common_routes_with_ready(AppState::new(store, settings.clone())))
        .merge(api.into_router());
    let listener = TcpListener::bind("127.0.0.1:3000").await?;
    let port = listener.local_addr()?.port();
    tracing::info!("Example consumer listening on http://127.0.0.1:{}", port);
    axum::serve(listener, app).await?;
    Ok(())
}
