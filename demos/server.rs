//! Example server: connects to PostgreSQL, registers resources from `RESOURCES_PATH`
//! (a JSON list of resource configs, default `resources.json`), mounts common routes.

use autocrud::{
    common_routes_with_ready, load_resource_configs, ApiSettings, AppState, AxumFramework, PgStore, RestApi,
};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = ApiSettings::from_env()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("autocrud=info".parse()?))
        .init();

    let database_url = settings
        .database_url
        .clone()
        .unwrap_or_else(|| "postgres://localhost/autocrud".into());
    let store = Arc::new(PgStore::connect(&database_url).await?);

    let resources_path = std::env::var("RESOURCES_PATH").unwrap_or_else(|_| "resources.json".into());
    let configs = load_resource_configs(&resources_path)?;

    let mut api = RestApi::new(store.clone(), AxumFramework::new(&settings.root()), settings.clone());
    for cfg in &configs {
        let resource = api.register_config(cfg)?;
        tracing::info!(resource = %resource.name(), path = %resource.path(), "resource ready");
    }

    let app = Router::new()
        .merge(common_routes_with_ready(AppState::new(store, settings.clone())))
        .merge(api.into_router());

    let listener = TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
