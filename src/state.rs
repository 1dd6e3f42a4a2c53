//! Shared state for the common routes.

use crate::config::ApiSettings;
use crate::store::Store;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub settings: ApiSettings,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, settings: ApiSettings) -> Self {
        AppState { store, settings }
    }
}
