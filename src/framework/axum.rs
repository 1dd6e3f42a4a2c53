//! axum adapter: collects routes, then builds one `Router`.

use super::{DescribeFn, Framework, RawResponse, RouteHandler, RouteRequest};
use crate::method::Method;
use crate::response::error_body;
use axum::{
    body::Bytes,
    extract::Path,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{on, MethodFilter, MethodRouter},
    Json, Router,
};
use std::collections::{BTreeMap, HashMap};
use tower_http::limit::RequestBodyLimitLayer;

const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

#[derive(Default)]
struct PathRoutes {
    key_names: Vec<String>,
    handlers: BTreeMap<Method, RouteHandler>,
    describe: Option<DescribeFn>,
}

pub struct AxumFramework {
    prefix: String,
    paths: BTreeMap<String, PathRoutes>,
    body_limit: usize,
}

impl AxumFramework {
    /// `prefix` is the api root path; it only feeds route names.
    pub fn new(prefix: &str) -> Self {
        AxumFramework {
            prefix: prefix.trim_matches('/').replace('/', "_"),
            paths: BTreeMap::new(),
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    pub fn with_body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }

    /// Every registered path, bare and keyed, with its verbs.
    pub fn into_router(self) -> Router {
        let mut router = Router::new();
        for (path, routes) in self.paths {
            if let Some(bare) = method_router(&routes, false) {
                router = router.route(&path, bare);
            }
            if routes.key_names.is_empty() {
                continue;
            }
            if let Some(keyed) = method_router(&routes, true) {
                let keyed_path = format!("{}/:{}", path, routes.key_names.join("/:"));
                router = router.route(&keyed_path, keyed);
            }
        }
        router.layer(RequestBodyLimitLayer::new(self.body_limit))
    }
}

impl Framework for AxumFramework {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn register_route(&mut self, path: &str, method: Method, key_names: &[String], handler: RouteHandler) {
        let routes = self.paths.entry(path.to_string()).or_default();
        routes.key_names = key_names.to_vec();
        if routes.handlers.insert(method, handler).is_some() {
            tracing::info!(path = %path, method = %method, "Overriding route");
        }
    }

    fn register_options(&mut self, path: &str, key_names: &[String], describe: DescribeFn) {
        let routes = self.paths.entry(path.to_string()).or_default();
        if !key_names.is_empty() {
            routes.key_names = key_names.to_vec();
        }
        if routes.describe.replace(describe).is_some() {
            tracing::info!(path = %path, method = "OPTIONS", "Overriding route");
        }
    }
}

fn method_filter(method: Method) -> MethodFilter {
    match method {
        Method::Get => MethodFilter::GET,
        Method::Put => MethodFilter::PUT,
        Method::Post => MethodFilter::POST,
        Method::Delete => MethodFilter::DELETE,
    }
}

fn method_router(routes: &PathRoutes, keyed: bool) -> Option<MethodRouter> {
    let mut router: Option<MethodRouter> = None;
    for (method, handler) in &routes.handlers {
        let route = if keyed {
            keyed_handler(*method, handler.clone())
        } else {
            bare_handler(*method, handler.clone())
        };
        router = Some(match router {
            Some(r) => r.merge(route),
            None => route,
        });
    }
    if let Some(describe) = &routes.describe {
        let describe = describe.clone();
        let options = on(MethodFilter::OPTIONS, move || {
            let describe = describe.clone();
            async move { Json(describe()).into_response() }
        });
        router = Some(match router {
            Some(r) => r.merge(options),
            None => options,
        });
    }
    router
}

fn bare_handler(method: Method, handler: RouteHandler) -> MethodRouter {
    on(method_filter(method), move |headers: HeaderMap, body: Bytes| {
        let handler = handler.clone();
        async move {
            run(
                handler,
                RouteRequest {
                    method,
                    keys: HashMap::new(),
                    body,
                    headers,
                },
            )
            .await
        }
    })
}

fn keyed_handler(method: Method, handler: RouteHandler) -> MethodRouter {
    on(
        method_filter(method),
        move |Path(keys): Path<HashMap<String, String>>, headers: HeaderMap, body: Bytes| {
            let handler = handler.clone();
            async move {
                run(
                    handler,
                    RouteRequest {
                        method,
                        keys,
                        body,
                        headers,
                    },
                )
                .await
            }
        },
    )
}

/// Resource handlers block on the store, so they run off the async workers.
async fn run(handler: RouteHandler, request: RouteRequest) -> Response {
    match tokio::task::spawn_blocking(move || handler(request)).await {
        Ok(Ok(raw)) => raw.into_response(),
        Ok(Err(e)) => e.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "handler task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(error_body("Internal server error".into(), None)),
            )
                .into_response()
        }
    }
}

impl IntoResponse for RawResponse {
    fn into_response(self) -> Response {
        (self.status, self.headers, self.body).into_response()
    }
}
