//! The registry: turns models into resources and resources into routes.

use crate::coerce::Coercers;
use crate::config::{validate_resource_config, ApiSettings, ResourceConfig};
use crate::dispatch::dispatch;
use crate::error::{ConfigError, StoreError};
use crate::filter::Filter;
use crate::framework::{AxumFramework, DescribeFn, Framework, RouteHandler};
use crate::idiom::Idiom;
use crate::resource::{Resource, ResourceBuilder};
use crate::store::Store;
use crate::validation::compile_rule;
use crate::value::Value;
use axum::Router;
use serde_json::{Map, Value as Json};
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct RestApi<F: Framework> {
    store: Arc<dyn Store>,
    framework: F,
    idiom: Arc<dyn Idiom>,
    settings: ApiSettings,
    coercers: Arc<Coercers>,
    resources: Vec<Resource>,
}

impl<F: Framework> RestApi<F> {
    /// Idiom comes from `settings`; converters are the built-in set.
    pub fn new(store: Arc<dyn Store>, framework: F, settings: ApiSettings) -> Self {
        RestApi {
            store,
            framework,
            idiom: settings.idiom.build(),
            settings,
            coercers: Arc::new(Coercers::builtin()),
            resources: Vec::new(),
        }
    }

    pub fn with_idiom(mut self, idiom: Arc<dyn Idiom>) -> Self {
        self.idiom = idiom;
        self
    }

    /// Replace the api-wide converter registry. Resources built afterwards use it.
    pub fn with_coercers(mut self, coercers: Coercers) -> Self {
        self.coercers = Arc::new(coercers);
        self
    }

    pub fn settings(&self) -> &ApiSettings {
        &self.settings
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    /// Start configuring a resource over `model` (`name` or `schema.name`).
    pub fn resource(&self, model: &str) -> Result<ResourceBuilder, ConfigError> {
        let table = self.store.table(model).map_err(|e| match e {
            StoreError::UnknownModel(m) => ConfigError::UnknownModel(m),
            other => ConfigError::Store(other),
        })?;
        Ok(ResourceBuilder::new(table))
    }

    /// Build and mount a resource: one route per method plus OPTIONS.
    pub fn register(&mut self, builder: ResourceBuilder) -> Result<Resource, ConfigError> {
        let resource = builder.build(Arc::clone(&self.store), &self.settings.root(), Arc::clone(&self.coercers))?;
        self.mount(resource)
    }

    /// Derive a narrowed resource from `parent` and mount it. `name` defaults to `sub<parent>`.
    pub fn sub(&mut self, parent: &Resource, filter: Filter, name: Option<&str>) -> Result<Resource, ConfigError> {
        self.mount(parent.sub(filter, name))
    }

    /// Register from declarative config. Fixed and default values go through the column converters.
    pub fn register_config(&mut self, cfg: &ResourceConfig) -> Result<Resource, ConfigError> {
        let mut builder = self.resource(&cfg.model)?;
        validate_resource_config(cfg, builder.table())?;
        let name = cfg.name.clone().unwrap_or_else(|| builder.table().name.clone());
        let fixed = self.config_values(&name, builder.table(), &cfg.fixed, "fixed")?;
        let defaults = self.config_values(&name, builder.table(), &cfg.defaults, "defaults")?;

        if let Some(n) = &cfg.name {
            builder = builder.name(n.clone());
        }
        builder = builder.methods(&cfg.methods).allow_batch(cfg.allow_batch);
        if let Some(only) = &cfg.only {
            builder = builder.only(only.as_slice());
        }
        if let Some(exclude) = &cfg.exclude {
            builder = builder.exclude(exclude.as_slice());
        }
        for (column, value) in fixed {
            builder = builder.fixed(column, value);
        }
        for (column, value) in defaults {
            builder = builder.default_value(column, value);
        }
        for (column, rule) in &cfg.validation {
            builder = builder.validator_arc(column.clone(), compile_rule(column, rule)?);
        }
        self.register(builder)
    }

    /// Every resource description keyed by path.
    pub fn describe(&self) -> Json {
        describe_all(&self.resources)
    }

    pub fn into_framework(self) -> F {
        self.framework
    }

    fn config_values(
        &self,
        resource: &str,
        table: &crate::schema::Table,
        values: &BTreeMap<String, Json>,
        context: &'static str,
    ) -> Result<Vec<(String, Value)>, ConfigError> {
        let mut out = Vec::with_capacity(values.len());
        for (column, data) in values {
            let Some(c) = table.column_named(column) else {
                return Err(ConfigError::UnknownColumn {
                    resource: resource.to_string(),
                    column: column.clone(),
                    context,
                });
            };
            let value = self
                .coercers
                .deserialize_value(&c.type_tag, data)
                .map_err(|e| ConfigError::InvalidValue {
                    resource: resource.to_string(),
                    column: column.clone(),
                    context,
                    message: e.to_string(),
                })?;
            out.push((column.clone(), value));
        }
        Ok(out)
    }

    fn mount(&mut self, resource: Resource) -> Result<Resource, ConfigError> {
        for (column, tag) in resource.coercers().missing(&resource.columns()) {
            tracing::warn!(
                resource = %resource.name(),
                column = %column,
                type_tag = %tag,
                "no converter registered for type; values pass through unconverted"
            );
        }
        let path = resource.path();
        let key_names: Vec<String> = resource.primary_keys().iter().map(|c| c.name.clone()).collect();
        let parts = resource.name_parts().join("_");
        for method in resource.methods().to_vec() {
            let route_name = self.framework.route_name(&format!("{}_{}", method, parts));
            tracing::info!(route = %route_name, method = %method, path = %path, "registering route");
            let target = resource.clone();
            let idiom = Arc::clone(&self.idiom);
            let empty_get_as_404 = self.settings.empty_get_as_404;
            let handler: RouteHandler =
                Arc::new(move |request| dispatch(&target, idiom.as_ref(), empty_get_as_404, request));
            self.framework.register_route(&path, method, &key_names, handler);
        }
        let described = resource.clone();
        let describe: DescribeFn = Arc::new(move || described.describe());
        self.framework.register_options(&path, &key_names, describe);
        self.resources.push(resource.clone());
        Ok(resource)
    }
}

impl RestApi<AxumFramework> {
    /// The router for every registered resource. `OPTIONS <root>` lists them all.
    pub fn into_router(mut self) -> Router {
        let described = self.resources.clone();
        let describe: DescribeFn = Arc::new(move || describe_all(&described));
        let root = self.settings.root();
        let root = if root.is_empty() { "/".to_string() } else { root };
        self.framework.register_options(&root, &[], describe);
        self.framework.into_router()
    }
}

fn describe_all(resources: &[Resource]) -> Json {
    let map: Map<String, Json> = resources.iter().map(|r| (r.path(), r.describe())).collect();
    Json::Object(map)
}
