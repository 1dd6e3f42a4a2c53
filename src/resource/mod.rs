//! Per-model REST resources: configuration, derivation and request semantics.
//!
//! A `Resource` is immutable once built. Sub-resources are new resources built from
//! the parent's configuration with a conjoined filter and their own name.

mod methods;

use crate::coerce::Coercers;
use crate::config::validator::check_resource_columns;
use crate::error::{AppError, ConfigError, RestError};
use crate::filter::{Filter, Query};
use crate::keys::Keys;
use crate::method::Method;
use crate::response::Envelope;
use crate::schema::{Column, Table};
use crate::store::{Row, Store};
use crate::validation::{Field, ValidationFailure, Validator, Validators};
use crate::value::Value;
use axum::http::HeaderMap;
use serde_json::{json, Map, Value as Json};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// What an auth hook gets to decide on.
#[derive(Debug)]
pub struct AuthContext<'a> {
    pub resource: &'a str,
    pub method: Method,
    pub keys: &'a Keys,
    pub headers: &'a HeaderMap,
}

pub type AuthHook = Arc<dyn Fn(&AuthContext<'_>) -> Result<(), RestError> + Send + Sync>;

/// User code standing in for a verb. Decoding, auth and encoding still wrap it.
pub type VerbHandler = Arc<dyn Fn(&Resource, Option<&Json>, &Keys) -> Result<Envelope, AppError> + Send + Sync>;

/// Immutable resource configuration.
#[derive(Clone)]
pub struct ResourceDef {
    pub table: Table,
    pub name: String,
    pub methods: Vec<Method>,
    pub only: Option<Vec<String>>,
    pub exclude: Option<Vec<String>>,
    pub fixed: BTreeMap<String, Value>,
    pub defaults: BTreeMap<String, Value>,
    pub filter: Filter,
    pub allow_batch: bool,
    pub auth: Option<AuthHook>,
    pub read_auth: Option<AuthHook>,
    pub write_auth: Option<AuthHook>,
    pub validators: Validators,
    pub coercers: Arc<Coercers>,
    pub handlers: BTreeMap<Method, VerbHandler>,
}

impl fmt::Debug for ResourceDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDef")
            .field("model", &self.table.model())
            .field("name", &self.name)
            .field("methods", &self.methods)
            .field("only", &self.only)
            .field("exclude", &self.exclude)
            .field("fixed", &self.fixed)
            .field("defaults", &self.defaults)
            .field("filter", &self.filter)
            .field("allow_batch", &self.allow_batch)
            .field("validators", &self.validators)
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct Resource {
    def: Arc<ResourceDef>,
    store: Arc<dyn Store>,
    root_path: String,
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("path", &self.path())
            .field("def", &self.def)
            .finish()
    }
}

impl Resource {
    pub fn def(&self) -> &ResourceDef {
        &self.def
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn model(&self) -> String {
        self.def.table.model()
    }

    pub fn methods(&self) -> &[Method] {
        &self.def.methods
    }

    pub fn allow_batch(&self) -> bool {
        self.def.allow_batch
    }

    pub fn coercers(&self) -> &Coercers {
        &self.def.coercers
    }

    /// True iff every primary-key slot holds a value: the request targets one record.
    pub fn has(&self, keys: &Keys) -> bool {
        keys.has()
    }

    /// The narrowed collection query.
    pub fn query(&self) -> Query {
        Query::new(self.model(), self.def.filter.clone())
    }

    pub fn primary_keys(&self) -> Vec<&Column> {
        self.def.table.primary_keys()
    }

    fn selected(&self, column: &Column) -> bool {
        if let Some(only) = &self.def.only {
            return only.iter().any(|c| c == &column.name);
        }
        if let Some(exclude) = &self.def.exclude {
            return !exclude.iter().any(|c| c == &column.name);
        }
        true
    }

    /// Columns read and created: primary keys plus the selected non-key columns.
    pub fn columns(&self) -> Vec<Column> {
        self.def
            .table
            .columns
            .iter()
            .filter(|c| c.primary_key || self.selected(c))
            .cloned()
            .collect()
    }

    /// Columns an update may change. Never includes primary keys.
    pub fn writable(&self) -> Vec<Column> {
        self.def
            .table
            .columns
            .iter()
            .filter(|c| !c.primary_key && self.selected(c))
            .cloned()
            .collect()
    }

    /// `[schema, name]` when the resource keeps its table's name and the table has a schema.
    pub fn name_parts(&self) -> Vec<String> {
        match &self.def.table.schema {
            Some(schema) if self.def.name == self.def.table.name => {
                vec![schema.clone(), self.def.name.clone()]
            }
            _ => vec![self.def.name.clone()],
        }
    }

    pub fn path(&self) -> String {
        let mut path = self.root_path.trim_end_matches('/').to_string();
        for part in self.name_parts() {
            path.push('/');
            path.push_str(&part);
        }
        path
    }

    /// Coerce URL segments into key values with the key columns' converters.
    pub fn keys_from_strings(&self, raw: &HashMap<String, String>) -> Result<Keys, RestError> {
        let pks = self.primary_keys();
        let mut slots = Vec::with_capacity(pks.len());
        for column in pks {
            let value = match raw.get(&column.name) {
                Some(s) => {
                    let value = self
                        .def
                        .coercers
                        .deserialize_value(&column.type_tag, &Json::String(s.clone()))
                        .map_err(|e| e.at(&column.name))?;
                    Some(value)
                }
                None => None,
            };
            slots.push((column.name.clone(), value));
        }
        Ok(Keys::new(slots))
    }

    /// Runs `auth` first, then `read_auth` or `write_auth` depending on the method.
    pub fn authorize(&self, method: Method, keys: &Keys, headers: &HeaderMap) -> Result<(), RestError> {
        let ctx = AuthContext {
            resource: &self.def.name,
            method,
            keys,
            headers,
        };
        if let Some(auth) = &self.def.auth {
            auth(&ctx)?;
        }
        let scoped = if method.is_write() {
            &self.def.write_auth
        } else {
            &self.def.read_auth
        };
        if let Some(auth) = scoped {
            auth(&ctx)?;
        }
        Ok(())
    }

    /// Self-description served on OPTIONS.
    pub fn describe(&self) -> Json {
        let columns: Map<String, Json> = self
            .columns()
            .into_iter()
            .map(|c| (c.name, Json::String(c.type_tag.to_string())))
            .collect();
        let mut methods: Vec<&str> = self.def.methods.iter().map(Method::as_str).collect();
        methods.push("OPTIONS");
        json!({
            "model": self.model(),
            "name": self.def.name,
            "path": self.path(),
            "parameters": self.primary_keys().iter().map(|c| c.name.clone()).collect::<Vec<_>>(),
            "columns": columns,
            "methods": methods,
            "batch": self.def.allow_batch,
        })
    }

    /// Derive a resource narrowed by `filter`. The parent is left untouched.
    pub fn sub(&self, filter: Filter, name: Option<&str>) -> Resource {
        let mut def = (*self.def).clone();
        def.filter = self.def.filter.clone().and(filter);
        def.name = match name {
            Some(n) => n.to_string(),
            None => format!("sub{}", self.def.name),
        };
        Resource {
            def: Arc::new(def),
            store: Arc::clone(&self.store),
            root_path: self.root_path.clone(),
        }
    }

    fn blank_row(&self) -> Row {
        self.def
            .table
            .columns
            .iter()
            .map(|c| (c.name.clone(), Value::Null))
            .collect()
    }

    fn apply_defaults(&self, payload: &Map<String, Json>, row: &mut Row) {
        for (column, value) in &self.def.defaults {
            if !payload.contains_key(column) {
                row.set(column.clone(), value.clone());
            }
        }
    }

    fn apply_fixed(&self, row: &mut Row) {
        for (column, value) in &self.def.fixed {
            row.set(column.clone(), value.clone());
        }
    }
}

/// Collects a resource's configuration. `build` checks it against the table.
#[derive(Clone)]
pub struct ResourceBuilder {
    table: Table,
    name: Option<String>,
    methods: Vec<Method>,
    only: Option<Vec<String>>,
    exclude: Option<Vec<String>>,
    fixed: BTreeMap<String, Value>,
    defaults: BTreeMap<String, Value>,
    filter: Filter,
    allow_batch: bool,
    auth: Option<AuthHook>,
    read_auth: Option<AuthHook>,
    write_auth: Option<AuthHook>,
    validators: Validators,
    coercers: Option<Arc<Coercers>>,
    handlers: BTreeMap<Method, VerbHandler>,
}

impl ResourceBuilder {
    /// GET only, every column, no narrowing.
    pub fn new(table: Table) -> Self {
        ResourceBuilder {
            table,
            name: None,
            methods: vec![Method::Get],
            only: None,
            exclude: None,
            fixed: BTreeMap::new(),
            defaults: BTreeMap::new(),
            filter: Filter::All,
            allow_batch: false,
            auth: None,
            read_auth: None,
            write_auth: None,
            validators: Validators::default(),
            coercers: None,
            handlers: BTreeMap::new(),
        }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn methods(mut self, methods: &[Method]) -> Self {
        self.methods = Vec::new();
        for m in methods {
            if !self.methods.contains(m) {
                self.methods.push(*m);
            }
        }
        self
    }

    pub fn only<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.only = Some(columns.iter().map(|c| c.as_ref().to_string()).collect());
        self
    }

    pub fn exclude<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.exclude = Some(columns.iter().map(|c| c.as_ref().to_string()).collect());
        self
    }

    pub fn fixed(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fixed.insert(column.into(), value.into());
        self
    }

    pub fn default_value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.defaults.insert(column.into(), value.into());
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = self.filter.and(filter);
        self
    }

    pub fn allow_batch(mut self, allow: bool) -> Self {
        self.allow_batch = allow;
        self
    }

    pub fn auth<F>(mut self, f: F) -> Self
    where
        F: Fn(&AuthContext<'_>) -> Result<(), RestError> + Send + Sync + 'static,
    {
        self.auth = Some(Arc::new(f));
        self
    }

    pub fn read_auth<F>(mut self, f: F) -> Self
    where
        F: Fn(&AuthContext<'_>) -> Result<(), RestError> + Send + Sync + 'static,
    {
        self.read_auth = Some(Arc::new(f));
        self
    }

    pub fn write_auth<F>(mut self, f: F) -> Self
    where
        F: Fn(&AuthContext<'_>) -> Result<(), RestError> + Send + Sync + 'static,
    {
        self.write_auth = Some(Arc::new(f));
        self
    }

    pub fn validator<F>(mut self, column: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Field<'_>) -> Result<Value, ValidationFailure> + Send + Sync + 'static,
    {
        self.validators.insert(column, f);
        self
    }

    pub fn validator_arc(mut self, column: impl Into<String>, f: Validator) -> Self {
        self.validators.insert_arc(column, f);
        self
    }

    /// Replace the built-in handler for `method`; the method is served even if `methods` omits it.
    /// The handler may still call `Resource::get` and friends to reuse the default behavior.
    pub fn handler<F>(mut self, method: Method, f: F) -> Self
    where
        F: Fn(&Resource, Option<&Json>, &Keys) -> Result<Envelope, AppError> + Send + Sync + 'static,
    {
        self.handlers.insert(method, Arc::new(f));
        self
    }

    /// Converters for this resource only, replacing the api-wide registry.
    pub fn coercers(mut self, coercers: Arc<Coercers>) -> Self {
        self.coercers = Some(coercers);
        self
    }

    pub fn has_coercers(&self) -> bool {
        self.coercers.is_some()
    }

    pub fn build(
        self,
        store: Arc<dyn Store>,
        root_path: &str,
        coercers: Arc<Coercers>,
    ) -> Result<Resource, ConfigError> {
        let name = self.name.unwrap_or_else(|| self.table.name.clone());
        check_resource_columns(
            &name,
            &self.table,
            self.only.as_deref(),
            self.exclude.as_deref(),
            self.fixed.keys().map(String::as_str),
            self.defaults.keys().map(String::as_str),
            self.validators.columns(),
        )?;
        let mut methods = self.methods;
        for method in self.handlers.keys() {
            if !methods.contains(method) {
                methods.push(*method);
            }
        }
        let def = ResourceDef {
            table: self.table,
            name,
            methods,
            only: self.only,
            exclude: self.exclude,
            fixed: self.fixed,
            defaults: self.defaults,
            filter: self.filter,
            allow_batch: self.allow_batch,
            auth: self.auth,
            read_auth: self.read_auth,
            write_auth: self.write_auth,
            validators: self.validators,
            coercers: self.coercers.unwrap_or(coercers),
            handlers: self.handlers,
        };
        Ok(Resource {
            def: Arc::new(def),
            store,
            root_path: root_path.to_string(),
        })
    }
}
