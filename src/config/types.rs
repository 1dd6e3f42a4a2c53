//! Declarative resource config, loadable from JSON (see `load_resource_configs`).

use crate::method::Method;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub use crate::idiom::IdiomKind;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// `name` or `schema.name`.
    pub model: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_methods")]
    pub methods: Vec<Method>,
    #[serde(default)]
    pub only: Option<Vec<String>>,
    #[serde(default)]
    pub exclude: Option<Vec<String>>,
    #[serde(default)]
    pub allow_batch: bool,
    /// Wire values, deserialized with the column converters at registration.
    #[serde(default)]
    pub fixed: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub defaults: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub validation: HashMap<String, ValidationRule>,
}

impl ResourceConfig {
    pub fn new(model: impl Into<String>) -> Self {
        ResourceConfig {
            model: model.into(),
            name: None,
            methods: default_methods(),
            only: None,
            exclude: None,
            allow_batch: false,
            fixed: BTreeMap::new(),
            defaults: BTreeMap::new(),
            validation: HashMap::new(),
        }
    }
}

fn default_methods() -> Vec<Method> {
    vec![Method::Get]
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
}
