//! Api-wide settings, from code or environment.

use crate::error::ConfigError;
use crate::idiom::IdiomKind;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_root_path")]
    pub root_path: String,
    /// Appended to `root_path` when non-empty, e.g. `v1`.
    #[serde(default)]
    pub version: String,
    /// GET envelopes with zero occurences answer 404.
    #[serde(default)]
    pub empty_get_as_404: bool,
    #[serde(default)]
    pub idiom: IdiomKind,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub database_url: Option<String>,
}

fn default_root_path() -> String {
    "/api".into()
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".into()
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            root_path: default_root_path(),
            version: String::new(),
            empty_get_as_404: false,
            idiom: IdiomKind::default(),
            bind_addr: default_bind_addr(),
            database_url: None,
        }
    }
}

impl ApiSettings {
    /// Reads `AUTOCRUD_ROOT`, `AUTOCRUD_VERSION`, `AUTOCRUD_EMPTY_GET_AS_404`,
    /// `AUTOCRUD_IDIOM`, `BIND_ADDR` and `DATABASE_URL`, after loading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = ApiSettings::default();
        if let Some(root) = lookup("AUTOCRUD_ROOT") {
            settings.root_path = root;
        }
        if let Some(version) = lookup("AUTOCRUD_VERSION") {
            settings.version = version;
        }
        if let Some(flag) = lookup("AUTOCRUD_EMPTY_GET_AS_404") {
            settings.empty_get_as_404 = parse_flag(&flag)
                .ok_or_else(|| ConfigError::Load(format!("AUTOCRUD_EMPTY_GET_AS_404: not a boolean: {}", flag)))?;
        }
        if let Some(idiom) = lookup("AUTOCRUD_IDIOM") {
            settings.idiom = idiom
                .parse()
                .map_err(|e| ConfigError::Load(format!("AUTOCRUD_IDIOM: {}", e)))?;
        }
        if let Some(addr) = lookup("BIND_ADDR") {
            settings.bind_addr = addr;
        }
        settings.database_url = lookup("DATABASE_URL");
        Ok(settings)
    }

    /// Route root: `root_path` joined with `version`, without a trailing slash.
    pub fn root(&self) -> String {
        let root = self.root_path.trim_end_matches('/');
        let version = self.version.trim_matches('/');
        if version.is_empty() {
            root.to_string()
        } else {
            format!("{}/{}", root, version)
        }
    }
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
