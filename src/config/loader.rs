//! Load declarative resource configs from disk.

use crate::config::types::ResourceConfig;
use crate::error::ConfigError;
use std::path::Path;

/// Read a JSON array of resource configs.
pub fn load_resource_configs(path: impl AsRef<Path>) -> Result<Vec<ResourceConfig>, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    parse_resource_configs(&text).map_err(|e| match e {
        ConfigError::Load(msg) => ConfigError::Load(format!("{}: {}", path.display(), msg)),
        other => other,
    })
}

pub fn parse_resource_configs(text: &str) -> Result<Vec<ResourceConfig>, ConfigError> {
    let configs: Vec<ResourceConfig> = serde_json::from_str(text).map_err(|e| ConfigError::Load(e.to_string()))?;
    tracing::debug!(count = configs.len(), "resource configs loaded");
    Ok(configs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        let configs = parse_resource_configs(r#"[{"model": "tree"}, {"model": "fruit", "methods": ["GET", "PUT"]}]"#).unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[1].model, "fruit");
    }

    #[test]
    fn test_unknown_method_is_load_error() {
        let err = parse_resource_configs(r#"[{"model": "tree", "methods": ["PATCH"]}]"#).unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = load_resource_configs("/nonexistent/autocrud.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/autocrud.json"));
    }
}
