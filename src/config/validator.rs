//! Registration-time checks: column references and field policies.

use crate::config::types::ResourceConfig;
use crate::error::ConfigError;
use crate::schema::Table;

/// Every named column must exist; `only` and `exclude` exclude each other;
/// fixed and default values may not target primary keys.
pub fn check_resource_columns<'a>(
    resource: &str,
    table: &Table,
    only: Option<&[String]>,
    exclude: Option<&[String]>,
    fixed: impl IntoIterator<Item = &'a str>,
    defaults: impl IntoIterator<Item = &'a str>,
    validators: impl IntoIterator<Item = &'a str>,
) -> Result<(), ConfigError> {
    if only.is_some() && exclude.is_some() {
        return Err(ConfigError::OnlyAndExclude {
            resource: resource.to_string(),
        });
    }
    let known = |column: &str, context: &'static str| -> Result<bool, ConfigError> {
        match table.column_named(column) {
            Some(c) => Ok(c.primary_key),
            None => Err(ConfigError::UnknownColumn {
                resource: resource.to_string(),
                column: column.to_string(),
                context,
            }),
        }
    };
    for column in only.unwrap_or_default() {
        known(column, "only")?;
    }
    for column in exclude.unwrap_or_default() {
        known(column, "exclude")?;
    }
    for (columns, context) in [
        (fixed.into_iter().collect::<Vec<_>>(), "fixed"),
        (defaults.into_iter().collect::<Vec<_>>(), "defaults"),
    ] {
        for column in columns {
            if known(column, context)? {
                return Err(ConfigError::PrimaryKeyField {
                    resource: resource.to_string(),
                    column: column.to_string(),
                    context,
                });
            }
        }
    }
    for column in validators {
        known(column, "validators")?;
    }
    Ok(())
}

pub fn validate_resource_config(cfg: &ResourceConfig, table: &Table) -> Result<(), ConfigError> {
    let name = cfg.name.as_deref().unwrap_or(&table.name);
    check_resource_columns(
        name,
        table,
        cfg.only.as_deref(),
        cfg.exclude.as_deref(),
        cfg.fixed.keys().map(String::as_str),
        cfg.defaults.keys().map(String::as_str),
        cfg.validation.keys().map(String::as_str),
    )
}
