//! Declarative validation rules from resource config, compiled into validators.

use super::{Field, ValidationFailure, Validator};
use crate::config::ValidationRule;
use crate::error::ConfigError;
use crate::value::Value;
use regex::Regex;
use std::sync::Arc;

/// Build a validator for `column`. Patterns are compiled here, so a bad regex is a config error.
pub fn compile_rule(column: &str, rule: &ValidationRule) -> Result<Validator, ConfigError> {
    let pattern = match &rule.pattern {
        Some(p) => Some(Regex::new(p).map_err(|e| ConfigError::Rule {
            column: column.to_string(),
            message: format!("invalid pattern: {}", e),
        })?),
        None => None,
    };
    if let Some(format) = &rule.format {
        if !matches!(format.to_lowercase().as_str(), "email" | "uuid") {
            return Err(ConfigError::Rule {
                column: column.to_string(),
                message: format!("unknown format '{}'", format),
            });
        }
    }
    let allowed: Option<Vec<Value>> = rule
        .allowed
        .as_ref()
        .map(|values| values.iter().map(Value::from_json_lossy).collect());
    let rule = rule.clone();
    Ok(Arc::new(move |field: &Field<'_>| {
        check(field, &rule, pattern.as_ref(), allowed.as_deref())?;
        Ok(field.value.clone())
    }))
}

fn check(
    field: &Field<'_>,
    rule: &ValidationRule,
    pattern: Option<&Regex>,
    allowed: Option<&[Value]>,
) -> Result<(), ValidationFailure> {
    let col = field.name;
    let v = field.value;
    if v.is_null() {
        if rule.required == Some(true) {
            return Err(ValidationFailure(format!("{} is required", col)));
        }
        return Ok(());
    }
    if let (Some(format), Some(s)) = (&rule.format, v.as_str()) {
        match format.to_lowercase().as_str() {
            "email" if !s.contains('@') || s.len() < 3 => {
                return Err(ValidationFailure(format!("{} must be a valid email", col)));
            }
            "uuid" if uuid::Uuid::parse_str(s).is_err() => {
                return Err(ValidationFailure(format!("{} must be a valid UUID", col)));
            }
            _ => {}
        }
    }
    if let Some(s) = v.as_str() {
        let len = s.chars().count();
        if let Some(max) = rule.max_length {
            if len > max as usize {
                return Err(ValidationFailure(format!("{} must be at most {} characters", col, max)));
            }
        }
        if let Some(min) = rule.min_length {
            if len < min as usize {
                return Err(ValidationFailure(format!("{} must be at least {} characters", col, min)));
            }
        }
        if let Some(re) = pattern {
            if !re.is_match(s) {
                return Err(ValidationFailure(format!("{} does not match required pattern", col)));
            }
        }
    }
    if let Some(allowed) = allowed {
        if !allowed.iter().any(|a| a.same_as(v)) {
            let shown: Vec<String> = allowed.iter().take(5).map(|a| a.to_string()).collect();
            return Err(ValidationFailure(format!("{} must be one of: [{}]", col, shown.join(", "))));
        }
    }
    if let Some(n) = v.as_f64() {
        if let Some(min) = rule.minimum {
            if n < min {
                return Err(ValidationFailure(format!("{} must be at least {}", col, min)));
            }
        }
        if let Some(max) = rule.maximum {
            if n > max {
                return Err(ValidationFailure(format!("{} must be at most {}", col, max)));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use serde_json::json;

    fn run(rule: &ValidationRule, value: Value) -> Result<Value, ValidationFailure> {
        let validator = compile_rule("col", rule).unwrap();
        validator(&Field {
            name: "col",
            value: &value,
            old_value: None,
        })
    }

    #[test]
    fn test_required_and_lengths() {
        let rule = ValidationRule {
            required: Some(true),
            min_length: Some(2),
            max_length: Some(4),
            ..Default::default()
        };
        assert_eq!(run(&rule, Value::Null).unwrap_err().0, "col is required");
        assert!(run(&rule, Value::from("a")).is_err());
        assert!(run(&rule, Value::from("abcde")).is_err());
        assert_eq!(run(&rule, Value::from("abc")).unwrap(), Value::from("abc"));
    }

    #[test]
    fn test_range_applies_to_decimals() {
        let rule = ValidationRule {
            minimum: Some(0.0),
            maximum: Some(50.0),
            ..Default::default()
        };
        assert!(run(&rule, Value::Decimal(Decimal::new(212, 2))).is_ok());
        assert_eq!(
            run(&rule, Value::Decimal(Decimal::new(1000, 1))).unwrap_err().0,
            "col must be at most 50"
        );
    }

    #[test]
    fn test_allowed_and_pattern() {
        let rule = ValidationRule {
            allowed: Some(vec![json!("red"), json!("green")]),
            pattern: Some("^[a-z]+$".into()),
            ..Default::default()
        };
        assert!(run(&rule, Value::from("red")).is_ok());
        assert_eq!(
            run(&rule, Value::from("blue")).unwrap_err().0,
            "col must be one of: ['red', 'green']"
        );
        assert!(run(&rule, Value::from("Red")).is_err());
    }

    #[test]
    fn test_bad_rules_fail_at_compile_time() {
        let bad_pattern = ValidationRule {
            pattern: Some("(".into()),
            ..Default::default()
        };
        assert!(matches!(compile_rule("col", &bad_pattern), Err(ConfigError::Rule { .. })));
        let bad_format = ValidationRule {
            format: Some("phone".into()),
            ..Default::default()
        };
        assert!(compile_rule("col", &bad_format).is_err());
    }
}
