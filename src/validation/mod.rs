//! Per-field validators and the all-or-nothing aggregation pass that runs before commit.

mod rules;

pub use rules::compile_rule;

use crate::store::Row;
use crate::value::Value;
use serde_json::{Map, Value as Json};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// What a validator sees: the column, its proposed value and, on update, the stored value.
#[derive(Debug, Clone, Copy)]
pub struct Field<'a> {
    pub name: &'a str,
    pub value: &'a Value,
    pub old_value: Option<&'a Value>,
}

/// Rejection message for one field.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationFailure(pub String);

impl ValidationFailure {
    pub fn new(message: impl Into<String>) -> Self {
        ValidationFailure(message.into())
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returns the accepted (possibly transformed) value.
pub type Validator = Arc<dyn Fn(&Field<'_>) -> Result<Value, ValidationFailure> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Validators {
    by_column: BTreeMap<String, Validator>,
}

impl fmt::Debug for Validators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.by_column.keys()).finish()
    }
}

impl Validators {
    pub fn insert<F>(&mut self, column: impl Into<String>, f: F)
    where
        F: Fn(&Field<'_>) -> Result<Value, ValidationFailure> + Send + Sync + 'static,
    {
        self.by_column.insert(column.into(), Arc::new(f));
    }

    pub fn insert_arc(&mut self, column: impl Into<String>, f: Validator) {
        self.by_column.insert(column.into(), f);
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.by_column.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.by_column.is_empty()
    }

    /// Run every validator on one record. Accepted values are written back into `row`.
    /// Returns the failures by column, empty when the record is valid.
    pub fn validate(&self, row: &mut Row, old: Option<&Row>) -> BTreeMap<String, String> {
        let mut failures = BTreeMap::new();
        for (column, validator) in &self.by_column {
            let value = row.get(column).cloned().unwrap_or(Value::Null);
            let field = Field {
                name: column,
                value: &value,
                old_value: old.and_then(|o| o.get(column)),
            };
            match validator(&field) {
                Ok(accepted) => row.set(column.clone(), accepted),
                Err(failure) => {
                    failures.insert(column.clone(), failure.0);
                }
            }
        }
        failures
    }

    /// Validate every candidate before reporting. `key` renders a record's primary key
    /// for the error entry; its failure aborts the pass.
    pub fn validate_all<K, E>(&self, candidates: &mut [Candidate], key: K) -> Result<(), E>
    where
        K: Fn(&Row) -> Result<Map<String, Json>, E>,
        E: From<ValidationErrors>,
    {
        if self.is_empty() {
            return Ok(());
        }
        let mut errors = Vec::new();
        for candidate in candidates.iter_mut() {
            let fields = self.validate(&mut candidate.row, candidate.old.as_ref());
            if !fields.is_empty() {
                errors.push(RecordErrors {
                    key: key(&candidate.row)?,
                    fields,
                });
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            tracing::debug!(records = errors.len(), "validation failed");
            Err(ValidationErrors(errors).into())
        }
    }
}

/// A record about to be written, with its pre-mutation state when it already existed.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub row: Row,
    pub old: Option<Row>,
}

impl Candidate {
    pub fn created(row: Row) -> Self {
        Candidate { row, old: None }
    }

    pub fn updated(row: Row, old: Row) -> Self {
        Candidate { row, old: Some(old) }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordErrors {
    pub key: Map<String, Json>,
    pub fields: BTreeMap<String, String>,
}

/// Failures for every invalid record, in record order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidationErrors(pub Vec<RecordErrors>);

impl ValidationErrors {
    /// `[{<pk columns>..., "fields": {column: message}}]`
    pub fn to_value(&self) -> Json {
        Json::Array(
            self.0
                .iter()
                .map(|record| {
                    let mut entry = record.key.clone();
                    let fields = record
                        .fields
                        .iter()
                        .map(|(k, v)| (k.clone(), Json::String(v.clone())))
                        .collect();
                    entry.insert("fields".into(), Json::Object(fields));
                    Json::Object(entry)
                })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn name_not_empty(field: &Field<'_>) -> Result<Value, ValidationFailure> {
        match field.value.as_str() {
            Some(s) if !s.trim().is_empty() => Ok(Value::from(s.trim())),
            _ => Err(ValidationFailure::new("Name must not be empty")),
        }
    }

    fn key_of(row: &Row) -> Result<Map<String, Json>, ValidationErrors> {
        let mut key = Map::new();
        key.insert("id".into(), row.get("id").map(Value::to_json_lossy).unwrap_or(Json::Null));
        Ok(key)
    }

    #[test]
    fn test_accepted_values_are_written_back() {
        let mut validators = Validators::default();
        validators.insert("name", name_not_empty);
        let mut candidates = vec![Candidate::created(Row::default().with("id", 1).with("name", "  elm "))];
        validators.validate_all(&mut candidates, key_of).unwrap();
        assert_eq!(candidates[0].row.get("name"), Some(&Value::from("elm")));
    }

    #[test]
    fn test_every_record_and_field_is_reported() {
        let mut validators = Validators::default();
        validators.insert("name", name_not_empty);
        validators.insert("height", |f: &Field<'_>| match f.value.as_f64() {
            Some(h) if h >= 0.0 => Ok(f.value.clone()),
            _ => Err(ValidationFailure::new("Height must be positive")),
        });
        let mut candidates = vec![
            Candidate::created(Row::default().with("id", 1).with("name", "").with("height", -1)),
            Candidate::created(Row::default().with("id", 2).with("name", "oak").with("height", 3)),
            Candidate::created(Row::default().with("id", 3).with("name", " ").with("height", 4)),
        ];
        let errors = validators.validate_all(&mut candidates, key_of).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(
            errors.to_value(),
            json!([
                {"id": 1, "fields": {"height": "Height must be positive", "name": "Name must not be empty"}},
                {"id": 3, "fields": {"name": "Name must not be empty"}},
            ])
        );
    }

    #[test]
    fn test_old_value_is_visible_on_update() {
        let mut validators = Validators::default();
        validators.insert("name", |f: &Field<'_>| match f.old_value {
            Some(old) if old != f.value => Err(ValidationFailure::new("name is frozen")),
            _ => Ok(f.value.clone()),
        });
        let old = Row::default().with("id", 1).with("name", "pine");
        let mut candidates = vec![Candidate::updated(old.clone().with("name", "fir"), old)];
        assert!(validators.validate_all(&mut candidates, key_of).is_err());
        let mut candidates = vec![Candidate::created(Row::default().with("id", 2).with("name", "fir"))];
        assert!(validators.validate_all(&mut candidates, key_of).is_ok());
    }
}
