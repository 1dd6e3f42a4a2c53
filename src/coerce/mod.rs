//! Coercion between storage-native values and generic wire values.
//!
//! Converters are registered by type-tag name. Serialization walks a record column by
//! column; deserialization either merges a payload onto an existing record or creates
//! fresh records from an `objects` list. A tag with no registered converter passes the
//! value through with its natural mapping and a debug diagnostic.

mod builtin;

use crate::error::CoercionError;
use crate::schema::{Column, TypeTag};
use crate::store::Row;
use crate::value::Value;
use serde_json::{Map, Value as Json};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub type SerializeFn = Arc<dyn Fn(&Coercers, &TypeTag, &Value) -> Result<Json, CoercionError> + Send + Sync>;
pub type DeserializeFn = Arc<dyn Fn(&Coercers, &TypeTag, &Json) -> Result<Value, CoercionError> + Send + Sync>;

/// Registry of converters keyed by `TypeTag::name()`.
#[derive(Clone, Default)]
pub struct Coercers {
    serializers: HashMap<String, SerializeFn>,
    deserializers: HashMap<String, DeserializeFn>,
}

impl fmt::Debug for Coercers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ser: Vec<_> = self.serializers.keys().collect();
        let mut de: Vec<_> = self.deserializers.keys().collect();
        ser.sort();
        de.sort();
        f.debug_struct("Coercers")
            .field("serializers", &ser)
            .field("deserializers", &de)
            .finish()
    }
}

impl Coercers {
    /// No converters at all: every value takes the pass-through path.
    pub fn empty() -> Self {
        Coercers::default()
    }

    /// Converters for every built-in tag.
    pub fn builtin() -> Self {
        let mut c = Coercers::default();
        builtin::register(&mut c);
        c
    }

    pub fn register_serializer<F>(&mut self, tag: &str, f: F)
    where
        F: Fn(&Coercers, &TypeTag, &Value) -> Result<Json, CoercionError> + Send + Sync + 'static,
    {
        self.serializers.insert(tag.to_string(), Arc::new(f));
    }

    pub fn register_deserializer<F>(&mut self, tag: &str, f: F)
    where
        F: Fn(&Coercers, &TypeTag, &Json) -> Result<Value, CoercionError> + Send + Sync + 'static,
    {
        self.deserializers.insert(tag.to_string(), Arc::new(f));
    }

    pub fn with_serializer<F>(mut self, tag: &str, f: F) -> Self
    where
        F: Fn(&Coercers, &TypeTag, &Value) -> Result<Json, CoercionError> + Send + Sync + 'static,
    {
        self.register_serializer(tag, f);
        self
    }

    pub fn with_deserializer<F>(mut self, tag: &str, f: F) -> Self
    where
        F: Fn(&Coercers, &TypeTag, &Json) -> Result<Value, CoercionError> + Send + Sync + 'static,
    {
        self.register_deserializer(tag, f);
        self
    }

    /// Tags (including array items) that lack a serializer or a deserializer.
    pub fn missing(&self, columns: &[Column]) -> Vec<(String, TypeTag)> {
        let mut out = Vec::new();
        for c in columns {
            let mut tag = &c.type_tag;
            loop {
                if !self.serializers.contains_key(tag.name()) || !self.deserializers.contains_key(tag.name()) {
                    out.push((c.name.clone(), tag.clone()));
                    break;
                }
                match tag {
                    TypeTag::Array(item) => tag = item,
                    _ => break,
                }
            }
        }
        out
    }

    pub fn serialize_value(&self, tag: &TypeTag, value: &Value) -> Result<Json, CoercionError> {
        if value.is_null() {
            return Ok(Json::Null);
        }
        match self.serializers.get(tag.name()) {
            Some(f) => f(self, tag, value),
            None => {
                tracing::debug!(tag = %tag, "missing serializer, passing value through");
                Ok(value.to_json_lossy())
            }
        }
    }

    pub fn deserialize_value(&self, tag: &TypeTag, data: &Json) -> Result<Value, CoercionError> {
        if data.is_null() {
            return Ok(Value::Null);
        }
        match self.deserializers.get(tag.name()) {
            Some(f) => f(self, tag, data),
            None => {
                tracing::debug!(tag = %tag, "missing deserializer, passing value through");
                Ok(Value::from_json_lossy(data))
            }
        }
    }

    /// Generic record for the given columns. Fields the row lacks serialize as null.
    pub fn serialize_row(&self, row: &Row, columns: &[Column]) -> Result<Map<String, Json>, CoercionError> {
        let mut out = Map::new();
        for c in columns {
            let value = match row.get(&c.name) {
                Some(v) => self.serialize_value(&c.type_tag, v).map_err(|e| e.at(&c.name))?,
                None => Json::Null,
            };
            out.insert(c.name.clone(), value);
        }
        Ok(out)
    }

    /// Apply the payload's values for `columns` onto `row`. Columns absent from the payload are left untouched.
    pub fn merge(&self, payload: &Map<String, Json>, row: &mut Row, columns: &[Column]) -> Result<(), CoercionError> {
        for c in columns {
            if let Some(data) = payload.get(&c.name) {
                let value = self.deserialize_value(&c.type_tag, data).map_err(|e| e.at(&c.name))?;
                row.set(c.name.clone(), value);
            }
        }
        Ok(())
    }

    /// New records from the payload's `objects` list, in input order. Columns absent from an object stay null.
    pub fn create(&self, payload: &Json, columns: &[Column]) -> Result<Vec<Row>, CoercionError> {
        let objects = payload
            .get("objects")
            .and_then(Json::as_array)
            .ok_or_else(|| CoercionError::Invalid("payload must carry an `objects` list".into()))?;
        objects
            .iter()
            .enumerate()
            .map(|(i, object)| {
                let object = object
                    .as_object()
                    .ok_or_else(|| CoercionError::Invalid(format!("objects[{}] must be an object", i)))?;
                let mut row: Row = columns.iter().map(|c| (c.name.clone(), Value::Null)).collect();
                self.merge(object, &mut row, columns)?;
                Ok(row)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use rust_decimal::Decimal;
    use serde_json::json;

    fn fruit_columns() -> Vec<Column> {
        vec![
            Column::primary("fruit_id", TypeTag::Integer),
            Column::new("color", TypeTag::String),
            Column::new("size", TypeTag::Numeric),
            Column::new("age", TypeTag::Interval),
            Column::new("picked", TypeTag::Date),
        ]
    }

    #[test]
    fn test_decimal_and_interval_round_trip() {
        let c = Coercers::builtin();
        let size = c.deserialize_value(&TypeTag::Numeric, &json!("2.12")).unwrap();
        assert_eq!(size, Value::Decimal(Decimal::new(212, 2)));
        assert_eq!(c.serialize_value(&TypeTag::Numeric, &size).unwrap(), json!(2.12));
        let from_number = c.deserialize_value(&TypeTag::Decimal, &json!(2.12)).unwrap();
        assert_eq!(from_number, size);

        let age = c.deserialize_value(&TypeTag::Interval, &json!(7200.000012)).unwrap();
        assert_eq!(age, Value::Interval(Duration::microseconds(7_200_000_012)));
        assert_eq!(c.serialize_value(&TypeTag::Interval, &age).unwrap(), json!(7200.000012));
    }

    #[test]
    fn test_merge_leaves_absent_columns() {
        let c = Coercers::builtin();
        let mut row = Row::default().with("fruit_id", 1).with("color", "grey");
        let payload = json!({"size": 12.5, "picked": "2017-06-01"});
        c.merge(payload.as_object().unwrap(), &mut row, &fruit_columns()).unwrap();
        assert_eq!(row.get("color"), Some(&Value::from("grey")));
        assert_eq!(row.get("size"), Some(&Value::Decimal(Decimal::new(125, 1))));
        assert_eq!(
            row.get("picked"),
            Some(&Value::Date(NaiveDate::from_ymd_opt(2017, 6, 1).unwrap()))
        );
    }

    #[test]
    fn test_create_keeps_order_and_nulls() {
        let c = Coercers::builtin();
        let payload = json!({"objects": [{"fruit_id": 9, "color": "red"}, {"fruit_id": 10}]});
        let rows = c.create(&payload, &fruit_columns()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("color"), Some(&Value::from("red")));
        assert_eq!(rows[1].get("color"), Some(&Value::Null));
        assert_eq!(rows[1].get("fruit_id"), Some(&Value::Integer(10)));
        assert!(c.create(&json!({"name": "x"}), &fruit_columns()).is_err());
    }

    #[test]
    fn test_serialize_row_and_failures_name_column() {
        let c = Coercers::builtin();
        let row = Row::default()
            .with("fruit_id", 3)
            .with("color", "brown")
            .with("size", Decimal::new(212, 2))
            .with("age", Duration::seconds(0));
        let obj = c.serialize_row(&row, &fruit_columns()).unwrap();
        assert_eq!(
            Json::Object(obj),
            json!({"fruit_id": 3, "color": "brown", "size": 2.12, "age": 0.0, "picked": null})
        );
        let mut row = Row::default();
        let err = c
            .merge(json!({"fruit_id": "three"}).as_object().unwrap(), &mut row, &fruit_columns())
            .unwrap_err();
        assert!(err.to_string().starts_with("fruit_id:"));
    }

    #[test]
    fn test_unknown_tags_pass_through_and_are_reported() {
        let c = Coercers::builtin();
        let matrix = TypeTag::Custom("matrix".into());
        let columns = vec![
            Column::new("m", matrix.clone()),
            Column::new("ms", TypeTag::array_of(matrix.clone())),
        ];
        assert_eq!(c.missing(&columns).len(), 2);
        assert_eq!(c.deserialize_value(&matrix, &json!([1, 2])).unwrap(), Value::from_json_lossy(&json!([1, 2])));

        let extended = c.with_serializer("matrix", |_, _, v| Ok(json!(format!("M{}", v.to_json_lossy()))))
            .with_deserializer("matrix", |_, _, j| Ok(Value::Json(j.clone())));
        assert!(extended.missing(&columns).is_empty());
        assert_eq!(
            extended.serialize_value(&matrix, &Value::Json(json!([1]))).unwrap(),
            json!("M[1]")
        );
    }
}
