//! Column schema of a model: names, declared types, primary-key membership.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Declared storage type of a column. Selects the coercion converters.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Boolean,
    Integer,
    Float,
    Decimal,
    Numeric,
    String,
    Uuid,
    DateTime,
    DateTimeTz,
    Date,
    Time,
    Interval,
    Json,
    Array(Box<TypeTag>),
    /// Any type the built-in set does not know; converters are looked up by this name.
    Custom(String),
}

impl TypeTag {
    /// Registry key for the converters of this tag. Arrays share one key whatever their item type.
    pub fn name(&self) -> &str {
        match self {
            TypeTag::Boolean => "boolean",
            TypeTag::Integer => "integer",
            TypeTag::Float => "float",
            TypeTag::Decimal => "decimal",
            TypeTag::Numeric => "numeric",
            TypeTag::String => "string",
            TypeTag::Uuid => "uuid",
            TypeTag::DateTime => "datetime",
            TypeTag::DateTimeTz => "datetimetz",
            TypeTag::Date => "date",
            TypeTag::Time => "time",
            TypeTag::Interval => "interval",
            TypeTag::Json => "json",
            TypeTag::Array(_) => "array",
            TypeTag::Custom(name) => name.as_str(),
        }
    }

    pub fn array_of(item: TypeTag) -> Self {
        TypeTag::Array(Box::new(item))
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Array(item) => write!(f, "array<{}>", item),
            other => f.write_str(other.name()),
        }
    }
}

impl FromStr for TypeTag {
    type Err = std::convert::Infallible;

    /// Unknown names become `Custom`; `array<T>` nests.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(inner) = s.strip_prefix("array<").and_then(|r| r.strip_suffix('>')) {
            return Ok(TypeTag::array_of(inner.parse()?));
        }
        Ok(match s.to_lowercase().as_str() {
            "boolean" | "bool" => TypeTag::Boolean,
            "integer" | "int" => TypeTag::Integer,
            "float" | "double" => TypeTag::Float,
            "decimal" => TypeTag::Decimal,
            "numeric" => TypeTag::Numeric,
            "string" | "text" => TypeTag::String,
            "uuid" => TypeTag::Uuid,
            "datetime" => TypeTag::DateTime,
            "datetimetz" => TypeTag::DateTimeTz,
            "date" => TypeTag::Date,
            "time" => TypeTag::Time,
            "interval" => TypeTag::Interval,
            "json" => TypeTag::Json,
            _ => TypeTag::Custom(s.to_string()),
        })
    }
}

impl Serialize for TypeTag {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TypeTag {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(s.parse().unwrap_or_else(|never: std::convert::Infallible| match never {}))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub type_tag: TypeTag,
    #[serde(default)]
    pub primary_key: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, type_tag: TypeTag) -> Self {
        Column {
            name: name.into(),
            type_tag,
            primary_key: false,
        }
    }

    pub fn primary(name: impl Into<String>, type_tag: TypeTag) -> Self {
        Column {
            name: name.into(),
            type_tag,
            primary_key: true,
        }
    }
}

/// A model as the persistence layer describes it: optional schema, table name, ordered columns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Table {
    #[serde(default)]
    pub schema: Option<String>,
    pub name: String,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Table {
            schema: None,
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn in_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Model identity used by stores: `schema.name` or `name`.
    pub fn model(&self) -> String {
        match &self.schema {
            Some(s) => format!("{}.{}", s, self.name),
            None => self.name.clone(),
        }
    }

    pub fn primary_keys(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.primary_key).collect()
    }

    pub fn column_named(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tag_parse_and_display() {
        assert_eq!("integer".parse::<TypeTag>().unwrap(), TypeTag::Integer);
        let nested: TypeTag = "array<array<date>>".parse().unwrap();
        assert_eq!(nested, TypeTag::array_of(TypeTag::array_of(TypeTag::Date)));
        assert_eq!(nested.to_string(), "array<array<date>>");
        assert_eq!(nested.name(), "array");
        assert_eq!("matrix".parse::<TypeTag>().unwrap(), TypeTag::Custom("matrix".into()));
    }

    #[test]
    fn test_table_model_and_keys() {
        let table = Table::new("tree")
            .in_schema("forest")
            .column(Column::primary("id", TypeTag::Integer))
            .column(Column::new("name", TypeTag::String));
        assert_eq!(table.model(), "forest.tree");
        assert_eq!(table.primary_keys().len(), 1);
        assert!(table.column_named("name").is_some());
    }
}
