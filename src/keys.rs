//! Primary-key tuple extracted from URL path segments.

use crate::schema::Column;
use crate::store::Row;
use crate::value::Value;
use std::fmt;

/// Ordered primary-key slots. A slot is `None` when the URL did not supply it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Keys {
    slots: Vec<(String, Option<Value>)>,
}

impl Keys {
    pub fn new(slots: Vec<(String, Option<Value>)>) -> Self {
        Keys { slots }
    }

    /// One empty slot per primary key: the collection address.
    pub fn absent(primary_keys: &[&Column]) -> Self {
        Keys {
            slots: primary_keys.iter().map(|c| (c.name.clone(), None)).collect(),
        }
    }

    /// Keys identifying a stored row.
    pub fn of_row(primary_keys: &[&Column], row: &Row) -> Self {
        Keys {
            slots: primary_keys
                .iter()
                .map(|c| (c.name.clone(), row.get(&c.name).cloned().filter(|v| !v.is_null())))
                .collect(),
        }
    }

    /// True iff there is at least one slot and every slot holds a non-null value.
    pub fn has(&self) -> bool {
        !self.slots.is_empty()
            && self
                .slots
                .iter()
                .all(|(_, v)| v.as_ref().map(|v| !v.is_null()).unwrap_or(false))
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.slots
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_ref())
    }

    /// Present slots only.
    pub fn present(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.slots
            .iter()
            .filter_map(|(n, v)| v.as_ref().map(|v| (n.as_str(), v)))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|(n, _)| n.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl fmt::Display for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .slots
            .iter()
            .map(|(n, v)| match v {
                Some(v) => format!("{}={}", n, v),
                None => format!("{}=None", n),
            })
            .collect();
        f.write_str(&parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TypeTag;

    #[test]
    fn test_has_requires_every_slot() {
        let id = Column::primary("id", TypeTag::Integer);
        let kind = Column::primary("kind", TypeTag::String);
        assert!(!Keys::absent(&[&id, &kind]).has());
        assert!(!Keys::default().has());
        let partial = Keys::new(vec![
            ("id".into(), Some(Value::Integer(1))),
            ("kind".into(), None),
        ]);
        assert!(!partial.has());
        let nulled = Keys::new(vec![("id".into(), Some(Value::Null))]);
        assert!(!nulled.has());
        let full = Keys::new(vec![
            ("id".into(), Some(Value::Integer(1))),
            ("kind".into(), Some(Value::from("a"))),
        ]);
        assert!(full.has());
        assert_eq!(full.to_string(), "id=1, kind='a'");
    }

    #[test]
    fn test_of_row_reads_primary_keys() {
        let id = Column::primary("id", TypeTag::Integer);
        let mut row = Row::default();
        row.set("id", Value::Integer(4));
        row.set("name", Value::from("elm"));
        let keys = Keys::of_row(&[&id], &row);
        assert_eq!(keys.get("id"), Some(&Value::Integer(4)));
        assert_eq!(keys.present().count(), 1);
    }
}
