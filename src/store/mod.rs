//! Persistence contract consumed by resources, plus the in-memory and PostgreSQL backends.
//!
//! The contract is synchronous. A `Session` is one transaction scope: reads see its own
//! staged writes, `commit` is the only point where they become visible to other sessions,
//! and dropping a session without committing discards them. Concurrent sessions are
//! isolated by the backend: PostgreSQL transactions, or one session at a time in memory.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::StoreError;
use crate::filter::Query;
use crate::schema::Table;
use crate::value::Value;
use std::collections::BTreeMap;

/// A record: named fields holding storage-native values. Absent fields read as `None`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
    fields: BTreeMap<String, Value>,
}

impl Row {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value.into());
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Row {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

pub trait Session {
    fn first(&mut self, query: &Query) -> Result<Option<Row>, StoreError>;

    fn all(&mut self, query: &Query) -> Result<Vec<Row>, StoreError>;

    fn count(&mut self, query: &Query) -> Result<u64, StoreError>;

    /// Delete every record the query matches. Returns how many went.
    fn delete_all(&mut self, query: &Query) -> Result<u64, StoreError>;

    /// Store a new record. Returns it with any keys the backend generated.
    /// A primary key that is already taken fails with `StoreError::Constraint`.
    fn insert(&mut self, model: &str, row: Row) -> Result<Row, StoreError>;

    fn insert_all(&mut self, model: &str, rows: Vec<Row>) -> Result<Vec<Row>, StoreError> {
        rows.into_iter().map(|row| self.insert(model, row)).collect()
    }

    /// Overwrite the record with the row's primary key. Fails with `StoreError::Constraint`
    /// when there is no such record.
    fn update(&mut self, model: &str, row: Row) -> Result<Row, StoreError>;

    /// Delete the record with the row's primary key.
    fn delete(&mut self, model: &str, row: &Row) -> Result<(), StoreError>;

    fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

pub trait Store: Send + Sync {
    /// Schema of a model, by `name` or `schema.name`.
    fn table(&self, model: &str) -> Result<Table, StoreError>;

    fn session(&self) -> Result<Box<dyn Session + '_>, StoreError>;

    /// Readiness probe.
    fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
