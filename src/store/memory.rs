//! In-memory store. Sessions stage changes on a snapshot of every table and swap it in on commit.
//! Only one session is open at a time; a second `session()` call waits for the first to end.

use super::{Row, Session, Store};
use crate::error::StoreError;
use crate::filter::Query;
use crate::schema::{Table, TypeTag};
use crate::value::Value;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, RwLock};

#[derive(Clone, Debug)]
struct MemoryTable {
    def: Table,
    rows: Vec<Row>,
}

impl MemoryTable {
    fn pk_names(&self) -> Vec<String> {
        self.def.primary_keys().iter().map(|c| c.name.clone()).collect()
    }

    fn describe_key(&self, row: &Row) -> String {
        self.pk_names()
            .iter()
            .map(|pk| format!("{}={}", pk, row.get(pk).cloned().unwrap_or(Value::Null)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn position(&self, row: &Row) -> Option<usize> {
        let pks = self.pk_names();
        self.rows.iter().position(|r| MemoryTable::same_key(&pks, r, row))
    }

    fn same_key(pks: &[String], a: &Row, b: &Row) -> bool {
        !pks.is_empty()
            && pks.iter().all(|pk| match (a.get(pk), b.get(pk)) {
                (Some(x), Some(y)) => !x.is_null() && x.same_as(y),
                _ => false,
            })
    }

    /// Keep only declared columns, null-filling the missing ones.
    fn normalize(&self, row: Row) -> Row {
        self.def
            .columns
            .iter()
            .map(|c| (c.name.clone(), row.get(&c.name).cloned().unwrap_or(Value::Null)))
            .collect()
    }

    fn assign_key(&self, row: &mut Row) -> Result<(), StoreError> {
        let pks = self.def.primary_keys();
        let missing: Vec<_> = pks
            .iter()
            .filter(|c| row.get(&c.name).map(Value::is_null).unwrap_or(true))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        match (pks.as_slice(), missing.as_slice()) {
            ([only], [_]) if only.type_tag == TypeTag::Integer => {
                let next = self
                    .rows
                    .iter()
                    .filter_map(|r| r.get(&only.name).and_then(Value::as_i64))
                    .max()
                    .unwrap_or(0)
                    + 1;
                row.set(only.name.clone(), Value::Integer(next));
                Ok(())
            }
            _ => Err(StoreError::Constraint(format!(
                "null primary key for {} ({})",
                self.def.model(),
                missing.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", ")
            ))),
        }
    }
}

/// Thread-safe in-memory backend. Useful for tests and demos.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<BTreeMap<String, MemoryTable>>,
    /// Held by the open session until it commits or drops.
    turn: Mutex<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Declare a model. Replaces an existing declaration and its rows.
    pub fn with_table(self, table: Table) -> Self {
        if let Ok(mut tables) = self.tables.write() {
            tables.insert(table.model(), MemoryTable { def: table, rows: Vec::new() });
        }
        self
    }

    /// Seed rows directly, outside any session.
    pub fn insert(&self, model: &str, rows: Vec<Row>) -> Result<(), StoreError> {
        let mut session = self.session()?;
        session.insert_all(model, rows)?;
        session.commit()
    }

    fn snapshot(&self) -> Result<BTreeMap<String, MemoryTable>, StoreError> {
        self.tables.read().map(|t| t.clone()).map_err(|_| StoreError::Poisoned)
    }
}

impl Store for MemoryStore {
    fn table(&self, model: &str) -> Result<Table, StoreError> {
        let tables = self.tables.read().map_err(|_| StoreError::Poisoned)?;
        tables
            .get(model)
            .map(|t| t.def.clone())
            .ok_or_else(|| StoreError::UnknownModel(model.to_string()))
    }

    fn session(&self) -> Result<Box<dyn Session + '_>, StoreError> {
        let turn = self.turn.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(Box::new(MemorySession {
            store: self,
            staged: self.snapshot()?,
            _turn: turn,
        }))
    }
}

struct MemorySession<'a> {
    store: &'a MemoryStore,
    staged: BTreeMap<String, MemoryTable>,
    _turn: MutexGuard<'a, ()>,
}

impl MemorySession<'_> {
    fn table(&self, model: &str) -> Result<&MemoryTable, StoreError> {
        self.staged
            .get(model)
            .ok_or_else(|| StoreError::UnknownModel(model.to_string()))
    }

    fn table_mut(&mut self, model: &str) -> Result<&mut MemoryTable, StoreError> {
        self.staged
            .get_mut(model)
            .ok_or_else(|| StoreError::UnknownModel(model.to_string()))
    }
}

impl Session for MemorySession<'_> {
    fn first(&mut self, query: &Query) -> Result<Option<Row>, StoreError> {
        let table = self.table(&query.model)?;
        Ok(table.rows.iter().find(|r| query.filter.matches(r)).cloned())
    }

    fn all(&mut self, query: &Query) -> Result<Vec<Row>, StoreError> {
        let table = self.table(&query.model)?;
        Ok(table.rows.iter().filter(|r| query.filter.matches(r)).cloned().collect())
    }

    fn count(&mut self, query: &Query) -> Result<u64, StoreError> {
        let table = self.table(&query.model)?;
        Ok(table.rows.iter().filter(|r| query.filter.matches(r)).count() as u64)
    }

    fn delete_all(&mut self, query: &Query) -> Result<u64, StoreError> {
        let table = self.table_mut(&query.model)?;
        let before = table.rows.len();
        table.rows.retain(|r| !query.filter.matches(r));
        Ok((before - table.rows.len()) as u64)
    }

    fn insert(&mut self, model: &str, row: Row) -> Result<Row, StoreError> {
        let table = self.table_mut(model)?;
        let mut row = table.normalize(row);
        table.assign_key(&mut row)?;
        if table.position(&row).is_some() {
            return Err(StoreError::Constraint(format!(
                "{}({}) already exists",
                model,
                table.describe_key(&row)
            )));
        }
        table.rows.push(row.clone());
        Ok(row)
    }

    fn update(&mut self, model: &str, row: Row) -> Result<Row, StoreError> {
        let table = self.table_mut(model)?;
        let row = table.normalize(row);
        let Some(at) = table.position(&row) else {
            return Err(StoreError::Constraint(format!(
                "{}({}) does not exist",
                model,
                table.describe_key(&row)
            )));
        };
        table.rows[at] = row.clone();
        Ok(row)
    }

    fn delete(&mut self, model: &str, row: &Row) -> Result<(), StoreError> {
        let table = self.table_mut(model)?;
        let pks = table.pk_names();
        table.rows.retain(|r| !MemoryTable::same_key(&pks, r, row));
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemorySession { store, staged, _turn } = *self;
        let mut tables = store.tables.write().map_err(|_| StoreError::Poisoned)?;
        *tables = staged;
        tracing::debug!("memory session committed");
        Ok(())
    }
}
