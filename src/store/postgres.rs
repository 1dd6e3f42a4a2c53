//! PostgreSQL backend over sqlx. Tables are introspected from information_schema on first use.
//!
//! The store contract is synchronous; async sqlx calls are driven on the runtime handle
//! captured at connect time. Call it from blocking threads (the axum adapter runs
//! handlers on `spawn_blocking`) or from a multi-threaded runtime.

use super::{Row, Session, Store};
use crate::coerce::Coercers;
use crate::error::StoreError;
use crate::filter::Query;
use crate::schema::{Table, TypeTag};
use crate::sql::{self, PgColumn, PgTable, QueryBuf};
use crate::value::Value;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Offset, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::types::PgInterval;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Transaction};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use tokio::runtime::Handle;

const INTROSPECT_SQL: &str = r#"
SELECT c.column_name::text AS column_name,
       c.data_type::text AS data_type,
       c.udt_schema::text AS udt_schema,
       c.udt_name::text AS udt_name,
       c.column_default IS NOT NULL AS has_default,
       EXISTS (
           SELECT 1
           FROM information_schema.table_constraints tc
           JOIN information_schema.key_column_usage k
             ON k.constraint_name = tc.constraint_name
            AND k.table_schema = tc.table_schema
            AND k.table_name = tc.table_name
           WHERE tc.constraint_type = 'PRIMARY KEY'
             AND tc.table_schema = c.table_schema
             AND tc.table_name = c.table_name
             AND k.column_name = c.column_name
       ) AS is_pk
FROM information_schema.columns c
WHERE c.table_schema = $1 AND c.table_name = $2
ORDER BY c.ordinal_position
"#;

pub struct PgStore {
    pool: PgPool,
    handle: Handle,
    tables: RwLock<HashMap<String, Arc<PgTable>>>,
    /// Decodes array items, which come back as jsonb.
    coercers: Coercers,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(PgStore::new(pool, Handle::current()))
    }

    pub fn new(pool: PgPool, handle: Handle) -> Self {
        PgStore {
            pool,
            handle,
            tables: RwLock::new(HashMap::new()),
            coercers: Coercers::builtin(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Introspect `model` (`name` or `schema.name`) and cache it.
    pub async fn load_table(&self, model: &str) -> Result<Arc<PgTable>, StoreError> {
        if let Some(t) = self.cached(model)? {
            return Ok(t);
        }
        let (model_schema, name) = match model.split_once('.') {
            Some((schema, name)) => (Some(schema.to_string()), name.to_string()),
            None => (None, model.to_string()),
        };
        let schema = model_schema.clone().unwrap_or_else(|| "public".to_string());
        let rows = sqlx::query(INTROSPECT_SQL)
            .bind(&schema)
            .bind(&name)
            .fetch_all(&self.pool)
            .await?;
        if rows.is_empty() {
            return Err(StoreError::UnknownModel(model.to_string()));
        }
        let mut columns = Vec::with_capacity(rows.len());
        for r in &rows {
            use sqlx::Row as _;
            let data_type: String = r.try_get("data_type")?;
            let udt_schema: String = r.try_get("udt_schema")?;
            let udt_name: String = r.try_get("udt_name")?;
            columns.push(PgColumn {
                name: r.try_get("column_name")?,
                type_tag: sql::type_tag_for(&data_type, &udt_name),
                pg_type: sql::pg_type_for(&data_type, &udt_schema, &udt_name),
                has_default: r.try_get("has_default")?,
                primary_key: r.try_get("is_pk")?,
            });
        }
        let table = Arc::new(PgTable {
            model_schema,
            schema,
            name,
            columns,
        });
        tracing::debug!(model = %model, columns = table.columns.len(), "table introspected");
        let mut tables = self.tables.write().map_err(|_| StoreError::Poisoned)?;
        tables.insert(model.to_string(), Arc::clone(&table));
        Ok(table)
    }

    fn cached(&self, model: &str) -> Result<Option<Arc<PgTable>>, StoreError> {
        let tables = self.tables.read().map_err(|_| StoreError::Poisoned)?;
        Ok(tables.get(model).cloned())
    }

    fn info(&self, model: &str) -> Result<Arc<PgTable>, StoreError> {
        match self.cached(model)? {
            Some(t) => Ok(t),
            None => self.block_on(self.load_table(model)),
        }
    }

    /// Inside a runtime worker the wait is announced with `block_in_place`.
    fn block_on<F: Future>(&self, f: F) -> F::Output {
        match Handle::try_current() {
            Ok(_) => tokio::task::block_in_place(|| self.handle.block_on(f)),
            Err(_) => self.handle.block_on(f),
        }
    }
}

impl Store for PgStore {
    fn table(&self, model: &str) -> Result<Table, StoreError> {
        Ok(self.info(model)?.table())
    }

    fn session(&self) -> Result<Box<dyn Session + '_>, StoreError> {
        let tx = self.block_on(self.pool.begin())?;
        Ok(Box::new(PgSession { store: self, tx }))
    }

    fn ping(&self) -> Result<(), StoreError> {
        self.block_on(sqlx::query("SELECT 1").execute(&self.pool))?;
        Ok(())
    }
}

/// One transaction. Dropped without `commit`, sqlx rolls it back.
struct PgSession<'a> {
    store: &'a PgStore,
    tx: Transaction<'static, Postgres>,
}

impl PgSession<'_> {
    fn fetch(&mut self, table: &PgTable, buf: QueryBuf) -> Result<Vec<Row>, StoreError> {
        tracing::debug!(sql = %buf.sql, "query");
        let QueryBuf { sql, params } = buf;
        let mut q = sqlx::query(&sql);
        for p in params {
            q = q.bind(p);
        }
        let rows = self.store.block_on(q.fetch_all(&mut *self.tx))?;
        rows.iter().map(|r| decode_row(&self.store.coercers, table, r)).collect()
    }

    fn execute(&mut self, buf: QueryBuf) -> Result<u64, StoreError> {
        tracing::debug!(sql = %buf.sql, "execute");
        let QueryBuf { sql, params } = buf;
        let mut q = sqlx::query(&sql);
        for p in params {
            q = q.bind(p);
        }
        let done = self.store.block_on(q.execute(&mut *self.tx))?;
        Ok(done.rows_affected())
    }
}

impl Session for PgSession<'_> {
    fn first(&mut self, query: &Query) -> Result<Option<Row>, StoreError> {
        let table = self.store.info(&query.model)?;
        let buf = sql::select(&table, &query.filter, Some(1))?;
        Ok(self.fetch(&table, buf)?.into_iter().next())
    }

    fn all(&mut self, query: &Query) -> Result<Vec<Row>, StoreError> {
        let table = self.store.info(&query.model)?;
        let buf = sql::select(&table, &query.filter, None)?;
        self.fetch(&table, buf)
    }

    fn count(&mut self, query: &Query) -> Result<u64, StoreError> {
        let table = self.store.info(&query.model)?;
        let QueryBuf { sql, params } = sql::count(&table, &query.filter)?;
        let mut q = sqlx::query_scalar::<_, i64>(&sql);
        for p in params {
            q = q.bind(p);
        }
        let n = self.store.block_on(q.fetch_one(&mut *self.tx))?;
        Ok(n.max(0) as u64)
    }

    fn delete_all(&mut self, query: &Query) -> Result<u64, StoreError> {
        let table = self.store.info(&query.model)?;
        let buf = sql::delete_where(&table, &query.filter)?;
        self.execute(buf)
    }

    fn insert(&mut self, model: &str, row: Row) -> Result<Row, StoreError> {
        let table = self.store.info(model)?;
        let buf = sql::insert(&table, &row)?;
        self.fetch(&table, buf)?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Constraint(format!("insert into {} returned no row", model)))
    }

    fn update(&mut self, model: &str, row: Row) -> Result<Row, StoreError> {
        let table = self.store.info(model)?;
        let buf = sql::update(&table, &row)?;
        self.fetch(&table, buf)?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Constraint(format!("no {} record to update", model)))
    }

    fn delete(&mut self, model: &str, row: &Row) -> Result<(), StoreError> {
        let table = self.store.info(model)?;
        let buf = sql::delete_row(&table, row)?;
        self.execute(buf)?;
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let PgSession { store, tx } = *self;
        store.block_on(tx.commit())?;
        Ok(())
    }
}

fn decode_row(coercers: &Coercers, table: &PgTable, row: &PgRow) -> Result<Row, StoreError> {
    table
        .columns
        .iter()
        .map(|c| Ok((c.name.clone(), decode_cell(coercers, row, c)?)))
        .collect()
}

/// Decode one cell by its column tag. The SELECT list already cast it to the matching type.
fn decode_cell(coercers: &Coercers, row: &PgRow, column: &PgColumn) -> Result<Value, StoreError> {
    use sqlx::Row as _;
    let name = column.name.as_str();
    let value = match &column.type_tag {
        TypeTag::Boolean => row.try_get::<Option<bool>, _>(name)?.map(Value::Bool),
        TypeTag::Integer => row.try_get::<Option<i64>, _>(name)?.map(Value::Integer),
        TypeTag::Float => row.try_get::<Option<f64>, _>(name)?.map(Value::Float),
        TypeTag::Decimal | TypeTag::Numeric => row.try_get::<Option<Decimal>, _>(name)?.map(Value::Decimal),
        TypeTag::String | TypeTag::Custom(_) => row.try_get::<Option<String>, _>(name)?.map(Value::Text),
        TypeTag::Uuid => row.try_get::<Option<uuid::Uuid>, _>(name)?.map(Value::Uuid),
        TypeTag::DateTime => row.try_get::<Option<NaiveDateTime>, _>(name)?.map(Value::DateTime),
        TypeTag::DateTimeTz => row
            .try_get::<Option<DateTime<Utc>>, _>(name)?
            .map(|d| Value::DateTimeTz(d.with_timezone(&Utc.fix()))),
        TypeTag::Date => row.try_get::<Option<NaiveDate>, _>(name)?.map(Value::Date),
        TypeTag::Time => row.try_get::<Option<NaiveTime>, _>(name)?.map(Value::Time),
        TypeTag::Interval => row
            .try_get::<Option<PgInterval>, _>(name)?
            .map(|i| Value::Interval(interval_duration(&i))),
        TypeTag::Json => row.try_get::<Option<serde_json::Value>, _>(name)?.map(Value::Json),
        TypeTag::Array(item) => row
            .try_get::<Option<serde_json::Value>, _>(name)?
            .map(|j| array_from_json(coercers, item, &j)),
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Months count as 30 days.
fn interval_duration(i: &PgInterval) -> Duration {
    let days = i64::from(i.months) * 30 + i64::from(i.days);
    Duration::microseconds(i.microseconds) + Duration::days(days)
}

/// Items that do not parse with their tag's converter keep their JSON mapping.
fn array_from_json(coercers: &Coercers, item: &TypeTag, json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|j| match j {
                    serde_json::Value::Array(_) => array_from_json(coercers, item, j),
                    _ => coercers
                        .deserialize_value(item, j)
                        .unwrap_or_else(|_| Value::from_json_lossy(j)),
                })
                .collect(),
        ),
        other => Value::from_json_lossy(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_interval_duration() {
        let i = PgInterval {
            months: 1,
            days: 2,
            microseconds: 7_200_000_012,
        };
        assert_eq!(
            interval_duration(&i),
            Duration::days(32) + Duration::microseconds(7_200_000_012)
        );
    }

    #[test]
    fn test_array_items_use_item_converters() {
        let c = Coercers::builtin();
        let v = array_from_json(&c, &TypeTag::Date, &json!(["2017-01-01", null]));
        assert_eq!(
            v,
            Value::Array(vec![
                Value::Date(NaiveDate::from_ymd_opt(2017, 1, 1).unwrap()),
                Value::Null
            ])
        );
        let v = array_from_json(&c, &TypeTag::Interval, &json!(["02:00:00"]));
        assert_eq!(v, Value::Array(vec![Value::from("02:00:00")]));
    }
}
