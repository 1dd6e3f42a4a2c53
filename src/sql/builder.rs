//! Builds parameterized SELECT, COUNT, INSERT, UPDATE and DELETE from an introspected table and a `Filter`.

use super::params::PgBindValue;
use crate::error::StoreError;
use crate::filter::Filter;
use crate::schema::{Column, Table, TypeTag};
use crate::store::Row;
use crate::value::Value;

/// One column as PostgreSQL sees it.
#[derive(Clone, Debug, PartialEq)]
pub struct PgColumn {
    pub name: String,
    pub type_tag: TypeTag,
    /// Cast target for placeholders, e.g. `int4`, `numeric`, `int4[]`, `"public"."mood"`.
    pub pg_type: String,
    pub has_default: bool,
    pub primary_key: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PgTable {
    /// Schema as given in the model name; `None` means the search path default.
    pub model_schema: Option<String>,
    pub schema: String,
    pub name: String,
    pub columns: Vec<PgColumn>,
}

impl PgTable {
    pub fn table(&self) -> Table {
        let mut table = Table::new(self.name.clone());
        if let Some(schema) = &self.model_schema {
            table = table.in_schema(schema.clone());
        }
        self.columns.iter().fold(table, |t, c| {
            t.column(Column {
                name: c.name.clone(),
                type_tag: c.type_tag.clone(),
                primary_key: c.primary_key,
            })
        })
    }

    fn column(&self, name: &str) -> Result<&PgColumn, StoreError> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| StoreError::Unsupported {
                column: name.to_string(),
                message: format!("no such column in {}.{}", self.schema, self.name),
            })
    }

    fn primary_keys(&self) -> impl Iterator<Item = &PgColumn> {
        self.columns.iter().filter(|c| c.primary_key)
    }
}

/// Quote identifier for PostgreSQL (safe: only from introspection).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn qualified_table(table: &PgTable) -> String {
    format!("{}.{}", quoted(&table.schema), quoted(&table.name))
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<PgBindValue>,
}

impl QueryBuf {
    fn push_param(&mut self, v: &Value) -> u32 {
        self.params.push(PgBindValue::from_value(v));
        self.params.len() as u32
    }

    fn placeholder(&mut self, column: &PgColumn, v: &Value) -> String {
        let n = self.push_param(v);
        format!("${}::{}", n, column.pg_type)
    }
}

/// Maps an information_schema `udt_name` onto a tag. Array types carry a leading underscore.
pub fn type_tag_for(data_type: &str, udt_name: &str) -> TypeTag {
    if data_type.eq_ignore_ascii_case("ARRAY") {
        return TypeTag::array_of(type_tag_for("", udt_name.trim_start_matches('_')));
    }
    if data_type.eq_ignore_ascii_case("USER-DEFINED") {
        return TypeTag::Custom(udt_name.to_string());
    }
    match udt_name {
        "bool" => TypeTag::Boolean,
        "int2" | "int4" | "int8" => TypeTag::Integer,
        "float4" | "float8" => TypeTag::Float,
        "numeric" => TypeTag::Numeric,
        "text" | "varchar" | "bpchar" | "name" => TypeTag::String,
        "uuid" => TypeTag::Uuid,
        "timestamp" => TypeTag::DateTime,
        "timestamptz" => TypeTag::DateTimeTz,
        "date" => TypeTag::Date,
        "time" => TypeTag::Time,
        "interval" => TypeTag::Interval,
        "json" | "jsonb" => TypeTag::Json,
        other => TypeTag::Custom(other.to_string()),
    }
}

/// Cast target for a column's placeholders.
pub fn pg_type_for(data_type: &str, udt_schema: &str, udt_name: &str) -> String {
    if data_type.eq_ignore_ascii_case("ARRAY") {
        format!("{}[]", udt_name.trim_start_matches('_'))
    } else if data_type.eq_ignore_ascii_case("USER-DEFINED") {
        format!("{}.{}", quoted(udt_schema), quoted(udt_name))
    } else {
        udt_name.to_string()
    }
}

/// SELECT list: every column cast to the type its decoder expects. Arrays come back as jsonb,
/// custom types as text.
fn select_column_list(table: &PgTable) -> String {
    table
        .columns
        .iter()
        .map(|c| {
            let q = quoted(&c.name);
            let expr = match &c.type_tag {
                TypeTag::Integer => format!("{}::int8", q),
                TypeTag::Float => format!("{}::float8", q),
                TypeTag::Decimal | TypeTag::Numeric => format!("{}::numeric", q),
                TypeTag::String | TypeTag::Custom(_) => format!("{}::text", q),
                TypeTag::Json => format!("{}::jsonb", q),
                TypeTag::Array(_) => format!("to_jsonb({})", q),
                _ => q.clone(),
            };
            format!("{} AS {}", expr, q)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn order_by(table: &PgTable) -> String {
    let pks: Vec<String> = table.primary_keys().map(|c| quoted(&c.name)).collect();
    if pks.is_empty() {
        String::new()
    } else {
        format!(" ORDER BY {}", pks.join(", "))
    }
}

/// Render `filter` as a boolean SQL expression, pushing its values as params.
pub fn where_expr(table: &PgTable, filter: &Filter, q: &mut QueryBuf) -> Result<String, StoreError> {
    Ok(match filter {
        Filter::All => "TRUE".to_string(),
        Filter::Cmp { column, op, value } => {
            let c = table.column(column)?;
            if value.is_null() {
                "FALSE".to_string()
            } else {
                format!("{} {} {}", quoted(&c.name), op.sql(), q.placeholder(c, value))
            }
        }
        Filter::In { column, values } => {
            let c = table.column(column)?;
            let items: Vec<String> = values
                .iter()
                .filter(|v| !v.is_null())
                .map(|v| q.placeholder(c, v))
                .collect();
            if items.is_empty() {
                "FALSE".to_string()
            } else {
                format!("{} IN ({})", quoted(&c.name), items.join(", "))
            }
        }
        Filter::IsNull(column) => format!("{} IS NULL", quoted(&table.column(column)?.name)),
        Filter::And(parts) | Filter::Or(parts) if parts.is_empty() => {
            if matches!(filter, Filter::And(_)) {
                "TRUE".to_string()
            } else {
                "FALSE".to_string()
            }
        }
        Filter::And(parts) => join(table, parts, " AND ", q)?,
        Filter::Or(parts) => join(table, parts, " OR ", q)?,
        Filter::Not(inner) => format!("NOT ({})", where_expr(table, inner, q)?),
    })
}

fn join(table: &PgTable, parts: &[Filter], sep: &str, q: &mut QueryBuf) -> Result<String, StoreError> {
    let rendered = parts
        .iter()
        .map(|f| where_expr(table, f, q))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("({})", rendered.join(sep)))
}

fn where_clause(table: &PgTable, filter: &Filter, q: &mut QueryBuf) -> Result<String, StoreError> {
    if filter.is_all() {
        return Ok(String::new());
    }
    Ok(format!(" WHERE {}", where_expr(table, filter, q)?))
}

/// SELECT matching rows, ordered by primary key.
pub fn select(table: &PgTable, filter: &Filter, limit: Option<u32>) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::default();
    let where_sql = where_clause(table, filter, &mut q)?;
    let limit_sql = limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    q.sql = format!(
        "SELECT {} FROM {}{}{}{}",
        select_column_list(table),
        qualified_table(table),
        where_sql,
        order_by(table),
        limit_sql
    );
    Ok(q)
}

pub fn count(table: &PgTable, filter: &Filter) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::default();
    let where_sql = where_clause(table, filter, &mut q)?;
    q.sql = format!("SELECT COUNT(*) FROM {}{}", qualified_table(table), where_sql);
    Ok(q)
}

pub fn delete_where(table: &PgTable, filter: &Filter) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::default();
    let where_sql = where_clause(table, filter, &mut q)?;
    q.sql = format!("DELETE FROM {}{}", qualified_table(table), where_sql);
    Ok(q)
}

/// DELETE one row by primary key.
pub fn delete_row(table: &PgTable, row: &Row) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::default();
    let mut parts = Vec::new();
    for pk in table.primary_keys() {
        let value = row.get(&pk.name).filter(|v| !v.is_null()).ok_or_else(|| {
            StoreError::Constraint(format!("cannot delete from {} without {}", table.name, pk.name))
        })?;
        parts.push(format!("{} = {}", quoted(&pk.name), q.placeholder(pk, value)));
    }
    if parts.is_empty() {
        return Err(StoreError::Constraint(format!("{} has no primary key", table.name)));
    }
    q.sql = format!("DELETE FROM {} WHERE {}", qualified_table(table), parts.join(" AND "));
    Ok(q)
}

/// INSERT returning the stored row. Null columns that have a server default are left out
/// so the default applies, as is a null primary key. A taken key is a unique violation.
pub fn insert(table: &PgTable, row: &Row) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::default();
    let mut names = Vec::new();
    let mut values = Vec::new();
    for c in &table.columns {
        let Some(value) = row.get(&c.name) else {
            continue;
        };
        if value.is_null() && (c.has_default || c.primary_key) {
            continue;
        }
        names.push(quoted(&c.name));
        values.push(q.placeholder(c, value));
    }
    let target = qualified_table(table);
    let returning = select_column_list(table);
    q.sql = if names.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", target, returning)
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            target,
            names.join(", "),
            values.join(", "),
            returning
        )
    };
    Ok(q)
}

/// UPDATE the row with the same primary key, returning it. No match returns no row.
pub fn update(table: &PgTable, row: &Row) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::default();
    let mut sets = Vec::new();
    for c in table.columns.iter().filter(|c| !c.primary_key) {
        if let Some(value) = row.get(&c.name) {
            sets.push(format!("{} = {}", quoted(&c.name), q.placeholder(c, value)));
        }
    }
    let mut keys = Vec::new();
    for pk in table.primary_keys() {
        let value = row.get(&pk.name).filter(|v| !v.is_null()).ok_or_else(|| {
            StoreError::Constraint(format!("cannot update {} without {}", table.name, pk.name))
        })?;
        keys.push(format!("{} = {}", quoted(&pk.name), q.placeholder(pk, value)));
    }
    if keys.is_empty() {
        return Err(StoreError::Constraint(format!("{} has no primary key", table.name)));
    }
    if sets.is_empty() {
        // Keeps RETURNING meaningful for key-only tables.
        sets = table.primary_keys().map(|pk| format!("{0} = {0}", quoted(&pk.name))).collect();
    }
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} RETURNING {}",
        qualified_table(table),
        sets.join(", "),
        keys.join(" AND "),
        select_column_list(table)
    );
    Ok(q)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fruit() -> PgTable {
        PgTable {
            model_schema: None,
            schema: "public".into(),
            name: "fruit".into(),
            columns: vec![
                PgColumn {
                    name: "fruit_id".into(),
                    type_tag: TypeTag::Integer,
                    pg_type: "int4".into(),
                    has_default: true,
                    primary_key: true,
                },
                PgColumn {
                    name: "color".into(),
                    type_tag: TypeTag::String,
                    pg_type: "varchar".into(),
                    has_default: false,
                    primary_key: false,
                },
                PgColumn {
                    name: "size".into(),
                    type_tag: TypeTag::Numeric,
                    pg_type: "numeric".into(),
                    has_default: false,
                    primary_key: false,
                },
            ],
        }
    }

    #[test]
    fn test_select_with_filter() {
        let filter = Filter::eq("color", "red").and(Filter::gt("size", 2).or(Filter::is_null("size")));
        let q = select(&fruit(), &filter, Some(1)).unwrap();
        assert_eq!(
            q.sql,
            "SELECT \"fruit_id\"::int8 AS \"fruit_id\", \"color\"::text AS \"color\", \"size\"::numeric AS \"size\" \
             FROM \"public\".\"fruit\" WHERE (\"color\" = $1::varchar AND (\"size\" > $2::numeric OR \"size\" IS NULL)) \
             ORDER BY \"fruit_id\" LIMIT 1"
        );
        assert_eq!(q.params, vec![PgBindValue::String("red".into()), PgBindValue::I64(2)]);
    }

    #[test]
    fn test_unknown_filter_column() {
        assert!(count(&fruit(), &Filter::eq("shape", "round")).is_err());
        let q = count(&fruit(), &Filter::All).unwrap();
        assert_eq!(q.sql, "SELECT COUNT(*) FROM \"public\".\"fruit\"");
    }

    #[test]
    fn test_insert_modes() {
        let row = Row::default()
            .with("fruit_id", Value::Null)
            .with("color", "red")
            .with("size", Value::Null);
        let q = insert(&fruit(), &row).unwrap();
        assert!(q.sql.starts_with("INSERT INTO \"public\".\"fruit\" (\"color\", \"size\") VALUES ($1::varchar, $2::numeric) RETURNING"));

        let row = row.with("fruit_id", 4);
        let q = insert(&fruit(), &row).unwrap();
        assert!(q.sql.starts_with("INSERT INTO \"public\".\"fruit\" (\"fruit_id\", \"color\", \"size\") VALUES"));
        assert!(!q.sql.contains("ON CONFLICT"));
        assert_eq!(q.params.len(), 3);
    }

    #[test]
    fn test_update_by_primary_key() {
        let row = Row::default().with("fruit_id", 4).with("color", "green");
        let q = update(&fruit(), &row).unwrap();
        assert!(q.sql.starts_with(
            "UPDATE \"public\".\"fruit\" SET \"color\" = $1::varchar WHERE \"fruit_id\" = $2::int4 RETURNING"
        ));
        assert_eq!(q.params, vec![PgBindValue::String("green".into()), PgBindValue::I64(4)]);
        assert!(update(&fruit(), &Row::default().with("color", "red")).is_err());
    }

    #[test]
    fn test_type_mapping() {
        assert_eq!(type_tag_for("integer", "int4"), TypeTag::Integer);
        assert_eq!(type_tag_for("ARRAY", "_interval"), TypeTag::array_of(TypeTag::Interval));
        assert_eq!(type_tag_for("USER-DEFINED", "mood"), TypeTag::Custom("mood".into()));
        assert_eq!(pg_type_for("ARRAY", "pg_catalog", "_int4"), "int4[]");
        assert_eq!(pg_type_for("USER-DEFINED", "public", "mood"), "\"public\".\"mood\"");
    }
}
