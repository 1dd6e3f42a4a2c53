//! Query-narrowing predicates and the query object handed to stores.
//! A resource narrows its collection with a `Filter`; sub-resources conjoin theirs onto the parent's.

use crate::keys::Keys;
use crate::store::Row;
use crate::value::Value;
use std::cmp::Ordering;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn sql(&self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Default)]
pub enum Filter {
    /// Matches every record.
    #[default]
    All,
    Cmp {
        column: String,
        op: CmpOp,
        value: Value,
    },
    In {
        column: String,
        values: Vec<Value>,
    },
    IsNull(String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn cmp(column: impl Into<String>, op: CmpOp, value: impl Into<Value>) -> Self {
        Filter::Cmp {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::cmp(column, CmpOp::Eq, value)
    }

    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::cmp(column, CmpOp::Ne, value)
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::cmp(column, CmpOp::Lt, value)
    }

    pub fn le(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::cmp(column, CmpOp::Le, value)
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::cmp(column, CmpOp::Gt, value)
    }

    pub fn ge(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::cmp(column, CmpOp::Ge, value)
    }

    pub fn is_in(column: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::In {
            column: column.into(),
            values,
        }
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Filter::IsNull(column.into())
    }

    pub fn not(self) -> Self {
        Filter::Not(Box::new(self))
    }

    pub fn or(self, other: Filter) -> Self {
        match self {
            Filter::Or(mut parts) => {
                parts.push(other);
                Filter::Or(parts)
            }
            first => Filter::Or(vec![first, other]),
        }
    }

    /// Conjunction; `All` is the identity and nested `And`s are flattened.
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut a), Filter::And(b)) => {
                a.extend(b);
                Filter::And(a)
            }
            (Filter::And(mut a), f) => {
                a.push(f);
                Filter::And(a)
            }
            (f, Filter::And(mut b)) => {
                b.insert(0, f);
                Filter::And(b)
            }
            (a, b) => Filter::And(vec![a, b]),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Filter::All)
    }

    /// In-memory evaluation. Comparisons against null never match (SQL semantics).
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Filter::All => true,
            Filter::Cmp { column, op, value } => {
                let Some(ord) = row.get(column).and_then(|v| v.compare(value)) else {
                    return false;
                };
                match op {
                    CmpOp::Eq => ord == Ordering::Equal,
                    CmpOp::Ne => ord != Ordering::Equal,
                    CmpOp::Lt => ord == Ordering::Less,
                    CmpOp::Le => ord != Ordering::Greater,
                    CmpOp::Gt => ord == Ordering::Greater,
                    CmpOp::Ge => ord != Ordering::Less,
                }
            }
            Filter::In { column, values } => match row.get(column) {
                Some(v) => values.iter().any(|candidate| v.same_as(candidate)),
                None => false,
            },
            Filter::IsNull(column) => row.get(column).map(Value::is_null).unwrap_or(true),
            Filter::And(parts) => parts.iter().all(|f| f.matches(row)),
            Filter::Or(parts) => parts.iter().any(|f| f.matches(row)),
            Filter::Not(inner) => !inner.matches(row),
        }
    }
}

/// A model plus the predicate selecting its records.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub model: String,
    pub filter: Filter,
}

impl Query {
    pub fn new(model: impl Into<String>, filter: Filter) -> Self {
        Query {
            model: model.into(),
            filter,
        }
    }

    /// Narrow to the present key slots.
    pub fn filter_by(&self, keys: &Keys) -> Query {
        let filter = keys
            .present()
            .fold(self.filter.clone(), |f, (name, value)| f.and(Filter::eq(name, value.clone())));
        Query {
            model: self.model.clone(),
            filter,
        }
    }
}
