//! Typed errors and HTTP mapping.

use crate::validation::ValidationErrors;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use thiserror::Error;

/// Registration-time faults. Raised before any route exists.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("resource {resource}: `only` and `exclude` are mutually exclusive")]
    OnlyAndExclude { resource: String },
    #[error("resource {resource}: unknown column '{column}' in {context}")]
    UnknownColumn {
        resource: String,
        column: String,
        context: &'static str,
    },
    #[error("resource {resource}: primary key '{column}' cannot be {context}")]
    PrimaryKeyField {
        resource: String,
        column: String,
        context: &'static str,
    },
    #[error("resource {resource}: invalid {context} value for '{column}': {message}")]
    InvalidValue {
        resource: String,
        column: String,
        context: &'static str,
        message: String,
    },
    #[error("unknown method: {0}")]
    UnknownMethod(String),
    #[error("config load: {0}")]
    Load(String),
    #[error("validation rule for '{column}': {message}")]
    Rule { column: String, message: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Persistence faults.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("constraint: {0}")]
    Constraint(String),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("unsupported value for column '{column}': {message}")]
    Unsupported { column: String, message: String },
    #[error("database: {0}")]
    Db(sqlx::Error),
}

/// Key and check violations surface as `Constraint` so callers can tell them from outages.
impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db)
                if db.is_unique_violation() || db.is_foreign_key_violation() || db.is_check_violation() =>
            {
                StoreError::Constraint(db.message().to_string())
            }
            _ => StoreError::Db(e),
        }
    }
}

/// A converter could not turn a value into the other representation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoercionError {
    #[error("expected {expected}, got {found}")]
    Mismatch { expected: String, found: String },
    #[error("{0}")]
    Invalid(String),
    #[error("{column}: {source}")]
    Column {
        column: String,
        #[source]
        source: Box<CoercionError>,
    },
}

impl CoercionError {
    pub fn mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        CoercionError::Mismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub fn at(self, column: &str) -> Self {
        CoercionError::Column {
            column: column.to_string(),
            source: Box::new(self),
        }
    }
}

/// Client-facing business errors. The dispatch pipeline turns these into error payloads.
#[derive(Error, Debug)]
pub enum RestError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("Incoherent primary_key ({column}) in payload ({payload}) and url ({url}) for PUT")]
    IncoherentPrimaryKey {
        column: String,
        payload: String,
        url: String,
    },
    #[error("Validation error")]
    Validation(ValidationErrors),
    #[error("{0}")]
    Unsupported(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{message}")]
    Custom { status: StatusCode, message: String },
}

impl RestError {
    pub fn status(&self) -> StatusCode {
        match self {
            RestError::NotFound(_) => StatusCode::NOT_FOUND,
            RestError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RestError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            RestError::Forbidden(_) => StatusCode::FORBIDDEN,
            RestError::IncoherentPrimaryKey { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            RestError::Validation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RestError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            RestError::Conflict(_) => StatusCode::CONFLICT,
            RestError::Custom { status, .. } => *status,
        }
    }

    /// `{message}` plus `errors` for validation failures.
    pub fn body(&self) -> Value {
        let errors = match self {
            RestError::Validation(errors) => Some(errors.to_value()),
            _ => None,
        };
        crate::response::error_body(self.to_string(), errors)
    }
}

impl From<ValidationErrors> for RestError {
    fn from(e: ValidationErrors) -> Self {
        RestError::Validation(e)
    }
}

impl From<CoercionError> for RestError {
    fn from(e: CoercionError) -> Self {
        RestError::BadRequest(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Rest(#[from] RestError),
    /// Batch PUT/DELETE on a resource registered without `allow_batch`. A server configuration fault.
    #[error("{0}")]
    BatchNotAllowed(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("serialize: {0}")]
    Serialize(CoercionError),
    #[error("encode: {0}")]
    Encode(String),
}

impl From<CoercionError> for AppError {
    fn from(e: CoercionError) -> Self {
        AppError::Rest(e.into())
    }
}

impl From<ValidationErrors> for AppError {
    fn from(e: ValidationErrors) -> Self {
        AppError::Rest(e.into())
    }
}

impl AppError {
    /// A write the store refused because of a key or constraint clash. Reported to the client.
    pub fn from_write(e: StoreError) -> Self {
        match e {
            StoreError::Constraint(message) => RestError::Conflict(message).into(),
            other => other.into(),
        }
    }

    pub fn batch_not_allowed() -> Self {
        AppError::BatchNotAllowed("You must set allow_batch to true if you want to use batch methods.".into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Rest(e) => e.status(),
            AppError::BatchNotAllowed(_) => StatusCode::NOT_ACCEPTABLE,
            AppError::Store(StoreError::UnknownModel(_)) => StatusCode::NOT_FOUND,
            AppError::Store(_) | AppError::Config(_) | AppError::Serialize(_) | AppError::Encode(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if let AppError::Rest(e) = &self {
            return (status, Json(e.body())).into_response();
        }
        tracing::error!(error = %self, status = %status, "request failed");
        (status, Json(crate::response::error_body(self.to_string(), None))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(RestError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            RestError::IncoherentPrimaryKey {
                column: "id".into(),
                payload: "2".into(),
                url: "1".into()
            }
            .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(RestError::Unsupported("x".into()).status(), StatusCode::NOT_IMPLEMENTED);
        let conflict = AppError::from_write(StoreError::Constraint("tree(id=1) already exists".into()));
        assert!(matches!(&conflict, AppError::Rest(RestError::Conflict(_))));
        assert_eq!(conflict.into_response().status(), StatusCode::CONFLICT);
        let outage = AppError::from_write(StoreError::Poisoned);
        assert_eq!(outage.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
        let resp = AppError::batch_not_allowed().into_response();
        assert_eq!(resp.status(), StatusCode::NOT_ACCEPTABLE);
    }

    #[test]
    fn test_coercion_error_names_column() {
        let e = CoercionError::Invalid("not a date".into()).at("planted");
        assert_eq!(e.to_string(), "planted: not a date");
        let rest: RestError = e.into();
        assert_eq!(rest.status(), StatusCode::BAD_REQUEST);
    }
}
