//! autocrud: REST resources generated from data models.
//!
//! Declare a resource over a model (a table in the store), pick its methods and field
//! policies, and the registry mounts GET/PUT/POST/DELETE routes on the web framework.

pub mod api;
pub mod coerce;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod framework;
pub mod idiom;
pub mod keys;
pub mod method;
pub mod resource;
pub mod response;
pub mod routes;
pub mod schema;
pub mod sql;
pub mod state;
pub mod store;
pub mod validation;
pub mod value;

pub use api::RestApi;
pub use coerce::Coercers;
pub use config::{load_resource_configs, validate_resource_config, ApiSettings, ResourceConfig, ValidationRule};
pub use error::{AppError, ConfigError, RestError, StoreError};
pub use filter::{Filter, Query};
pub use framework::{AxumFramework, Framework};
pub use idiom::{Idiom, IdiomKind, JsonIdiom, YamlIdiom};
pub use keys::Keys;
pub use method::Method;
pub use resource::{AuthContext, Resource, ResourceBuilder, VerbHandler};
pub use response::{error_body, Envelope};
pub use routes::{common_routes, common_routes_with_ready};
pub use schema::{Column, Table, TypeTag};
pub use state::AppState;
pub use store::{MemoryStore, PgStore, Row, Session, Store};
pub use validation::{Field, ValidationErrors, ValidationFailure};
pub use value::Value;
