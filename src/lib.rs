//! sproc-mapper library
//!
//! Maps caller-defined entity types onto stored procedure calls and their
//! result sets across MySQL, SQLite, SQL Server and ODBC connections.

pub mod config;
pub mod db;
pub mod error;
pub mod mapping;
pub mod models;

pub use config::Config;
pub use db::{ConnectionRegistry, ContextOptions, DataService, DbContext, ParameterSchemaCache};
pub use error::{DbError, DbResult};
pub use mapping::{AnyEntity, Entity, FieldRegistry, LoadOptions};
pub use models::{DataTable, PagingInfo, Value};
