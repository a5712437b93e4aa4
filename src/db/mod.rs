//! Database access layer.
//!
//! - Providers and connections for each database family
//! - Connection registry and the parameter schema cache
//! - The database context with its failure envelope and hooks
//! - Parameter binding and one-line procedure calls
//! - Business object base sharing a context

pub mod binder;
pub mod calls;
pub mod context;
pub mod hooks;
#[cfg(feature = "mssql")]
pub mod mssql;
pub mod mysql;
#[cfg(feature = "odbc")]
pub mod odbc;
mod params;
pub mod provider;
pub mod registry;
pub mod schema_cache;
pub mod service;
pub mod sqlite;
pub mod types;

pub use binder::{Binding, OutputBinding, OutputBindingSet, bind, bind_named, copy_outputs};
pub use calls::{
    call_list, call_non_query, call_paged, call_paged_table, call_paged_with, call_scalar,
    call_single,
};
pub use context::{ContextOptions, DbContext, split_batches};
pub use provider::{Connection, ConnectionInfo, Provider, ProviderRegistry};
pub use registry::ConnectionRegistry;
pub use schema_cache::ParameterSchemaCache;
pub use service::{DataService, SharedContext};
