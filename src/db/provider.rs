//! Provider and connection abstraction.
//!
//! Each database family implements [`Provider`] to create connections, and each
//! connection implements [`Connection`]: open/close, transactions, parameter
//! derivation for stored procedures and command execution. New providers are
//! added by implementing these traits and registering them, not by branching on
//! the provider kind.

use crate::error::{DbError, DbResult};
use crate::models::{Command, ExecuteResult, Parameter, ProviderKind, mask_connection_string};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

/// Factory for connections of one database family.
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Create a closed connection for `connection_string`.
    fn create_connection(&self, connection_string: &str) -> DbResult<Box<dyn Connection>>;
}

/// One physical connection.
///
/// `query` and `execute` write output and in/out parameter values back into
/// the command's parameters.
#[async_trait]
pub trait Connection: Send {
    fn kind(&self) -> ProviderKind;

    fn is_open(&self) -> bool;

    async fn open(&mut self) -> DbResult<()>;

    async fn close(&mut self) -> DbResult<()>;

    async fn begin_transaction(&mut self) -> DbResult<()>;

    async fn commit(&mut self) -> DbResult<()>;

    async fn rollback(&mut self) -> DbResult<()>;

    /// Parameters of a stored procedure in declared order, as reported by the
    /// server. A leading return-value parameter may be included.
    async fn derive_parameters(&mut self, procedure: &str) -> DbResult<Vec<Parameter>>;

    /// Run the command and buffer every result set it produces.
    async fn query(&mut self, command: &mut Command) -> DbResult<ExecuteResult>;

    /// Run the command and return the number of affected rows.
    async fn execute(&mut self, command: &mut Command) -> DbResult<u64>;
}

/// Everything needed to open a context: provider, parameter prefix and
/// connection string.
#[derive(Clone)]
pub struct ConnectionInfo {
    /// Registration name, `None` for the default connection.
    pub name: Option<String>,
    pub provider: Arc<dyn Provider>,
    pub param_prefix: String,
    pub connection_string: String,
}

impl ConnectionInfo {
    pub fn new(
        provider: Arc<dyn Provider>,
        param_prefix: impl Into<String>,
        connection_string: impl Into<String>,
    ) -> Self {
        Self {
            name: None,
            provider,
            param_prefix: param_prefix.into(),
            connection_string: connection_string.into(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn kind(&self) -> ProviderKind {
        self.provider.kind()
    }

    pub fn create_connection(&self) -> DbResult<Box<dyn Connection>> {
        self.provider.create_connection(&self.connection_string)
    }
}

impl std::fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("name", &self.name)
            .field("provider", &self.kind())
            .field("param_prefix", &self.param_prefix)
            .field(
                "connection_string",
                &mask_connection_string(&self.connection_string),
            )
            .finish()
    }
}

// =============================================================================
// Provider Registry
// =============================================================================

static PROVIDERS: LazyLock<ProviderRegistry> = LazyLock::new(ProviderRegistry::with_builtins);

/// Providers available by kind.
///
/// The built-in drivers are registered up front; anything else (OLE DB in
/// particular) is registered by the caller.
pub struct ProviderRegistry {
    providers: RwLock<HashMap<ProviderKind, Arc<dyn Provider>>>,
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
        }
    }

    /// A registry holding every driver compiled into this build.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(crate::db::mysql::MySqlProvider));
        registry.register(Arc::new(crate::db::sqlite::SqliteProvider));
        #[cfg(feature = "mssql")]
        registry.register(Arc::new(crate::db::mssql::MsSqlProvider));
        #[cfg(feature = "odbc")]
        registry.register(Arc::new(crate::db::odbc::OdbcProvider));
        registry
    }

    /// The process-wide registry.
    pub fn global() -> &'static ProviderRegistry {
        &PROVIDERS
    }

    /// Register a provider, replacing any previous one of the same kind.
    pub fn register(&self, provider: Arc<dyn Provider>) {
        self.providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(provider.kind(), provider);
    }

    pub fn resolve(&self, kind: ProviderKind) -> DbResult<Arc<dyn Provider>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
            .ok_or_else(|| {
                DbError::configuration(format!(
                    "No provider registered for {}; enable its cargo feature or register one",
                    kind
                ))
            })
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
