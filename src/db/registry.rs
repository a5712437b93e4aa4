//! Process-wide connection settings.
//!
//! One default connection is set up with [`ConnectionRegistry::init`]; further
//! connections are registered by name. When a context asks for the default
//! connection without a connection string, an optional resolver supplies one.

use crate::config::DEFAULT_PARAM_PREFIX;
use crate::db::provider::{ConnectionInfo, Provider};
use crate::error::{DbError, DbResult};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};
use tracing::info;

pub type ConnectionStringResolver = Arc<dyn Fn() -> Option<String> + Send + Sync>;

static CONNECTIONS: LazyLock<ConnectionRegistry> = LazyLock::new(ConnectionRegistry::new);

#[derive(Default)]
struct Entries {
    default: Option<ConnectionInfo>,
    named: HashMap<String, ConnectionInfo>,
    resolver: Option<ConnectionStringResolver>,
}

pub struct ConnectionRegistry {
    entries: RwLock<Entries>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
        }
    }

    pub fn global() -> &'static ConnectionRegistry {
        &CONNECTIONS
    }

    /// Set the default connection. Fails when called twice.
    pub fn init(
        &self,
        provider: Arc<dyn Provider>,
        param_prefix: Option<&str>,
        connection_string: impl Into<String>,
    ) -> DbResult<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.default.is_some() {
            return Err(DbError::configuration(
                "The default connection has already been initialized",
            ));
        }
        let info = ConnectionInfo::new(
            provider,
            param_prefix.unwrap_or(DEFAULT_PARAM_PREFIX),
            connection_string,
        );
        info!(provider = %info.kind(), "Default connection initialized");
        entries.default = Some(info);
        Ok(())
    }

    /// Register a named connection. Fails on a duplicate name.
    pub fn register(
        &self,
        name: &str,
        provider: Arc<dyn Provider>,
        param_prefix: Option<&str>,
        connection_string: impl Into<String>,
    ) -> DbResult<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.named.contains_key(name) {
            return Err(DbError::configuration(format!(
                "A connection named '{}' is already registered",
                name
            )));
        }
        let info = ConnectionInfo::new(
            provider,
            param_prefix.unwrap_or(DEFAULT_PARAM_PREFIX),
            connection_string,
        )
        .named(name);
        info!(name = %name, provider = %info.kind(), "Connection registered");
        entries.named.insert(name.to_string(), info);
        Ok(())
    }

    /// Supply the default connection string on demand.
    pub fn set_connection_string_resolver(
        &self,
        resolver: impl Fn() -> Option<String> + Send + Sync + 'static,
    ) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .resolver = Some(Arc::new(resolver));
    }

    pub fn is_initialized(&self) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .default
            .is_some()
    }

    /// Connection settings for `name` (or the default when `None`).
    ///
    /// The connection string is taken from `connection_string` when given, then
    /// from the registration, then from the resolver. An empty result is a
    /// configuration error.
    pub fn resolve(
        &self,
        name: Option<&str>,
        connection_string: Option<&str>,
    ) -> DbResult<ConnectionInfo> {
        let (mut info, resolver) = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            let info = match name {
                Some(name) => entries.named.get(name).cloned().ok_or_else(|| {
                    DbError::configuration(format!("No connection named '{}' is registered", name))
                })?,
                None => entries.default.clone().ok_or_else(|| {
                    DbError::configuration(
                        "The default connection has not been initialized; call init first",
                    )
                })?,
            };
            (info, entries.resolver.clone())
        };

        if let Some(explicit) = connection_string.filter(|s| !s.is_empty()) {
            info.connection_string = explicit.to_string();
        } else if info.connection_string.is_empty() && name.is_none() {
            if let Some(resolver) = resolver {
                info.connection_string = resolver().unwrap_or_default();
            }
        }

        if info.connection_string.trim().is_empty() {
            return Err(DbError::configuration(format!(
                "Connection string for {} is empty",
                name.unwrap_or("the default connection")
            )));
        }
        Ok(info)
    }

    /// Forget every registration.
    pub fn reset(&self) {
        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = Entries::default();
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
