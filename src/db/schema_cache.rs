//! Cache of stored procedure parameter lists.
//!
//! Entries are keyed by procedure name, connection string and provider kind, so
//! two connections never share an entry. Every lookup hands out a fresh copy of
//! the cached parameters; callers bind values into their copy freely.

use crate::db::provider::ConnectionInfo;
use crate::error::DbResult;
use crate::models::{Parameter, ParameterDirection, ProviderKind};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SchemaKey {
    procedure: String,
    connection_string: String,
    kind: ProviderKind,
}

static SCHEMAS: LazyLock<ParameterSchemaCache> = LazyLock::new(ParameterSchemaCache::new);

pub struct ParameterSchemaCache {
    entries: RwLock<HashMap<SchemaKey, Arc<Vec<Parameter>>>>,
}

impl ParameterSchemaCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn global() -> &'static ParameterSchemaCache {
        &SCHEMAS
    }

    /// Parameters of `procedure` on the given connection, in declared order.
    ///
    /// On a miss the parameters are derived over a short-lived connection and a
    /// leading return-value parameter is dropped.
    pub async fn schema_for(
        &self,
        info: &ConnectionInfo,
        procedure: &str,
    ) -> DbResult<Vec<Parameter>> {
        let key = SchemaKey {
            procedure: procedure.to_string(),
            connection_string: info.connection_string.clone(),
            kind: info.kind(),
        };
        let cached = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        if let Some(parameters) = cached {
            return Ok(parameters.as_ref().clone());
        }

        debug!(procedure = %procedure, provider = %info.kind(), "Parameter schema cache miss");
        let parameters = Arc::new(derive(info, procedure).await?);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::clone(&parameters));
        Ok(parameters.as_ref().clone())
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ParameterSchemaCache {
    fn default() -> Self {
        Self::new()
    }
}

async fn derive(info: &ConnectionInfo, procedure: &str) -> DbResult<Vec<Parameter>> {
    let mut connection = info.create_connection()?;
    connection.open().await?;
    let derived = connection.derive_parameters(procedure).await;
    if let Err(e) = connection.close().await {
        warn!(procedure = %procedure, error = %e, "Failed to close schema connection");
    }

    let mut parameters = derived?;
    if parameters
        .first()
        .is_some_and(|p| p.direction == ParameterDirection::ReturnValue)
    {
        parameters.remove(0);
    }
    Ok(parameters)
}
