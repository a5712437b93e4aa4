//! Base for business objects that run calls through a shared context.
//!
//! A service creates its own auto-open/close context on first use, or works
//! on a context handed over by another service so several services can take
//! part in one transaction. Only the service that created the context closes
//! it.

use crate::db::context::{ContextOptions, DbContext};
use crate::db::provider::ConnectionInfo;
use crate::db::registry::ConnectionRegistry;
use crate::error::{DbError, DbResult};
use std::sync::Arc;
use tokio::sync::Mutex;

pub type SharedContext = Arc<Mutex<DbContext>>;

#[derive(Default)]
pub struct DataService {
    /// Registration name; `None` for the default connection
    connection_name: Option<String>,
    context: Option<SharedContext>,
    owner: bool,
}

impl DataService {
    pub fn new() -> Self {
        Self::default()
    }

    /// A service using the named registration.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            connection_name: Some(name.into()),
            ..Self::default()
        }
    }

    /// A service working on another service's context.
    pub fn with_context(context: SharedContext) -> Self {
        Self {
            connection_name: None,
            context: Some(context),
            owner: false,
        }
    }

    pub fn has_context(&self) -> bool {
        self.context.is_some()
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    fn resolve_info(&self) -> DbResult<ConnectionInfo> {
        ConnectionRegistry::global().resolve(self.connection_name.as_deref(), None)
    }

    /// The context, created on first access as an auto-open/close context.
    pub async fn context(&mut self) -> DbResult<SharedContext> {
        if let Some(context) = &self.context {
            return Ok(Arc::clone(context));
        }
        let info = self.resolve_info()?;
        self.attach(info, ContextOptions::auto_open_close()).await
    }

    /// Create and attach a context explicitly, e.g. a transactional one.
    pub async fn create_context(&mut self, options: ContextOptions) -> DbResult<SharedContext> {
        if self.context.is_some() {
            return Err(DbError::invalid_operation(
                "this service already has a database context",
            ));
        }
        let info = self.resolve_info()?;
        self.attach(info, options).await
    }

    /// Attach a context built from explicit settings.
    pub async fn create_context_with(
        &mut self,
        info: ConnectionInfo,
        options: ContextOptions,
    ) -> DbResult<SharedContext> {
        if self.context.is_some() {
            return Err(DbError::invalid_operation(
                "this service already has a database context",
            ));
        }
        self.attach(info, options).await
    }

    async fn attach(
        &mut self,
        info: ConnectionInfo,
        options: ContextOptions,
    ) -> DbResult<SharedContext> {
        let context = Arc::new(Mutex::new(DbContext::connect(info, options).await?));
        self.context = Some(Arc::clone(&context));
        self.owner = true;
        Ok(context)
    }

    /// Hand this service's context to another service.
    pub fn share(&self) -> DbResult<SharedContext> {
        self.context.clone().ok_or_else(|| {
            DbError::invalid_operation("there is no database context to share yet")
        })
    }

    /// Close the context if this service created it, then detach.
    pub async fn dispose(&mut self) {
        if let Some(context) = self.context.take() {
            if self.owner {
                context.lock().await.dispose().await;
            }
        }
        self.owner = false;
    }
}

impl std::fmt::Debug for DataService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataService")
            .field("connection_name", &self.connection_name)
            .field("has_context", &self.context.is_some())
            .field("owner", &self.owner)
            .finish()
    }
}
