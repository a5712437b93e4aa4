//! Process-wide notification hooks.
//!
//! Collaborators (logging, auditing) subscribe once at startup. Callbacks run
//! synchronously on the task that executes the call, in subscription order.

use crate::db::context::DbContext;
use crate::error::DbError;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

pub type ContextHook = Arc<dyn Fn(&DbContext) + Send + Sync>;
pub type ExceptionHook = Arc<dyn Fn(&DbContext, &DbError) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    before_execute: Vec<ContextHook>,
    after_execute: Vec<ContextHook>,
    connection_opened: Vec<ContextHook>,
    exception: Vec<ExceptionHook>,
}

static HOOKS: LazyLock<RwLock<Subscribers>> = LazyLock::new(RwLock::default);

fn subscribe(add: impl FnOnce(&mut Subscribers)) {
    add(&mut *HOOKS.write().unwrap_or_else(PoisonError::into_inner));
}

// Callbacks are cloned out first so a hook may subscribe without deadlocking.
fn snapshot<T: Clone>(select: impl FnOnce(&Subscribers) -> &Vec<T>) -> Vec<T> {
    select(&*HOOKS.read().unwrap_or_else(PoisonError::into_inner)).clone()
}

/// Runs before every execute-family call, after the connection is open.
pub fn on_before_execute(hook: impl Fn(&DbContext) + Send + Sync + 'static) {
    subscribe(|s| s.before_execute.push(Arc::new(hook)));
}

/// Runs after every successful execute-family call.
pub fn on_after_execute(hook: impl Fn(&DbContext) + Send + Sync + 'static) {
    subscribe(|s| s.after_execute.push(Arc::new(hook)));
}

pub fn on_connection_opened(hook: impl Fn(&DbContext) + Send + Sync + 'static) {
    subscribe(|s| s.connection_opened.push(Arc::new(hook)));
}

/// Runs when a call fails, unless the call was marked error-silent.
pub fn on_exception(hook: impl Fn(&DbContext, &DbError) + Send + Sync + 'static) {
    subscribe(|s| s.exception.push(Arc::new(hook)));
}

/// Drop every subscription.
pub fn clear() {
    *HOOKS.write().unwrap_or_else(PoisonError::into_inner) = Subscribers::default();
}

pub(crate) fn raise_before_execute(context: &DbContext) {
    for hook in snapshot(|s| &s.before_execute) {
        hook(context);
    }
}

pub(crate) fn raise_after_execute(context: &DbContext) {
    for hook in snapshot(|s| &s.after_execute) {
        hook(context);
    }
}

pub(crate) fn raise_connection_opened(context: &DbContext) {
    for hook in snapshot(|s| &s.connection_opened) {
        hook(context);
    }
}

pub(crate) fn raise_exception(context: &DbContext, error: &DbError) {
    for hook in snapshot(|s| &s.exception) {
        hook(context, error);
    }
}
