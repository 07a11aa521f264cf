//! Subscriber registries.
//!
//! Each concern keeps an ordered list of handlers. Registration appends,
//! removal drops the first entry that is the same `Arc` (pointer identity),
//! and the same handler may be registered more than once. Dispatch works on
//! a snapshot, so a handler that adds or removes handlers while running does
//! not affect the delivery in progress.

use std::sync::Arc;

use boardsync_protocol::{ChangeKind, Entity, RemoteConfig};
use boardsync_transport::TransportError;

use crate::client::LiveClient;
use crate::state::LifecycleState;

pub type StateChangeFn = dyn Fn(&LiveClient, LifecycleState) + Send + Sync;
pub type ReconnectFn = dyn Fn(&LiveClient) + Send + Sync;
pub type ChangeFn = dyn Fn(&LiveClient, &[Entity]) + Send + Sync;
pub type ErrorFn = dyn Fn(&LiveClient, &TransportError) + Send + Sync;
pub type ConfigChangeFn = dyn Fn(&LiveClient, &RemoteConfig) + Send + Sync;
pub type AppVersionFn = dyn Fn(bool) + Send + Sync;

pub type StateChangeHandler = Arc<StateChangeFn>;
pub type ReconnectHandler = Arc<ReconnectFn>;
pub type ChangeHandler = Arc<ChangeFn>;
pub type ErrorHandler = Arc<ErrorFn>;
pub type ConfigChangeHandler = Arc<ConfigChangeFn>;
pub type AppVersionHandler = Arc<AppVersionFn>;

/// Ordered handler list with identity-based removal.
pub struct HandlerList<F: ?Sized> {
    handlers: Vec<Arc<F>>,
}

impl<F: ?Sized> Default for HandlerList<F> {
    fn default() -> Self {
        Self { handlers: Vec::new() }
    }
}

impl<F: ?Sized> HandlerList<F> {
    pub fn add(&mut self, handler: Arc<F>) {
        self.handlers.push(handler);
    }

    /// Remove the first registration of `handler`. Returns whether one was found.
    pub fn remove(&mut self, handler: &Arc<F>) -> bool {
        let target = Arc::as_ptr(handler);
        match self
            .handlers
            .iter()
            .position(|h| std::ptr::addr_eq(Arc::as_ptr(h), target))
        {
            Some(index) => {
                self.handlers.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> Vec<Arc<F>> {
        self.handlers.clone()
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// All subscriber registries of one client.
#[derive(Default)]
pub struct HandlerRegistries {
    pub state_change: HandlerList<StateChangeFn>,
    pub reconnect: HandlerList<ReconnectFn>,
    pub block_change: HandlerList<ChangeFn>,
    pub category_change: HandlerList<ChangeFn>,
    pub error: HandlerList<ErrorFn>,
    pub config_change: HandlerList<ConfigChangeFn>,
    pub app_version: Option<AppVersionHandler>,
}

impl HandlerRegistries {
    pub fn change(&self, kind: ChangeKind) -> &HandlerList<ChangeFn> {
        match kind {
            ChangeKind::Block => &self.block_change,
            ChangeKind::Category => &self.category_change,
        }
    }

    pub fn change_mut(&mut self, kind: ChangeKind) -> &mut HandlerList<ChangeFn> {
        match kind {
            ChangeKind::Block => &mut self.block_change,
            ChangeKind::Category => &mut self.category_change,
        }
    }

    /// Drop the handlers that belong to one connection's lifetime.
    ///
    /// Config-change handlers and the app-version hook are kept; they must
    /// survive a close/reopen cycle.
    pub fn clear_connection_handlers(&mut self) {
        self.state_change.clear();
        self.reconnect.clear();
        self.block_change.clear();
        self.category_change.clear();
        self.error.clear();
    }
}
