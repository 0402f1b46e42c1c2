//! Handler registration and non-blocking callback dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{Category, Error};

/// Event handler. Receives the message `subject`, or the full `data`
/// object for [`Category::Other`].
pub type Handler = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

/// Hook for transport errors that end the dispatch loop.
pub type ErrorHandler = Arc<dyn Fn(&Error) + Send + Sync>;

/// The set of handlers a [`PushClient`](crate::PushClient) routes events to.
///
/// At most one handler per [`Category`]; registering again replaces it.
/// Events for a category without a handler are dropped.
#[derive(Clone, Default)]
pub struct Callbacks {
    handlers: HashMap<Category, Handler>,
    on_error: Option<ErrorHandler>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(mut self, category: Category, handler: F) -> Self
    where
        F: Fn(serde_json::Value) + Send + Sync + 'static,
    {
        self.handlers.insert(category, Arc::new(handler));
        self
    }

    pub fn on_message<F>(self, handler: F) -> Self
    where
        F: Fn(serde_json::Value) + Send + Sync + 'static,
    {
        self.on(Category::Message, handler)
    }

    pub fn on_direct_message<F>(self, handler: F) -> Self
    where
        F: Fn(serde_json::Value) + Send + Sync + 'static,
    {
        self.on(Category::DirectMessage, handler)
    }

    pub fn on_like<F>(self, handler: F) -> Self
    where
        F: Fn(serde_json::Value) + Send + Sync + 'static,
    {
        self.on(Category::Like, handler)
    }

    pub fn on_favorite<F>(self, handler: F) -> Self
    where
        F: Fn(serde_json::Value) + Send + Sync + 'static,
    {
        self.on(Category::Favorite, handler)
    }

    /// Catch-all for unrecognized data types.
    pub fn on_other<F>(self, handler: F) -> Self
    where
        F: Fn(serde_json::Value) + Send + Sync + 'static,
    {
        self.on(Category::Other, handler)
    }

    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }

    /// Invoke the handler for `category` on the blocking pool.
    ///
    /// Returns immediately; `false` if no handler is registered. The spawned
    /// call is detached and is not awaited or cancelled by `stop()`.
    pub(crate) fn dispatch(&self, category: Category, payload: serde_json::Value) -> bool {
        let Some(handler) = self.handlers.get(&category) else {
            return false;
        };
        let handler = Arc::clone(handler);
        tracing::debug!(?category, "calling handler");
        drop(tokio::task::spawn_blocking(move || handler(payload)));
        true
    }

    pub(crate) fn report_error(&self, err: &Error) {
        match &self.on_error {
            Some(hook) => hook(err),
            None => tracing::debug!("no error hook registered"),
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}
