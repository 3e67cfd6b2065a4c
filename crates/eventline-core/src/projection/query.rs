//! Transient queries: fold streams into an in-memory state, persist nothing.

use std::sync::Arc;

use serde_json::Value;

use crate::error::EventSourcingError;
use crate::event::StoredMessage;
use crate::projection::handlers::{HandlerTable, InitCallback, StateHandler, StreamCursor};
use crate::store::{EventStore, StreamName};

/// A one-off fold over one or more streams.
///
/// Calling [`Query::run`] again continues from where the previous run left
/// off.
pub struct Query {
    event_store: Arc<dyn EventStore>,
    cursor: StreamCursor,
    init: Option<InitCallback>,
    handlers: HandlerTable<StateHandler>,
    state: Value,
}

impl Query {
    /// Creates a query over `event_store`.
    #[must_use]
    pub fn new(event_store: Arc<dyn EventStore>) -> Self {
        Self {
            event_store,
            cursor: StreamCursor::new(),
            init: None,
            handlers: HandlerTable::default(),
            state: Value::Object(serde_json::Map::new()),
        }
    }

    /// Sets the initial state.
    #[must_use]
    pub fn init(mut self, init: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        self.state = init();
        self.init = Some(Arc::new(init));
        self
    }

    /// Adds a stream to read.
    #[must_use]
    pub fn from_stream(mut self, stream: impl Into<StreamName>) -> Self {
        self.cursor.add_stream(stream.into());
        self
    }

    /// Handles messages whose resolved type is `event_type`.
    #[must_use]
    pub fn when(
        mut self,
        event_type: impl Into<String>,
        handler: impl Fn(Value, &StoredMessage) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.handlers.insert(event_type.into(), Arc::new(handler));
        self
    }

    /// Handles every message without a more specific handler.
    #[must_use]
    pub fn when_any(
        mut self,
        handler: impl Fn(Value, &StoredMessage) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.handlers.set_any(Arc::new(handler));
        self
    }

    /// Folds every message not yet seen.
    ///
    /// # Errors
    ///
    /// Propagates event store errors. Streams that do not exist are skipped.
    pub async fn run(&mut self) -> Result<(), EventSourcingError> {
        let pending = self
            .cursor
            .load_pending(self.event_store.as_ref(), None)
            .await?;
        for (stream, message) in pending {
            if let Some(handler) = self.handlers.handler_for(&message) {
                let state = std::mem::take(&mut self.state);
                self.state = handler(state, &message);
            }
            self.cursor.advance(&stream, &message);
        }
        Ok(())
    }

    /// Forgets all positions and restores the initial state.
    pub fn reset(&mut self) {
        self.cursor.reset();
        self.state = self
            .init
            .as_ref()
            .map_or_else(|| Value::Object(serde_json::Map::new()), |init| init());
    }

    /// The folded state.
    #[must_use]
    pub fn state(&self) -> &Value {
        &self.state
    }
}
