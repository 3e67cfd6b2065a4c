//! Handler tables and the stream loading shared by queries and projectors.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::EventSourcingError;
use crate::event::StoredMessage;
use crate::projection::{ReadModel, StreamPositions};
use crate::store::{EventStore, StreamName};

/// Folds one message into the projection state.
pub type StateHandler = Arc<dyn Fn(Value, &StoredMessage) -> Value + Send + Sync>;

/// Folds one message, with access to the projector's read model.
pub type ReadModelHandler =
    Arc<dyn Fn(&mut dyn ReadModel, Value, &StoredMessage) -> Value + Send + Sync>;

/// Produces the initial state.
pub type InitCallback = Arc<dyn Fn() -> Value + Send + Sync>;

/// Handlers keyed by resolved event type, with an optional catch-all.
pub(crate) struct HandlerTable<H> {
    named: HashMap<String, H>,
    any: Option<H>,
}

impl<H> Default for HandlerTable<H> {
    fn default() -> Self {
        Self {
            named: HashMap::new(),
            any: None,
        }
    }
}

impl<H> HandlerTable<H> {
    pub(crate) fn insert(&mut self, event_type: String, handler: H) {
        self.named.insert(event_type, handler);
    }

    pub(crate) fn set_any(&mut self, handler: H) {
        self.any = Some(handler);
    }

    pub(crate) fn handler_for(&self, message: &StoredMessage) -> Option<&H> {
        self.named
            .get(message.resolved_type())
            .or(self.any.as_ref())
    }
}

/// Where a query or projector reads from and how far it got.
pub(crate) struct StreamCursor {
    pub(crate) streams: Vec<StreamName>,
    pub(crate) positions: StreamPositions,
}

impl StreamCursor {
    pub(crate) fn new() -> Self {
        Self {
            streams: Vec::new(),
            positions: StreamPositions::new(),
        }
    }

    pub(crate) fn add_stream(&mut self, stream: StreamName) {
        if !self.streams.contains(&stream) {
            self.streams.push(stream);
        }
    }

    /// Loads unseen messages of every stream, tagged with their stream.
    /// Streams that do not exist yet contribute nothing. Positions move only
    /// through [`StreamCursor::advance`].
    pub(crate) async fn load_pending(
        &mut self,
        event_store: &dyn EventStore,
        load_count: Option<usize>,
    ) -> Result<Vec<(StreamName, StoredMessage)>, EventSourcingError> {
        let mut pending = Vec::new();
        for stream in &self.streams {
            let position = *self
                .positions
                .entry(stream.as_str().to_owned())
                .or_insert(0);
            match event_store.load(stream, position + 1, load_count).await {
                Ok(messages) => pending.extend(messages.into_iter().map(|m| (stream.clone(), m))),
                Err(EventSourcingError::StreamNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(pending)
    }

    pub(crate) fn advance(&mut self, stream: &StreamName, message: &StoredMessage) {
        let entry = self
            .positions
            .entry(stream.as_str().to_owned())
            .or_insert(0);
        *entry = message.position().unwrap_or(*entry + 1);
    }

    pub(crate) fn reset(&mut self) {
        self.positions.clear();
    }
}
