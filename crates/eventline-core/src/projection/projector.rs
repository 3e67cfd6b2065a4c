//! Persistent projectors.
//!
//! Each pass reads the projection row, reacts to the status flag a manager
//! may have written since the last pass, folds unseen messages and persists
//! state and positions every `persist_block_size` messages and at the end of
//! the pass.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::EventSourcingError;
use crate::event::StoredMessage;
use crate::projection::handlers::{
    HandlerTable, InitCallback, ReadModelHandler, StateHandler, StreamCursor,
};
use crate::projection::{
    ProjectionOptions, ProjectionRecord, ProjectionStatus, ProjectionStorage, ReadModel,
};
use crate::store::{EventStore, StreamName};

/// What a projector does with folded messages beyond updating state.
#[async_trait]
trait Sink: Send {
    fn apply(&mut self, state: Value, message: &StoredMessage) -> Value;

    async fn prepare(&mut self) -> Result<(), EventSourcingError>;

    async fn flush(&mut self) -> Result<(), EventSourcingError>;

    async fn reset(&mut self) -> Result<(), EventSourcingError>;

    async fn delete(
        &mut self,
        name: &str,
        event_store: &dyn EventStore,
        delete_emitted_events: bool,
    ) -> Result<(), EventSourcingError>;
}

/// Bookkeeping shared by both projector flavours.
struct ProjectionRun {
    name: String,
    options: ProjectionOptions,
    event_store: Arc<dyn EventStore>,
    storage: Arc<dyn ProjectionStorage>,
    cursor: StreamCursor,
    init: Option<InitCallback>,
    state: Value,
}

/// How a pass ended.
enum PassOutcome {
    Continue,
    Stop,
    Deleted,
}

impl ProjectionRun {
    fn new(
        name: &str,
        options: ProjectionOptions,
        event_store: Arc<dyn EventStore>,
        storage: Arc<dyn ProjectionStorage>,
    ) -> Self {
        Self {
            name: name.to_owned(),
            options,
            event_store,
            storage,
            cursor: StreamCursor::new(),
            init: None,
            state: Value::Object(serde_json::Map::new()),
        }
    }

    fn initial_state(&self) -> Value {
        self.init
            .as_ref()
            .map_or_else(|| Value::Object(serde_json::Map::new()), |init| init())
    }

    async fn execute<S: Sink>(
        &mut self,
        sink: &mut S,
        keep_running: bool,
    ) -> Result<(), EventSourcingError> {
        self.storage.create_projection(&self.name).await?;
        sink.prepare().await?;

        let record = self.load_record().await?;
        self.cursor.positions = record.positions;
        self.state = if self.cursor.positions.is_empty() {
            self.initial_state()
        } else {
            record.state
        };

        loop {
            match self.pass(sink).await? {
                PassOutcome::Deleted => return Ok(()),
                PassOutcome::Stop => break,
                PassOutcome::Continue if !keep_running => break,
                PassOutcome::Continue => tokio::time::sleep(self.options.sleep).await,
            }
        }

        self.persist(sink).await?;
        self.storage
            .update_status(&self.name, ProjectionStatus::Idle)
            .await?;
        Ok(())
    }

    async fn pass<S: Sink>(&mut self, sink: &mut S) -> Result<PassOutcome, EventSourcingError> {
        let status = self.load_record().await?.status;
        debug!(projection = %self.name, status = %status, "projection pass");
        match status {
            ProjectionStatus::Stopping => return Ok(PassOutcome::Stop),
            ProjectionStatus::Deleting | ProjectionStatus::DeletingInclEmittedEvents => {
                let delete_emitted_events = status == ProjectionStatus::DeletingInclEmittedEvents;
                sink.delete(&self.name, self.event_store.as_ref(), delete_emitted_events)
                    .await?;
                self.storage.delete_projection(&self.name).await?;
                return Ok(PassOutcome::Deleted);
            }
            ProjectionStatus::Resetting => {
                self.cursor.reset();
                self.state = self.initial_state();
                sink.reset().await?;
                self.persist(sink).await?;
                self.mark_running().await?;
            }
            ProjectionStatus::Idle => self.mark_running().await?,
            ProjectionStatus::Running => {}
        }

        let pending = self
            .cursor
            .load_pending(self.event_store.as_ref(), self.options.load_count)
            .await?;
        let block_size = self.options.persist_block_size.max(1);
        let mut in_block = 0;
        for (stream, message) in pending {
            let state = std::mem::take(&mut self.state);
            self.state = sink.apply(state, &message);
            self.cursor.advance(&stream, &message);
            in_block += 1;
            if in_block == block_size {
                self.persist(sink).await?;
                in_block = 0;
            }
        }

        self.persist(sink).await?;
        Ok(PassOutcome::Continue)
    }

    async fn mark_running(&self) -> Result<(), EventSourcingError> {
        self.storage
            .update_status(&self.name, ProjectionStatus::Running)
            .await?;
        Ok(())
    }

    async fn load_record(&self) -> Result<ProjectionRecord, EventSourcingError> {
        self.storage
            .load_projection(&self.name)
            .await?
            .ok_or_else(|| EventSourcingError::ProjectionNotFound(self.name.clone()))
    }

    async fn persist<S: Sink>(&self, sink: &mut S) -> Result<(), EventSourcingError> {
        sink.flush().await?;
        self.storage
            .persist_projection(&self.name, &self.cursor.positions, &self.state)
            .await
    }
}

struct StateSink {
    handlers: HandlerTable<StateHandler>,
}

#[async_trait]
impl Sink for StateSink {
    fn apply(&mut self, state: Value, message: &StoredMessage) -> Value {
        match self.handlers.handler_for(message) {
            Some(handler) => handler(state, message),
            None => state,
        }
    }

    async fn prepare(&mut self) -> Result<(), EventSourcingError> {
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), EventSourcingError> {
        Ok(())
    }

    async fn reset(&mut self) -> Result<(), EventSourcingError> {
        Ok(())
    }

    async fn delete(
        &mut self,
        name: &str,
        event_store: &dyn EventStore,
        delete_emitted_events: bool,
    ) -> Result<(), EventSourcingError> {
        let emitted = StreamName::new(name);
        if delete_emitted_events && event_store.has_stream(&emitted).await? {
            event_store.delete(&emitted).await?;
        }
        Ok(())
    }
}

struct ReadModelSink {
    handlers: HandlerTable<ReadModelHandler>,
    read_model: Box<dyn ReadModel>,
}

#[async_trait]
impl Sink for ReadModelSink {
    fn apply(&mut self, state: Value, message: &StoredMessage) -> Value {
        match self.handlers.handler_for(message) {
            Some(handler) => handler(self.read_model.as_mut(), state, message),
            None => state,
        }
    }

    async fn prepare(&mut self) -> Result<(), EventSourcingError> {
        if !self.read_model.is_initialized().await? {
            self.read_model.init().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), EventSourcingError> {
        self.read_model.persist().await
    }

    async fn reset(&mut self) -> Result<(), EventSourcingError> {
        self.read_model.reset().await
    }

    async fn delete(
        &mut self,
        _name: &str,
        _event_store: &dyn EventStore,
        delete_emitted_events: bool,
    ) -> Result<(), EventSourcingError> {
        if delete_emitted_events {
            self.read_model.delete().await?;
        }
        Ok(())
    }
}

/// A named, persistent fold whose state lives in the projections table.
pub struct Projector {
    run: ProjectionRun,
    sink: StateSink,
}

impl Projector {
    /// Creates a projector. Nothing is written until [`Projector::run`].
    #[must_use]
    pub fn new(
        name: &str,
        options: ProjectionOptions,
        event_store: Arc<dyn EventStore>,
        storage: Arc<dyn ProjectionStorage>,
    ) -> Self {
        Self {
            run: ProjectionRun::new(name, options, event_store, storage),
            sink: StateSink {
                handlers: HandlerTable::default(),
            },
        }
    }

    /// Sets the initial state.
    #[must_use]
    pub fn init(mut self, init: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        self.run.init = Some(Arc::new(init));
        self
    }

    /// Adds a stream to read.
    #[must_use]
    pub fn from_stream(mut self, stream: impl Into<StreamName>) -> Self {
        self.run.cursor.add_stream(stream.into());
        self
    }

    /// Handles messages whose resolved type is `event_type`.
    #[must_use]
    pub fn when(
        mut self,
        event_type: impl Into<String>,
        handler: impl Fn(Value, &StoredMessage) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.sink.handlers.insert(event_type.into(), Arc::new(handler));
        self
    }

    /// Handles every message without a more specific handler.
    #[must_use]
    pub fn when_any(
        mut self,
        handler: impl Fn(Value, &StoredMessage) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.sink.handlers.set_any(Arc::new(handler));
        self
    }

    /// Runs one pass, or keeps running until the projection is stopped or
    /// deleted.
    ///
    /// # Errors
    ///
    /// Propagates event store and projection storage errors.
    pub async fn run(&mut self, keep_running: bool) -> Result<(), EventSourcingError> {
        self.run.execute(&mut self.sink, keep_running).await
    }

    /// The projection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.run.name
    }

    /// The state as of the last processed message.
    #[must_use]
    pub fn state(&self) -> &Value {
        &self.run.state
    }
}

/// A persistent projection that also maintains an external read model.
pub struct ReadModelProjector {
    run: ProjectionRun,
    sink: ReadModelSink,
}

impl ReadModelProjector {
    /// Creates a read model projector. Nothing is written until
    /// [`ReadModelProjector::run`].
    #[must_use]
    pub fn new(
        name: &str,
        read_model: Box<dyn ReadModel>,
        options: ProjectionOptions,
        event_store: Arc<dyn EventStore>,
        storage: Arc<dyn ProjectionStorage>,
    ) -> Self {
        Self {
            run: ProjectionRun::new(name, options, event_store, storage),
            sink: ReadModelSink {
                handlers: HandlerTable::default(),
                read_model,
            },
        }
    }

    /// Sets the initial state.
    #[must_use]
    pub fn init(mut self, init: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        self.run.init = Some(Arc::new(init));
        self
    }

    /// Adds a stream to read.
    #[must_use]
    pub fn from_stream(mut self, stream: impl Into<StreamName>) -> Self {
        self.run.cursor.add_stream(stream.into());
        self
    }

    /// Handles messages whose resolved type is `event_type`.
    #[must_use]
    pub fn when(
        mut self,
        event_type: impl Into<String>,
        handler: impl Fn(&mut dyn ReadModel, Value, &StoredMessage) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.sink.handlers.insert(event_type.into(), Arc::new(handler));
        self
    }

    /// Handles every message without a more specific handler.
    #[must_use]
    pub fn when_any(
        mut self,
        handler: impl Fn(&mut dyn ReadModel, Value, &StoredMessage) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.sink.handlers.set_any(Arc::new(handler));
        self
    }

    /// Runs one pass, or keeps running until the projection is stopped or
    /// deleted.
    ///
    /// # Errors
    ///
    /// Propagates event store, projection storage and read model errors.
    pub async fn run(&mut self, keep_running: bool) -> Result<(), EventSourcingError> {
        self.run.execute(&mut self.sink, keep_running).await
    }

    /// The projection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.run.name
    }

    /// The state as of the last processed message.
    #[must_use]
    pub fn state(&self) -> &Value {
        &self.run.state
    }

    /// The maintained read model.
    #[must_use]
    pub fn read_model(&self) -> &dyn ReadModel {
        self.sink.read_model.as_ref()
    }
}
