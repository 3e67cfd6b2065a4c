//! Projections: read models derived by replaying streams.
//!
//! A [`ProjectionManager`] hands out queries and projectors and controls
//! running projections by writing status flags that the projectors pick up
//! between passes. [`StoredProjectionManager`] implements the manager over any
//! [`EventStore`](crate::store::EventStore) and [`ProjectionStorage`] pair;
//! the dialect-specific part lives entirely in the storage.

mod handlers;
mod manager;
mod projector;
mod query;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::EventSourcingError;

pub use handlers::{InitCallback, ReadModelHandler, StateHandler};
pub use manager::StoredProjectionManager;
pub use projector::{Projector, ReadModelProjector};
pub use query::Query;

/// Last processed position per stream.
pub type StreamPositions = BTreeMap<String, i64>;

/// Lifecycle flag of a persisted projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionStatus {
    /// Not running.
    Idle,
    /// A projector is processing events.
    Running,
    /// The running projector should stop after its current pass.
    Stopping,
    /// The running projector should clear its state and start over.
    Resetting,
    /// The running projector should delete the projection.
    Deleting,
    /// As `Deleting`, also dropping whatever the projection emitted.
    DeletingInclEmittedEvents,
}

impl ProjectionStatus {
    /// The persisted string form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Resetting => "resetting",
            Self::Deleting => "deleting",
            Self::DeletingInclEmittedEvents => "deleting incl emitted events",
        }
    }
}

impl fmt::Display for ProjectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectionStatus {
    type Err = EventSourcingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "stopping" => Ok(Self::Stopping),
            "resetting" => Ok(Self::Resetting),
            "deleting" => Ok(Self::Deleting),
            "deleting incl emitted events" => Ok(Self::DeletingInclEmittedEvents),
            other => Err(EventSourcingError::BackendOperationFailed(format!(
                "unknown projection status `{other}`"
            ))),
        }
    }
}

/// Persisted row of a projection.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionRecord {
    /// Lifecycle flag.
    pub status: ProjectionStatus,
    /// Last processed position per stream.
    pub positions: StreamPositions,
    /// Folded state.
    pub state: Value,
}

impl ProjectionRecord {
    /// A freshly created, idle projection with no state.
    #[must_use]
    pub fn idle() -> Self {
        Self {
            status: ProjectionStatus::Idle,
            positions: StreamPositions::new(),
            state: Value::Object(serde_json::Map::new()),
        }
    }
}

/// Tuning for persistent projectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionOptions {
    /// Pause between passes when running continuously.
    pub sleep: Duration,
    /// Number of handled messages after which state is persisted.
    pub persist_block_size: usize,
    /// Maximum messages loaded per stream per pass; `None` loads everything.
    pub load_count: Option<usize>,
}

impl Default for ProjectionOptions {
    fn default() -> Self {
        Self {
            sleep: Duration::from_millis(100),
            persist_block_size: 1000,
            load_count: None,
        }
    }
}

/// A read model a [`ReadModelProjector`] keeps up to date.
///
/// Handlers `stack` operations while folding; the projector calls `persist`
/// at the end of every block.
#[async_trait]
pub trait ReadModel: Send + Sync {
    /// Creates whatever storage the read model needs.
    async fn init(&mut self) -> Result<(), EventSourcingError>;

    /// Whether `init` has already run.
    async fn is_initialized(&self) -> Result<bool, EventSourcingError>;

    /// Clears all data, keeping the storage.
    async fn reset(&mut self) -> Result<(), EventSourcingError>;

    /// Drops the storage.
    async fn delete(&mut self) -> Result<(), EventSourcingError>;

    /// Queues an operation for the next `persist`.
    fn stack(&mut self, operation: &str, args: Value);

    /// Applies queued operations.
    async fn persist(&mut self) -> Result<(), EventSourcingError>;
}

/// Dialect-specific persistence of projection rows.
#[async_trait]
pub trait ProjectionStorage: Send + Sync + fmt::Debug {
    /// Creates the projections table if it does not exist.
    async fn install(&self) -> Result<(), EventSourcingError>;

    /// Inserts an idle row for `name` unless one exists.
    async fn create_projection(&self, name: &str) -> Result<(), EventSourcingError>;

    /// Reads the row for `name`.
    async fn load_projection(
        &self,
        name: &str,
    ) -> Result<Option<ProjectionRecord>, EventSourcingError>;

    /// Overwrites positions and state of an existing row, leaving its status
    /// flag alone.
    async fn persist_projection(
        &self,
        name: &str,
        positions: &StreamPositions,
        state: &Value,
    ) -> Result<(), EventSourcingError>;

    /// Sets the status flag. Returns `false` if no such projection exists.
    async fn update_status(
        &self,
        name: &str,
        status: ProjectionStatus,
    ) -> Result<bool, EventSourcingError>;

    /// Removes the row.
    async fn delete_projection(&self, name: &str) -> Result<(), EventSourcingError>;

    /// Projection names equal to `filter` (all when `None`), sorted.
    async fn fetch_projection_names(
        &self,
        filter: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, EventSourcingError>;

    /// Projection names matching `regex`, sorted.
    async fn fetch_projection_names_regex(
        &self,
        regex: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, EventSourcingError>;
}

/// Creates and controls projections over one event store.
#[async_trait]
pub trait ProjectionManager: Send + Sync + fmt::Debug {
    /// Creates a transient query.
    async fn create_query(&self) -> Result<Query, EventSourcingError>;

    /// Creates a persistent projector.
    async fn create_projection(
        &self,
        name: &str,
        options: ProjectionOptions,
    ) -> Result<Projector, EventSourcingError>;

    /// Creates a persistent projector that maintains `read_model`.
    async fn create_read_model_projection(
        &self,
        name: &str,
        read_model: Box<dyn ReadModel>,
        options: ProjectionOptions,
    ) -> Result<ReadModelProjector, EventSourcingError>;

    /// Flags a projection for deletion.
    async fn delete_projection(
        &self,
        name: &str,
        delete_emitted_events: bool,
    ) -> Result<(), EventSourcingError>;

    /// Flags a projection for reset.
    async fn reset_projection(&self, name: &str) -> Result<(), EventSourcingError>;

    /// Flags a projection to stop.
    async fn stop_projection(&self, name: &str) -> Result<(), EventSourcingError>;

    /// Lists projection names, optionally only the one equal to `filter`.
    async fn fetch_projection_names(
        &self,
        filter: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, EventSourcingError>;

    /// Lists projection names matching a regular expression.
    async fn fetch_projection_names_regex(
        &self,
        regex: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, EventSourcingError>;

    /// Current status flag of a projection.
    async fn fetch_projection_status(
        &self,
        name: &str,
    ) -> Result<ProjectionStatus, EventSourcingError>;

    /// Last processed position per stream.
    async fn fetch_projection_stream_positions(
        &self,
        name: &str,
    ) -> Result<StreamPositions, EventSourcingError>;

    /// Last persisted state.
    async fn fetch_projection_state(&self, name: &str) -> Result<Value, EventSourcingError>;
}
