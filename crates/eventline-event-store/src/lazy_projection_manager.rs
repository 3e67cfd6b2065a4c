//! Projection manager facade bound to a [`LazyEventStore`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use eventline_core::error::EventSourcingError;
use eventline_core::projection::{
    ProjectionManager, ProjectionOptions, ProjectionStatus, Projector, Query, ReadModel,
    ReadModelProjector, StreamPositions,
};

use crate::lazy_event_store::LazyEventStore;

/// A [`ProjectionManager`] that resolves its backend on the first operation.
///
/// The backend is always built for the dialect the event store resolved to,
/// over the event store's own connection; the event store is resolved first
/// if it has not been yet. A backend reporting any other dialect is rejected.
/// Every operation is then delegated unchanged.
#[derive(Debug)]
pub struct LazyProjectionManager {
    event_store: Arc<LazyEventStore>,
    resolved: OnceCell<Arc<dyn ProjectionManager>>,
}

impl LazyProjectionManager {
    /// Creates an unresolved manager over `event_store`.
    #[must_use]
    pub fn new(event_store: Arc<LazyEventStore>) -> Self {
        Self {
            event_store,
            resolved: OnceCell::new(),
        }
    }

    /// The event store projections replay from.
    #[must_use]
    pub fn event_store(&self) -> &Arc<LazyEventStore> {
        &self.event_store
    }

    /// Whether the backend has been resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolved.initialized()
    }

    /// Resolves if needed and returns the backend manager.
    ///
    /// # Errors
    ///
    /// Propagates event store resolution errors and returns
    /// `EventSourcingError::DialectMismatch` if the projection backend was
    /// built for a different dialect than the event store.
    pub async fn resolve(&self) -> Result<Arc<dyn ProjectionManager>, EventSourcingError> {
        self.resolved
            .get_or_try_init(|| async {
                self.build().await.inspect_err(|e| {
                    warn!(error = %e, "projection manager resolution failed");
                })
            })
            .await
            .map(Arc::clone)
    }

    async fn build(&self) -> Result<Arc<dyn ProjectionManager>, EventSourcingError> {
        let event_store = &self.event_store;
        let dialect = event_store.resolved_dialect().await?;
        let connection = event_store.wrapped_connection().await?;
        let replay_from = event_store.resolve().await?;
        let backend = event_store
            .backends()
            .projection_manager(dialect, replay_from, &connection, event_store.configuration())
            .await?;
        if backend.dialect != dialect {
            return Err(EventSourcingError::DialectMismatch {
                expected: dialect,
                found: backend.dialect,
            });
        }
        info!(dialect = %dialect, "projection manager resolved");
        Ok(backend.manager)
    }
}

#[async_trait]
impl ProjectionManager for LazyProjectionManager {
    async fn create_query(&self) -> Result<Query, EventSourcingError> {
        self.resolve().await?.create_query().await
    }

    async fn create_projection(
        &self,
        name: &str,
        options: ProjectionOptions,
    ) -> Result<Projector, EventSourcingError> {
        self.resolve().await?.create_projection(name, options).await
    }

    async fn create_read_model_projection(
        &self,
        name: &str,
        read_model: Box<dyn ReadModel>,
        options: ProjectionOptions,
    ) -> Result<ReadModelProjector, EventSourcingError> {
        self.resolve()
            .await?
            .create_read_model_projection(name, read_model, options)
            .await
    }

    async fn delete_projection(
        &self,
        name: &str,
        delete_emitted_events: bool,
    ) -> Result<(), EventSourcingError> {
        self.resolve()
            .await?
            .delete_projection(name, delete_emitted_events)
            .await
    }

    async fn reset_projection(&self, name: &str) -> Result<(), EventSourcingError> {
        self.resolve().await?.reset_projection(name).await
    }

    async fn stop_projection(&self, name: &str) -> Result<(), EventSourcingError> {
        self.resolve().await?.stop_projection(name).await
    }

    async fn fetch_projection_names(
        &self,
        filter: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, EventSourcingError> {
        self.resolve()
            .await?
            .fetch_projection_names(filter, limit, offset)
            .await
    }

    async fn fetch_projection_names_regex(
        &self,
        regex: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, EventSourcingError> {
        self.resolve()
            .await?
            .fetch_projection_names_regex(regex, limit, offset)
            .await
    }

    async fn fetch_projection_status(
        &self,
        name: &str,
    ) -> Result<ProjectionStatus, EventSourcingError> {
        self.resolve().await?.fetch_projection_status(name).await
    }

    async fn fetch_projection_stream_positions(
        &self,
        name: &str,
    ) -> Result<StreamPositions, EventSourcingError> {
        self.resolve()
            .await?
            .fetch_projection_stream_positions(name)
            .await
    }

    async fn fetch_projection_state(&self, name: &str) -> Result<Value, EventSourcingError> {
        self.resolve().await?.fetch_projection_state(name).await
    }
}
