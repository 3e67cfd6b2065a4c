//! Projection manager over an event store and a projection storage.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::EventSourcingError;
use crate::projection::{
    ProjectionManager, ProjectionOptions, ProjectionRecord, ProjectionStatus, ProjectionStorage,
    Projector, Query, ReadModel, ReadModelProjector, StreamPositions,
};
use crate::store::EventStore;

/// Controls projections by writing status flags to a [`ProjectionStorage`].
#[derive(Debug, Clone)]
pub struct StoredProjectionManager {
    event_store: Arc<dyn EventStore>,
    storage: Arc<dyn ProjectionStorage>,
}

impl StoredProjectionManager {
    /// Creates a new `StoredProjectionManager`.
    #[must_use]
    pub fn new(event_store: Arc<dyn EventStore>, storage: Arc<dyn ProjectionStorage>) -> Self {
        Self {
            event_store,
            storage,
        }
    }

    async fn flag(&self, name: &str, status: ProjectionStatus) -> Result<(), EventSourcingError> {
        debug!(projection = %name, status = %status, "flagging projection");
        if self.storage.update_status(name, status).await? {
            Ok(())
        } else {
            Err(EventSourcingError::ProjectionNotFound(name.to_owned()))
        }
    }

    async fn record(&self, name: &str) -> Result<ProjectionRecord, EventSourcingError> {
        self.storage
            .load_projection(name)
            .await?
            .ok_or_else(|| EventSourcingError::ProjectionNotFound(name.to_owned()))
    }
}

fn check_limit(limit: usize) -> Result<(), EventSourcingError> {
    if limit == 0 {
        return Err(EventSourcingError::InvalidArgument(
            "limit must be at least 1".into(),
        ));
    }
    Ok(())
}

#[async_trait]
impl ProjectionManager for StoredProjectionManager {
    async fn create_query(&self) -> Result<Query, EventSourcingError> {
        Ok(Query::new(Arc::clone(&self.event_store)))
    }

    async fn create_projection(
        &self,
        name: &str,
        options: ProjectionOptions,
    ) -> Result<Projector, EventSourcingError> {
        Ok(Projector::new(
            name,
            options,
            Arc::clone(&self.event_store),
            Arc::clone(&self.storage),
        ))
    }

    async fn create_read_model_projection(
        &self,
        name: &str,
        read_model: Box<dyn ReadModel>,
        options: ProjectionOptions,
    ) -> Result<ReadModelProjector, EventSourcingError> {
        Ok(ReadModelProjector::new(
            name,
            read_model,
            options,
            Arc::clone(&self.event_store),
            Arc::clone(&self.storage),
        ))
    }

    async fn delete_projection(
        &self,
        name: &str,
        delete_emitted_events: bool,
    ) -> Result<(), EventSourcingError> {
        let status = if delete_emitted_events {
            ProjectionStatus::DeletingInclEmittedEvents
        } else {
            ProjectionStatus::Deleting
        };
        self.flag(name, status).await
    }

    async fn reset_projection(&self, name: &str) -> Result<(), EventSourcingError> {
        self.flag(name, ProjectionStatus::Resetting).await
    }

    async fn stop_projection(&self, name: &str) -> Result<(), EventSourcingError> {
        self.flag(name, ProjectionStatus::Stopping).await
    }

    async fn fetch_projection_names(
        &self,
        filter: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, EventSourcingError> {
        check_limit(limit)?;
        self.storage
            .fetch_projection_names(filter, limit, offset)
            .await
    }

    async fn fetch_projection_names_regex(
        &self,
        regex: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, EventSourcingError> {
        check_limit(limit)?;
        if regex.is_empty() {
            return Err(EventSourcingError::InvalidArgument(
                "regex must not be empty".into(),
            ));
        }
        self.storage
            .fetch_projection_names_regex(regex, limit, offset)
            .await
    }

    async fn fetch_projection_status(
        &self,
        name: &str,
    ) -> Result<ProjectionStatus, EventSourcingError> {
        Ok(self.record(name).await?.status)
    }

    async fn fetch_projection_stream_positions(
        &self,
        name: &str,
    ) -> Result<StreamPositions, EventSourcingError> {
        Ok(self.record(name).await?.positions)
    }

    async fn fetch_projection_state(&self, name: &str) -> Result<Value, EventSourcingError> {
        Ok(self.record(name).await?.state)
    }
}
