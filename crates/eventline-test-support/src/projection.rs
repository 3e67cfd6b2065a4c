//! Test projection doubles: in-memory `ProjectionStorage` and a recording
//! `ReadModel`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use eventline_core::error::EventSourcingError;
use eventline_core::projection::{
    ProjectionRecord, ProjectionStatus, ProjectionStorage, ReadModel, StreamPositions,
};
use regex::Regex;
use serde_json::Value;

/// Projection rows kept in a sorted map.
#[derive(Debug, Default)]
pub struct InMemoryProjectionStorage {
    rows: Mutex<BTreeMap<String, ProjectionRecord>>,
}

impl InMemoryProjectionStorage {
    /// Returns a copy of the row for `name`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn row(&self, name: &str) -> Option<ProjectionRecord> {
        self.rows.lock().unwrap().get(name).cloned()
    }

    /// Inserts or replaces a row directly, bypassing any projector.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn insert(&self, name: &str, record: ProjectionRecord) {
        self.rows.lock().unwrap().insert(name.to_owned(), record);
    }

    fn page(names: impl Iterator<Item = String>, limit: usize, offset: usize) -> Vec<String> {
        names.skip(offset).take(limit).collect()
    }
}

#[async_trait]
impl ProjectionStorage for InMemoryProjectionStorage {
    async fn install(&self) -> Result<(), EventSourcingError> {
        Ok(())
    }

    async fn create_projection(&self, name: &str) -> Result<(), EventSourcingError> {
        self.rows
            .lock()
            .unwrap()
            .entry(name.to_owned())
            .or_insert_with(ProjectionRecord::idle);
        Ok(())
    }

    async fn load_projection(
        &self,
        name: &str,
    ) -> Result<Option<ProjectionRecord>, EventSourcingError> {
        Ok(self.row(name))
    }

    async fn persist_projection(
        &self,
        name: &str,
        positions: &StreamPositions,
        state: &Value,
    ) -> Result<(), EventSourcingError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .get_mut(name)
            .ok_or_else(|| EventSourcingError::ProjectionNotFound(name.to_owned()))?;
        row.positions = positions.clone();
        row.state = state.clone();
        Ok(())
    }

    async fn update_status(
        &self,
        name: &str,
        status: ProjectionStatus,
    ) -> Result<bool, EventSourcingError> {
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows.get_mut(name) else {
            return Ok(false);
        };
        row.status = status;
        Ok(true)
    }

    async fn delete_projection(&self, name: &str) -> Result<(), EventSourcingError> {
        self.rows.lock().unwrap().remove(name);
        Ok(())
    }

    async fn fetch_projection_names(
        &self,
        filter: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, EventSourcingError> {
        let rows = self.rows.lock().unwrap();
        let names = rows
            .keys()
            .filter(|name| filter.is_none_or(|f| f == name.as_str()))
            .cloned();
        Ok(Self::page(names, limit, offset))
    }

    async fn fetch_projection_names_regex(
        &self,
        regex: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, EventSourcingError> {
        let pattern = Regex::new(regex)
            .map_err(|e| EventSourcingError::BackendOperationFailed(e.to_string()))?;
        let rows = self.rows.lock().unwrap();
        let names = rows.keys().filter(|name| pattern.is_match(name)).cloned();
        Ok(Self::page(names, limit, offset))
    }
}

/// What a [`RecordingReadModel`] has been asked to do.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReadModelLog {
    /// Number of `init` calls.
    pub init_calls: usize,
    /// Number of `reset` calls.
    pub reset_calls: usize,
    /// Whether `delete` was called.
    pub deleted: bool,
    /// Operations stacked since the last `persist`.
    pub stacked: Vec<(String, Value)>,
    /// Operations applied by `persist`, in order.
    pub persisted: Vec<(String, Value)>,
}

/// A read model that records every call. Clones share the same log, so a
/// test can keep one clone while the projector owns another.
#[derive(Debug, Default, Clone)]
pub struct RecordingReadModel {
    log: Arc<Mutex<ReadModelLog>>,
}

impl RecordingReadModel {
    /// Returns a snapshot of the log.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn log(&self) -> ReadModelLog {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReadModel for RecordingReadModel {
    async fn init(&mut self) -> Result<(), EventSourcingError> {
        self.log.lock().unwrap().init_calls += 1;
        Ok(())
    }

    async fn is_initialized(&self) -> Result<bool, EventSourcingError> {
        Ok(self.log.lock().unwrap().init_calls > 0)
    }

    async fn reset(&mut self) -> Result<(), EventSourcingError> {
        let mut log = self.log.lock().unwrap();
        log.reset_calls += 1;
        log.stacked.clear();
        log.persisted.clear();
        Ok(())
    }

    async fn delete(&mut self) -> Result<(), EventSourcingError> {
        self.log.lock().unwrap().deleted = true;
        Ok(())
    }

    fn stack(&mut self, operation: &str, args: Value) {
        self.log
            .lock()
            .unwrap()
            .stacked
            .push((operation.to_owned(), args));
    }

    async fn persist(&mut self) -> Result<(), EventSourcingError> {
        let mut log = self.log.lock().unwrap();
        let stacked = std::mem::take(&mut log.stacked);
        log.persisted.extend(stacked);
        Ok(())
    }
}
