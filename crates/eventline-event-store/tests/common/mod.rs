//! Shared test helpers for the lazy facade integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use eventline_core::config::EventSourcingConfiguration;
use eventline_core::dialect::BackendDialect;
use eventline_core::error::EventSourcingError;
use eventline_core::mapper::{EventNameMapper, MessageFactory};
use eventline_core::projection::StoredProjectionManager;
use eventline_core::store::EventStore;
use eventline_event_store::{
    BackendFactory, ConnectionFactory, ConnectionRegistry, DatabaseConnection, LazyEventStore,
    ProjectionBackend,
};
use eventline_test_support::{InMemoryEventStore, InMemoryProjectionStorage};
use sqlx::mysql::MySqlPoolOptions;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

/// Reference name the test configuration resolves.
pub const REFERENCE: &str = "event_store_connection";

/// Install a test log subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// A connection factory that counts `connect` calls and hands out lazy pools,
/// so no database is needed.
#[derive(Debug)]
pub struct CountingConnectionFactory {
    driver: String,
    delay: Duration,
    connects: AtomicUsize,
}

impl CountingConnectionFactory {
    pub fn new(driver: &str) -> Self {
        Self {
            driver: driver.to_owned(),
            delay: Duration::ZERO,
            connects: AtomicUsize::new(0),
        }
    }

    /// Make every `connect` take `delay`, widening the window for racing
    /// callers.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionFactory for CountingConnectionFactory {
    fn driver(&self) -> &str {
        &self.driver
    }

    async fn connect(&self) -> Result<DatabaseConnection, EventSourcingError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let connection = if self.driver.starts_with("postgres") {
            PgPoolOptions::new()
                .connect_lazy("postgres://localhost/eventline")
                .map(DatabaseConnection::Postgres)
        } else {
            MySqlPoolOptions::new()
                .connect_lazy("mysql://localhost/eventline")
                .map(DatabaseConnection::MySql)
        };
        connection.map_err(|e| EventSourcingError::BackendOperationFailed(e.to_string()))
    }
}

/// A backend factory building in-memory backends and counting how often it
/// was asked to. It can be told to report a wrong projection dialect.
#[derive(Debug, Default)]
pub struct InMemoryBackendFactory {
    event_stores: AtomicUsize,
    projection_managers: AtomicUsize,
    reported_dialect: Option<BackendDialect>,
    projection_dialects: std::sync::Mutex<Vec<BackendDialect>>,
}

impl InMemoryBackendFactory {
    pub fn reporting(dialect: BackendDialect) -> Self {
        Self {
            reported_dialect: Some(dialect),
            ..Self::default()
        }
    }

    pub fn event_stores(&self) -> usize {
        self.event_stores.load(Ordering::SeqCst)
    }

    pub fn projection_managers(&self) -> usize {
        self.projection_managers.load(Ordering::SeqCst)
    }

    /// Dialects the projection backends were requested for.
    pub fn projection_dialects(&self) -> Vec<BackendDialect> {
        self.projection_dialects.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackendFactory for InMemoryBackendFactory {
    async fn event_store(
        &self,
        _dialect: BackendDialect,
        _connection: &DatabaseConnection,
        _configuration: &EventSourcingConfiguration,
        message_factory: Arc<dyn MessageFactory>,
    ) -> Result<Arc<dyn EventStore>, EventSourcingError> {
        self.event_stores.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(InMemoryEventStore::new(message_factory)))
    }

    async fn projection_manager(
        &self,
        dialect: BackendDialect,
        event_store: Arc<dyn EventStore>,
        _connection: &DatabaseConnection,
        _configuration: &EventSourcingConfiguration,
    ) -> Result<ProjectionBackend, EventSourcingError> {
        self.projection_managers.fetch_add(1, Ordering::SeqCst);
        self.projection_dialects.lock().unwrap().push(dialect);
        Ok(ProjectionBackend {
            dialect: self.reported_dialect.unwrap_or(dialect),
            manager: Arc::new(StoredProjectionManager::new(
                event_store,
                Arc::new(InMemoryProjectionStorage::default()),
            )),
        })
    }
}

/// The mapper used across tests: `TicketRegistered` is stored as
/// `ticketWasRegistered`.
pub fn ticket_mapper() -> Arc<EventNameMapper> {
    Arc::new(EventNameMapper::create_empty().with_alias("TicketRegistered", "ticketWasRegistered"))
}

/// Build a lazy store resolving `factory` under the default reference.
pub fn lazy_store(
    factory: Arc<CountingConnectionFactory>,
    backends: Arc<InMemoryBackendFactory>,
) -> LazyEventStore {
    let registry = ConnectionRegistry::new().with_factory(REFERENCE, factory);
    LazyEventStore::new(
        EventSourcingConfiguration::default(),
        Arc::new(registry),
        backends,
        ticket_mapper(),
    )
}
