//! Construction of dialect backends over an open connection.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use eventline_core::config::EventSourcingConfiguration;
use eventline_core::dialect::BackendDialect;
use eventline_core::error::EventSourcingError;
use eventline_core::mapper::MessageFactory;
use eventline_core::projection::{ProjectionManager, ProjectionStorage, StoredProjectionManager};
use eventline_core::store::EventStore;

use crate::connection::DatabaseConnection;
use crate::mysql::{MySqlEventStore, MySqlProjectionStorage};
use crate::postgres::{PgEventStore, PgProjectionStorage};

/// A projection manager together with the dialect it was built for.
#[derive(Debug, Clone)]
pub struct ProjectionBackend {
    /// Dialect the manager's queries are written in.
    pub dialect: BackendDialect,
    /// The manager.
    pub manager: Arc<dyn ProjectionManager>,
}

/// Builds the event store and projection backend of a dialect.
#[async_trait]
pub trait BackendFactory: Send + Sync + fmt::Debug {
    /// Builds the event store for `dialect` over `connection`.
    async fn event_store(
        &self,
        dialect: BackendDialect,
        connection: &DatabaseConnection,
        configuration: &EventSourcingConfiguration,
        message_factory: Arc<dyn MessageFactory>,
    ) -> Result<Arc<dyn EventStore>, EventSourcingError>;

    /// Builds the projection backend for `dialect` over `connection`,
    /// replaying from `event_store`.
    async fn projection_manager(
        &self,
        dialect: BackendDialect,
        event_store: Arc<dyn EventStore>,
        connection: &DatabaseConnection,
        configuration: &EventSourcingConfiguration,
    ) -> Result<ProjectionBackend, EventSourcingError>;
}

/// Builds the SQL adapters of this crate. When the configuration asks for
/// it, their tables are created on construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlBackendFactory;

fn mismatch(dialect: BackendDialect, connection: &DatabaseConnection) -> EventSourcingError {
    EventSourcingError::DialectMismatch {
        expected: dialect,
        found: connection.family(),
    }
}

#[async_trait]
impl BackendFactory for SqlBackendFactory {
    async fn event_store(
        &self,
        dialect: BackendDialect,
        connection: &DatabaseConnection,
        configuration: &EventSourcingConfiguration,
        message_factory: Arc<dyn MessageFactory>,
    ) -> Result<Arc<dyn EventStore>, EventSourcingError> {
        if !connection.serves(dialect) {
            return Err(mismatch(dialect, connection));
        }
        let install = configuration.initialize_on_start();
        match connection {
            DatabaseConnection::Postgres(pool) => {
                let store = PgEventStore::new(pool.clone(), configuration, message_factory);
                if install {
                    debug!(dialect = %dialect, "installing event stream table");
                    store.install().await?;
                }
                Ok(Arc::new(store))
            }
            DatabaseConnection::MySql(pool) => {
                let store =
                    MySqlEventStore::new(pool.clone(), dialect, configuration, message_factory)?;
                if install {
                    debug!(dialect = %dialect, "installing event stream table");
                    store.install().await?;
                }
                Ok(Arc::new(store))
            }
        }
    }

    async fn projection_manager(
        &self,
        dialect: BackendDialect,
        event_store: Arc<dyn EventStore>,
        connection: &DatabaseConnection,
        configuration: &EventSourcingConfiguration,
    ) -> Result<ProjectionBackend, EventSourcingError> {
        if !connection.serves(dialect) {
            return Err(mismatch(dialect, connection));
        }
        let storage: Arc<dyn ProjectionStorage> = match connection {
            DatabaseConnection::Postgres(pool) => {
                Arc::new(PgProjectionStorage::new(pool.clone(), configuration))
            }
            DatabaseConnection::MySql(pool) => Arc::new(MySqlProjectionStorage::new(
                pool.clone(),
                dialect,
                configuration,
            )?),
        };
        if configuration.initialize_on_start() {
            debug!(dialect = %dialect, "installing projections table");
            storage.install().await?;
        }
        Ok(ProjectionBackend {
            dialect,
            manager: Arc::new(StoredProjectionManager::new(event_store, storage)),
        })
    }
}
