//! Event store facade that picks its backend on first use.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use eventline_core::config::EventSourcingConfiguration;
use eventline_core::dialect::BackendDialect;
use eventline_core::error::EventSourcingError;
use eventline_core::event::{PendingMessage, StoredMessage};
use eventline_core::mapper::MessageFactory;
use eventline_core::store::{EventStore, StreamName};

use crate::backend::BackendFactory;
use crate::connection::{DatabaseConnection, ReferenceSearchService};

/// What a [`LazyEventStore`] settles on. Never changes once set.
#[derive(Debug)]
struct ResolvedEventStore {
    dialect: BackendDialect,
    event_store: Arc<dyn EventStore>,
    connection: DatabaseConnection,
}

/// An [`EventStore`] that resolves its backend on the first operation.
///
/// Resolution looks up the configured connection factory, recognises the
/// dialect from its driver name, opens the connection and builds the
/// dialect's adapter. Concurrent first calls share one resolution; a failed
/// resolution is retried by the next call. After resolution every operation
/// is delegated unchanged.
#[derive(Debug)]
pub struct LazyEventStore {
    configuration: EventSourcingConfiguration,
    connections: Arc<dyn ReferenceSearchService>,
    backends: Arc<dyn BackendFactory>,
    message_factory: Arc<dyn MessageFactory>,
    resolved: OnceCell<ResolvedEventStore>,
}

impl LazyEventStore {
    /// Creates an unresolved store. Nothing is looked up or opened here.
    #[must_use]
    pub fn new(
        configuration: EventSourcingConfiguration,
        connections: Arc<dyn ReferenceSearchService>,
        backends: Arc<dyn BackendFactory>,
        message_factory: Arc<dyn MessageFactory>,
    ) -> Self {
        Self {
            configuration,
            connections,
            backends,
            message_factory,
            resolved: OnceCell::new(),
        }
    }

    /// The configuration this store resolves from.
    #[must_use]
    pub fn configuration(&self) -> &EventSourcingConfiguration {
        &self.configuration
    }

    /// The factory that builds backends for this store.
    #[must_use]
    pub fn backends(&self) -> &Arc<dyn BackendFactory> {
        &self.backends
    }

    /// The resolved dialect, or `None` before the first operation.
    #[must_use]
    pub fn dialect(&self) -> Option<BackendDialect> {
        self.resolved.get().map(|resolved| resolved.dialect)
    }

    /// Resolves if needed and returns the backend store.
    ///
    /// # Errors
    ///
    /// Returns `EventSourcingError::UnknownReference` if no connection factory
    /// is registered under the configured name,
    /// `EventSourcingError::UnsupportedBackend` if its driver has no adapter,
    /// and any error raised while connecting or building the backend.
    pub async fn resolve(&self) -> Result<Arc<dyn EventStore>, EventSourcingError> {
        Ok(Arc::clone(&self.resolved().await?.event_store))
    }

    /// Resolves if needed and returns the dialect.
    ///
    /// # Errors
    ///
    /// See [`LazyEventStore::resolve`].
    pub async fn resolved_dialect(&self) -> Result<BackendDialect, EventSourcingError> {
        Ok(self.resolved().await?.dialect)
    }

    /// Resolves if needed and returns the connection the backend runs on, for
    /// reuse by other components.
    ///
    /// # Errors
    ///
    /// See [`LazyEventStore::resolve`].
    pub async fn wrapped_connection(&self) -> Result<DatabaseConnection, EventSourcingError> {
        Ok(self.resolved().await?.connection.clone())
    }

    async fn resolved(&self) -> Result<&ResolvedEventStore, EventSourcingError> {
        self.resolved
            .get_or_try_init(|| async {
                self.build().await.inspect_err(|e| {
                    warn!(
                        reference = %self.configuration.connection_reference(),
                        error = %e,
                        "event store resolution failed"
                    );
                })
            })
            .await
    }

    async fn build(&self) -> Result<ResolvedEventStore, EventSourcingError> {
        let reference = self.configuration.connection_reference();
        let factory = self.connections.connection_factory(reference)?;
        let dialect = BackendDialect::from_driver(factory.driver())?;
        let connection = factory.connect().await?;
        let event_store = self
            .backends
            .event_store(
                dialect,
                &connection,
                &self.configuration,
                Arc::clone(&self.message_factory),
            )
            .await?;
        info!(
            reference = %reference,
            dialect = %dialect,
            strategy = %self.configuration.persistence_strategy(),
            "event store resolved"
        );
        Ok(ResolvedEventStore {
            dialect,
            event_store,
            connection,
        })
    }
}

#[async_trait]
impl EventStore for LazyEventStore {
    async fn create(
        &self,
        stream: &StreamName,
        messages: &[PendingMessage],
    ) -> Result<(), EventSourcingError> {
        self.resolve().await?.create(stream, messages).await
    }

    async fn append_to(
        &self,
        stream: &StreamName,
        messages: &[PendingMessage],
    ) -> Result<(), EventSourcingError> {
        self.resolve().await?.append_to(stream, messages).await
    }

    async fn load(
        &self,
        stream: &StreamName,
        from_number: i64,
        count: Option<usize>,
    ) -> Result<Vec<StoredMessage>, EventSourcingError> {
        self.resolve().await?.load(stream, from_number, count).await
    }

    async fn load_reverse(
        &self,
        stream: &StreamName,
        from_number: Option<i64>,
        count: Option<usize>,
    ) -> Result<Vec<StoredMessage>, EventSourcingError> {
        self.resolve()
            .await?
            .load_reverse(stream, from_number, count)
            .await
    }

    async fn has_stream(&self, stream: &StreamName) -> Result<bool, EventSourcingError> {
        self.resolve().await?.has_stream(stream).await
    }

    async fn delete(&self, stream: &StreamName) -> Result<(), EventSourcingError> {
        self.resolve().await?.delete(stream).await
    }
}
