//! Eventline Event Store: SQL dialect adapters and the lazy facades.
//!
//! [`LazyEventStore`] picks the backend dialect from the configured
//! connection the first time it is used, and [`LazyProjectionManager`] builds
//! its projection backend on top of the same dialect and connection.

pub mod backend;
pub mod connection;
pub mod lazy_event_store;
pub mod lazy_projection_manager;
pub mod mysql;
pub mod postgres;
pub mod schema;

mod rows;

pub use backend::{BackendFactory, ProjectionBackend, SqlBackendFactory};
pub use connection::{
    ConnectionFactory, ConnectionRegistry, DatabaseConnection, ReferenceSearchService,
    UrlConnectionFactory,
};
pub use lazy_event_store::LazyEventStore;
pub use lazy_projection_manager::LazyProjectionManager;
