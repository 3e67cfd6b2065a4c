//! Shared test doubles and utilities for eventline.

mod clock;
mod projection;
mod store;

pub use clock::FixedClock;
pub use projection::{InMemoryProjectionStorage, ReadModelLog, RecordingReadModel};
pub use store::{FailingEventStore, InMemoryEventStore};
