//! Event sourcing configuration.

use std::fmt;
use std::str::FromStr;

use crate::error::EventSourcingError;
use crate::event::{AGGREGATE_ID, AGGREGATE_TYPE, AGGREGATE_VERSION};

/// Default reference name of the connection factory.
pub const DEFAULT_CONNECTION_REFERENCE: &str = "event_store_connection";
/// Default name of the stream registry table.
pub const DEFAULT_EVENT_STREAM_TABLE: &str = "event_streams";
/// Default name of the projections table.
pub const DEFAULT_PROJECTIONS_TABLE: &str = "projections";

/// How events are laid out in per-stream tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistenceStrategy {
    /// Many aggregates per stream; unique on (aggregate type, id, version).
    #[default]
    SingleStream,
    /// One aggregate per stream; unique on version.
    AggregateStream,
    /// No aggregate constraints at all.
    Simple,
}

impl PersistenceStrategy {
    /// Metadata keys the per-stream unique index is built over.
    #[must_use]
    pub fn aggregate_metadata_keys(self) -> &'static [&'static str] {
        match self {
            Self::SingleStream => &[AGGREGATE_TYPE, AGGREGATE_ID, AGGREGATE_VERSION],
            Self::AggregateStream => &[AGGREGATE_VERSION],
            Self::Simple => &[],
        }
    }

    /// Short lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SingleStream => "single",
            Self::AggregateStream => "aggregate",
            Self::Simple => "simple",
        }
    }
}

impl fmt::Display for PersistenceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PersistenceStrategy {
    type Err = EventSourcingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" | "single_stream" => Ok(Self::SingleStream),
            "aggregate" | "aggregate_stream" => Ok(Self::AggregateStream),
            "simple" => Ok(Self::Simple),
            other => Err(EventSourcingError::Configuration(format!(
                "unknown persistence strategy `{other}`"
            ))),
        }
    }
}

/// Read-only settings shared by the lazy event store and projection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSourcingConfiguration {
    connection_reference: String,
    persistence_strategy: PersistenceStrategy,
    event_stream_table: String,
    projections_table: String,
    initialize_on_start: bool,
}

impl Default for EventSourcingConfiguration {
    fn default() -> Self {
        Self {
            connection_reference: DEFAULT_CONNECTION_REFERENCE.to_owned(),
            persistence_strategy: PersistenceStrategy::default(),
            event_stream_table: DEFAULT_EVENT_STREAM_TABLE.to_owned(),
            projections_table: DEFAULT_PROJECTIONS_TABLE.to_owned(),
            initialize_on_start: true,
        }
    }
}

impl EventSourcingConfiguration {
    /// Reads configuration from `EVENTLINE_*` environment variables, falling
    /// back to defaults for anything unset.
    ///
    /// # Errors
    ///
    /// Returns `EventSourcingError::Configuration` if a variable is set to an
    /// unparseable value.
    pub fn from_env() -> Result<Self, EventSourcingError> {
        let mut configuration = Self::default();
        if let Ok(reference) = std::env::var("EVENTLINE_CONNECTION") {
            configuration.connection_reference = reference;
        }
        if let Ok(strategy) = std::env::var("EVENTLINE_PERSISTENCE") {
            configuration.persistence_strategy = strategy.parse()?;
        }
        if let Ok(table) = std::env::var("EVENTLINE_EVENT_STREAM_TABLE") {
            configuration.event_stream_table = table;
        }
        if let Ok(table) = std::env::var("EVENTLINE_PROJECTIONS_TABLE") {
            configuration.projections_table = table;
        }
        if let Ok(flag) = std::env::var("EVENTLINE_INITIALIZE_ON_START") {
            configuration.initialize_on_start = flag.parse().map_err(|e| {
                EventSourcingError::Configuration(format!(
                    "EVENTLINE_INITIALIZE_ON_START must be true or false: {e}"
                ))
            })?;
        }
        Ok(configuration)
    }

    /// Sets the reference name used to look up the connection factory.
    #[must_use]
    pub fn with_connection_reference(mut self, reference: impl Into<String>) -> Self {
        self.connection_reference = reference.into();
        self
    }

    /// Sets the persistence strategy.
    #[must_use]
    pub fn with_persistence_strategy(mut self, strategy: PersistenceStrategy) -> Self {
        self.persistence_strategy = strategy;
        self
    }

    /// Sets the stream registry table name.
    #[must_use]
    pub fn with_event_stream_table(mut self, table: impl Into<String>) -> Self {
        self.event_stream_table = table.into();
        self
    }

    /// Sets the projections table name.
    #[must_use]
    pub fn with_projections_table(mut self, table: impl Into<String>) -> Self {
        self.projections_table = table.into();
        self
    }

    /// Whether backends should install their tables when first resolved.
    #[must_use]
    pub fn with_initialize_on_start(mut self, initialize: bool) -> Self {
        self.initialize_on_start = initialize;
        self
    }

    /// Reference name of the connection factory.
    #[must_use]
    pub fn connection_reference(&self) -> &str {
        &self.connection_reference
    }

    /// Persistence strategy for new streams.
    #[must_use]
    pub fn persistence_strategy(&self) -> PersistenceStrategy {
        self.persistence_strategy
    }

    /// Stream registry table name.
    #[must_use]
    pub fn event_stream_table(&self) -> &str {
        &self.event_stream_table
    }

    /// Projections table name.
    #[must_use]
    pub fn projections_table(&self) -> &str {
        &self.projections_table
    }

    /// Whether tables are installed on first resolution.
    #[must_use]
    pub fn initialize_on_start(&self) -> bool {
        self.initialize_on_start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let configuration = EventSourcingConfiguration::default();

        assert_eq!(configuration.connection_reference(), "event_store_connection");
        assert_eq!(
            configuration.persistence_strategy(),
            PersistenceStrategy::SingleStream
        );
        assert_eq!(configuration.event_stream_table(), "event_streams");
        assert_eq!(configuration.projections_table(), "projections");
        assert!(configuration.initialize_on_start());
    }

    #[test]
    fn test_builder_overrides() {
        let configuration = EventSourcingConfiguration::default()
            .with_connection_reference("tickets_db")
            .with_persistence_strategy(PersistenceStrategy::Simple)
            .with_event_stream_table("ticket_streams")
            .with_projections_table("ticket_projections")
            .with_initialize_on_start(false);

        assert_eq!(configuration.connection_reference(), "tickets_db");
        assert_eq!(configuration.persistence_strategy(), PersistenceStrategy::Simple);
        assert_eq!(configuration.event_stream_table(), "ticket_streams");
        assert_eq!(configuration.projections_table(), "ticket_projections");
        assert!(!configuration.initialize_on_start());
    }

    #[test]
    fn test_persistence_strategy_parsing() {
        assert_eq!(
            "aggregate_stream".parse::<PersistenceStrategy>().unwrap(),
            PersistenceStrategy::AggregateStream
        );
        assert_eq!(
            "Single".parse::<PersistenceStrategy>().unwrap(),
            PersistenceStrategy::SingleStream
        );
        assert!(matches!(
            "sharded".parse::<PersistenceStrategy>(),
            Err(EventSourcingError::Configuration(_))
        ));
    }

    #[test]
    fn test_aggregate_metadata_keys_per_strategy() {
        assert_eq!(
            PersistenceStrategy::SingleStream.aggregate_metadata_keys(),
            [AGGREGATE_TYPE, AGGREGATE_ID, AGGREGATE_VERSION]
        );
        assert_eq!(
            PersistenceStrategy::AggregateStream.aggregate_metadata_keys(),
            [AGGREGATE_VERSION]
        );
        assert!(PersistenceStrategy::Simple.aggregate_metadata_keys().is_empty());
    }
}
