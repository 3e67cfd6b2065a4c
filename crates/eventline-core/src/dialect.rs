//! Relational backend dialects.

use std::fmt;

use crate::error::EventSourcingError;

/// The relational backend an event store runs on.
///
/// Resolved once per facade from the connection descriptor and never changed
/// afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendDialect {
    /// `PostgreSQL`.
    Postgres,
    /// `MySQL`.
    MySql,
    /// `MariaDB`.
    MariaDb,
}

impl BackendDialect {
    /// Recognises a connection driver name.
    ///
    /// # Errors
    ///
    /// Returns `EventSourcingError::UnsupportedBackend` for any driver without
    /// an adapter. There is no default dialect.
    pub fn from_driver(driver: &str) -> Result<Self, EventSourcingError> {
        match driver.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pgsql" | "pdo_pgsql" => Ok(Self::Postgres),
            "mysql" | "pdo_mysql" => Ok(Self::MySql),
            "mariadb" => Ok(Self::MariaDb),
            _ => Err(EventSourcingError::UnsupportedBackend(driver.to_owned())),
        }
    }

    /// Short lowercase name, also used in log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::MariaDb => "mariadb",
        }
    }

    /// Whether the dialect is served by the `MySQL` wire protocol driver.
    #[must_use]
    pub fn is_mysql_family(self) -> bool {
        matches!(self, Self::MySql | Self::MariaDb)
    }
}

impl fmt::Display for BackendDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
