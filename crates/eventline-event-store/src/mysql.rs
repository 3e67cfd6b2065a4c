//! `MySQL` and `MariaDB` event store and projection storage.
//!
//! Both dialects share the driver and the queries; they differ only in the
//! DDL (see [`crate::schema`]). `MySQL` DDL commits implicitly, so creating a
//! stream registers it, creates its table and inserts its first messages in
//! separate steps. When a later step fails, the table and the registration
//! are removed again.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::Value;
use sqlx::MySqlPool;
use tracing::{debug, warn};

use eventline_core::config::{EventSourcingConfiguration, PersistenceStrategy};
use eventline_core::dialect::BackendDialect;
use eventline_core::error::EventSourcingError;
use eventline_core::event::{PendingMessage, StoredMessage};
use eventline_core::mapper::MessageFactory;
use eventline_core::projection::{
    ProjectionRecord, ProjectionStatus, ProjectionStorage, StreamPositions,
};
use eventline_core::store::{EventStore, StreamName};

use crate::rows::{self, EventRow};
use crate::schema;

type MySqlEventRow = (i64, String, String, String, String, NaiveDateTime);

const SELECT_COLUMNS: &str = "`no`, `event_id`, `event_name`, CAST(`payload` AS CHAR), \
     CAST(`metadata` AS CHAR), `created_at`";

/// MySQL- or MariaDB-backed event store.
#[derive(Debug, Clone)]
pub struct MySqlEventStore {
    pool: MySqlPool,
    dialect: BackendDialect,
    strategy: PersistenceStrategy,
    event_streams_table: String,
    message_factory: Arc<dyn MessageFactory>,
}

impl MySqlEventStore {
    /// Creates a new `MySqlEventStore` for `dialect`, which must be `MySql`
    /// or `MariaDb`.
    ///
    /// # Errors
    ///
    /// Returns `EventSourcingError::DialectMismatch` for any other dialect.
    pub fn new(
        pool: MySqlPool,
        dialect: BackendDialect,
        configuration: &EventSourcingConfiguration,
        message_factory: Arc<dyn MessageFactory>,
    ) -> Result<Self, EventSourcingError> {
        check_mysql_family(dialect)?;
        Ok(Self {
            pool,
            dialect,
            strategy: configuration.persistence_strategy(),
            event_streams_table: configuration.event_stream_table().to_owned(),
            message_factory,
        })
    }

    /// Creates the stream registry table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `EventSourcingError::BackendOperationFailed` if the DDL fails.
    pub async fn install(&self) -> Result<(), EventSourcingError> {
        for statement in schema::create_event_streams_table(self.dialect, &self.event_streams_table)
        {
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(|e| rows::backend(&e))?;
        }
        Ok(())
    }

    fn check_metadata(&self, messages: &[PendingMessage]) -> Result<(), EventSourcingError> {
        if self.dialect == BackendDialect::MySql {
            rows::check_aggregate_metadata(self.strategy, messages)?;
        }
        Ok(())
    }

    fn registry(&self) -> String {
        schema::quote(self.dialect, &self.event_streams_table)
    }

    fn stream_table(&self, stream: &StreamName) -> String {
        schema::quote(self.dialect, &schema::stream_table_name(stream))
    }

    async fn create_table(
        &self,
        stream: &StreamName,
        table_name: &str,
    ) -> Result<(), EventSourcingError> {
        for statement in schema::create_stream_table(self.dialect, self.strategy, table_name) {
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(|e| rows::create_error(stream, &e))?;
        }
        Ok(())
    }

    fn unregister_sql(&self) -> String {
        format!(
            "DELETE FROM {} WHERE `real_stream_name` = ?",
            self.registry()
        )
    }

    async fn unregister(&self, stream: &StreamName) -> Result<u64, EventSourcingError> {
        let deleted = sqlx::query(&self.unregister_sql())
            .bind(stream.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| rows::backend(&e))?;
        Ok(deleted.rows_affected())
    }

    /// Statements undoing a partly created stream, in run order: the table,
    /// then its registration.
    fn discard_statements(&self, table_name: &str) -> [String; 2] {
        [
            schema::drop_stream_table(self.dialect, table_name),
            self.unregister_sql(),
        ]
    }

    async fn discard(&self, stream: &StreamName, table_name: &str) {
        let [drop_table, unregister] = self.discard_statements(table_name);
        if let Err(e) = sqlx::query(&drop_table).execute(&self.pool).await {
            warn!(stream = %stream, error = %e, "failed to drop stream table");
        }
        if let Err(e) = sqlx::query(&unregister)
            .bind(stream.as_str())
            .execute(&self.pool)
            .await
        {
            warn!(stream = %stream, error = %e, "failed to unregister stream");
        }
    }

    async fn insert(
        &self,
        stream: &StreamName,
        messages: &[PendingMessage],
    ) -> Result<(), EventSourcingError> {
        let sql = format!(
            "INSERT INTO {} (`event_id`, `event_name`, `payload`, `metadata`, `created_at`) \
             VALUES (?, ?, ?, ?, ?)",
            self.stream_table(stream)
        );
        let mut tx = self.pool.begin().await.map_err(|e| rows::backend(&e))?;
        for message in messages {
            sqlx::query(&sql)
                .bind(message.id.to_string())
                .bind(&message.message_name)
                .bind(rows::to_json_text(&message.payload)?)
                .bind(rows::to_json_text(&message.metadata)?)
                .bind(message.created_at.naive_utc())
                .execute(&mut *tx)
                .await
                .map_err(|e| rows::append_error(stream, &e))?;
        }
        tx.commit().await.map_err(|e| rows::append_error(stream, &e))
    }

    async fn select(
        &self,
        stream: &StreamName,
        sql: &str,
        bound: i64,
        count: Option<usize>,
    ) -> Result<Vec<StoredMessage>, EventSourcingError> {
        let fetched: Vec<MySqlEventRow> = sqlx::query_as(sql)
            .bind(bound)
            .bind(count.map_or(i64::MAX, rows::bound))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| rows::read_error(stream, &e))?;
        fetched
            .into_iter()
            .map(|(no, event_id, event_name, payload, metadata, created_at)| {
                EventRow {
                    no,
                    event_id,
                    event_name,
                    payload,
                    metadata,
                    created_at: created_at.and_utc(),
                }
                .into_message(self.message_factory.as_ref())
            })
            .collect()
    }
}

#[async_trait]
impl EventStore for MySqlEventStore {
    async fn create(
        &self,
        stream: &StreamName,
        messages: &[PendingMessage],
    ) -> Result<(), EventSourcingError> {
        self.check_metadata(messages)?;
        let table_name = schema::stream_table_name(stream);
        debug!(stream = %stream, table = %table_name, dialect = %self.dialect, "creating stream");

        sqlx::query(&format!(
            "INSERT INTO {} (`real_stream_name`, `stream_name`, `metadata`, `category`) \
             VALUES (?, ?, '{{}}', ?)",
            self.registry()
        ))
        .bind(stream.as_str())
        .bind(&table_name)
        .bind(rows::category(stream))
        .execute(&self.pool)
        .await
        .map_err(|e| rows::create_error(stream, &e))?;

        if let Err(e) = self.create_table(stream, &table_name).await {
            self.discard(stream, &table_name).await;
            return Err(e);
        }

        if messages.is_empty() {
            return Ok(());
        }
        if let Err(e) = self.insert(stream, messages).await {
            self.discard(stream, &table_name).await;
            return Err(e);
        }
        Ok(())
    }

    async fn append_to(
        &self,
        stream: &StreamName,
        messages: &[PendingMessage],
    ) -> Result<(), EventSourcingError> {
        if messages.is_empty() {
            return Ok(());
        }
        self.check_metadata(messages)?;
        debug!(stream = %stream, count = messages.len(), "appending to stream");
        self.insert(stream, messages).await
    }

    async fn load(
        &self,
        stream: &StreamName,
        from_number: i64,
        count: Option<usize>,
    ) -> Result<Vec<StoredMessage>, EventSourcingError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM {} WHERE `no` >= ? ORDER BY `no` ASC LIMIT ?",
            self.stream_table(stream)
        );
        self.select(stream, &sql, from_number, count).await
    }

    async fn load_reverse(
        &self,
        stream: &StreamName,
        from_number: Option<i64>,
        count: Option<usize>,
    ) -> Result<Vec<StoredMessage>, EventSourcingError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM {} WHERE `no` <= ? ORDER BY `no` DESC LIMIT ?",
            self.stream_table(stream)
        );
        self.select(stream, &sql, from_number.unwrap_or(i64::MAX), count)
            .await
    }

    async fn has_stream(&self, stream: &StreamName) -> Result<bool, EventSourcingError> {
        let found: Option<(String,)> = sqlx::query_as(&format!(
            "SELECT `stream_name` FROM {} WHERE `real_stream_name` = ?",
            self.registry()
        ))
        .bind(stream.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| rows::backend(&e))?;
        Ok(found.is_some())
    }

    async fn delete(&self, stream: &StreamName) -> Result<(), EventSourcingError> {
        if self.unregister(stream).await? == 0 {
            return Err(EventSourcingError::StreamNotFound(stream.to_string()));
        }
        sqlx::query(&schema::drop_stream_table(
            self.dialect,
            &schema::stream_table_name(stream),
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| rows::backend(&e))?;
        debug!(stream = %stream, "deleted stream");
        Ok(())
    }
}

/// MySQL- or MariaDB-backed projection rows.
#[derive(Debug, Clone)]
pub struct MySqlProjectionStorage {
    pool: MySqlPool,
    dialect: BackendDialect,
    table: String,
}

impl MySqlProjectionStorage {
    /// Creates a new `MySqlProjectionStorage` for `dialect`, which must be
    /// `MySql` or `MariaDb`.
    ///
    /// # Errors
    ///
    /// Returns `EventSourcingError::DialectMismatch` for any other dialect.
    pub fn new(
        pool: MySqlPool,
        dialect: BackendDialect,
        configuration: &EventSourcingConfiguration,
    ) -> Result<Self, EventSourcingError> {
        check_mysql_family(dialect)?;
        Ok(Self {
            pool,
            dialect,
            table: configuration.projections_table().to_owned(),
        })
    }

    fn quoted(&self) -> String {
        schema::quote(self.dialect, &self.table)
    }

    // Unchanged rows count as unaffected, so a zero count is confirmed
    // with a lookup.
    async fn exists(&self, name: &str) -> Result<bool, EventSourcingError> {
        let found: Option<(String,)> = sqlx::query_as(&format!(
            "SELECT `name` FROM {} WHERE `name` = ?",
            self.quoted()
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| rows::backend(&e))?;
        Ok(found.is_some())
    }
}

fn check_mysql_family(dialect: BackendDialect) -> Result<(), EventSourcingError> {
    if dialect.is_mysql_family() {
        Ok(())
    } else {
        Err(EventSourcingError::DialectMismatch {
            expected: BackendDialect::MySql,
            found: dialect,
        })
    }
}

#[async_trait]
impl ProjectionStorage for MySqlProjectionStorage {
    async fn install(&self) -> Result<(), EventSourcingError> {
        for statement in schema::create_projections_table(self.dialect, &self.table) {
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(|e| rows::backend(&e))?;
        }
        Ok(())
    }

    async fn create_projection(&self, name: &str) -> Result<(), EventSourcingError> {
        sqlx::query(&format!(
            "INSERT INTO {} (`name`, `position`, `state`, `status`) \
             VALUES (?, '{{}}', '{{}}', ?) ON DUPLICATE KEY UPDATE `name` = `name`",
            self.quoted()
        ))
        .bind(name)
        .bind(ProjectionStatus::Idle.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| rows::backend(&e))?;
        Ok(())
    }

    async fn load_projection(
        &self,
        name: &str,
    ) -> Result<Option<ProjectionRecord>, EventSourcingError> {
        let row: Option<(String, String, String)> = sqlx::query_as(&format!(
            "SELECT CAST(`position` AS CHAR), CAST(`state` AS CHAR), `status` \
             FROM {} WHERE `name` = ?",
            self.quoted()
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| rows::backend(&e))?;
        row.map(|(position, state, status)| rows::projection_record(&position, &state, &status))
            .transpose()
    }

    async fn persist_projection(
        &self,
        name: &str,
        positions: &StreamPositions,
        state: &Value,
    ) -> Result<(), EventSourcingError> {
        let updated = sqlx::query(&format!(
            "UPDATE {} SET `position` = ?, `state` = ? WHERE `name` = ?",
            self.quoted()
        ))
        .bind(rows::to_json_text(positions)?)
        .bind(rows::to_json_text(state)?)
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(|e| rows::backend(&e))?;
        if updated.rows_affected() == 0 && !self.exists(name).await? {
            return Err(EventSourcingError::ProjectionNotFound(name.to_owned()));
        }
        Ok(())
    }

    async fn update_status(
        &self,
        name: &str,
        status: ProjectionStatus,
    ) -> Result<bool, EventSourcingError> {
        let updated = sqlx::query(&format!(
            "UPDATE {} SET `status` = ? WHERE `name` = ?",
            self.quoted()
        ))
        .bind(status.as_str())
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(|e| rows::backend(&e))?;
        if updated.rows_affected() > 0 {
            return Ok(true);
        }
        self.exists(name).await
    }

    async fn delete_projection(&self, name: &str) -> Result<(), EventSourcingError> {
        sqlx::query(&format!("DELETE FROM {} WHERE `name` = ?", self.quoted()))
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| rows::backend(&e))?;
        Ok(())
    }

    async fn fetch_projection_names(
        &self,
        filter: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, EventSourcingError> {
        let names: Vec<(String,)> = sqlx::query_as(&format!(
            "SELECT `name` FROM {} WHERE (? IS NULL OR `name` = ?) \
             ORDER BY `name` ASC LIMIT ? OFFSET ?",
            self.quoted()
        ))
        .bind(filter)
        .bind(filter)
        .bind(rows::bound(limit))
        .bind(rows::bound(offset))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| rows::backend(&e))?;
        Ok(names.into_iter().map(|(name,)| name).collect())
    }

    async fn fetch_projection_names_regex(
        &self,
        regex: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, EventSourcingError> {
        let names: Vec<(String,)> = sqlx::query_as(&format!(
            "SELECT `name` FROM {} WHERE `name` REGEXP ? ORDER BY `name` ASC LIMIT ? OFFSET ?",
            self.quoted()
        ))
        .bind(regex)
        .bind(rows::bound(limit))
        .bind(rows::bound(offset))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| rows::regex_error(regex, &e))?;
        Ok(names.into_iter().map(|(name,)| name).collect())
    }
}
