//! `PostgreSQL` event store and projection storage.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgConnection, PgPool};
use tracing::debug;

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

type PgEventRow = (i64, String, String, String, String, DateTime<Utc>);

/// Inserts `messages` into `stream`'s table over `connection`.
async fn insert_messages(
    connection: &mut PgConnection,
    stream: &StreamName,
    messages: &[PendingMessage],
) -> Result<(), EventSourcingError> {
    let table = schema::quote(DIALECT, &schema::stream_table_name(stream));
    let sql = format!(
        "INSERT INTO {table} (event_id, event_name, payload, metadata, created_at) \
         VALUES ($1, $2, $3::jsonb, $4::jsonb, $5)"
    );
    for message in messages {
        sqlx::query(&sql)
            .bind(message.id)
            .bind(&message.message_name)
            .bind(rows::to_json_text(&message.payload)?)
            .bind(rows::to_json_text(&message.metadata)?)
            .bind(message.created_at)
            .execute(&mut *connection)
            .await
            .map_err(|e| rows::append_error(stream, &e))?;
    }
    Ok(())
}

const DIALECT: BackendDialect = BackendDialect::Postgres;

/// PostgreSQL-backed event store.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
    strategy: PersistenceStrategy,
    event_streams_table: String,
    message_factory: Arc<dyn MessageFactory>,
}

impl PgEventStore {
    /// Creates a new `PgEventStore`.
    #[must_use]
    pub fn new(
        pool: PgPool,
        configuration: &EventSourcingConfiguration,
        message_factory: Arc<dyn MessageFactory>,
    ) -> Self {
        Self {
            pool,
            strategy: configuration.persistence_strategy(),
            event_streams_table: configuration.event_stream_table().to_owned(),
            message_factory,
        }
    }

    /// Creates the stream registry table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `EventSourcingError::BackendOperationFailed` if the DDL fails.
    pub async fn install(&self) -> Result<(), EventSourcingError> {
        for statement in schema::create_event_streams_table(DIALECT, &self.event_streams_table) {
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(|e| rows::backend(&e))?;
        }
        Ok(())
    }

    fn registry(&self) -> String {
        schema::quote(DIALECT, &self.event_streams_table)
    }

    async fn select(
        &self,
        stream: &StreamName,
        sql: &str,
        bound: i64,
        count: Option<usize>,
    ) -> Result<Vec<StoredMessage>, EventSourcingError> {
        let fetched: Vec<PgEventRow> = sqlx::query_as(sql)
            .bind(bound)
            .bind(count.map(rows::bound))
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
                    created_at,
                }
                .into_message(self.message_factory.as_ref())
            })
            .collect()
    }
}

const SELECT_COLUMNS: &str =
    "no, event_id::text, event_name, payload::text, metadata::text, created_at";

#[async_trait]
impl EventStore for PgEventStore {
    async fn create(
        &self,
        stream: &StreamName,
        messages: &[PendingMessage],
    ) -> Result<(), EventSourcingError> {
        let table_name = schema::stream_table_name(stream);
        debug!(stream = %stream, table = %table_name, "creating stream");

        let mut tx = self.pool.begin().await.map_err(|e| rows::backend(&e))?;
        sqlx::query(&format!(
            "INSERT INTO {} (real_stream_name, stream_name, metadata, category) \
             VALUES ($1, $2, '{{}}'::jsonb, $3)",
            self.registry()
        ))
        .bind(stream.as_str())
        .bind(&table_name)
        .bind(rows::category(stream))
        .execute(&mut *tx)
        .await
        .map_err(|e| rows::create_error(stream, &e))?;
        for statement in schema::create_stream_table(DIALECT, self.strategy, &table_name) {
            sqlx::query(&statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| rows::create_error(stream, &e))?;
        }
        insert_messages(&mut tx, stream, messages).await?;
        tx.commit().await.map_err(|e| rows::backend(&e))
    }

    async fn append_to(
        &self,
        stream: &StreamName,
        messages: &[PendingMessage],
    ) -> Result<(), EventSourcingError> {
        if messages.is_empty() {
            return Ok(());
        }
        debug!(stream = %stream, count = messages.len(), "appending to stream");
        let mut tx = self.pool.begin().await.map_err(|e| rows::backend(&e))?;
        insert_messages(&mut tx, stream, messages).await?;
        tx.commit().await.map_err(|e| rows::append_error(stream, &e))
    }

    async fn load(
        &self,
        stream: &StreamName,
        from_number: i64,
        count: Option<usize>,
    ) -> Result<Vec<StoredMessage>, EventSourcingError> {
        let table = schema::quote(DIALECT, &schema::stream_table_name(stream));
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM {table} WHERE no >= $1 ORDER BY no ASC LIMIT $2"
        );
        self.select(stream, &sql, from_number, count).await
    }

    async fn load_reverse(
        &self,
        stream: &StreamName,
        from_number: Option<i64>,
        count: Option<usize>,
    ) -> Result<Vec<StoredMessage>, EventSourcingError> {
        let table = schema::quote(DIALECT, &schema::stream_table_name(stream));
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM {table} WHERE no <= $1 ORDER BY no DESC LIMIT $2"
        );
        self.select(stream, &sql, from_number.unwrap_or(i64::MAX), count)
            .await
    }

    async fn has_stream(&self, stream: &StreamName) -> Result<bool, EventSourcingError> {
        let found: Option<(String,)> = sqlx::query_as(&format!(
            "SELECT stream_name FROM {} WHERE real_stream_name = $1",
            self.registry()
        ))
        .bind(stream.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| rows::backend(&e))?;
        Ok(found.is_some())
    }

    async fn delete(&self, stream: &StreamName) -> Result<(), EventSourcingError> {
        let mut tx = self.pool.begin().await.map_err(|e| rows::backend(&e))?;
        let deleted = sqlx::query(&format!(
            "DELETE FROM {} WHERE real_stream_name = $1",
            self.registry()
        ))
        .bind(stream.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| rows::backend(&e))?;
        if deleted.rows_affected() == 0 {
            return Err(EventSourcingError::StreamNotFound(stream.to_string()));
        }
        sqlx::query(&schema::drop_stream_table(
            DIALECT,
            &schema::stream_table_name(stream),
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| rows::backend(&e))?;
        tx.commit().await.map_err(|e| rows::backend(&e))?;
        debug!(stream = %stream, "deleted stream");
        Ok(())
    }
}

/// PostgreSQL-backed projection rows.
#[derive(Debug, Clone)]
pub struct PgProjectionStorage {
    pool: PgPool,
    table: String,
}

impl PgProjectionStorage {
    /// Creates a new `PgProjectionStorage` over the configured projections
    /// table.
    #[must_use]
    pub fn new(pool: PgPool, configuration: &EventSourcingConfiguration) -> Self {
        Self {
            pool,
            table: configuration.projections_table().to_owned(),
        }
    }

    fn quoted(&self) -> String {
        schema::quote(DIALECT, &self.table)
    }
}

#[async_trait]
impl ProjectionStorage for PgProjectionStorage {
    async fn install(&self) -> Result<(), EventSourcingError> {
        for statement in schema::create_projections_table(DIALECT, &self.table) {
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(|e| rows::backend(&e))?;
        }
        Ok(())
    }

    async fn create_projection(&self, name: &str) -> Result<(), EventSourcingError> {
        sqlx::query(&format!(
            "INSERT INTO {} (name, \"position\", state, status) \
             VALUES ($1, '{{}}'::jsonb, '{{}}'::jsonb, $2) ON CONFLICT (name) DO NOTHING",
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
            "SELECT \"position\"::text, state::text, status FROM {} WHERE name = $1",
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
            "UPDATE {} SET \"position\" = $2::jsonb, state = $3::jsonb WHERE name = $1",
            self.quoted()
        ))
        .bind(name)
        .bind(rows::to_json_text(positions)?)
        .bind(rows::to_json_text(state)?)
        .execute(&self.pool)
        .await
        .map_err(|e| rows::backend(&e))?;
        if updated.rows_affected() == 0 {
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
            "UPDATE {} SET status = $2 WHERE name = $1",
            self.quoted()
        ))
        .bind(name)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| rows::backend(&e))?;
        Ok(updated.rows_affected() > 0)
    }

    async fn delete_projection(&self, name: &str) -> Result<(), EventSourcingError> {
        sqlx::query(&format!("DELETE FROM {} WHERE name = $1", self.quoted()))
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
            "SELECT name FROM {} WHERE ($1::text IS NULL OR name = $1) \
             ORDER BY name ASC LIMIT $2 OFFSET $3",
            self.quoted()
        ))
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
            "SELECT name FROM {} WHERE name ~ $1 ORDER BY name ASC LIMIT $2 OFFSET $3",
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
