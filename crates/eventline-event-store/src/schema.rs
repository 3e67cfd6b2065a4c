//! Event store database schema.
//!
//! Every stream lives in its own table named after a hash of the stream name;
//! the stream registry table maps real stream names to those tables. The
//! columns of a stream table depend on the persistence strategy: aggregate
//! strategies extract the aggregate metadata into indexed columns (generated
//! columns on `MySQL`/`MariaDB`, expression indexes on `PostgreSQL`) so the
//! database enforces version uniqueness.

use sha2::{Digest, Sha256};

use eventline_core::config::PersistenceStrategy;
use eventline_core::dialect::BackendDialect;
use eventline_core::store::StreamName;

/// Name of the table holding `stream`'s messages: `_` followed by the first
/// 40 hex digits of the SHA-256 of the stream name.
#[must_use]
pub fn stream_table_name(stream: &StreamName) -> String {
    let digest = Sha256::digest(stream.as_str().as_bytes());
    let mut name = format!("_{digest:x}");
    name.truncate(41);
    name
}

/// Quotes an identifier for `dialect`.
#[must_use]
pub fn quote(dialect: BackendDialect, identifier: &str) -> String {
    match dialect {
        BackendDialect::Postgres => format!("\"{}\"", identifier.replace('"', "\"\"")),
        BackendDialect::MySql | BackendDialect::MariaDb => {
            format!("`{}`", identifier.replace('`', "``"))
        }
    }
}

/// Column type holding JSON documents. `MariaDB` has no native JSON type.
fn json_column(dialect: BackendDialect, column: &str) -> String {
    match dialect {
        BackendDialect::Postgres => format!("{column} JSONB"),
        BackendDialect::MySql => format!("`{column}` JSON"),
        BackendDialect::MariaDb => format!("`{column}` LONGTEXT CHECK (JSON_VALID(`{column}`))"),
    }
}

const MYSQL_TABLE_OPTIONS: &str = "ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_bin";

/// Statements creating the stream registry table.
#[must_use]
pub fn create_event_streams_table(dialect: BackendDialect, table: &str) -> Vec<String> {
    let quoted = quote(dialect, table);
    match dialect {
        BackendDialect::Postgres => vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {quoted} (
    no               BIGSERIAL,
    real_stream_name VARCHAR(150) NOT NULL,
    stream_name      CHAR(41) NOT NULL,
    {metadata},
    category         VARCHAR(150),
    PRIMARY KEY (no),
    UNIQUE (real_stream_name),
    UNIQUE (stream_name)
)",
                metadata = json_column(dialect, "metadata"),
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {index} ON {quoted} (category)",
                index = quote(dialect, &format!("{table}_category_idx")),
            ),
        ],
        BackendDialect::MySql | BackendDialect::MariaDb => vec![format!(
            "CREATE TABLE IF NOT EXISTS {quoted} (
    `no`               BIGINT NOT NULL AUTO_INCREMENT,
    `real_stream_name` VARCHAR(150) NOT NULL,
    `stream_name`      CHAR(41) NOT NULL,
    {metadata},
    `category`         VARCHAR(150),
    PRIMARY KEY (`no`),
    UNIQUE KEY `ix_rsn` (`real_stream_name`),
    UNIQUE KEY `ix_sn` (`stream_name`),
    KEY `ix_cat` (`category`)
) {MYSQL_TABLE_OPTIONS}",
            metadata = json_column(dialect, "metadata"),
        )],
    }
}

/// Statements creating the projections table.
#[must_use]
pub fn create_projections_table(dialect: BackendDialect, table: &str) -> Vec<String> {
    let quoted = quote(dialect, table);
    match dialect {
        BackendDialect::Postgres => vec![format!(
            "CREATE TABLE IF NOT EXISTS {quoted} (
    no       BIGSERIAL,
    name     VARCHAR(150) NOT NULL,
    {position} NOT NULL,
    {state} NOT NULL,
    status   VARCHAR(28) NOT NULL,
    PRIMARY KEY (no),
    UNIQUE (name)
)",
            position = json_column(dialect, "position"),
            state = json_column(dialect, "state"),
        )],
        BackendDialect::MySql | BackendDialect::MariaDb => vec![format!(
            "CREATE TABLE IF NOT EXISTS {quoted} (
    `no`     BIGINT NOT NULL AUTO_INCREMENT,
    `name`   VARCHAR(150) NOT NULL,
    {position} NOT NULL,
    {state} NOT NULL,
    `status` VARCHAR(28) NOT NULL,
    PRIMARY KEY (`no`),
    UNIQUE KEY `ix_name` (`name`)
) {MYSQL_TABLE_OPTIONS}",
            position = json_column(dialect, "position"),
            state = json_column(dialect, "state"),
        )],
    }
}

/// Statements creating the table of one stream.
#[must_use]
pub fn create_stream_table(
    dialect: BackendDialect,
    strategy: PersistenceStrategy,
    table: &str,
) -> Vec<String> {
    match dialect {
        BackendDialect::Postgres => postgres_stream_table(strategy, table),
        BackendDialect::MySql | BackendDialect::MariaDb => {
            vec![mysql_stream_table(dialect, strategy, table)]
        }
    }
}

fn postgres_stream_table(strategy: PersistenceStrategy, table: &str) -> Vec<String> {
    let dialect = BackendDialect::Postgres;
    let quoted = quote(dialect, table);
    let mut statements = vec![format!(
        "CREATE TABLE {quoted} (
    no         BIGSERIAL,
    event_id   UUID NOT NULL,
    event_name VARCHAR(100) NOT NULL,
    payload    JSONB NOT NULL,
    metadata   JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (no),
    UNIQUE (event_id)
)"
    )];
    let index = |suffix: &str| quote(dialect, &format!("{table}_{suffix}"));
    match strategy {
        PersistenceStrategy::SingleStream => {
            statements.push(format!(
                "CREATE UNIQUE INDEX {name} ON {quoted} \
                 ((metadata->>'_aggregate_type'), (metadata->>'_aggregate_id'), (metadata->>'_aggregate_version'))",
                name = index("unique_event"),
            ));
            statements.push(format!(
                "CREATE INDEX {name} ON {quoted} \
                 ((metadata->>'_aggregate_type'), (metadata->>'_aggregate_id'), no)",
                name = index("aggregate"),
            ));
        }
        PersistenceStrategy::AggregateStream => {
            statements.push(format!(
                "CREATE UNIQUE INDEX {name} ON {quoted} ((metadata->>'_aggregate_version'))",
                name = index("unique_version"),
            ));
        }
        PersistenceStrategy::Simple => {}
    }
    statements
}

fn mysql_stream_table(
    dialect: BackendDialect,
    strategy: PersistenceStrategy,
    table: &str,
) -> String {
    // MariaDB rejects NOT NULL on generated columns and reads JSON with
    // JSON_VALUE; MySQL uses JSON_EXTRACT.
    let extract = |key: &str| match dialect {
        BackendDialect::MariaDb => format!("JSON_VALUE(`metadata`, '$.{key}')"),
        _ => format!("JSON_UNQUOTE(JSON_EXTRACT(`metadata`, '$.{key}'))"),
    };
    let not_null = if dialect == BackendDialect::MariaDb {
        ""
    } else {
        " NOT NULL"
    };
    let version = format!(
        "`aggregate_version` INT UNSIGNED GENERATED ALWAYS AS ({}) STORED{not_null},",
        extract("_aggregate_version")
    );

    let (generated, keys) = match strategy {
        PersistenceStrategy::SingleStream => (
            format!(
                "{version}
    `aggregate_id` VARCHAR(150) GENERATED ALWAYS AS ({id}) STORED{not_null},
    `aggregate_type` VARCHAR(150) GENERATED ALWAYS AS ({kind}) STORED{not_null},",
                id = extract("_aggregate_id"),
                kind = extract("_aggregate_type"),
            ),
            ",
    UNIQUE KEY `ix_unique_event` (`aggregate_type`, `aggregate_id`, `aggregate_version`),
    KEY `ix_query_aggregate` (`aggregate_type`, `aggregate_id`, `no`)",
        ),
        PersistenceStrategy::AggregateStream => (
            version,
            ",
    UNIQUE KEY `ix_aggregate_version` (`aggregate_version`)",
        ),
        PersistenceStrategy::Simple => (String::new(), ""),
    };

    format!(
        "CREATE TABLE {quoted} (
    `no`         BIGINT NOT NULL AUTO_INCREMENT,
    `event_id`   CHAR(36) NOT NULL,
    `event_name` VARCHAR(100) NOT NULL,
    {payload} NOT NULL,
    {metadata} NOT NULL,
    `created_at` DATETIME(6) NOT NULL,
    {generated}
    PRIMARY KEY (`no`),
    UNIQUE KEY `ix_event_id` (`event_id`){keys}
) {MYSQL_TABLE_OPTIONS}",
        quoted = quote(dialect, table),
        payload = json_column(dialect, "payload"),
        metadata = json_column(dialect, "metadata"),
    )
}

/// Statement dropping the table of one stream.
#[must_use]
pub fn drop_stream_table(dialect: BackendDialect, table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote(dialect, table))
}
