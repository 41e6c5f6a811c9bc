mod database;
pub use database::postgres::{
    arguments::{resolve, take_prototype, LoadDefaults, LoadOptions, LoadOptionsError, ResolvedArgs},
    bulk_load::{bulk_load, bulk_load_with_encoder, BulkLoadConnection, BulkLoadError},
    client::{
        connection_string, PostgresClient, PostgresConnectionError, PostgresError,
        PostgresSession, ToSql,
    },
    query_builder::{
        quote_identifier, render_bulk_copy, render_create_staging, render_drop_staging,
        render_upsert_merge,
    },
    record::{encode_csv_line, serialize_records, Record, RecordAccessor},
    statement::{render_statement, LoadSpec, StatementError, StatementKind},
    statement_cache::StatementCache,
    upsert::{
        upsert as upsert_with_connection, UpsertError, UpsertStep, UpsertSummary,
        STAGING_TABLE_NAME,
    },
};

mod loader;
pub use loader::{copy, statement, statement_cached, upsert, LoadError};

mod logger;
pub use logger::{setup_info_logger, setup_logger};

// export 3rd party dependencies
pub use async_trait::async_trait;
pub use serde_json::{Map as JsonMap, Value as JsonValue};
pub use tracing::level_filters::LevelFilter;
