//! Entry points: render a single statement, COPY rows, or upsert rows.
//!
//! Every call resolves its [`LoadOptions`] against an optional prototype (a
//! leading record that configures the load) before doing anything else.

use std::sync::Arc;

use tracing::debug;

use crate::database::postgres::{
    arguments::{resolve, take_prototype, LoadDefaults, LoadOptions, ResolvedArgs},
    bulk_load::{bulk_load, BulkLoadError},
    client::{PostgresClient, PostgresError},
    query_builder::render_bulk_copy,
    record::Record,
    statement::{render_statement, StatementError, StatementKind},
    statement_cache::StatementCache,
    upsert::{upsert as upsert_staged, with_staging_table, UpsertError, UpsertSummary},
};

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("{0}")]
    Statement(#[from] StatementError),

    #[error("{0}")]
    Postgres(#[from] PostgresError),

    #[error("{0}")]
    BulkLoad(#[from] BulkLoadError),

    #[error("{0}")]
    Upsert(#[from] UpsertError),
}

fn statement_kind(resolved: &ResolvedArgs) -> Result<StatementKind, StatementError> {
    resolved.kind.as_deref().ok_or(StatementError::MissingArgument("type"))?.parse()
}

/// Renders the statement selected by `options.kind` (`temp`, `copy` or `upsert`).
pub fn statement(
    options: &LoadOptions,
    prototype: Option<&dyn LoadDefaults>,
) -> Result<String, StatementError> {
    let resolved = resolve(options, prototype);
    render_statement(statement_kind(&resolved)?, &resolved.spec)
}

/// Like [`statement`] but served from `cache` when possible.
pub fn statement_cached(
    cache: &StatementCache,
    options: &LoadOptions,
    prototype: Option<&dyn LoadDefaults>,
) -> Result<Arc<str>, StatementError> {
    let resolved = resolve(options, prototype);
    cache.get_or_render(statement_kind(&resolved)?, &resolved.spec)
}

fn resolve_records(options: &LoadOptions, records: &mut Vec<Record>) -> ResolvedArgs {
    let prototype = take_prototype(records);
    resolve(options, prototype.as_ref().and_then(|record| record.load_defaults()))
}

fn connection(resolved: &ResolvedArgs) -> Result<Arc<PostgresClient>, StatementError> {
    resolved.dbh.clone().ok_or(StatementError::MissingArgument("dbh"))
}

/// COPYs `records` into the configured table, returning the rows copied.
///
/// A leading record that configures the load is used for defaults and not
/// copied.
pub async fn copy(options: &LoadOptions, mut records: Vec<Record>) -> Result<u64, LoadError> {
    let resolved = resolve_records(options, &mut records);
    render_bulk_copy(&resolved.spec)?;

    if records.is_empty() {
        debug!("No rows to copy");
        return Ok(0);
    }

    let client = connection(&resolved)?;
    let mut session = client.session().await?;

    Ok(bulk_load(&mut session, &resolved.spec, &records).await?)
}

/// Upserts `records` into the configured table through a staging table.
pub async fn upsert(
    options: &LoadOptions,
    mut records: Vec<Record>,
) -> Result<UpsertSummary, LoadError> {
    let resolved = resolve_records(options, &mut records);
    render_statement(StatementKind::UpsertMerge, &with_staging_table(&resolved.spec))?;

    if records.is_empty() {
        debug!("No rows to upsert");
        return Ok(UpsertSummary::default());
    }

    let client = connection(&resolved)?;
    let mut session = client.session().await?;

    Ok(upsert_staged(&mut session, &resolved.spec, &records).await?)
}
