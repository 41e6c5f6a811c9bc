use std::fmt;

use tracing::{debug, error, info};

use crate::database::postgres::{
    bulk_load::{bulk_load, BulkLoadConnection, BulkLoadError},
    query_builder::{render_create_staging, render_drop_staging, render_upsert_merge},
    record::Record,
    statement::{LoadSpec, StatementError},
};

/// Staging table used when the caller does not name one.
///
/// Every upsert on a schema shares this name, so upserts against the same
/// schema must not run concurrently.
pub const STAGING_TABLE_NAME: &str = "bulk_upsert_staging";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertStep {
    DropStaleStaging,
    CreateStaging,
    LoadStaging,
    Merge,
    DropStaging,
}

impl fmt::Display for UpsertStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            UpsertStep::DropStaleStaging => "dropping a stale staging table",
            UpsertStep::CreateStaging => "creating the staging table",
            UpsertStep::LoadStaging => "copying rows into the staging table",
            UpsertStep::Merge => "merging the staging table",
            UpsertStep::DropStaging => "dropping the staging table",
        };
        f.write_str(step)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum UpsertError {
    #[error("{0}")]
    Statement(#[from] StatementError),

    #[error("Upsert failed while {step}: {source}")]
    Step {
        step: UpsertStep,
        #[source]
        source: BulkLoadError,
    },
}

impl UpsertError {
    pub fn step(&self) -> Option<UpsertStep> {
        match self {
            UpsertError::Statement(_) => None,
            UpsertError::Step { step, .. } => Some(*step),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    /// Rows copied into the staging table.
    pub copied: u64,
    /// Rows the merge statement inserted.
    pub merged: u64,
}

/// Fills in the shared staging table name when `spec` does not set one.
pub fn with_staging_table(spec: &LoadSpec) -> LoadSpec {
    let mut spec = spec.clone();
    if spec.temp_table.as_deref().map_or(true, str::is_empty) {
        spec.temp_table = Some(STAGING_TABLE_NAME.to_string());
    }
    spec
}

/// Upserts `records` into `spec.table` through a temporary staging table.
///
/// Runs drop-if-exists, create, COPY, merge and drop in that order and stops at
/// the first failure. A failure after the staging table exists leaves it in
/// place; the drop-if-exists at the start of the next upsert removes it.
pub async fn upsert<C>(
    conn: &mut C,
    spec: &LoadSpec,
    records: &[Record],
) -> Result<UpsertSummary, UpsertError>
where
    C: BulkLoadConnection + ?Sized,
{
    let spec = with_staging_table(spec);

    // Render every statement up front so a missing argument fails before any SQL runs.
    let drop_staging = render_drop_staging(&spec)?;
    let create_staging = render_create_staging(&spec)?;
    let staging_spec = spec.targeting_staging()?;
    let merge = render_upsert_merge(&spec)?;

    debug!("Upsert merge statement: {}", merge);

    execute_step(conn, UpsertStep::DropStaleStaging, &drop_staging).await?;
    execute_step(conn, UpsertStep::CreateStaging, &create_staging).await?;

    let copied = match bulk_load(conn, &staging_spec, records).await {
        Ok(copied) => copied,
        Err(source) => return Err(leave_staging(&spec, UpsertStep::LoadStaging, source)),
    };

    let merged = match conn.execute(&merge).await {
        Ok(merged) => merged,
        Err(e) => {
            return Err(leave_staging(&spec, UpsertStep::Merge, BulkLoadError::connection(e)))
        }
    };

    execute_step(conn, UpsertStep::DropStaging, &drop_staging).await?;

    info!(
        "Upserted into {}: {} rows staged, {} rows inserted",
        spec.table.as_deref().unwrap_or_default(),
        copied,
        merged
    );

    Ok(UpsertSummary { copied, merged })
}

async fn execute_step<C>(conn: &mut C, step: UpsertStep, sql: &str) -> Result<u64, UpsertError>
where
    C: BulkLoadConnection + ?Sized,
{
    debug!("Upsert step {:?}: {}", step, sql);
    conn.execute(sql)
        .await
        .map_err(|e| UpsertError::Step { step, source: BulkLoadError::connection(e) })
}

fn leave_staging(spec: &LoadSpec, step: UpsertStep, source: BulkLoadError) -> UpsertError {
    error!(
        "Upsert failed while {}, staging table {} was left in place: {}",
        step,
        spec.temp_table.as_deref().unwrap_or_default(),
        source
    );
    UpsertError::Step { step, source }
}
