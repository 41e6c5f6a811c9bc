use std::{fmt, str::FromStr};

use crate::database::postgres::query_builder::{
    render_bulk_copy, render_create_staging, render_upsert_merge,
};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StatementError {
    #[error("Missing required argument `{0}`")]
    MissingArgument(&'static str),

    #[error("Unknown statement type `{0}` expected one of temp, copy or upsert")]
    UnknownStatementKind(String),
}

/// Which statement to render from a [`LoadSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    /// `CREATE TEMPORARY TABLE .. ( LIKE .. )`
    CreateStaging,
    /// `COPY .. FROM STDIN WITH CSV`
    BulkCopy,
    /// The CTE based update-then-insert merge.
    UpsertMerge,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::CreateStaging => "temp",
            StatementKind::BulkCopy => "copy",
            StatementKind::UpsertMerge => "upsert",
        }
    }
}

impl FromStr for StatementKind {
    type Err = StatementError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "temp" => Ok(StatementKind::CreateStaging),
            "copy" => Ok(StatementKind::BulkCopy),
            "upsert" => Ok(StatementKind::UpsertMerge),
            other => Err(StatementError::UnknownStatementKind(other.to_string())),
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Table and column names for a single copy or upsert call.
///
/// Names are stored unquoted. Absent or empty values are only rejected when a
/// renderer that needs them runs, so a spec built for `copy` does not have to
/// carry the upsert-only fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LoadSpec {
    pub table: Option<String>,
    pub temp_table: Option<String>,
    pub insert_columns: Vec<String>,
    pub update_columns: Vec<String>,
    pub key_columns: Vec<String>,
}

impl LoadSpec {
    pub fn new(table: impl Into<String>) -> Self {
        LoadSpec { table: Some(table.into()), ..Default::default() }
    }

    pub fn with_temp_table(mut self, temp_table: impl Into<String>) -> Self {
        self.temp_table = Some(temp_table.into());
        self
    }

    pub fn with_insert_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_update_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.update_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_key_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// The same spec pointed at the staging table, used to COPY into it.
    pub fn targeting_staging(&self) -> Result<LoadSpec, StatementError> {
        let temp_table =
            self.temp_table.clone().ok_or(StatementError::MissingArgument("tempname"))?;

        Ok(LoadSpec {
            table: Some(temp_table),
            temp_table: None,
            insert_columns: self.insert_columns.clone(),
            update_columns: Vec::new(),
            key_columns: Vec::new(),
        })
    }
}

pub fn render_statement(kind: StatementKind, spec: &LoadSpec) -> Result<String, StatementError> {
    match kind {
        StatementKind::CreateStaging => render_create_staging(spec),
        StatementKind::BulkCopy => render_bulk_copy(spec),
        StatementKind::UpsertMerge => render_upsert_merge(spec),
    }
}
