//! SQL text generation for staging-table upserts.
//!
//! Every table and column name passes through [`quote_identifier`] before it
//! is placed into a statement, so callers can use any name including ones that
//! contain double quotes.

use crate::database::postgres::statement::{LoadSpec, StatementError};

/// Name of the common table expression holding the keys the UPDATE touched.
const UPDATED_CTE: &str = "UP";

/// Wraps a name in double quotes, doubling any double quotes inside it.
#[inline]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn required_name<'a>(
    value: &'a Option<String>,
    field: &'static str,
) -> Result<&'a str, StatementError> {
    match value.as_deref() {
        Some(name) if !name.is_empty() => Ok(name),
        _ => Err(StatementError::MissingArgument(field)),
    }
}

fn required_columns<'a>(
    columns: &'a [String],
    field: &'static str,
) -> Result<&'a [String], StatementError> {
    if columns.is_empty() || columns.iter().any(|column| column.is_empty()) {
        return Err(StatementError::MissingArgument(field));
    }
    Ok(columns)
}

fn quoted_column_list(columns: &[String]) -> String {
    columns.iter().map(|col| quote_identifier(col)).collect::<Vec<_>>().join(", ")
}

/// `qualifier` must already be quoted (or be a bare CTE name).
fn qualified_column_list(qualifier: &str, columns: &[String]) -> String {
    columns
        .iter()
        .map(|col| format!("{}.{}", qualifier, quote_identifier(col)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `CREATE TEMPORARY TABLE "temp" ( LIKE "table" )`
pub fn render_create_staging(spec: &LoadSpec) -> Result<String, StatementError> {
    let temp_table = required_name(&spec.temp_table, "tempname")?;
    let table = required_name(&spec.table, "table")?;

    Ok(format!(
        "CREATE TEMPORARY TABLE {} ( LIKE {} )",
        quote_identifier(temp_table),
        quote_identifier(table)
    ))
}

/// `COPY "table"("col", ...) FROM STDIN WITH CSV`
pub fn render_bulk_copy(spec: &LoadSpec) -> Result<String, StatementError> {
    let table = required_name(&spec.table, "table")?;
    let insert_columns = required_columns(&spec.insert_columns, "insert_cols")?;

    Ok(format!(
        "COPY {}({}) FROM STDIN WITH CSV",
        quote_identifier(table),
        quoted_column_list(insert_columns)
    ))
}

/// Updates the rows of `table` whose key matches a staging row and inserts
/// the staging rows whose key matched nothing, in one statement.
///
/// The UPDATE runs inside the `UP` CTE and returns the keys it touched; the
/// outer INSERT then takes every staging row whose key tuple is not among
/// them. Both halves see the same snapshot so no row is updated and inserted.
pub fn render_upsert_merge(spec: &LoadSpec) -> Result<String, StatementError> {
    let table = quote_identifier(required_name(&spec.table, "table")?);
    let temp_table = quote_identifier(required_name(&spec.temp_table, "tempname")?);
    let insert_columns = required_columns(&spec.insert_columns, "insert_cols")?;
    let update_columns = required_columns(&spec.update_columns, "update_cols")?;
    let key_columns = required_columns(&spec.key_columns, "key_cols")?;

    let set_clauses = update_columns
        .iter()
        .map(|col| {
            let column = quote_identifier(col);
            format!("{} = {}.{}", column, temp_table, column)
        })
        .collect::<Vec<_>>()
        .join(", ");

    let key_conditions = key_columns
        .iter()
        .map(|col| {
            let column = quote_identifier(col);
            format!("{}.{} = {}.{}", table, column, temp_table, column)
        })
        .collect::<Vec<_>>()
        .join(" AND ");

    Ok(format!(
        "WITH {cte} AS (
    UPDATE {table}
    SET {set_clauses}
    FROM {temp_table}
    WHERE {key_conditions}
    RETURNING {returning}
)
INSERT INTO {table} ({insert_columns})
SELECT {staged_columns}
FROM {temp_table}
WHERE ROW({staged_keys}) NOT IN (SELECT {updated_keys} FROM {cte})",
        cte = UPDATED_CTE,
        table = table,
        temp_table = temp_table,
        set_clauses = set_clauses,
        key_conditions = key_conditions,
        returning = qualified_column_list(&table, key_columns),
        insert_columns = quoted_column_list(insert_columns),
        staged_columns = qualified_column_list(&temp_table, insert_columns),
        staged_keys = qualified_column_list(&temp_table, key_columns),
        updated_keys = qualified_column_list(UPDATED_CTE, key_columns),
    ))
}

/// `DROP TABLE IF EXISTS "temp"`
pub fn render_drop_staging(spec: &LoadSpec) -> Result<String, StatementError> {
    let temp_table = required_name(&spec.temp_table, "tempname")?;
    Ok(format!("DROP TABLE IF EXISTS {}", quote_identifier(temp_table)))
}
