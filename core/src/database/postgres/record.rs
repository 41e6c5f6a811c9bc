use std::{fmt::Debug, sync::Arc};

use csv::{QuoteStyle, Terminator, WriterBuilder};
use serde_json::{Map, Value};

use crate::database::postgres::arguments::LoadDefaults;

/// A domain object that can hand out column values by name.
pub trait RecordAccessor: Send + Sync + Debug {
    fn value(&self, column: &str) -> Option<Value>;

    /// Returns `Some` when this object configures the load (table, columns,
    /// connection) instead of being a row to load.
    fn load_defaults(&self) -> Option<&dyn LoadDefaults> {
        None
    }
}

/// One row to load.
#[derive(Debug, Clone)]
pub enum Record {
    Map(Map<String, Value>),
    Accessor(Arc<dyn RecordAccessor>),
}

impl Record {
    /// Missing columns load as NULL.
    pub fn value(&self, column: &str) -> Value {
        let value = match self {
            Record::Map(map) => map.get(column).cloned(),
            Record::Accessor(accessor) => accessor.value(column),
        };
        value.unwrap_or(Value::Null)
    }

    pub fn values(&self, columns: &[String]) -> Vec<Value> {
        columns.iter().map(|column| self.value(column)).collect()
    }

    pub fn load_defaults(&self) -> Option<&dyn LoadDefaults> {
        match self {
            Record::Map(_) => None,
            Record::Accessor(accessor) => accessor.load_defaults(),
        }
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Record::Map(map)
    }
}

impl<T: RecordAccessor + 'static> From<Arc<T>> for Record {
    fn from(accessor: Arc<T>) -> Self {
        Record::Accessor(accessor)
    }
}

fn csv_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

/// Quotes `text` only when the CSV format requires it.
fn csv_field(text: &str) -> Result<String, csv::Error> {
    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Necessary)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    writer.write_field(text)?;

    let bytes = writer.into_inner().map_err(|e| csv::Error::from(e.into_error()))?;
    String::from_utf8(bytes).map_err(|e| {
        csv::Error::from(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })
}

/// Encodes one row as a single CSV line, newline terminated.
///
/// `COPY .. WITH CSV` reads an unquoted empty field as NULL and an unquoted
/// `\.` line as end of data, so NULL is the only value written as an empty
/// unquoted field and empty strings and `\.` are always quoted.
pub fn encode_csv_line(values: &[Value]) -> Result<String, csv::Error> {
    let mut line = String::new();

    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        match csv_text(value) {
            None => {}
            Some(text) if text.is_empty() || text == "\\." => {
                line.push('"');
                line.push_str(&text);
                line.push('"');
            }
            Some(text) => line.push_str(&csv_field(&text)?),
        }
    }

    line.push('\n');
    Ok(line)
}

/// Serializes `records` into bulk-load lines, one per record, in input order.
pub fn serialize_records<F, E>(
    columns: &[String],
    records: &[Record],
    mut encode: F,
) -> Result<Vec<String>, E>
where
    F: FnMut(&[Value]) -> Result<String, E>,
{
    records.iter().map(|record| encode(&record.values(columns))).collect()
}
