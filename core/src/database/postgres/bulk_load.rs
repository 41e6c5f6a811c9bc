use std::error::Error;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde_json::Value;
use tracing::{debug, error};

use crate::database::postgres::{
    query_builder::render_bulk_copy,
    record::{encode_csv_line, serialize_records, Record},
    statement::{LoadSpec, StatementError},
};

/// Flush size for COPY data sent to the server.
const COPY_CHUNK_BYTES: usize = 64 * 1024;

/// A single database session able to run statements and receive COPY data.
///
/// `begin_copy` switches the session into COPY mode; it stays there until
/// `end_copy` is called, and no other statement may run in between.
#[async_trait]
pub trait BulkLoadConnection: Send {
    type Error: Error + Send + Sync + 'static;

    async fn execute(&mut self, sql: &str) -> Result<u64, Self::Error>;

    async fn begin_copy(&mut self, sql: &str) -> Result<(), Self::Error>;

    async fn send_data(&mut self, data: Bytes) -> Result<(), Self::Error>;

    /// Signals end of data, returning the number of rows copied.
    async fn end_copy(&mut self) -> Result<u64, Self::Error>;
}

#[derive(thiserror::Error, Debug)]
pub enum BulkLoadError {
    #[error("{0}")]
    Statement(#[from] StatementError),

    #[error("Could not encode row for COPY: {0}")]
    Encode(#[from] csv::Error),

    #[error("{0}")]
    Connection(Box<dyn Error + Send + Sync>),
}

impl BulkLoadError {
    pub fn connection<E: Error + Send + Sync + 'static>(error: E) -> Self {
        BulkLoadError::Connection(Box::new(error))
    }
}

/// COPYs `records` into `spec.table` using the default CSV encoder.
pub async fn bulk_load<C>(
    conn: &mut C,
    spec: &LoadSpec,
    records: &[Record],
) -> Result<u64, BulkLoadError>
where
    C: BulkLoadConnection + ?Sized,
{
    bulk_load_with_encoder(conn, spec, records, encode_csv_line).await
}

/// COPYs `records` into `spec.table`, encoding each row with `encode`.
///
/// Once the COPY has been opened it is always ended, also when encoding or
/// sending fails, so the session never stays in COPY mode.
pub async fn bulk_load_with_encoder<C, F>(
    conn: &mut C,
    spec: &LoadSpec,
    records: &[Record],
    encode: F,
) -> Result<u64, BulkLoadError>
where
    C: BulkLoadConnection + ?Sized,
    F: FnMut(&[Value]) -> Result<String, csv::Error>,
{
    let statement = render_bulk_copy(spec)?;
    debug!("Bulk copy statement: {}", statement);

    conn.begin_copy(&statement).await.map_err(BulkLoadError::connection)?;

    let streamed = match serialize_records(&spec.insert_columns, records, encode) {
        Ok(lines) => send_lines(conn, &lines).await,
        Err(e) => Err(BulkLoadError::Encode(e)),
    };

    let ended = conn.end_copy().await;

    match (streamed, ended) {
        (Ok(()), Ok(copied)) => {
            debug!("Copied {} rows", copied);
            Ok(copied)
        }
        (Ok(()), Err(e)) => Err(BulkLoadError::connection(e)),
        (Err(e), ended) => {
            if let Err(end_error) = ended {
                error!("Could not end COPY after a failed load: {}", end_error);
            }
            Err(e)
        }
    }
}

async fn send_lines<C>(conn: &mut C, lines: &[String]) -> Result<(), BulkLoadError>
where
    C: BulkLoadConnection + ?Sized,
{
    let mut buffer = BytesMut::with_capacity(COPY_CHUNK_BYTES);

    for line in lines {
        buffer.extend_from_slice(line.as_bytes());
        if buffer.len() >= COPY_CHUNK_BYTES {
            conn.send_data(buffer.split().freeze()).await.map_err(BulkLoadError::connection)?;
        }
    }

    if !buffer.is_empty() {
        conn.send_data(buffer.freeze()).await.map_err(BulkLoadError::connection)?;
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod recording {
    use super::*;

    #[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
    #[error("recording connection failure: {0}")]
    pub struct RecordingError(pub String);

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Execute(String),
        BeginCopy(String),
        SendData(String),
        EndCopy,
    }

    /// Records every call in order; fails any statement containing `fail_on`.
    #[derive(Debug, Default)]
    pub struct RecordingConnection {
        pub calls: Vec<Call>,
        pub fail_on: Option<String>,
        pub fail_send: bool,
        copy_open: bool,
        rows: u64,
    }

    impl RecordingConnection {
        pub fn failing_on(pattern: &str) -> Self {
            RecordingConnection { fail_on: Some(pattern.to_string()), ..Default::default() }
        }

        pub fn failing_send() -> Self {
            RecordingConnection { fail_send: true, ..Default::default() }
        }

        pub fn sent_data(&self) -> String {
            self.calls
                .iter()
                .filter_map(|call| match call {
                    Call::SendData(data) => Some(data.as_str()),
                    _ => None,
                })
                .collect()
        }

        fn check(&self, sql: &str) -> Result<(), RecordingError> {
            match &self.fail_on {
                Some(pattern) if sql.contains(pattern.as_str()) => {
                    Err(RecordingError(sql.to_string()))
                }
                _ => Ok(()),
            }
        }
    }

    #[async_trait]
    impl BulkLoadConnection for RecordingConnection {
        type Error = RecordingError;

        async fn execute(&mut self, sql: &str) -> Result<u64, RecordingError> {
            assert!(!self.copy_open, "statement issued while COPY was open");
            self.calls.push(Call::Execute(sql.to_string()));
            self.check(sql)?;
            Ok(1)
        }

        async fn begin_copy(&mut self, sql: &str) -> Result<(), RecordingError> {
            assert!(!self.copy_open, "COPY opened twice");
            self.calls.push(Call::BeginCopy(sql.to_string()));
            self.check(sql)?;
            self.copy_open = true;
            self.rows = 0;
            Ok(())
        }

        async fn send_data(&mut self, data: Bytes) -> Result<(), RecordingError> {
            assert!(self.copy_open, "data sent before COPY was opened");
            let text = String::from_utf8_lossy(&data).into_owned();
            self.rows += text.matches('\n').count() as u64;
            self.calls.push(Call::SendData(text));
            if self.fail_send {
                return Err(RecordingError("send".to_string()));
            }
            Ok(())
        }

        async fn end_copy(&mut self) -> Result<u64, RecordingError> {
            assert!(self.copy_open, "COPY ended without being opened");
            self.calls.push(Call::EndCopy);
            self.copy_open = false;
            Ok(self.rows)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        recording::{Call, RecordingConnection},
        *,
    };

    fn rows(values: Vec<Value>) -> Vec<Record> {
        values
            .into_iter()
            .map(|value| match value {
                Value::Object(map) => Record::Map(map),
                _ => panic!("expected an object"),
            })
            .collect()
    }

    fn spec() -> LoadSpec {
        LoadSpec::new("foo").with_insert_columns(["id", "name"])
    }

    #[tokio::test]
    async fn test_bulk_load_sequence() {
        let mut conn = RecordingConnection::default();
        let records = rows(vec![json!({"id": 1, "name": "a"}), json!({"id": 2, "name": "b,c"})]);

        let copied = bulk_load(&mut conn, &spec(), &records).await.unwrap();

        assert_eq!(copied, 2);
        assert_eq!(
            conn.calls,
            vec![
                Call::BeginCopy("COPY \"foo\"(\"id\", \"name\") FROM STDIN WITH CSV".to_string()),
                Call::SendData("1,a\n2,\"b,c\"\n".to_string()),
                Call::EndCopy,
            ]
        );
    }

    #[tokio::test]
    async fn test_bulk_load_chunks_large_payloads() {
        let mut conn = RecordingConnection::default();
        let name = "x".repeat(1000);
        let records: Vec<Record> =
            rows((0..200).map(|id| json!({"id": id, "name": name})).collect());

        let copied = bulk_load(&mut conn, &spec(), &records).await.unwrap();

        assert_eq!(copied, 200);
        let sends = conn.calls.iter().filter(|call| matches!(call, Call::SendData(_))).count();
        assert!(sends > 1);
        let expected: String = (0..200).map(|id| format!("{},{}\n", id, name)).collect();
        assert_eq!(conn.sent_data(), expected);
    }

    #[tokio::test]
    async fn test_bulk_load_missing_columns_sends_nothing() {
        let mut conn = RecordingConnection::default();

        let result = bulk_load(&mut conn, &LoadSpec::new("foo"), &[]).await;

        assert!(matches!(
            result,
            Err(BulkLoadError::Statement(StatementError::MissingArgument("insert_cols")))
        ));
        assert!(conn.calls.is_empty());
    }

    #[tokio::test]
    async fn test_bulk_load_ends_copy_when_encoding_fails() {
        let mut conn = RecordingConnection::default();
        let records = rows(vec![json!({"id": 1}), json!({"id": 2})]);

        let result = bulk_load_with_encoder(&mut conn, &spec(), &records, |_: &[Value]| {
            Err(csv::Error::from(std::io::Error::new(std::io::ErrorKind::Other, "bad row")))
        })
        .await;

        assert!(matches!(result, Err(BulkLoadError::Encode(_))));
        assert_eq!(conn.calls.last(), Some(&Call::EndCopy));
        assert!(!conn.calls.iter().any(|call| matches!(call, Call::SendData(_))));
    }

    #[tokio::test]
    async fn test_bulk_load_ends_copy_when_send_fails() {
        let mut conn = RecordingConnection::failing_send();
        let records = rows(vec![json!({"id": 1, "name": "a"})]);

        let result = bulk_load(&mut conn, &spec(), &records).await;

        assert!(matches!(result, Err(BulkLoadError::Connection(_))));
        assert_eq!(conn.calls.last(), Some(&Call::EndCopy));
    }

    #[tokio::test]
    async fn test_bulk_load_begin_failure_does_not_end_copy() {
        let mut conn = RecordingConnection::failing_on("COPY");
        let records = rows(vec![json!({"id": 1, "name": "a"})]);

        let result = bulk_load(&mut conn, &spec(), &records).await;

        assert!(matches!(result, Err(BulkLoadError::Connection(_))));
        assert_eq!(conn.calls.len(), 1);
    }
}
