use std::{env, fmt, pin::Pin, time::Duration};

use async_trait::async_trait;
use bb8::{Pool, PooledConnection, RunError};
use bb8_postgres::PostgresConnectionManager;
use bytes::Bytes;
use dotenv::dotenv;
use futures::SinkExt;
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use tokio::{task, time::timeout};
pub use tokio_postgres::types::ToSql;
use tokio_postgres::{config::SslMode, Config, CopyInSink, Error as PgError, Row};
use tracing::{debug, error};

use crate::database::postgres::bulk_load::BulkLoadConnection;

pub fn connection_string() -> Result<String, env::VarError> {
    dotenv().ok();
    let connection = env::var("DATABASE_URL")?;
    Ok(connection)
}

#[derive(thiserror::Error, Debug)]
pub enum PostgresConnectionError {
    #[error("The database connection string is wrong please check your environment: {0}")]
    DatabaseConnectionConfigWrong(#[from] env::VarError),

    #[error("Connection pool error: {0}")]
    ConnectionPoolError(#[from] tokio_postgres::Error),

    #[error("Can not connect to the database please make sure your connection string is correct")]
    CanNotConnectToDatabase,

    #[error("Could not parse connection string make sure it is correctly formatted")]
    CouldNotParseConnectionString,

    #[error("Could not create tls connector")]
    CouldNotCreateTlsConnector,
}

#[derive(thiserror::Error, Debug)]
pub enum PostgresError {
    #[error("PgError {0}")]
    PgError(#[from] PgError),

    #[error("Connection pool error: {0}")]
    ConnectionPoolError(#[from] RunError<tokio_postgres::Error>),

    #[error("No COPY is in progress on this connection")]
    CopyNotOpen,

    #[error("A COPY is already in progress on this connection")]
    CopyAlreadyOpen,
}

type PostgresPool = Pool<PostgresConnectionManager<MakeTlsConnector>>;

pub struct PostgresClient {
    pool: PostgresPool,
}

impl fmt::Debug for PostgresClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresClient").field("state", &self.pool.state()).finish()
    }
}

impl PostgresClient {
    /// Connects using `DATABASE_URL`, falling back to a plain connection when
    /// TLS fails and the url does not require it.
    pub async fn new() -> Result<Self, PostgresConnectionError> {
        let connection_str = connection_string()?;
        Self::connect(&connection_str).await
    }

    pub async fn connect(connection_str: &str) -> Result<Self, PostgresConnectionError> {
        async fn _connect(
            connection_str: &str,
            disable_ssl: bool,
        ) -> Result<PostgresClient, PostgresConnectionError> {
            let mut config: Config = connection_str
                .parse()
                .map_err(|_| PostgresConnectionError::CouldNotParseConnectionString)?;

            if disable_ssl {
                config.ssl_mode(SslMode::Disable);
            }

            let connector = TlsConnector::builder()
                .build()
                .map_err(|_| PostgresConnectionError::CouldNotCreateTlsConnector)?;
            let tls_connector = MakeTlsConnector::new(connector);

            let (client, connection) =
                match timeout(Duration::from_millis(5000), config.connect(tls_connector.clone()))
                    .await
                {
                    Ok(Ok((client, connection))) => (client, connection),
                    Ok(Err(e)) => {
                        if !disable_ssl &&
                            config.get_ssl_mode() != SslMode::Disable &&
                            !connection_str.contains("sslmode=require")
                        {
                            return Box::pin(_connect(connection_str, true)).await;
                        }
                        error!("Error connecting to database: {}", e);
                        return Err(PostgresConnectionError::CanNotConnectToDatabase);
                    }
                    Err(e) => {
                        error!("Timeout connecting to database: {}", e);
                        return Err(PostgresConnectionError::CanNotConnectToDatabase);
                    }
                };

            let connection_handle = task::spawn(connection);

            if client.query_one("SELECT 1", &[]).await.is_err() {
                return Err(PostgresConnectionError::CanNotConnectToDatabase);
            }

            drop(client);
            match connection_handle.await {
                Ok(Ok(())) => (),
                Ok(Err(_)) | Err(_) => {
                    return Err(PostgresConnectionError::CanNotConnectToDatabase)
                }
            }

            let manager = PostgresConnectionManager::new(config, tls_connector);
            let pool = Pool::builder().build(manager).await?;

            Ok(PostgresClient { pool })
        }

        _connect(connection_str, false).await
    }

    /// Checks out one connection for the whole of a multi-statement operation.
    ///
    /// Temporary tables live only as long as the session that created them, so
    /// staging-table work must go through a single session.
    pub async fn session(&self) -> Result<PostgresSession<'_>, PostgresError> {
        let conn = self.pool.get().await?;
        Ok(PostgresSession { conn, copy_sink: None })
    }

    pub async fn batch_execute(&self, sql: &str) -> Result<(), PostgresError> {
        let conn = self.pool.get().await?;
        conn.batch_execute(sql).await.map_err(PostgresError::PgError)
    }

    pub async fn query(
        &self,
        query: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, PostgresError> {
        let conn = self.pool.get().await?;
        let rows = conn.query(query, params).await.map_err(PostgresError::PgError)?;
        Ok(rows)
    }
}

pub struct PostgresSession<'a> {
    conn: PooledConnection<'a, PostgresConnectionManager<MakeTlsConnector>>,
    copy_sink: Option<Pin<Box<CopyInSink<Bytes>>>>,
}

#[async_trait]
impl<'a> BulkLoadConnection for PostgresSession<'a> {
    type Error = PostgresError;

    async fn execute(&mut self, sql: &str) -> Result<u64, PostgresError> {
        if self.copy_sink.is_some() {
            return Err(PostgresError::CopyAlreadyOpen);
        }
        self.conn.execute(sql, &[]).await.map_err(PostgresError::PgError)
    }

    async fn begin_copy(&mut self, sql: &str) -> Result<(), PostgresError> {
        if self.copy_sink.is_some() {
            return Err(PostgresError::CopyAlreadyOpen);
        }

        debug!("Opening COPY: {}", sql);
        let sink = self.conn.copy_in(sql).await?;
        self.copy_sink = Some(Box::pin(sink));
        Ok(())
    }

    async fn send_data(&mut self, data: Bytes) -> Result<(), PostgresError> {
        let sink = self.copy_sink.as_mut().ok_or(PostgresError::CopyNotOpen)?;
        sink.send(data).await.map_err(PostgresError::PgError)
    }

    async fn end_copy(&mut self) -> Result<u64, PostgresError> {
        let mut sink = self.copy_sink.take().ok_or(PostgresError::CopyNotOpen)?;
        sink.as_mut().finish().await.map_err(PostgresError::PgError)
    }
}
