use super::query::{execute_query, Database, QueryResult};
use crate::error::PivotResult;
use anyhow::{Context, Result};
use postgres_native_tls::MakeTlsConnector;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub ssl_mode: SslMode,
    /// Accept invalid/self-signed certificates. Only honoured for
    /// `Prefer` and `Require`.
    pub accept_invalid_certs: bool,
    /// Optional path to a custom CA certificate bundle (PEM format).
    /// If not set, the system CA store is used.
    pub ca_cert_path: Option<String>,
}

/// SSL/TLS connection modes for PostgreSQL.
///
/// These match the standard PostgreSQL sslmode parameter:
/// - `Disable`: No SSL (unencrypted)
/// - `Prefer`: Try SSL first, fall back to non-SSL (default)
/// - `Require`: Require SSL but don't verify certificate
/// - `VerifyCa`: Require SSL and verify the server certificate is signed by a trusted CA
/// - `VerifyFull`: Like VerifyCa, but also verify the server hostname matches the certificate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, clap::ValueEnum)]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl ConnectionConfig {
    pub fn connection_string(&self) -> String {
        let sslmode = match self.ssl_mode {
            SslMode::Disable => "disable",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        };
        format!(
            "host={} port={} dbname={} user={} password={} sslmode={} connect_timeout=10",
            quote_conn_value(&self.host),
            self.port,
            quote_conn_value(&self.database),
            quote_conn_value(&self.username),
            quote_conn_value(&self.password),
            sslmode
        )
    }

    pub fn display_string(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.username, self.host, self.port, self.database
        )
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::from("localhost"),
            port: 5432,
            database: String::from("survey"),
            username: String::from("postgres"),
            password: String::new(),
            ssl_mode: SslMode::default(),
            accept_invalid_certs: false,
            ca_cert_path: None,
        }
    }
}

/// One open PostgreSQL connection, owned by a single extraction run.
///
/// The background connection future is joined on [`Database::close`], so
/// the socket is gone by the time `close` returns.
pub struct PgSession {
    client: Client,
    connection: JoinHandle<()>,
}

impl PgSession {
    /// Wrap an already-connected client and its spawned connection task.
    pub fn from_parts(client: Client, connection: JoinHandle<()>) -> Self {
        Self { client, connection }
    }
}

#[async_trait::async_trait]
impl Database for PgSession {
    async fn execute(&self, sql: &str) -> PivotResult<QueryResult> {
        execute_query(&self.client, sql).await
    }

    async fn close(self) {
        drop(self.client);
        if let Err(e) = self.connection.await {
            error!("Connection task ended abnormally: {}", e);
        }
        debug!("Database connection closed");
    }
}

/// Open a session with the configured TLS mode.
pub async fn connect(config: &ConnectionConfig) -> Result<PgSession> {
    let conn_string = config.connection_string();

    let session = match config.ssl_mode {
        SslMode::Disable => {
            let (client, connection) = tokio_postgres::connect(&conn_string, NoTls)
                .await
                .context("Failed to connect to PostgreSQL")?;
            PgSession::from_parts(client, spawn_connection(connection))
        }
        SslMode::Prefer | SslMode::Require => {
            let tls = build_tls_connector(config, false)?;
            let (client, connection) = tokio_postgres::connect(&conn_string, tls)
                .await
                .context("Failed to connect to PostgreSQL")?;
            PgSession::from_parts(client, spawn_connection(connection))
        }
        SslMode::VerifyCa | SslMode::VerifyFull => {
            let tls = build_tls_connector(config, true)?;
            let (client, connection) = tokio_postgres::connect(&conn_string, tls)
                .await
                .context("Failed to connect to PostgreSQL with certificate verification")?;
            PgSession::from_parts(client, spawn_connection(connection))
        }
    };

    Ok(session)
}

fn spawn_connection<F>(connection: F) -> JoinHandle<()>
where
    F: std::future::Future<Output = std::result::Result<(), tokio_postgres::Error>>
        + Send
        + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("Connection error: {}", e);
        }
    })
}

/// Build a TLS connector with appropriate certificate configuration.
///
/// # Arguments
/// * `config` - Connection configuration
/// * `strict_verify` - If true, always verify certificates (for verify-ca/verify-full modes)
fn build_tls_connector(config: &ConnectionConfig, strict_verify: bool) -> Result<MakeTlsConnector> {
    let mut builder = native_tls::TlsConnector::builder();

    if config.accept_invalid_certs && !strict_verify {
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    } else if let Some(ca_path) = &config.ca_cert_path {
        let ca_data = std::fs::read_to_string(ca_path)
            .with_context(|| format!("Failed to read CA certificate file: {}", ca_path))?;
        for pem in split_pem_certificates(&ca_data)? {
            let cert = native_tls::Certificate::from_pem(pem.as_bytes())
                .context("Failed to parse certificate")?;
            builder.add_root_certificate(cert);
        }
    }

    let connector = builder.build().context("Failed to build TLS connector")?;

    Ok(MakeTlsConnector::new(connector))
}

/// Split a PEM bundle into one string per certificate block.
fn split_pem_certificates(bundle: &str) -> Result<Vec<String>> {
    let mut certs = Vec::new();
    let mut current = String::new();
    let mut in_cert = false;

    for line in bundle.lines() {
        if line.contains("-----BEGIN CERTIFICATE-----") {
            in_cert = true;
            current.clear();
        }
        if in_cert {
            current.push_str(line.trim());
            current.push('\n');
        }
        if line.contains("-----END CERTIFICATE-----") && in_cert {
            in_cert = false;
            certs.push(std::mem::take(&mut current));
        }
    }

    if certs.is_empty() {
        anyhow::bail!("No valid certificates found in PEM data");
    }

    Ok(certs)
}

/// Quote a value for use in a libpq key=value connection string.
/// Wraps in single quotes and escapes backslashes and single quotes.
fn quote_conn_value(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}
