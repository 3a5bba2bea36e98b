use anyhow::{Context, Result};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use postgres_native_tls::MakeTlsConnector;
use serde::{Deserialize, Serialize};
use tokio_postgres::NoTls;

/// Where the Postgres catalog lives. Read from the `[connection]` table of
/// the config file; the password is never written back out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub ssl_mode: SslMode,
    /// Skip certificate verification in `Prefer`/`Require` modes.
    pub accept_invalid_certs: bool,
    /// Custom CA bundle (PEM). The system store is used when unset.
    pub ca_cert_path: Option<String>,
    /// Upper bound on pooled connections.
    pub pool_size: usize,
}

/// SSL/TLS connection modes, matching the libpq `sslmode` parameter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }
}

impl ConnectionConfig {
    pub fn connection_string(&self) -> String {
        format!(
            "host={} port={} dbname={} user={} password={} sslmode={} connect_timeout=10",
            quote_conn_value(&self.host),
            self.port,
            quote_conn_value(&self.database),
            quote_conn_value(&self.username),
            quote_conn_value(&self.password),
            self.ssl_mode.as_str()
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
            database: String::from("postgres"),
            username: String::from("postgres"),
            password: String::new(),
            ssl_mode: SslMode::default(),
            accept_invalid_certs: false,
            ca_cert_path: None,
            pool_size: 8,
        }
    }
}

/// Build a connection pool for catalog queries.
///
/// Connections are opened lazily by the pool, so this only fails on a bad
/// connection string or TLS setup.
pub fn connect_pool(config: &ConnectionConfig) -> Result<Pool> {
    let pg_config: tokio_postgres::Config = config
        .connection_string()
        .parse()
        .context("Invalid PostgreSQL connection settings")?;
    let manager_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };

    let manager = match config.ssl_mode {
        SslMode::Disable => Manager::from_config(pg_config, NoTls, manager_config),
        SslMode::Prefer | SslMode::Require => {
            let tls = build_tls_connector(config, false)?;
            Manager::from_config(pg_config, tls, manager_config)
        }
        SslMode::VerifyCa | SslMode::VerifyFull => {
            let tls = build_tls_connector(config, true)?;
            Manager::from_config(pg_config, tls, manager_config)
        }
    };

    Pool::builder(manager)
        .max_size(config.pool_size.max(1))
        .build()
        .context("Failed to build PostgreSQL connection pool")
}

/// Build a TLS connector. `strict_verify` ignores `accept_invalid_certs`.
fn build_tls_connector(config: &ConnectionConfig, strict_verify: bool) -> Result<MakeTlsConnector> {
    let mut builder = native_tls::TlsConnector::builder();

    if config.accept_invalid_certs && !strict_verify {
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    } else if let Some(ca_path) = &config.ca_cert_path {
        let pem = std::fs::read_to_string(ca_path)
            .with_context(|| format!("Failed to read CA certificate file: {}", ca_path))?;
        for block in pem_blocks(&pem)? {
            let cert = native_tls::Certificate::from_pem(block.as_bytes())
                .context("Failed to parse certificate")?;
            builder.add_root_certificate(cert);
        }
    }

    let connector = builder.build().context("Failed to build TLS connector")?;
    Ok(MakeTlsConnector::new(connector))
}

/// Split a PEM bundle into one string per certificate.
fn pem_blocks(pem: &str) -> Result<Vec<String>> {
    let mut blocks = Vec::new();
    let mut current: Option<String> = None;

    for line in pem.lines() {
        let line = line.trim();
        if line.contains("-----BEGIN CERTIFICATE-----") {
            current = Some(String::from("-----BEGIN CERTIFICATE-----\n"));
        } else if line.contains("-----END CERTIFICATE-----") {
            if let Some(mut block) = current.take() {
                block.push_str("-----END CERTIFICATE-----\n");
                blocks.push(block);
            }
        } else if let Some(block) = current.as_mut() {
            block.push_str(line);
            block.push('\n');
        }
    }

    if blocks.is_empty() {
        anyhow::bail!("No valid certificates found in PEM data");
    }
    Ok(blocks)
}

/// Quote a value for use in a libpq key=value connection string.
fn quote_conn_value(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}
