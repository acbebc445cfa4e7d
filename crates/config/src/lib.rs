use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

/// `AppConfig` holds all configuration parameters required by the service.
///
/// The configuration is read from a local file or an HTTP URL (YAML or JSON,
/// chosen by file extension), then overridden by `APP_`-prefixed environment
/// variables where dots in key names map to underscores
/// (e.g. `APP_SERVER_PORT` overrides `server.port`).
///
/// The `config` crate lowercases keys, so camel-cased keys such as
/// `readTimeout` arrive as `readtimeout`; the serde aliases below accept both
/// that spelling and the snake-cased one.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub broker: BrokerConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Port on which the HTTP server listens.
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// HTTP read timeout in seconds.
    #[serde(default = "default_io_timeout", alias = "readtimeout", alias = "readTimeout")]
    pub read_timeout: u64,
    /// HTTP write timeout in seconds.
    #[serde(default = "default_io_timeout", alias = "writetimeout", alias = "writeTimeout")]
    pub write_timeout: u64,
    /// Cap on accepted request header bytes.
    #[serde(default = "default_max_header_bytes", alias = "maxheaderbytes", alias = "maxHeaderBytes")]
    pub max_header_bytes: usize,
    /// Deadline for in-flight requests during shutdown, in seconds.
    #[serde(
        default = "default_shutdown_grace_period",
        alias = "shutdowngraceperiod", alias = "shutdownGracePeriod"
    )]
    pub shutdown_grace_period: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
            read_timeout: default_io_timeout(),
            write_timeout: default_io_timeout(),
            max_header_bytes: default_max_header_bytes(),
            shutdown_grace_period: default_shutdown_grace_period(),
        }
    }
}

impl ServerConfig {
    pub fn listen_address(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_period)
    }
}

/// Database connection settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub name: String,
    #[serde(default = "default_ssl_mode", alias = "sslmode")]
    pub ssl_mode: String,
    /// Directory of `.sql` migration files applied at startup; migrations
    /// are skipped when unset.
    #[serde(default, alias = "migrationdir", alias = "migrationDir")]
    pub migration_dir: Option<String>,
}

impl DatabaseConfig {
    /// Postgres connection string in keyword/value format.
    pub fn connection_string(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={} sslmode={}",
            self.host, self.port, self.username, self.password, self.name, self.ssl_mode
        )
    }
}

/// Message broker settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BrokerConfig {
    #[serde(alias = "bootstrapservers", alias = "bootstrapServers")]
    pub bootstrap_servers: Vec<String>,
    #[serde(default = "default_security_protocol", alias = "securityprotocol", alias = "securityProtocol")]
    pub security_protocol: String,
    pub consumer: ConsumerConfig,
}

/// Consumer group settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ConsumerConfig {
    #[serde(alias = "groupid", alias = "groupId")]
    pub group_id: String,
    #[serde(alias = "autooffsetreset", alias = "autoOffsetReset")]
    pub auto_offset_reset: AutoOffsetReset,
}

/// Where a fresh consumer group starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoOffsetReset {
    Earliest,
    Newest,
}

impl AutoOffsetReset {
    /// The broker library spells the policy `latest` where the configuration
    /// surface says `newest`.
    pub fn as_kafka_str(self) -> &'static str {
        match self {
            AutoOffsetReset::Earliest => "earliest",
            AutoOffsetReset::Newest => "latest",
        }
    }
}

fn default_server_port() -> u16 {
    8080
}

fn default_io_timeout() -> u64 {
    10
}

fn default_max_header_bytes() -> usize {
    1 << 20
}

fn default_shutdown_grace_period() -> u64 {
    5
}

fn default_ssl_mode() -> String {
    "disable".to_string()
}

fn default_security_protocol() -> String {
    "plaintext".to_string()
}

const SSL_MODES: [&str; 4] = ["disable", "require", "verify-ca", "verify-full"];

impl AppConfig {
    /// Loads configuration from the given source URI.
    ///
    /// Accepts a plain path, a `file://` path, or an `http(s)://` URL; the
    /// format is chosen by the `.yaml`/`.yml`/`.json` extension. With no
    /// source, configuration comes from the environment alone.
    ///
    /// # Errors
    /// Returns an error if the source cannot be read, parsed, or fails
    /// validation.
    pub async fn load(uri: Option<&str>) -> Result<Self> {
        // Load .env first so it participates in the environment overrides
        dotenvy::dotenv().ok();

        let mut builder = Config::builder();

        if let Some(uri) = uri {
            let format = format_for(uri)?;
            if uri.starts_with("http://") || uri.starts_with("https://") {
                let body = reqwest::get(uri)
                    .await
                    .and_then(reqwest::Response::error_for_status)
                    .with_context(|| format!("failed to fetch config from '{uri}'"))?
                    .text()
                    .await
                    .with_context(|| format!("failed to read config body from '{uri}'"))?;
                builder = builder.add_source(File::from_str(&body, format));
            } else {
                let path = uri.strip_prefix("file://").unwrap_or(uri);
                builder = builder.add_source(File::new(path, format));
            }
        }

        let settings = builder
            .add_source(Environment::with_prefix("APP").separator("_"))
            .build()
            .context("failed to build configuration")?;

        let config: AppConfig = settings
            .try_deserialize()
            .context("failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.server.port < 1024 {
            bail!("server port must be at least 1024, got {}", self.server.port);
        }
        if self.database.username.is_empty()
            || self.database.host.is_empty()
            || self.database.name.is_empty()
        {
            bail!("database username, host and name are required");
        }
        if !SSL_MODES.contains(&self.database.ssl_mode.as_str()) {
            bail!(
                "database ssl mode must be one of {SSL_MODES:?}, got '{}'",
                self.database.ssl_mode
            );
        }
        if self.broker.bootstrap_servers.is_empty()
            || self.broker.bootstrap_servers.iter().any(String::is_empty)
        {
            bail!("broker bootstrap servers must be a non-empty list of non-empty addresses");
        }
        if self.broker.consumer.group_id.is_empty() {
            bail!("broker consumer group id is required");
        }
        Ok(())
    }
}

fn format_for(uri: &str) -> Result<FileFormat> {
    if uri.ends_with(".yaml") || uri.ends_with(".yml") {
        Ok(FileFormat::Yaml)
    } else if uri.ends_with(".json") {
        Ok(FileFormat::Json)
    } else {
        bail!("config source '{uri}' must have a json or yaml extension")
    }
}
