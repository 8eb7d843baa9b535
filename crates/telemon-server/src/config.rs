use anyhow::{Context, Result};
use clap::Parser;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use telemon_storage::StorageConfig;

/// Command-line flags. Every flag is optional; unset flags keep the value
/// from the config file or the built-in default.
#[derive(Debug, Default, Parser)]
#[command(name = "telemon-server", version, about = "Metrics collection server")]
pub struct Cli {
    /// TOML file with default settings
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// HTTP listen address
    #[arg(short = 'a', long)]
    pub address: Option<String>,
    /// gRPC listen address; gRPC is disabled when unset
    #[arg(short = 'g', long)]
    pub grpc_address: Option<String>,
    /// Snapshot interval in seconds, 0 writes after every update
    #[arg(short = 'i', long)]
    pub store_interval: Option<u64>,
    /// Snapshot file of the in-memory backend
    #[arg(short = 'f', long)]
    pub file_storage_path: Option<String>,
    /// Load the snapshot file on start
    #[arg(short = 'r', long)]
    pub restore: Option<bool>,
    /// Database connection string; selects the relational backend
    #[arg(short = 'd', long)]
    pub database_dsn: Option<String>,
    /// Shared secret for body hashes
    #[arg(short = 'k', long)]
    pub key: Option<String>,
    /// PEM file with the RSA private key
    #[arg(long)]
    pub crypto_key: Option<PathBuf>,
    /// Trusted agent subnet in CIDR notation
    #[arg(short = 't', long)]
    pub trusted_subnet: Option<String>,
    /// Seconds to wait for in-flight requests on shutdown
    #[arg(long)]
    pub shutdown_timeout: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default)]
    pub grpc_address: Option<String>,
    /// 0 = snapshot after every write
    #[serde(default = "default_store_interval")]
    pub store_interval: u64,
    #[serde(default = "default_file_storage_path")]
    pub file_storage_path: String,
    #[serde(default = "default_restore")]
    pub restore: bool,
    #[serde(default)]
    pub database_dsn: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub crypto_key: Option<PathBuf>,
    #[serde(default)]
    pub trusted_subnet: Option<String>,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

fn default_address() -> String {
    "localhost:8080".to_string()
}

fn default_store_interval() -> u64 {
    300
}

fn default_file_storage_path() -> String {
    "/tmp/metrics-db.json".to_string()
}

fn default_restore() -> bool {
    true
}

fn default_shutdown_timeout() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            grpc_address: None,
            store_interval: default_store_interval(),
            file_storage_path: default_file_storage_path(),
            restore: default_restore(),
            database_dsn: None,
            key: None,
            crypto_key: None,
            trusted_subnet: None,
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

fn env_parse<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("invalid value '{raw}' for {name}"))
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("cannot parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Defaults, then the optional TOML file, then flags, then the process
    /// environment.
    pub fn resolve(cli: Cli) -> Result<Self> {
        Self::resolve_with(cli, |name| std::env::var(name).ok())
    }

    pub fn resolve_with(cli: Cli, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_cli(cli);
        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_cli(&mut self, cli: Cli) {
        if let Some(v) = cli.address {
            self.address = v;
        }
        if cli.grpc_address.is_some() {
            self.grpc_address = cli.grpc_address;
        }
        if let Some(v) = cli.store_interval {
            self.store_interval = v;
        }
        if let Some(v) = cli.file_storage_path {
            self.file_storage_path = v;
        }
        if let Some(v) = cli.restore {
            self.restore = v;
        }
        if cli.database_dsn.is_some() {
            self.database_dsn = cli.database_dsn;
        }
        if cli.key.is_some() {
            self.key = cli.key;
        }
        if cli.crypto_key.is_some() {
            self.crypto_key = cli.crypto_key;
        }
        if cli.trusted_subnet.is_some() {
            self.trusted_subnet = cli.trusted_subnet;
        }
        if let Some(v) = cli.shutdown_timeout {
            self.shutdown_timeout = v;
        }
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = env("ADDRESS") {
            self.address = v;
        }
        if let Some(v) = env("GRPC_ADDRESS") {
            self.grpc_address = Some(v);
        }
        if let Some(v) = env("STORE_INTERVAL") {
            self.store_interval = env_parse("STORE_INTERVAL", &v)?;
        }
        if let Some(v) = env("FILE_STORAGE_PATH") {
            self.file_storage_path = v;
        }
        if let Some(v) = env("RESTORE") {
            self.restore = env_parse("RESTORE", &v)?;
        }
        if let Some(v) = env("DATABASE_DSN") {
            self.database_dsn = Some(v);
        }
        if let Some(v) = env("KEY") {
            self.key = Some(v);
        }
        if let Some(v) = env("CRYPTO_KEY") {
            self.crypto_key = Some(PathBuf::from(v));
        }
        if let Some(v) = env("TRUSTED_SUBNET") {
            self.trusted_subnet = Some(v);
        }
        if let Some(v) = env("SHUTDOWN_TIMEOUT") {
            self.shutdown_timeout = env_parse("SHUTDOWN_TIMEOUT", &v)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.subnet()?;
        Ok(())
    }

    /// Parsed trusted subnet; empty strings disable the filter.
    pub fn subnet(&self) -> Result<Option<IpNet>> {
        match self.trusted_subnet.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(cidr) => cidr
                .parse()
                .map(Some)
                .with_context(|| format!("invalid trusted subnet '{cidr}'")),
        }
    }

    pub fn hash_secret(&self) -> Option<&str> {
        self.key.as_deref().filter(|k| !k.is_empty())
    }

    pub fn grpc_address(&self) -> Option<&str> {
        self.grpc_address.as_deref().filter(|a| !a.is_empty())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }

    pub fn storage_config(&self) -> StorageConfig {
        let path = self.file_storage_path.trim();
        StorageConfig {
            file_storage_path: (!path.is_empty()).then(|| PathBuf::from(path)),
            store_interval: Duration::from_secs(self.store_interval),
            restore: self.restore,
            database_dsn: self.database_dsn.clone().filter(|d| !d.is_empty()),
        }
    }

    /// DSN with the password masked, for logs.
    pub fn redacted_dsn(&self) -> Option<String> {
        let dsn = self.database_dsn.as_deref()?;
        let Some((scheme, rest)) = dsn.split_once("://") else {
            return Some(dsn.to_string());
        };
        match rest.split_once('@') {
            Some((auth, host)) => {
                let user = auth.split(':').next().unwrap_or_default();
                Some(format!("{scheme}://{user}:***@{host}"))
            }
            None => Some(dsn.to_string()),
        }
    }
}
