use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Default, Parser)]
#[command(name = "telemon-agent", version, about = "Host metrics agent")]
pub struct Cli {
    /// TOML file with default settings
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Server HTTP address
    #[arg(short = 'a', long)]
    pub address: Option<String>,
    /// Server gRPC address; selects the gRPC driver
    #[arg(short = 'g', long)]
    pub grpc_address: Option<String>,
    /// Seconds between reports
    #[arg(short = 'r', long)]
    pub report_interval: Option<u64>,
    /// Seconds between polls
    #[arg(short = 'p', long)]
    pub poll_interval: Option<u64>,
    /// Shared secret for body hashes
    #[arg(short = 'k', long)]
    pub key: Option<String>,
    /// PEM file with the server's RSA public key
    #[arg(long)]
    pub crypto_key: Option<PathBuf>,
    /// Comma separated retry delays in seconds
    #[arg(long)]
    pub retry_delays: Option<String>,
    /// Per-request timeout in seconds
    #[arg(long)]
    pub request_timeout: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default)]
    pub grpc_address: Option<String>,
    #[serde(default = "default_report_interval")]
    pub report_interval: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub crypto_key: Option<PathBuf>,
    #[serde(default = "default_retry_delays")]
    pub retry_delays: Vec<u64>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

fn default_address() -> String {
    "localhost:8080".to_string()
}

fn default_report_interval() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    2
}

fn default_retry_delays() -> Vec<u64> {
    vec![1, 3, 5]
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            grpc_address: None,
            report_interval: default_report_interval(),
            poll_interval: default_poll_interval(),
            key: None,
            crypto_key: None,
            retry_delays: default_retry_delays(),
            request_timeout: default_request_timeout(),
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

/// Parses `"1,3,5"`; an empty string disables retries.
fn parse_delays(name: &str, raw: &str) -> Result<Vec<u64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| env_parse(name, s))
        .collect()
}

impl AgentConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("cannot parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn resolve(cli: Cli) -> Result<Self> {
        Self::resolve_with(cli, |name| std::env::var(name).ok())
    }

    /// Defaults, then the optional TOML file, then flags, then `env`.
    pub fn resolve_with(cli: Cli, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_cli(cli)?;
        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_cli(&mut self, cli: Cli) -> Result<()> {
        if let Some(v) = cli.address {
            self.address = v;
        }
        if cli.grpc_address.is_some() {
            self.grpc_address = cli.grpc_address;
        }
        if let Some(v) = cli.report_interval {
            self.report_interval = v;
        }
        if let Some(v) = cli.poll_interval {
            self.poll_interval = v;
        }
        if cli.key.is_some() {
            self.key = cli.key;
        }
        if cli.crypto_key.is_some() {
            self.crypto_key = cli.crypto_key;
        }
        if let Some(v) = cli.retry_delays {
            self.retry_delays = parse_delays("--retry-delays", &v)?;
        }
        if let Some(v) = cli.request_timeout {
            self.request_timeout = v;
        }
        Ok(())
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = env("ADDRESS") {
            self.address = v;
        }
        if let Some(v) = env("GRPC_ADDRESS") {
            self.grpc_address = Some(v);
        }
        if let Some(v) = env("REPORT_INTERVAL") {
            self.report_interval = env_parse("REPORT_INTERVAL", &v)?;
        }
        if let Some(v) = env("POLL_INTERVAL") {
            self.poll_interval = env_parse("POLL_INTERVAL", &v)?;
        }
        if let Some(v) = env("KEY") {
            self.key = Some(v);
        }
        if let Some(v) = env("CRYPTO_KEY") {
            self.crypto_key = Some(PathBuf::from(v));
        }
        if let Some(v) = env("RETRY_DELAYS") {
            self.retry_delays = parse_delays("RETRY_DELAYS", &v)?;
        }
        if let Some(v) = env("REQUEST_TIMEOUT") {
            self.request_timeout = env_parse("REQUEST_TIMEOUT", &v)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.report_interval == 0 {
            bail!("report interval must be positive");
        }
        if self.poll_interval == 0 {
            bail!("poll interval must be positive");
        }
        if self.request_timeout == 0 {
            bail!("request timeout must be positive");
        }
        Ok(())
    }

    pub fn hash_secret(&self) -> Option<&str> {
        self.key.as_deref().filter(|k| !k.is_empty())
    }

    pub fn grpc_address(&self) -> Option<&str> {
        self.grpc_address.as_deref().filter(|a| !a.is_empty())
    }

    /// HTTP-only settings that are configured but unused by the gRPC driver.
    pub fn ignored_by_grpc(&self) -> Vec<&'static str> {
        if self.grpc_address().is_none() {
            return Vec::new();
        }
        let mut ignored = Vec::new();
        if self.hash_secret().is_some() {
            ignored.push("key");
        }
        if self.crypto_key.is_some() {
            ignored.push("crypto_key");
        }
        ignored
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays
            .iter()
            .map(|s| Duration::from_secs(*s))
            .collect()
    }
}
