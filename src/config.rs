//! Application configuration.
//!
//! Precedence, lowest to highest: built-in defaults, config file
//! (`--config` / `CONFIG_FILE`, else `./config.yaml` when present),
//! `STREAMCHAT_` environment variables (`STREAMCHAT_SERVER__PORT=8080`),
//! explicit CLI flags.

use std::path::Path;
use std::time::Duration;

use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use url::Url;

use crate::session::DEFAULT_SESSION_TIMEOUT;
use crate::stream::{DEFAULT_READ_TIMEOUT, ReadOptions};
use crate::upstream::UpstreamSettings;

/// Config file picked up from the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Address to bind
    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Completion endpoint URL
    #[arg(long, env = "UPSTREAM_ENDPOINT")]
    pub upstream: Option<String>,

    /// Seconds to wait for the next response chunk
    #[arg(long)]
    pub read_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub sessions: SessionsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Applies to every route except the SSE relay.
    pub request_timeout_secs: u64,
    /// Directory served under `/static`.
    pub static_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    pub endpoint: String,
    /// Sent as `Bearer <token>` when the browser supplies no `Authorization`.
    #[serde(default)]
    pub bearer_token: Option<String>,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionsConfig {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
    /// How long an accepted message may wait for its stream to be opened.
    pub pending_timeout_secs: u64,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli = Cli::try_parse_from(args).map_err(|e| ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default("server.request_timeout_secs", 30)?
            .set_default("server.static_dir", "static")?
            .set_default("upstream.endpoint", "http://127.0.0.1:8000/api/chat")?
            .set_default("upstream.connect_timeout_secs", 10)?
            .set_default("upstream.read_timeout_secs", whole_secs(DEFAULT_READ_TIMEOUT))?
            .set_default("sessions.ttl_secs", whole_secs(DEFAULT_SESSION_TIMEOUT))?
            .set_default("sessions.sweep_interval_secs", 60)?
            .set_default("sessions.pending_timeout_secs", 60)?;

        match &cli.config {
            Some(path) => builder = builder.add_source(File::with_name(path)),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                builder = builder.add_source(File::with_name(DEFAULT_CONFIG_FILE));
            }
            None => {}
        }

        builder = builder.add_source(
            Environment::with_prefix("STREAMCHAT")
                .separator("__")
                .try_parsing(true),
        );

        // CLI flags (and their plain env aliases) win over everything else.
        if let Some(host) = cli.host {
            builder = builder.set_override("server.host", host)?;
        }
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", i64::from(port))?;
        }
        if let Some(endpoint) = cli.upstream {
            builder = builder.set_override("upstream.endpoint", endpoint)?;
        }
        if let Some(secs) = cli.read_timeout_secs {
            builder = builder.set_override("upstream.read_timeout_secs", i64::try_from(secs).unwrap_or(i64::MAX))?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.upstream.endpoint_url()?;
        if self.upstream.read_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "upstream.read_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// `host:port` to bind.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn whole_secs(d: Duration) -> i64 {
    i64::try_from(d.as_secs()).unwrap_or(i64::MAX)
}

impl UpstreamConfig {
    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.endpoint).map_err(|e| {
            ConfigError::Message(format!("invalid upstream.endpoint {:?}: {e}", self.endpoint))
        })
    }

    pub fn settings(&self) -> Result<UpstreamSettings, ConfigError> {
        Ok(UpstreamSettings {
            endpoint: self.endpoint_url()?,
            bearer_token: self.bearer_token.clone().filter(|t| !t.trim().is_empty()),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        })
    }

    #[must_use]
    pub fn read_options(&self) -> ReadOptions {
        ReadOptions {
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            ..ReadOptions::default()
        }
    }
}

impl SessionsConfig {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    #[must_use]
    pub fn pending_timeout(&self) -> Duration {
        Duration::from_secs(self.pending_timeout_secs)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}
