//! Server configuration: TOML file, environment, CLI flags.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

/// Command-line flags. Anything set here overrides the config file.
#[derive(Debug, Parser)]
#[command(name = "kura-server", about = "Tenant-scoped VFS data platform")]
pub struct Cli {
    /// Path to a TOML config file.
    #[arg(long, env = "KURA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Bind address, e.g. 127.0.0.1:8080.
    #[arg(long, env = "KURA_BIND")]
    pub bind: Option<String>,

    /// Directory holding the platform and tenant databases.
    #[arg(long, env = "KURA_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Include original error messages in 500 responses.
    #[arg(long)]
    pub dev: bool,
}

/// A host directory bound into every request's VFS.
#[derive(Debug, Clone, Deserialize)]
pub struct MountConfig {
    /// VFS path, e.g. `/mnt/docs`.
    pub path: String,
    /// Host directory.
    pub source: PathBuf,
    #[serde(default)]
    pub writable: bool,
}

/// Everything the server recognizes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: String,
    pub data_dir: PathBuf,
    pub pool_size: usize,
    /// Allow `?stream=true` listings to hold their connection open.
    pub streaming_enabled: bool,
    /// Request body cap in bytes, enforced by the HTTP layer.
    pub max_request_body: usize,
    /// Schema snapshot lifetime in seconds.
    pub schema_cache_ttl: u64,
    /// Include original error messages in 500 responses.
    pub dev_mode: bool,
    /// Session-scoped host directory mounts.
    pub mounts: Vec<MountConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            data_dir: PathBuf::from("./data"),
            pool_size: 8,
            streaming_enabled: true,
            max_request_body: 1024 * 1024,
            schema_cache_ttl: 30,
            dev_mode: false,
            mounts: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load from the file named by the CLI (if any), then apply flag
    /// overrides.
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = match &cli.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                toml::from_str(&text)?
            }
            None => Self::default(),
        };
        if let Some(bind) = &cli.bind {
            config.bind = bind.clone();
        }
        if let Some(data_dir) = &cli.data_dir {
            config.data_dir = data_dir.clone();
        }
        if cli.dev {
            config.dev_mode = true;
        }
        Ok(config)
    }

    pub fn schema_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.schema_cache_ttl)
    }
}
