// crates/server/src/config.rs
//! Command-line and environment configuration.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use refactor_jobs_observability::LogFormat;
use refactor_jobs_server_jobs::{CancelPolicy, ManagerConfig, RefactorConfig};

/// Default port for the server.
pub const DEFAULT_PORT: u16 = 47893;

/// Background job server for the contract refactor pipeline.
#[derive(Debug, Clone, Parser)]
#[command(name = "refactor-jobs", version)]
pub struct ServerConfig {
    /// Address to bind.
    #[arg(long, env = "REFACTOR_JOBS_HOST", default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Port to bind. Falls back to `PORT`, then 47893.
    #[arg(long, env = "REFACTOR_JOBS_PORT")]
    pub port: Option<u16>,

    /// Jobs executing at the same time; the rest queue.
    #[arg(long, env = "REFACTOR_JOBS_WORKERS", default_value_t = 4,
          value_parser = clap::value_parser!(u16).range(1..))]
    pub workers: u16,

    /// Poll cadence of job update streams, in milliseconds.
    #[arg(long, env = "REFACTOR_JOBS_POLL_MS", default_value_t = 1000,
          value_parser = clap::value_parser!(u64).range(10..))]
    pub poll_interval_ms: u64,

    /// `last-write-wins` lets a late handler result overwrite a cancelled
    /// job; `sticky` keeps it cancelled.
    #[arg(long, env = "REFACTOR_JOBS_CANCEL_POLICY", default_value = "last-write-wins")]
    pub cancel_policy: CancelPolicy,

    /// Repository the refactor tools run in.
    #[arg(long, env = "REPO_ROOT", default_value = ".")]
    pub repo_root: PathBuf,

    #[arg(long, env = "NODE_BIN", default_value = "node")]
    pub node_bin: String,

    #[arg(long, env = "NPX_BIN", default_value = "npx")]
    pub npx_bin: String,

    /// Console log format: `compact` or `json`.
    #[arg(long, env = "REFACTOR_JOBS_LOG_FORMAT", default_value = "compact")]
    pub log_format: LogFormat,

    /// Also write daily-rolling JSON logs into this directory.
    #[arg(long, env = "REFACTOR_JOBS_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

impl ServerConfig {
    /// `--port`, else `PORT`, else [`DEFAULT_PORT`].
    pub fn port(&self) -> u16 {
        self.port
            .or_else(|| std::env::var("PORT").ok().and_then(|p| p.parse().ok()))
            .unwrap_or(DEFAULT_PORT)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port())
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            pool_size: usize::from(self.workers),
            cancel_policy: self.cancel_policy,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    /// Tool locations for the refactor handler. The repo root is made
    /// absolute when it exists.
    pub fn refactor_config(&self) -> RefactorConfig {
        let repo_root = std::fs::canonicalize(&self.repo_root).unwrap_or_else(|e| {
            tracing::warn!(
                repo_root = %self.repo_root.display(),
                error = %e,
                "Repo root could not be resolved; using it as given"
            );
            self.repo_root.clone()
        });
        RefactorConfig {
            repo_root,
            node_bin: self.node_bin.clone(),
            npx_bin: self.npx_bin.clone(),
            ..Default::default()
        }
    }
}
