//! Server configuration: environment-sourced `ServiceConfig` plus the CLI
//! overrides a launcher script would pass. Logging setup, packaging, and
//! the launcher script itself are out of scope (spec §1) — this module only
//! owns the values the orchestration subsystem and the HTTP layer need.
//!
//! Grounded on `ferrex-server/src/infra/config.rs`'s `Config::from_env`
//! (env-var-with-fallback style, `ensure_directories`).

use clap::Parser;
use ghoststream_core::ServiceConfig;
use std::env;
use std::net::IpAddr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub service: ServiceConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut service = ServiceConfig::default();
        service.encoder_path = env::var("GHOSTSTREAM_ENCODER_PATH").unwrap_or(service.encoder_path);
        service.probe_path = env::var("GHOSTSTREAM_PROBE_PATH").unwrap_or(service.probe_path);
        service.work_dir = env::var("GHOSTSTREAM_WORK_DIR")
            .map(Into::into)
            .unwrap_or(service.work_dir);
        service.concurrency = parse_env_or("GHOSTSTREAM_CONCURRENCY", service.concurrency);
        service.max_queue_size = parse_env_or("GHOSTSTREAM_MAX_QUEUE_SIZE", service.max_queue_size);
        service.segment_duration_secs =
            parse_env_or("GHOSTSTREAM_SEGMENT_DURATION_SECS", service.segment_duration_secs);
        service.max_retries = parse_env_or("GHOSTSTREAM_MAX_RETRIES", service.max_retries);
        service.retry_delay = duration_env_or("GHOSTSTREAM_RETRY_DELAY", service.retry_delay)?;
        service.stall_deadline_min =
            duration_env_or("GHOSTSTREAM_STALL_DEADLINE_MIN", service.stall_deadline_min)?;
        service.streaming_ttl = duration_env_or("GHOSTSTREAM_STREAMING_TTL", service.streaming_ttl)?;
        service.batch_ttl = duration_env_or("GHOSTSTREAM_BATCH_TTL", service.batch_ttl)?;
        service.cleanup_sweep_interval =
            duration_env_or("GHOSTSTREAM_CLEANUP_SWEEP_INTERVAL", service.cleanup_sweep_interval)?;

        let host = env::var("GHOSTSTREAM_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let host: IpAddr = host.parse().unwrap_or_else(|_| "0.0.0.0".parse().unwrap());
        let port: u16 = parse_env_or("GHOSTSTREAM_PORT", 8765);

        service.base_url = env::var("GHOSTSTREAM_BASE_URL")
            .unwrap_or_else(|_| format!("http://{host}:{port}"));

        Ok(Self { host, port, service })
    }

    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.service.work_dir)?;
        Ok(())
    }

    pub fn apply_cli(&mut self, args: &Args) {
        if let Some(port) = args.port {
            self.port = port;
        }
        if let Some(host) = args.host {
            self.host = host;
        }
        if let Some(concurrency) = args.concurrency {
            self.service.concurrency = concurrency;
        }
        if let Some(work_dir) = &args.work_dir {
            self.service.work_dir = work_dir.clone();
        }
    }
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn duration_env_or(key: &str, default: Duration) -> anyhow::Result<Duration> {
    match env::var(key) {
        Ok(raw) => Ok(humantime::parse_duration(&raw)?),
        Err(_) => Ok(default),
    }
}

/// CLI overrides layered on top of [`Config::from_env`], mirroring the
/// teacher's `--port`/`--host` launcher flags.
#[derive(Debug, Parser)]
#[command(name = "ghoststream-server", about = "GhostStream transcoding service")]
pub struct Args {
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long)]
    pub host: Option<IpAddr>,
    #[arg(long)]
    pub concurrency: Option<usize>,
    #[arg(long, value_name = "DIR")]
    pub work_dir: Option<std::path::PathBuf>,
}
