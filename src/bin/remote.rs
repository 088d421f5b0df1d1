//! Remote binary: the target-facing end of the tunnel.
//!
//! Serves one listener per configured password and re-reads the config file
//! on SIGHUP, diffing the port map without disturbing in-flight sessions.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};

use sstunnel::config::{Config, Overrides};
use sstunnel::crypto::TableCache;
use sstunnel::remote::Dispatcher;

/// Cache file sitting next to the working directory, as configured.
const TABLE_CACHE_FILE: &str = "table.cache";

#[derive(Parser)]
#[command(name = "ssremote", about = "Remote end of the table-cipher tunnel")]
struct Args {
    /// Path to the JSON config file
    #[arg(short = 'c', long = "config", default_value = "config.json")]
    config: PathBuf,

    /// Listening port (single-tenant case)
    #[arg(short = 'p', long)]
    server_port: Option<u16>,

    /// Password
    #[arg(short = 'k', long)]
    password: Option<String>,

    /// Idle timeout in seconds, 0 to disable
    #[arg(short = 't', long)]
    timeout: Option<u64>,

    /// Print debug messages
    #[arg(short = 'd', long)]
    debug: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            server: None,
            server_port: self.server_port,
            local_port: None,
            password: self.password.clone(),
            timeout: self.timeout,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    let mut cfg = load_config(&args.config)?;
    cfg.apply(args.overrides());
    let ports = cfg.port_map()?;

    let cache = cfg
        .cache_enctable
        .then(|| TableCache::open(TABLE_CACHE_FILE));
    let dispatcher = Arc::new(Dispatcher::new(cfg.idle_timeout(), cache));
    dispatcher.start(&ports).await?;

    reload_on_hangup(dispatcher, &args).await
}

/// Block on SIGHUP and apply the re-read config each time.
///
/// Command-line overrides keep winning across reloads; a config file that no
/// longer parses keeps the running port map untouched.
async fn reload_on_hangup(dispatcher: Arc<Dispatcher>, args: &Args) -> anyhow::Result<()> {
    let mut hangup = signal(SignalKind::hangup())?;
    while hangup.recv().await.is_some() {
        tracing::info!("SIGHUP received, reloading {}", args.config.display());
        let ports = load_config(&args.config).and_then(|mut cfg| {
            cfg.apply(args.overrides());
            Ok(cfg.port_map()?)
        });
        match ports {
            Ok(ports) => dispatcher.reload(&ports).await,
            Err(e) => tracing::error!("reload failed, keeping current config: {}", e),
        }
    }
    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        Ok(Config::load(path)?)
    } else {
        tracing::info!(
            "config file {} not found, using command line options",
            path.display()
        );
        Ok(Config::default())
    }
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_target(false)
        .init();
}
