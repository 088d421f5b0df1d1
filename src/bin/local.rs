//! Local binary: the SOCKS5-facing end of the tunnel.
//!
//! Reads the JSON config file, applies command-line overrides, builds the
//! server pool, and serves SOCKS5 clients on the loopback port.

use std::path::{Path, PathBuf};

use clap::Parser;

use sstunnel::config::{Config, Overrides};

#[derive(Parser)]
#[command(name = "sslocal", about = "Local SOCKS5 end of the table-cipher tunnel")]
struct Args {
    /// Path to the JSON config file
    #[arg(short = 'c', long = "config", default_value = "config.json")]
    config: PathBuf,

    /// Remote server address
    #[arg(short = 's', long)]
    server: Option<String>,

    /// Remote server port
    #[arg(short = 'p', long)]
    server_port: Option<u16>,

    /// Local SOCKS5 listening port
    #[arg(short = 'l', long)]
    local_port: Option<u16>,

    /// Password
    #[arg(short = 'k', long)]
    password: Option<String>,

    /// Print debug messages
    #[arg(short = 'd', long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    let mut cfg = load_config(&args.config)?;
    cfg.apply(Overrides {
        server: args.server,
        server_port: args.server_port,
        local_port: args.local_port,
        password: args.password,
        timeout: None,
    });
    cfg.validate_local()?;

    sstunnel::local::run(&cfg).await?;
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
