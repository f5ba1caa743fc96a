use chrono::Local;
use clap::Parser;
use instagrab::config::{Args, Config, LogLevel};
use instagrab::{info_time, process::process_site, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let start_time = Local::now();
    let config = Config::from(Args::parse());
    init_tracing(config.log_level);

    process_site(config).await?;
    info_time!(start_time, "Full program time:");

    Ok(())
}

/// `RUST_LOG` wins over `--log-level` when set.
fn init_tracing(level: LogLevel) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}
