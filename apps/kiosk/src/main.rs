use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use kiosk_core::{HttpLockerClient, ScreenMachine, SessionController};
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod terminal;

use config::{load_settings, KioskSettings};
use terminal::Kiosk;

#[derive(Parser, Debug)]
#[command(about = "Terminal front end for a package locker kiosk")]
struct Args {
    /// TOML settings file; defaults to ./kiosk.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    service_url: Option<String>,
    #[arg(long)]
    locker_id: Option<i64>,
    #[arg(long)]
    closet_id: Option<i64>,
    #[arg(long)]
    dwell_ms: Option<u64>,
    /// tracing filter, e.g. `debug` or `kiosk_core=debug`. Overrides RUST_LOG.
    #[arg(long)]
    log_level: Option<String>,
    #[arg(long)]
    skip_health_check: bool,
}

impl Args {
    fn apply(&self, settings: &mut KioskSettings) {
        if let Some(v) = &self.service_url {
            settings.service_url = v.clone();
        }
        if let Some(v) = self.locker_id {
            settings.locker_id = v;
        }
        if let Some(v) = self.closet_id {
            settings.closet_id = v;
        }
        if let Some(v) = self.dwell_ms {
            settings.dwell_ms = v;
        }
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    // stdout belongs to the kiosk screen.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref());

    let mut settings = load_settings(args.config.as_deref())?;
    args.apply(&mut settings);
    info!(
        service_url = %settings.service_url,
        locker_id = settings.locker_id,
        closet_id = settings.closet_id,
        dwell_ms = settings.dwell_ms,
        "starting locker kiosk"
    );

    let client = HttpLockerClient::with_options(&settings.service_url, settings.client_options())?;
    if !args.skip_health_check {
        match client.health().await {
            Ok(health) => info!(status = %health.status, "locker service reachable"),
            Err(err) => warn!(error = %err, "locker service health check failed"),
        }
    }

    let controller = SessionController::new(Arc::new(client), settings.controller_config());
    let mut kiosk = Kiosk::new(
        controller,
        ScreenMachine::new(settings.screen_text()),
        settings.keypad_max_len,
        std::io::stdout(),
    );
    kiosk.run(BufReader::new(tokio::io::stdin())).await
}
