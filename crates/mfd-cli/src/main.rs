//! `x52-mfd` entry point.
//!
//! Opens the X52 Pro display, installs the configured pages, prints the device
//! type and keeps a `Loop: N` ticker running until Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()          -- TOML file or defaults
//!  └─ open_driver()          -- DirectOutput.dll, or the simulated device
//!  └─ DisplayController::open()
//!  └─ start tasks
//!       ├─ run_ticker        (Tokio task)
//!       ├─ cycle_pages       (Tokio task, simulated device only)
//!       └─ fatal forwarder   (std thread, blocks on the fatal channel)
//! ```
//!
//! A fatal device error (the driver refused to deliver page events for a
//! newly attached device) closes the device and exits with an error.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use mfd_cli::application::run_display::{install_pages, run_ticker};
use mfd_cli::application::simulate_device::{cycle_pages, simulated_driver, PAGE_CYCLE_PERIOD};
use mfd_cli::infrastructure::storage::config::{load_config, AppConfig};
use mfd_core::driver::mock::MockDriver;
use mfd_core::{DisplayController, DriverBinding, FatalError};

/// Drives the Saitek/Logitech X52 Pro multi-function display.
#[derive(Debug, Parser)]
#[command(name = "x52-mfd", version, about)]
struct Args {
    /// Configuration file.  Defaults to the platform config directory.
    #[arg(long, env = "X52_MFD_CONFIG")]
    config: Option<PathBuf>,

    /// Use the simulated device instead of DirectOutput.dll.
    #[arg(long)]
    simulate: bool,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref()).context("failed to load configuration")?;

    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    let level = args.log_level.as_deref().unwrap_or(&config.app.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    info!("x52-mfd starting");

    let simulate = args.simulate || config.driver.simulate || cfg!(not(target_os = "windows"));
    let (driver, simulator) = open_driver(&config, simulate)?;
    let mfd = Arc::new(
        DisplayController::open(driver, &config.app.name).context("failed to open the X52 Pro display")?,
    );

    // ── Fatal channel ─────────────────────────────────────────────────────────
    let fatal = forward_fatal(&mfd);

    // ── Pages ─────────────────────────────────────────────────────────────────
    install_pages(&mfd, &config.pages).context("failed to set up pages")?;
    println!("Type {}", mfd.device_type());

    // ── Background tasks ──────────────────────────────────────────────────────
    let mut tasks = Vec::new();
    if config.ticker.enabled {
        tasks.push(tokio::spawn(run_ticker(Arc::clone(&mfd), config.ticker.clone())));
    }
    if let Some(driver) = simulator {
        tasks.push(tokio::spawn(cycle_pages(driver, PAGE_CYCLE_PERIOD)));
    }

    // ── Ctrl-C / fatal error ──────────────────────────────────────────────────
    println!("Blocking, press ctrl+c to continue...");
    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            signal.context("failed to listen for ctrl-c")
        }
        Ok(err) = fatal => {
            error!(error = %err, status = %err.status(), "fatal device error");
            Err(anyhow!(err))
        }
    };

    for task in tasks {
        task.abort();
        let _ = task.await;
    }
    close(mfd);

    info!("x52-mfd stopped");
    outcome
}

/// Picks the driver: the simulated device, or the vendor library on Windows.
fn open_driver(
    config: &AppConfig,
    simulate: bool,
) -> anyhow::Result<(Arc<dyn DriverBinding>, Option<Arc<MockDriver>>)> {
    if simulate {
        let driver = simulated_driver();
        let binding: Arc<dyn DriverBinding> = driver.clone();
        return Ok((binding, Some(driver)));
    }

    #[cfg(target_os = "windows")]
    {
        use mfd_cli::infrastructure::direct_output::DirectOutputBinding;

        let binding = DirectOutputBinding::load(&config.driver.library)
            .with_context(|| format!("failed to load {}", config.driver.library))?;
        let binding: Arc<dyn DriverBinding> = Arc::new(binding);
        Ok((binding, None))
    }

    #[cfg(not(target_os = "windows"))]
    {
        Err(anyhow!(
            "{} is only available on Windows; use --simulate",
            config.driver.library
        ))
    }
}

/// Moves the blocking fatal-error receiver onto its own thread.
///
/// The thread is detached: it ends with the process or when the channel closes.
fn forward_fatal(mfd: &DisplayController) -> oneshot::Receiver<FatalError> {
    let (tx, rx) = oneshot::channel();
    if let Some(fatal_rx) = mfd.take_fatal_receiver() {
        let spawned = std::thread::Builder::new()
            .name("mfd-fatal".to_string())
            .spawn(move || {
                if let Ok(err) = fatal_rx.recv() {
                    let _ = tx.send(err);
                }
            });
        if let Err(e) = spawned {
            warn!(error = %e, "failed to start fatal-error watcher");
        }
    }
    rx
}

/// Deinitializes the driver once every task has released the controller.
fn close(mfd: Arc<DisplayController>) {
    match Arc::try_unwrap(mfd) {
        Ok(mfd) => {
            if let Err(err) = mfd.close() {
                warn!(error = %err, "failed to close the display");
            }
        }
        // Dropping the last reference closes it.
        Err(mfd) => drop(mfd),
    }
}
