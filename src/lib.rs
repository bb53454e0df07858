//! micled - mirror microphone activity onto a Bluetooth LE LED
//!
//! Watches whether any application is capturing from a microphone and keeps
//! a small BLE peripheral's LED in sync: on while the microphone is in use,
//! off otherwise. The peripheral is found by its advertised name and driven
//! through a single writable characteristic.

pub mod app;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod link;
pub mod notify;
pub mod retry;
pub mod sensor;

/// Install diagnostics logging: stdout plus `~/.micled/logs/micled.log`
pub fn init_logging() {
    use tracing_subscriber::prelude::*;

    /// Format timestamps using the system's local time via chrono
    struct LocalTimer;
    impl tracing_subscriber::fmt::time::FormatTime for LocalTimer {
        fn format_time(
            &self,
            w: &mut tracing_subscriber::fmt::format::Writer<'_>,
        ) -> std::fmt::Result {
            write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
        }
    }

    let log_dir = config::get_config_dir().join("logs");
    let _ = std::fs::create_dir_all(&log_dir);
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("micled.log"))
        .ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if let Some(file) = log_file {
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::sync::Mutex::new(file))
            .with_timer(LocalTimer)
            .with_ansi(false);
        let stdout_layer = tracing_subscriber::fmt::layer().with_timer(LocalTimer);
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(LocalTimer)
            .init();
    }
}

/// Run the monitor until the user quits or presses Ctrl-C
#[cfg(feature = "bluetooth")]
pub fn run() -> anyhow::Result<()> {
    use anyhow::Context;

    init_logging();
    tracing::info!("micled {} starting", env!("CARGO_PKG_VERSION"));

    let cfg = config::load_config();
    let app = app::App::start(
        cfg,
        link::BtleTransport::new(),
        sensor::MicrophoneSensor::new(),
    )?;

    println!("micled running. Type 'help' for commands.");

    let lines = app::spawn_stdin_reader()?;
    // The console gets its own runtime so a long scan never delays input
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build console runtime")?;

    runtime.block_on(app.drive_console(lines, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }));

    println!("Shutting down...");
    app.shutdown();
    tracing::info!("micled stopped");
    Ok(())
}
