//! Application lifecycle
//!
//! Owns everything that lives for the duration of the process: the status
//! console, the shutdown token and the monitoring thread. The console side
//! talks to the monitoring thread only through [`ControlHandle`].

use anyhow::Context;
use std::future::Future;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::coordinator::{Control, Coordinator};
use crate::link::{LinkInvalidator, LinkSettings, PeripheralLink, Transport};
use crate::notify::ConsoleSink;
use crate::sensor::SensorPoll;

const COORDINATOR_THREAD: &str = "micled-coordinator";
const CONSOLE_THREAD: &str = "micled-console";

/// Console commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Reconnect,
    Status,
    Show,
    Hide,
    Help,
    Quit,
}

impl Command {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "reconnect" | "r" => Some(Self::Reconnect),
            "status" | "s" => Some(Self::Status),
            "show" => Some(Self::Show),
            "hide" => Some(Self::Hide),
            "help" | "h" | "?" => Some(Self::Help),
            "quit" | "exit" | "q" => Some(Self::Quit),
            _ => None,
        }
    }
}

const HELP: &str = "Commands: reconnect, status, show, hide, help, quit";

/// Whether the console loop should keep reading commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Sends user requests to the monitoring loop
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::UnboundedSender<Control>,
    invalidator: LinkInvalidator,
}

impl ControlHandle {
    /// Void any running attempt now; the loop resets the link on its next
    /// iteration
    ///
    /// Returns false if the monitoring loop has already exited.
    pub fn force_reconnect(&self) -> bool {
        self.invalidator.invalidate();
        self.tx.send(Control::ForceReconnect).is_ok()
    }
}

/// Read stdin on a detached thread and forward each line
///
/// The thread is never joined; a read blocked on the terminal cannot hold up
/// process exit.
pub fn spawn_stdin_reader() -> anyhow::Result<mpsc::UnboundedReceiver<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name(CONSOLE_THREAD.to_string())
        .spawn(move || {
            for line in std::io::stdin().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Console input failed: {}", e);
                        break;
                    }
                }
            }
        })
        .context("Failed to spawn console thread")?;
    Ok(rx)
}

pub struct App {
    sink: Arc<ConsoleSink>,
    cancel: CancellationToken,
    control: ControlHandle,
    worker: Option<JoinHandle<()>>,
}

impl App {
    /// Build the link and start the monitoring loop on its own thread and
    /// runtime
    pub fn start<T, S>(config: Config, transport: T, sensor: S) -> anyhow::Result<Self>
    where
        T: Transport,
        S: SensorPoll + 'static,
    {
        let settings =
            LinkSettings::from_config(&config.peripheral).context("Invalid peripheral settings")?;
        let sink = Arc::new(ConsoleSink::new(
            config.console.max_log_lines,
            config.console.show_on_start,
        ));
        let cancel = CancellationToken::new();
        let link = Arc::new(PeripheralLink::new(transport, settings, cancel.clone()));
        let (tx, rx) = mpsc::unbounded_channel();
        let control = ControlHandle {
            tx,
            invalidator: link.invalidator(),
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to build monitoring runtime")?;
        let coordinator = Coordinator::new(link, sensor, sink.clone(), rx, &config.monitor);
        let worker_cancel = cancel.clone();
        let worker = std::thread::Builder::new()
            .name(COORDINATOR_THREAD.to_string())
            .spawn(move || runtime.block_on(coordinator.run(worker_cancel)))
            .context("Failed to spawn monitoring thread")?;

        tracing::info!(
            "Looking for '{}' (characteristic {})",
            config.peripheral.advertised_name,
            config.peripheral.characteristic_uuid
        );

        Ok(Self {
            sink,
            cancel,
            control,
            worker: Some(worker),
        })
    }

    pub fn sink(&self) -> &Arc<ConsoleSink> {
        &self.sink
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Apply one line typed at the console
    pub fn handle_input(&self, input: &str) -> Flow {
        if input.trim().is_empty() {
            return Flow::Continue;
        }
        let Some(command) = Command::parse(input) else {
            println!("Unknown command '{}'. {}", input.trim(), HELP);
            return Flow::Continue;
        };

        match command {
            Command::Reconnect => {
                if self.control.force_reconnect() {
                    println!("Reconnect requested");
                } else {
                    println!("Monitoring is not running");
                }
            }
            Command::Status => println!("{}", self.sink.summary()),
            Command::Show => self.sink.show(),
            Command::Hide => self.sink.hide(),
            Command::Help => println!("{}", HELP),
            Command::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    /// Apply console lines until `quit` is typed or `interrupt` completes
    ///
    /// Once the input closes, only `interrupt` ends the loop.
    pub async fn drive_console(
        &self,
        mut lines: mpsc::UnboundedReceiver<String>,
        interrupt: impl Future<Output = ()>,
    ) {
        tokio::pin!(interrupt);
        let mut input_open = true;

        loop {
            tokio::select! {
                _ = &mut interrupt => {
                    tracing::info!("Interrupted");
                    break;
                }
                line = lines.recv(), if input_open => match line {
                    Some(line) => {
                        if self.handle_input(&line) == Flow::Quit {
                            break;
                        }
                    }
                    None => {
                        tracing::debug!("Console input closed");
                        input_open = false;
                    }
                },
            }
        }
    }

    /// Stop the monitoring loop and wait for it to release the peripheral
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Monitoring thread panicked");
            }
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.stop();
    }
}
