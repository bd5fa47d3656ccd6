//! Process shutdown state machine.
//!
//! ```text
//! Running ──signal──▶ Stopping ──finish──▶ Stopped
//! ```
//!
//! Only the first signal requests a stop. Later signals are logged and
//! otherwise ignored.

use std::fmt;
use std::sync::{Arc, Mutex};

use cdc_log_kafka_source::StopHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Interrupt => write!(f, "SIGINT"),
            Signal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

type StopCallback = Box<dyn Fn() + Send + Sync>;

pub struct ShutdownCoordinator {
    state: Mutex<ShutdownState>,
    on_stop: StopCallback,
}

impl ShutdownCoordinator {
    pub fn new(on_stop: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            state: Mutex::new(ShutdownState::Running),
            on_stop: Box::new(on_stop),
        }
    }

    /// Coordinator that stops a consumer through its stop handle.
    pub fn for_stop_handle(stop: StopHandle) -> Self {
        Self::new(move || stop.stop())
    }

    pub fn state(&self) -> ShutdownState {
        *self.lock()
    }

    /// Handle a termination signal.
    ///
    /// Returns true if this signal initiated the stop.
    pub fn on_signal(&self, signal: Signal) -> bool {
        {
            let mut state = self.lock();
            match *state {
                ShutdownState::Running => *state = ShutdownState::Stopping,
                ShutdownState::Stopping => {
                    warn!("Received {signal} while already stopping, ignoring");
                    return false;
                }
                ShutdownState::Stopped => {
                    debug!("Received {signal} after shutdown, ignoring");
                    return false;
                }
            }
        }

        info!("Received {signal}, stopping consumer");
        (self.on_stop)();
        true
    }

    /// Mark the consumer as exited.
    pub fn finish(&self) {
        *self.lock() = ShutdownState::Stopped;
    }

    /// Forward SIGINT and SIGTERM to [`Self::on_signal`] until the process exits.
    pub async fn watch_signals(self: Arc<Self>) {
        if let Err(e) = self.listen().await {
            error!("Failed to install signal handlers: {e}");
        }
    }

    #[cfg(unix)]
    async fn listen(&self) -> std::io::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        loop {
            let received = tokio::select! {
                _ = interrupt.recv() => Signal::Interrupt,
                _ = terminate.recv() => Signal::Terminate,
            };
            self.on_signal(received);
        }
    }

    #[cfg(not(unix))]
    async fn listen(&self) -> std::io::Result<()> {
        loop {
            tokio::signal::ctrl_c().await?;
            self.on_signal(Signal::Interrupt);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ShutdownState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
