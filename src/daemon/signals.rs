// Unix signal handling for the serve loop

use crate::error::{MeldError, Result};
use tokio::signal::unix::{signal, Signal as TokioSignal, SignalKind};

/// What the serve loop should do about a received signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    Shutdown,
    Reload,
}

/// Listens for SIGTERM, SIGINT (shutdown) and SIGHUP, SIGUSR1 (reload)
pub struct SignalHandler {
    sigterm: TokioSignal,
    sigint: TokioSignal,
    sighup: TokioSignal,
    sigusr1: TokioSignal,
}

fn install(kind: SignalKind, name: &str) -> Result<TokioSignal> {
    signal(kind).map_err(|e| MeldError::Io {
        source: e,
        context: format!("Failed to setup {} handler", name),
    })
}

impl SignalHandler {
    pub fn new() -> Result<Self> {
        Ok(Self {
            sigterm: install(SignalKind::terminate(), "SIGTERM")?,
            sigint: install(SignalKind::interrupt(), "SIGINT")?,
            sighup: install(SignalKind::hangup(), "SIGHUP")?,
            sigusr1: install(SignalKind::user_defined1(), "SIGUSR1")?,
        })
    }

    /// Wait for the next signal
    pub async fn wait(&mut self) -> SignalAction {
        tokio::select! {
            _ = self.sigterm.recv() => {
                tracing::info!("Received SIGTERM");
                SignalAction::Shutdown
            }
            _ = self.sigint.recv() => {
                tracing::info!("Received SIGINT");
                SignalAction::Shutdown
            }
            _ = self.sighup.recv() => {
                tracing::info!("Received SIGHUP");
                SignalAction::Reload
            }
            _ = self.sigusr1.recv() => {
                tracing::info!("Received SIGUSR1");
                SignalAction::Reload
            }
        }
    }
}

/// Wait on `handler`, or forever when there is none
pub async fn next_signal(handler: &mut Option<SignalHandler>) -> SignalAction {
    match handler {
        Some(handler) => handler.wait().await,
        None => std::future::pending().await,
    }
}
