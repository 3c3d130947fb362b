//! Cancellation watcher.
//!
//! Races process interrupt/termination signals against the run's root
//! token. Either outcome cancels the token and asks the loop to quit.

use std::io;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::messages::{Cmd, Msg};

/// Watch for SIGINT/SIGTERM or cancellation of `token`
pub fn wait_for_cancellation(token: CancellationToken) -> Cmd {
    Cmd::task(async move {
        tokio::select! {
            signal = shutdown_signal() => {
                info!(signal, "Shutdown signal received");
                token.cancel();
            }
            _ = token.cancelled() => {
                debug!("Run cancelled");
            }
        }
        Some(Msg::Quit)
    })
}

/// Resolves with the signal name; never resolves if listening failed
async fn shutdown_signal() -> &'static str {
    match listen().await {
        Ok(name) => name,
        Err(e) => {
            warn!(error = %e, "Failed to listen for shutdown signals");
            std::future::pending().await
        }
    }
}

#[cfg(unix)]
async fn listen() -> io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = interrupt.recv() => Ok("SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn listen() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}
