//! Turning Ctrl-C or a `kill` of the controlling process into an orderly end
//! of the batch.
//!
//! Pass the token to
//! [`BatchOrchestrator::run_with_shutdown`](crate::BatchOrchestrator::run_with_shutdown).
//! Once it fires, jobs still queued or running on the cluster are cancelled
//! with the scheduler, their reports are collected, and the results of jobs
//! that already finished are returned as usual. The working directory is left
//! clean either way.

use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Spawn a task that cancels the returned token on the first SIGINT or
/// SIGTERM. Must be called from within a tokio runtime.
pub fn install_interrupt_handler() -> CancellationToken {
    let interrupted = CancellationToken::new();
    let trigger = interrupted.clone();

    tokio::spawn(async move {
        let (mut terminate, mut interrupt) = match listen() {
            Ok(signals) => signals,
            Err(e) => {
                tracing::error!(error = %e, "Cannot listen for interrupts, batch will not be cancellable");
                return;
            }
        };

        let name = tokio::select! {
            _ = terminate.recv() => "SIGTERM",
            _ = interrupt.recv() => "SIGINT",
        };
        tracing::warn!(signal = name, "Interrupted, cancelling jobs still on the cluster");
        trigger.cancel();
    });

    interrupted
}

fn listen() -> std::io::Result<(Signal, Signal)> {
    Ok((
        signal(SignalKind::terminate())?,
        signal(SignalKind::interrupt())?,
    ))
}
