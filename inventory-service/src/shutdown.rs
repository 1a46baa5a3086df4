//! Process shutdown plumbing shared by the binary's tasks.

use std::future::Future;
use std::io;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Cancels `token` once `signal` fires. A signal listener that fails to
/// install is logged and leaves the token alone.
pub async fn cancel_on_signal<F>(signal: F, token: CancellationToken)
where
    F: Future<Output = io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            info!("Shutdown signal received");
            token.cancel();
        }
        Err(e) => error!("Unable to listen for shutdown signal: {}", e),
    }
}

/// Waits for every background task, logging the ones that panicked or were
/// aborted. Returns how many did.
pub async fn join_background(tasks: Vec<(&'static str, JoinHandle<()>)>) -> usize {
    let mut failed = 0;
    for (name, task) in tasks {
        if let Err(e) = task.await {
            error!(task = name, "Background task failed: {}", e);
            failed += 1;
        }
    }
    failed
}
