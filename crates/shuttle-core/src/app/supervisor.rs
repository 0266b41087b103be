//! Supervisor - keeps one dispatch loop alive until shutdown.
//!
//! The loop runs in its own task. A transport failure or a panic inside it is
//! logged, counted as a restart, and followed by a fresh run after
//! `restart_delay`. Only a shutdown request ends supervision.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::dispatch_loop::{DispatchLoop, LoopState};
use crate::config::DispatchConfig;

#[derive(Debug, Clone, Copy)]
pub struct SupervisorSettings {
    pub restart_delay: Duration,
    /// 1 runs the loop serially.
    pub concurrency: usize,
}

impl From<&DispatchConfig> for SupervisorSettings {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            restart_delay: config.restart_delay(),
            concurrency: config.concurrency,
        }
    }
}

/// Handle to a supervised dispatch loop.
/// - dropping the handle also stops the loop (the shutdown sender goes away)
/// - `shutdown_and_join()` waits for the in-flight request to finish
pub struct Supervisor {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
    state: watch::Receiver<LoopState>,
}

impl Supervisor {
    pub fn spawn(dispatch: Arc<DispatchLoop>, settings: SupervisorSettings) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = dispatch.state();
        let join = tokio::spawn(supervise(dispatch, settings, shutdown_rx));
        Self {
            shutdown_tx,
            join,
            state,
        }
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Watch state transitions, e.g. to wait for `Stopped`.
    pub fn subscribe(&self) -> watch::Receiver<LoopState> {
        self.state.clone()
    }

    /// Stop taking new requests. In-flight dispatch is not interrupted.
    /// (処理中のリクエストは最後まで走り、その応答も publish される)
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(err) = self.join.await {
            error!(error = %err, "supervisor task ended abnormally");
        }
    }
}

async fn supervise(
    dispatch: Arc<DispatchLoop>,
    settings: SupervisorSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let run = {
            let dispatch = Arc::clone(&dispatch);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                if settings.concurrency > 1 {
                    dispatch.run_concurrent(shutdown, settings.concurrency).await
                } else {
                    dispatch.run(shutdown).await
                }
            })
        };

        match run.await {
            Ok(Ok(())) => break,
            Ok(Err(err)) => error!(error = %err, "dispatch loop failed"),
            Err(err) if err.is_panic() => error!(error = %err, "dispatch loop panicked"),
            Err(err) => {
                error!(error = %err, "dispatch loop was cancelled");
                break;
            }
        }

        dispatch.set_state(LoopState::Faulted);
        dispatch.stats().record_restart();
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(settings.restart_delay) => {
                info!(delay = ?settings.restart_delay, "restarting dispatch loop");
            }
            // a changed value or a dropped sender both mean stop
            _ = shutdown.changed() => break,
        }
    }
    dispatch.set_state(LoopState::Stopped);
}
