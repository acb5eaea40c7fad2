//! Worker Supervisor
//!
//! Runs the long-lived loops under one lifecycle. The first loop that fails
//! trips the critical handler, which cancels the shared token so every other
//! loop exits at its next tick. Lifecycle: `Running -> Stopping -> Stopped`.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::WalletError;

/// A loop body: receives the shared cancellation token and runs until it
/// fires or the loop fails
pub type LoopFn =
    Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<(), WalletError>> + Send>;

pub struct NamedLoop {
    pub name: String,
    pub run: LoopFn,
}

impl NamedLoop {
    pub fn new<F, Fut>(name: &str, f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), WalletError>> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            run: Box::new(move |cancel| Box::pin(f(cancel))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Running,
    Stopping,
    Stopped,
}

/// Records the first fatal error and cancels everything
#[derive(Debug)]
struct CriticalHandler {
    fired: AtomicBool,
    first: Mutex<Option<String>>,
    cancel: CancellationToken,
}

impl CriticalHandler {
    fn fire(&self, worker: &str, err: &WalletError) {
        if self.fired.swap(true, Ordering::SeqCst) {
            warn!(worker, error = %err, "Worker failed after shutdown was triggered");
            return;
        }
        error!(worker, error = %err, "CRITICAL: worker failed, shutting down all workers");
        *self.first.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(format!("{}: {}", worker, err));
        self.cancel.cancel();
    }
}

pub struct WorkerSupervisor {
    cancel: CancellationToken,
    state: Mutex<SupervisorState>,
    critical: std::sync::Arc<CriticalHandler>,
    handles: tokio::sync::Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl WorkerSupervisor {
    /// Spawn every loop and enter `Running`
    pub fn start(loops: Vec<NamedLoop>) -> Self {
        Self::start_with_token(CancellationToken::new(), loops)
    }

    pub fn start_with_token(cancel: CancellationToken, loops: Vec<NamedLoop>) -> Self {
        let critical = std::sync::Arc::new(CriticalHandler {
            fired: AtomicBool::new(false),
            first: Mutex::new(None),
            cancel: cancel.clone(),
        });

        let handles = loops
            .into_iter()
            .map(|NamedLoop { name, run }| {
                let critical = critical.clone();
                let token = cancel.clone();
                let worker = name.clone();
                let handle = tokio::spawn(async move {
                    if let Err(e) = run(token).await {
                        critical.fire(&worker, &e);
                    }
                });
                (name, handle)
            })
            .collect::<Vec<_>>();

        info!(workers = handles.len(), "Worker supervisor started");

        Self {
            cancel,
            state: Mutex::new(SupervisorState::Running),
            critical,
            handles: tokio::sync::Mutex::new(handles),
        }
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// First fatal error, if the critical handler has fired
    pub fn critical_error(&self) -> Option<String> {
        self.critical
            .first
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Resolves once shutdown has been requested, by `stop` or by a
    /// critical error
    pub async fn wait(&self) {
        self.cancel.cancelled().await;
    }

    /// Cancel all loops and block until each has exited
    pub async fn stop(&self) -> Result<(), WalletError> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state != SupervisorState::Running {
                return Ok(());
            }
            *state = SupervisorState::Stopping;
        }

        info!("Stopping workers...");
        self.cancel.cancel();

        let mut failures = Vec::new();
        let handles = std::mem::take(&mut *self.handles.lock().await);
        for (name, handle) in handles {
            if let Err(e) = handle.await {
                error!(worker = %name, error = %e, "Worker task aborted");
                failures.push(format!("{}: {}", name, e));
            }
        }
        if let Some(first) = self.critical_error() {
            failures.insert(0, first);
        }

        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = SupervisorState::Stopped;
        info!("All workers stopped");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(WalletError::WorkersFailed(failures))
        }
    }
}

/// Drive `cycle` every `period` until `cancel` fires. Cancellation is
/// observed between ticks only, so an in-flight cycle always completes.
pub async fn run_periodic<F, Fut>(
    name: &str,
    period: Duration,
    cancel: CancellationToken,
    mut cycle: F,
) -> Result<(), WalletError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), WalletError>>,
{
    info!(worker = name, period_ms = period.as_millis() as u64, "Starting worker");

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match cycle().await {
            Ok(()) => {}
            Err(WalletError::Cancelled) if cancel.is_cancelled() => break,
            Err(e) => return Err(e),
        }
    }

    info!(worker = name, "Worker stopped");
    Ok(())
}
