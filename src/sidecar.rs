//! Worker process supervision.
//!
//! A session can spawn the sidecar worker itself instead of connecting to
//! one that is already running. The supervisor launches the binary and a
//! monitor task watches for exit; an unexpected exit cancels the owning
//! session. Stopping goes graceful-first: stop signal, bounded wait,
//! force-kill, bounded wait; nothing in that sequence can fail the caller.
//!
//! Launching and signaling sit behind [`ProcessControl`] so tests can
//! drive exits without real processes; the default backend shells out to
//! `tokio::process`.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::ExitStatus;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::RtmlinkError;

/// File name of the worker binary, resolved under the configured path.
pub const WORKER_BINARY: &str = "rtmlink-worker";

/// Wait for a clean exit after the graceful stop signal.
const GRACEFUL_EXIT_WAIT: Duration = Duration::from_secs(1);

/// Wait after force-kill before giving up on the process.
const KILL_EXIT_WAIT: Duration = Duration::from_secs(5);

/// Outer bound on the whole stop sequence.
const STOP_DEADLINE: Duration = Duration::from_secs(7);

/// One launched worker process.
pub trait WorkerProcess: Send + 'static {
    /// Resolve when the process exits.
    fn wait(&mut self) -> Pin<Box<dyn Future<Output = std::io::Result<ExitStatus>> + Send + '_>>;

    /// Ask the process to shut down cleanly.
    fn signal_stop(&mut self) -> std::io::Result<()>;

    /// Terminate the process without asking.
    fn force_kill(&mut self) -> Pin<Box<dyn Future<Output = std::io::Result<()>> + Send + '_>>;
}

/// Launch capability for worker processes.
pub trait ProcessControl: Send + Sync + 'static {
    /// Start the worker binary with the given arguments.
    fn launch(&self, program: &Path, args: &[String]) -> std::io::Result<Box<dyn WorkerProcess>>;
}

/// Real processes via `tokio::process`.
pub struct TokioProcessControl;

impl ProcessControl for TokioProcessControl {
    fn launch(&self, program: &Path, args: &[String]) -> std::io::Result<Box<dyn WorkerProcess>> {
        let child = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .spawn()?;
        tracing::info!(program = %program.display(), pid = ?child.id(), "worker spawned");
        Ok(Box::new(TokioWorker { child }))
    }
}

struct TokioWorker {
    child: Child,
}

impl WorkerProcess for TokioWorker {
    fn wait(&mut self) -> Pin<Box<dyn Future<Output = std::io::Result<ExitStatus>> + Send + '_>> {
        Box::pin(self.child.wait())
    }

    #[cfg(unix)]
    fn signal_stop(&mut self) -> std::io::Result<()> {
        let Some(pid) = self.child.id() else {
            // Already reaped.
            return Ok(());
        };
        // SAFETY: plain signal send to a child pid this handle owns.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    #[cfg(not(unix))]
    fn signal_stop(&mut self) -> std::io::Result<()> {
        // No portable graceful signal; go straight to kill.
        self.child.start_kill()
    }

    fn force_kill(&mut self) -> Pin<Box<dyn Future<Output = std::io::Result<()>> + Send + '_>> {
        Box::pin(self.child.kill())
    }
}

struct StopRequest {
    done: oneshot::Sender<()>,
}

/// Supervisor for one worker process.
pub struct Sidecar {
    program: PathBuf,
    args: Vec<String>,
    cancel: CancellationToken,
    control: Box<dyn ProcessControl>,
    stop_tx: Mutex<Option<mpsc::Sender<StopRequest>>>,
    stop_rx: Mutex<Option<mpsc::Receiver<StopRequest>>>,
}

impl Sidecar {
    /// Supervisor for a worker launched from `path` and told to listen on
    /// `port`. `session` is cancelled if the worker dies unexpectedly.
    pub fn new(path: &Path, port: u16, session: CancellationToken) -> Self {
        Self::with_control(path, port, session, Box::new(TokioProcessControl))
    }

    /// Same as [`new`](Sidecar::new) with a custom process backend.
    pub fn with_control(
        path: &Path,
        port: u16,
        session: CancellationToken,
        control: Box<dyn ProcessControl>,
    ) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        Self {
            program: path.join(WORKER_BINARY),
            args: vec![format!("--port={port}"), "--mode=1".to_string()],
            cancel: session,
            control,
            stop_tx: Mutex::new(Some(stop_tx)),
            stop_rx: Mutex::new(Some(stop_rx)),
        }
    }

    /// Launch the worker and its monitor task.
    ///
    /// The returned stream reports the terminal outcome: an error value
    /// for an unexpected exit (after cancelling the session), or a plain
    /// close for a clean one. Launch failures come back the same way.
    pub fn start(&self) -> mpsc::Receiver<RtmlinkError> {
        let (err_tx, err_rx) = mpsc::channel(1);
        let Some(stop_rx) = self.stop_rx.lock().take() else {
            tracing::debug!("worker already started");
            return err_rx;
        };

        match self.control.launch(&self.program, &self.args) {
            Ok(process) => {
                tokio::spawn(monitor(process, err_tx, self.cancel.clone(), stop_rx));
            }
            Err(error) => {
                tracing::error!(%error, program = %self.program.display(), "failed to launch worker");
                self.cancel.cancel();
                let _ = err_tx.try_send(RtmlinkError::Io(error));
            }
        }
        err_rx
    }

    /// Bring the worker down: graceful signal first, force-kill if that
    /// is ignored. Returns once the worker is gone or the bounded waits
    /// expire; never fails the caller.
    pub async fn stop(&self) {
        let Some(stop_tx) = self.stop_tx.lock().take() else {
            return;
        };
        let (done_tx, done_rx) = oneshot::channel();
        if stop_tx.send(StopRequest { done: done_tx }).await.is_err() {
            // Monitor already finished; the process is gone.
            return;
        }
        if tokio::time::timeout(STOP_DEADLINE, done_rx).await.is_err() {
            tracing::warn!("worker stop did not finish in time");
        }
    }
}

/// Monitor task: wait for the process to exit, or run the stop sequence
/// when asked.
async fn monitor(
    mut process: Box<dyn WorkerProcess>,
    err_tx: mpsc::Sender<RtmlinkError>,
    cancel: CancellationToken,
    mut stop_rx: mpsc::Receiver<StopRequest>,
) {
    tokio::select! {
        exited = process.wait() => match exited {
            Ok(status) if status.success() => {
                tracing::info!("worker exited cleanly");
            }
            Ok(status) => {
                tracing::error!(%status, "worker exited unexpectedly");
                cancel.cancel();
                let _ = err_tx.send(RtmlinkError::WorkerExit(status)).await;
            }
            Err(error) => {
                tracing::error!(%error, "waiting on worker failed");
                cancel.cancel();
                let _ = err_tx.send(RtmlinkError::Io(error)).await;
            }
        },
        request = stop_rx.recv() => {
            // A dropped supervisor lands here too and still brings the
            // process down.
            shutdown(process.as_mut()).await;
            if let Some(request) = request {
                let _ = request.done.send(());
            }
        }
    }
}

/// Stop sequence: graceful signal, bounded wait, then force-kill with its
/// own bounded wait. Failures are logged and swallowed.
async fn shutdown(process: &mut dyn WorkerProcess) {
    match process.signal_stop() {
        Ok(()) => {
            if tokio::time::timeout(GRACEFUL_EXIT_WAIT, process.wait())
                .await
                .is_ok()
            {
                tracing::info!("worker exited after stop signal");
                return;
            }
            tracing::warn!("worker ignored stop signal, killing");
        }
        Err(error) => {
            tracing::warn!(%error, "stop signal failed, killing");
        }
    }

    if let Err(error) = process.force_kill().await {
        tracing::error!(%error, "force kill failed");
        return;
    }
    if tokio::time::timeout(KILL_EXIT_WAIT, process.wait()).await.is_err() {
        tracing::error!("worker still running after kill");
    }
}
