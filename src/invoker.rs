//! Call entry points and session supervision.
//!
//! The [`Invoker`] is what the layers above hold. It owns a session's
//! connection (and the worker process behind it, when spawned) along with
//! the timer arithmetic around synchronous calls. A supervision task
//! watches the worker's exit stream and the connection's error stream;
//! worker death ends the session, while connection faults are reported
//! and ridden out as the connection redials on its own.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, DEFAULT_REQUEST_TIMEOUT};
use crate::connection::{Connection, EventSink};
use crate::error::{Result, RtmlinkError};
use crate::protocol::{Header, HeaderCodec, Invocable, MessageCodec};
use crate::sidecar::Sidecar;

type EventCallback<E> = Arc<dyn Fn(E) + Send + Sync>;

/// Decodes inbound event headers and fans them out to the registered
/// callback.
struct EventDispatcher<C: MessageCodec> {
    codec: Arc<C>,
    callback: RwLock<Option<EventCallback<C::Event>>>,
}

impl<C: MessageCodec> EventSink for EventDispatcher<C> {
    fn on_event(&self, header: Header) -> Result<()> {
        match self.codec.decode_event(header.operation, &header.payload) {
            Ok(Some(event)) => {
                // Clone the handle out so a callback can re-register
                // without holding the slot's lock.
                let callback = self.callback.read().clone();
                match callback {
                    Some(callback) => callback(event),
                    None => {
                        tracing::debug!(
                            operation = header.operation,
                            "event arrived before any callback was registered"
                        );
                    }
                }
                Ok(())
            }
            Ok(None) => {
                tracing::warn!(operation = header.operation, "event with no decoder, dropping");
                Ok(())
            }
            Err(error) => {
                tracing::error!(operation = header.operation, %error, "event decode failed");
                Err(error)
            }
        }
    }
}

/// One session against the sidecar worker.
pub struct Invoker<C: MessageCodec> {
    codec: Arc<C>,
    conn: Arc<Connection>,
    dispatcher: Arc<EventDispatcher<C>>,
    sidecar: Option<Arc<Sidecar>>,
    cancel: CancellationToken,
    timeout: Duration,
}

impl<C: MessageCodec> Invoker<C> {
    /// Bring a session up.
    ///
    /// Depending on the configuration this either spawns the worker
    /// process and connects to it, or connects to a worker already
    /// listening at the configured endpoint. Faults the session rides out
    /// are reported on `errors`; the stream ends when the session does.
    pub fn start(config: Config, codec: Arc<C>, errors: mpsc::Sender<RtmlinkError>) -> Self {
        let cancel = CancellationToken::new();
        let timeout = if config.request_timeout.is_zero() {
            DEFAULT_REQUEST_TIMEOUT
        } else {
            config.request_timeout
        };

        let dispatcher = Arc::new(EventDispatcher {
            codec: Arc::clone(&codec),
            callback: RwLock::new(None),
        });
        let conn = Connection::new(
            config.endpoint(),
            Arc::clone(&codec) as Arc<dyn HeaderCodec>,
            Arc::clone(&dispatcher) as Arc<dyn EventSink>,
            &cancel,
        );
        let sidecar = config.spawns_worker().then(|| {
            Arc::new(Sidecar::new(
                &config.worker_path,
                config.worker_port,
                cancel.clone(),
            ))
        });

        if let Some(conn_errors) = conn.errors() {
            tokio::spawn(supervise(
                cancel.clone(),
                Arc::clone(&conn),
                sidecar.clone(),
                conn_errors,
                errors,
            ));
        }
        conn.start();

        Self {
            codec,
            conn,
            dispatcher,
            sidecar,
            cancel,
            timeout,
        }
    }

    /// Register the callback that receives decoded events. Replaces any
    /// previous registration.
    pub fn set_event_callback<F>(&self, callback: F)
    where
        F: Fn(C::Event) + Send + Sync + 'static,
    {
        *self.dispatcher.callback.write() = Some(Arc::new(callback));
    }

    /// Issue `request` and wait for the worker's answer.
    ///
    /// `Ok(None)` means the worker answered with an empty payload. A
    /// nonzero error code in the response comes back as
    /// [`RtmlinkError::ErrorCode`]; the call resolves as
    /// [`RtmlinkError::Disconnected`] if the connection drops while it is
    /// pending, and as [`RtmlinkError::Timeout`] after the configured
    /// wait.
    pub async fn call<R: Invocable>(&self, request: &R) -> Result<Option<C::Response>> {
        let operation = request.operation();
        let (reply_tx, reply_rx) = oneshot::channel();
        let header = Header::request(operation, request.encode()?);
        self.conn.send_request(header, Some(reply_tx))?;

        let response = receive(self.timeout, reply_rx).await?;
        decode_response(self.codec.as_ref(), operation, response)
    }

    /// Issue `request` without waiting; the outcome is handed to
    /// `callback` when it arrives.
    ///
    /// Returns an error only if the request could not be submitted.
    pub fn call_with_callback<R, F>(&self, request: &R, callback: F) -> Result<()>
    where
        R: Invocable,
        F: FnOnce(Result<Option<C::Response>>) + Send + 'static,
    {
        let operation = request.operation();
        let (reply_tx, reply_rx) = oneshot::channel();
        let header = Header::request(operation, request.encode()?);
        self.conn.send_request(header, Some(reply_tx))?;

        let codec = Arc::clone(&self.codec);
        let timeout = self.timeout;
        tokio::spawn(async move {
            let outcome = match receive(timeout, reply_rx).await {
                Ok(response) => decode_response(codec.as_ref(), operation, response),
                Err(error) => Err(error),
            };
            callback(outcome);
        });
        Ok(())
    }

    /// Send a notification the worker does not answer.
    pub fn notify<R: Invocable>(&self, request: &R) -> Result<()> {
        let header = Header::request(request.operation(), request.encode()?);
        self.conn.send_request(header, None)
    }

    /// Number of calls currently awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.conn.pending_calls()
    }

    /// End the session: quiesce the connection first so in-flight calls
    /// resolve, then bring the worker down.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.conn.stop();
        if let Some(sidecar) = &self.sidecar {
            sidecar.stop().await;
        }
    }
}

/// Session watchdog.
///
/// Worker exit (clean or not) ends the session. Connection faults pass
/// through to the application's error stream without ending anything.
/// Whichever way the loop exits, the shutdown order is connection first,
/// worker second.
async fn supervise(
    cancel: CancellationToken,
    conn: Arc<Connection>,
    sidecar: Option<Arc<Sidecar>>,
    mut conn_errors: mpsc::Receiver<RtmlinkError>,
    sink: mpsc::Sender<RtmlinkError>,
) {
    // Without a spawned worker there is no exit stream; park that select
    // arm on a channel that never yields.
    let (idle_tx, idle_rx) = mpsc::channel(1);
    let mut worker_exit = match &sidecar {
        Some(sidecar) => sidecar.start(),
        None => idle_rx,
    };
    let _hold_idle = idle_tx;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("session cancelled");
                break;
            }

            exit = worker_exit.recv() => {
                match exit {
                    Some(error) => {
                        tracing::error!(%error, "worker process failed");
                        let _ = sink.send(error).await;
                    }
                    None => tracing::info!("worker process finished"),
                }
                break;
            }

            fault = conn_errors.recv() => match fault {
                Some(error) => {
                    tracing::warn!(%error, "connection fault");
                    if sink.send(error).await.is_err() {
                        tracing::debug!("application error sink dropped");
                    }
                }
                None => break,
            },
        }
    }

    cancel.cancel();
    conn.stop();
    if let Some(sidecar) = &sidecar {
        sidecar.stop().await;
    }
}

/// Wait for the response with a bounded timer and translate the outcome.
async fn receive(timeout: Duration, reply: oneshot::Receiver<Header>) -> Result<Header> {
    match tokio::time::timeout(timeout, reply).await {
        Ok(Ok(header)) => {
            if header.error_code != 0 {
                return Err(RtmlinkError::ErrorCode(header.error_code));
            }
            Ok(header)
        }
        // The waiter was swept on teardown; the channel closed unsent.
        Ok(Err(_)) => Err(RtmlinkError::Disconnected),
        Err(_) => {
            tracing::info!("call timed out");
            Err(RtmlinkError::Timeout)
        }
    }
}

fn decode_response<C: MessageCodec>(
    codec: &C,
    operation: u16,
    response: Header,
) -> Result<Option<C::Response>> {
    if response.payload.is_empty() {
        return Ok(None);
    }
    codec.decode_response(operation, &response.payload)
}
