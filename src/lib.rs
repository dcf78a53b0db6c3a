//! # rtmlink
//!
//! Transport and correlation core for a real-time messaging SDK that
//! delegates protocol termination to a local sidecar worker process.
//!
//! The application-facing API and the payload schemas live in the layers
//! above; this crate supplies the plumbing between them and the worker:
//!
//! - the 2/3-byte varint length encoding and the binary frame layout
//! - a reconnecting connection with a bounded outbound queue and batched,
//!   flush-once writes
//! - sequence-id correlation routing each response to its waiting caller
//! - event-versus-response demultiplexing into a registered event callback
//! - supervision of the worker process, including spawn and shutdown
//!
//! ## Architecture
//!
//! - **Connection task**: owns the socket; dials with retry, drains the
//!   outbound queue in batches, dispatches events, sweeps pending calls
//!   on teardown
//! - **Reader task** (one per socket generation): frames and decodes the
//!   inbound stream, resolving responses directly against the
//!   correlation table
//! - **Supervision task**: watches the worker process and forwards
//!   connection faults to the application
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use rtmlink::{Config, Invoker};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (err_tx, mut err_rx) = tokio::sync::mpsc::channel(16);
//!     let invoker = Invoker::start(Config::default(), Arc::new(MyCodec), err_tx);
//!     invoker.set_event_callback(|event| println!("event: {event:?}"));
//!
//!     match invoker.call(&my_request).await {
//!         Ok(response) => println!("worker answered: {response:?}"),
//!         Err(error) => eprintln!("call failed: {error}"),
//!     }
//!
//!     invoker.stop().await;
//! }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod invoker;
pub mod protocol;
pub mod sidecar;

pub use config::{Config, DEFAULT_REQUEST_TIMEOUT, DEFAULT_WORKER_PORT};
pub use connection::{Connection, EventSink};
pub use error::{Result, RtmlinkError};
pub use invoker::Invoker;
pub use protocol::{Header, HeaderCodec, Invocable, MessageCodec};
pub use sidecar::Sidecar;
