//! # ARQ: window-based reliable transport over unreliable datagrams
//!
//! A synchronous, allocation-light implementation of a KCP-style ARQ
//! (automatic repeat request) protocol engine. The engine owns no sockets,
//! clocks, or threads: the caller feeds inbound datagrams to
//! [`Connection::input`], drives timers with [`Connection::update`] using
//! its own monotonic clock, and receives outbound datagrams through an
//! injected [`Output`] sink.
//!
//! ## Features
//!
//! - **Reliable, ordered delivery** over channels that drop, duplicate,
//!   and reorder datagrams
//! - **Zero-copy buffers** with the `bytes` crate
//! - **Caller-driven time**: deterministic, testable, runtime-agnostic
//! - **Backpressure by contract**: `WindowFull` instead of unbounded queues
//! - **Generation-checked handles** via [`Endpoint`] for multi-connection
//!   hosts
//!
//! ## Quick start
//!
//! ```rust
//! use arq::{ArqConfig, Connection};
//! use bytes::Bytes;
//! use std::sync::{Arc, Mutex};
//!
//! let mut conn = Connection::new(42, ArqConfig::default()).unwrap();
//!
//! // Outbound datagrams land in the injected sink.
//! let wire: Arc<Mutex<Vec<Bytes>>> = Arc::default();
//! let sink = wire.clone();
//! conn.set_output(move |datagram: &[u8]| {
//!     sink.lock().unwrap().push(Bytes::copy_from_slice(datagram));
//! });
//!
//! conn.send(Bytes::from_static(b"hello")).unwrap();
//! conn.update(0).unwrap(); // caller-supplied monotonic milliseconds
//!
//! assert!(!wire.lock().unwrap().is_empty());
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐
//! │  Endpoint                │  generation-checked handles
//! ├──────────────────────────┤
//! │  Connection              │  state machine, tick loop, probing
//! ├────────────┬─────────────┤
//! │ SendWindow │ RecvWindow  │  ARQ windows
//! ├────────────┴─────────────┤
//! │  RttEstimator / cwnd     │  RTO + congestion control
//! ├──────────────────────────┤
//! │  Segment codec           │  20-byte wire header
//! └──────────────────────────┘
//! ```

pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod recv_window;
pub mod rtt;
pub mod segment;
pub mod send_window;

pub use config::{ArqConfig, DelayConfig};
pub use connection::{ArqStats, Connection, Output, State};
pub use endpoint::{ConnectionHandle, Endpoint};
pub use error::{ArqError, Result};
pub use segment::{Command, Header, Segment};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
