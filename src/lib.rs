//! Connection admission and traffic policing for a small peer-to-peer transport
//!
//! tollgate contains a fully deterministic implementation of the admission rules for a
//! simplified peer-to-peer transport protocol. It performs no I/O whatsoever and never reads
//! the clock: callers hand it one already-delimited packet record at a time together with a
//! monotonic timestamp, and it answers whether the packet is valid given everything it has
//! seen so far. The same callers periodically ask it to sweep out connections that have gone
//! quiet for longer than the configured timeout.
//!
//! The most important type is [`Validator`], which owns the connection table, the per-sender
//! accounting used to enforce the concurrent-connection cap, and the expiry schedule. It is
//! passive and reentrant: share one behind an `Arc` and call it from as many threads as you
//! like. Decisions are linearizable, so two opens racing for a sender's last connection slot
//! resolve deterministically with exactly one winner.
//!
//! ```
//! use std::time::Duration;
//! use tollgate::{Config, Validator};
//!
//! let mut config = Config::default();
//! config.timeout(Duration::from_secs(10)).connections_per_ip(2);
//! let validator = Validator::new(config);
//!
//! // Timestamps are caller-supplied monotonic nanoseconds.
//! let t0 = 1_000_000_000;
//! assert!(validator.handle_packet(t0, "10.0.0.1:10.0.0.2:O"));
//! assert!(validator.handle_packet(t0, "10.0.0.1:10.0.0.2:D:hello"));
//!
//! // Eleven seconds of silence exceeds the ten second timeout.
//! assert_eq!(validator.handle_timeouts(t0 + 11_000_000_000), 1);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]
#![warn(clippy::use_self)]

mod config;
mod connection;
mod expiry;
mod packet;
mod stats;
mod validator;

pub use config::Config;
pub use connection::ConnectionKey;
pub use packet::{MessageType, Packet};
pub use stats::ValidatorStats;
pub use validator::{Event, Rejection, RejectionKind, Validator};

/// Resolution of caller-supplied timestamps
pub const NANOS_PER_SEC: u64 = 1_000_000_000;
