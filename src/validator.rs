use std::sync::Mutex;

use rustc_hash::{FxHashMap, FxHashSet};
use slab::Slab;
use thiserror::Error;
use tracing::{debug, trace};

use crate::config::Config;
use crate::connection::{Connection, ConnectionHandle, ConnectionKey};
use crate::expiry::ExpiryQueue;
use crate::packet::{MessageType, Packet};
use crate::stats::ValidatorStats;

/// The main entry point to the library
///
/// A `Validator` performs no I/O whatsoever and never reads the clock. Callers feed it
/// one packet record at a time through [`handle_packet`](Self::handle_packet) (or
/// [`process`](Self::process), which additionally reports what the packet did) together
/// with the receive timestamp, and periodically call
/// [`handle_timeouts`](Self::handle_timeouts) to evict connections that have gone quiet.
///
/// All methods take `&self`; a `Validator` shared behind an `Arc` may be driven from any
/// number of threads, and every decision is made under one lock so the admission rules
/// hold at every observable instant.
pub struct Validator {
    config: Config,
    /// `config.timeout` in the caller's timestamp resolution
    timeout_nanos: u64,
    state: Mutex<State>,
}

impl Validator {
    /// Construct a validator enforcing the limits in `config`
    pub fn new(config: Config) -> Self {
        let timeout_nanos = config.timeout.as_nanos().min(u64::MAX as u128) as u64;
        Self {
            config,
            timeout_nanos,
            state: Mutex::new(State::default()),
        }
    }

    /// Process one received packet record, returning whether it was accepted
    ///
    /// `now` is the receive time in nanoseconds on the same monotonic clock passed to
    /// [`handle_timeouts`](Self::handle_timeouts). A rejected packet has no effect on any
    /// connection state.
    pub fn handle_packet(&self, now: u64, packet: &str) -> bool {
        self.process(now, packet).is_ok()
    }

    /// Process one received packet record, reporting the state change it caused
    ///
    /// Behaves exactly like [`handle_packet`](Self::handle_packet) but exposes the
    /// decision: the event an accepted packet produced, or the reason the packet was
    /// refused.
    pub fn process(&self, now: u64, packet: &str) -> Result<Event, Rejection> {
        let pkt = Packet::parse(packet);
        let state = &mut *self.state.lock().unwrap();
        let result = match MessageType::parse(pkt.kind) {
            Some(MessageType::Open) => self.handle_open(state, now, &pkt),
            Some(MessageType::Ack) => self.handle_ack(state, now, &pkt),
            Some(MessageType::Data) => self.handle_data(state, now, &pkt),
            Some(MessageType::Close) => self.handle_close(state, &pkt),
            None => Err(Rejection::UnknownMessageType),
        };
        match &result {
            Ok(event) => {
                state.stats.accepted += 1;
                trace!(src = pkt.src, dst = pkt.dst, ?event, "packet accepted");
            }
            Err(rejection) => {
                state.stats.rejected += 1;
                debug!(
                    src = pkt.src,
                    dst = pkt.dst,
                    kind = pkt.kind,
                    %rejection,
                    "packet rejected"
                );
            }
        }
        result
    }

    /// Evict every connection that has been quiet for strictly longer than the timeout
    ///
    /// Returns the number of connections evicted. Work is proportional to the entries
    /// actually drained from the expiry schedule, not to the number of live connections,
    /// so calling this often is cheap.
    pub fn handle_timeouts(&self, now: u64) -> usize {
        let state = &mut *self.state.lock().unwrap();
        let mut evicted = 0;
        while let Some(handle) = state.expiry.next_expired(now, self.timeout_nanos) {
            let conn = state.remove_connection(handle);
            state.index.remove(&conn.key);
            trace!(connection = %conn.key, "connection timed out");
            evicted += 1;
        }
        state.stats.expired += evicted as u64;
        debug_assert_eq!(state.expiry.len(), state.connections.len());
        if evicted > 0 {
            debug!(evicted, "timeout sweep evicted connections");
        }
        evicted
    }

    /// Number of connections currently established
    pub fn connection_count(&self) -> usize {
        self.state.lock().unwrap().connections.len()
    }

    /// Number of connections `sender` currently holds open
    pub fn open_connections(&self, sender: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .open_senders
            .get(sender)
            .map_or(0, |set| set.len())
    }

    /// Snapshot of the running counters
    pub fn stats(&self) -> ValidatorStats {
        self.state.lock().unwrap().stats
    }

    fn handle_open(
        &self,
        state: &mut State,
        now: u64,
        pkt: &Packet<'_>,
    ) -> Result<Event, Rejection> {
        // The cap is checked before duplicate detection; a sender at its limit is
        // refused even for an identity it already holds.
        let open = state.open_senders.get(pkt.src).map_or(0, |set| set.len());
        if open >= self.config.connections_per_ip {
            return Err(Rejection::ConnectionLimit);
        }
        let key = ConnectionKey::forward(pkt.src, pkt.dst);
        if state.index.contains_key(&key) {
            return Err(Rejection::DuplicateOpen);
        }
        let handle = ConnectionHandle(state.connections.insert(Connection {
            key: key.clone(),
            last_active: now,
            bytes_sent: 0,
        }));
        state.index.insert(key, handle);
        match state.open_senders.get_mut(pkt.src) {
            Some(set) => {
                set.insert(handle);
            }
            None => {
                let mut set = FxHashSet::default();
                set.insert(handle);
                state.open_senders.insert(pkt.src.into(), set);
            }
        }
        state.expiry.refresh(handle, now);
        state.stats.opened += 1;
        Ok(Event::Opened)
    }

    fn handle_ack(
        &self,
        state: &mut State,
        now: u64,
        pkt: &Packet<'_>,
    ) -> Result<Event, Rejection> {
        // Acks travel against the flow they refresh.
        let key = ConnectionKey::reverse(pkt.src, pkt.dst);
        let &handle = state.index.get(&key).ok_or(Rejection::UnknownConnection)?;
        state.connections[handle].last_active = now;
        state.expiry.refresh(handle, now);
        Ok(Event::Acknowledged)
    }

    fn handle_data(
        &self,
        state: &mut State,
        now: u64,
        pkt: &Packet<'_>,
    ) -> Result<Event, Rejection> {
        let key = ConnectionKey::forward(pkt.src, pkt.dst);
        let &handle = state.index.get(&key).ok_or(Rejection::UnknownConnection)?;
        let conn = &mut state.connections[handle];
        let bytes = match pkt.payload {
            Some(payload) => {
                let bytes = payload.len() as u64;
                match conn.bytes_sent.checked_add(bytes) {
                    Some(total) if total <= self.config.bytes_per_connection => {}
                    // A budget overrun leaves the connection untouched, idle clock
                    // included.
                    _ => return Err(Rejection::ByteBudgetExceeded),
                }
                bytes
            }
            // A record with no payload field at all is a keepalive.
            None => 0,
        };
        conn.bytes_sent += bytes;
        conn.last_active = now;
        state.expiry.refresh(handle, now);
        state.stats.data_bytes += bytes;
        Ok(Event::Data { bytes })
    }

    fn handle_close(&self, state: &mut State, pkt: &Packet<'_>) -> Result<Event, Rejection> {
        let key = ConnectionKey::forward(pkt.src, pkt.dst);
        let handle = state.index.remove(&key).ok_or(Rejection::UnknownConnection)?;
        state.remove_connection(handle);
        state.stats.closed += 1;
        Ok(Event::Closed)
    }
}

#[derive(Default)]
struct State {
    connections: Slab<Connection>,
    /// Live connections by identity
    index: FxHashMap<ConnectionKey, ConnectionHandle>,
    /// Connections each sender currently holds open; senders with none are absent
    open_senders: FxHashMap<Box<str>, FxHashSet<ConnectionHandle>>,
    expiry: ExpiryQueue,
    stats: ValidatorStats,
}

impl State {
    /// Drop `handle` from every structure except the identity index
    ///
    /// The identity index is keyed by the connection itself, so callers that still need
    /// the key remove the index entry with the returned connection.
    fn remove_connection(&mut self, handle: ConnectionHandle) -> Connection {
        let conn = self.connections.remove(handle.0);
        if let Some(set) = self.open_senders.get_mut(conn.key.sender()) {
            set.remove(&handle);
            if set.is_empty() {
                self.open_senders.remove(conn.key.sender());
            }
        }
        self.expiry.remove(handle);
        conn
    }
}

/// State change produced by an accepted packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A new connection was admitted
    Opened,
    /// The receiver acknowledged, refreshing the connection
    Acknowledged,
    /// Payload was accepted on an established connection
    Data {
        /// Payload length charged against the connection's byte budget
        bytes: u64,
    },
    /// The connection was closed by its sender
    Closed,
}

/// Reasons a packet is refused
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The message type code is not one the protocol defines
    #[error("unknown message type")]
    UnknownMessageType,
    /// The sender already holds the maximum number of open connections
    #[error("per-sender connection limit reached")]
    ConnectionLimit,
    /// An `Open` named a connection that is already established
    #[error("connection already open")]
    DuplicateOpen,
    /// The packet referenced a connection that is not established
    #[error("unknown connection")]
    UnknownConnection,
    /// Accepting the payload would exceed the connection's byte budget
    #[error("per-connection byte budget exceeded")]
    ByteBudgetExceeded,
}

impl Rejection {
    /// Coarse classification of the refusal
    pub fn kind(&self) -> RejectionKind {
        match self {
            Self::UnknownMessageType | Self::DuplicateOpen | Self::UnknownConnection => {
                RejectionKind::ProtocolViolation
            }
            Self::ConnectionLimit | Self::ByteBudgetExceeded => RejectionKind::ResourceLimit,
        }
    }
}

/// Whether a packet was refused as invalid or merely as over a limit
///
/// Useful to callers that penalize peers for protocol violations but tolerate traffic
/// that is well formed and simply outran its allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// The packet was invalid in the validator's current state
    ProtocolViolation,
    /// The packet was well formed but a configured limit refused it
    ResourceLimit,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const SEC: u64 = crate::NANOS_PER_SEC;

    fn validator() -> Validator {
        let mut config = Config::default();
        config
            .timeout(Duration::from_secs(10))
            .connections_per_ip(2)
            .bytes_per_connection(50);
        Validator::new(config)
    }

    #[test]
    fn admission_caps_and_duplicates() {
        let v = validator();
        let t = SEC;

        assert_eq!(v.process(t, "1.0.0.1:1.0.0.9:O"), Ok(Event::Opened));
        assert_eq!(
            v.process(t, "1.0.0.1:1.0.0.9:O"),
            Err(Rejection::DuplicateOpen)
        );
        assert_eq!(v.process(t, "1.0.0.1:1.0.0.8:O"), Ok(Event::Opened));
        assert_eq!(
            v.process(t, "1.0.0.1:1.0.0.7:O"),
            Err(Rejection::ConnectionLimit)
        );
        // At the cap even a duplicate identity reports the limit.
        assert_eq!(
            v.process(t, "1.0.0.1:1.0.0.9:O"),
            Err(Rejection::ConnectionLimit)
        );
        assert_eq!(v.open_connections("1.0.0.1"), 2);

        // Other senders have their own allowance.
        assert_eq!(v.process(t, "1.0.0.2:1.0.0.9:O"), Ok(Event::Opened));
        assert_eq!(v.connection_count(), 3);

        // A payload field on an Open is ignored.
        assert_eq!(v.process(t, "1.0.0.2:1.0.0.8:O:junk"), Ok(Event::Opened));
    }

    #[test]
    fn byte_budget_is_cumulative_and_inclusive() {
        let v = validator();
        let t = SEC;

        assert_eq!(v.process(t, "1.0.0.1:1.0.0.9:O"), Ok(Event::Opened));
        let thirty = format!("1.0.0.1:1.0.0.9:D:{}", "x".repeat(30));
        assert_eq!(v.process(t, &thirty), Ok(Event::Data { bytes: 30 }));

        // Landing exactly on the budget is accepted.
        let twenty = format!("1.0.0.1:1.0.0.9:D:{}", "x".repeat(20));
        assert_eq!(v.process(t, &twenty), Ok(Event::Data { bytes: 20 }));

        assert_eq!(
            v.process(t, "1.0.0.1:1.0.0.9:D:x"),
            Err(Rejection::ByteBudgetExceeded)
        );
        assert_eq!(v.stats().data_bytes, 50);
    }

    #[test]
    fn payload_bytes_count_the_raw_remainder() {
        let v = validator();
        let t = SEC;

        assert_eq!(v.process(t, "1.0.0.1:1.0.0.9:O"), Ok(Event::Opened));
        // Delimiters inside the payload are payload.
        assert_eq!(
            v.process(t, "1.0.0.1:1.0.0.9:D:a:b::c"),
            Ok(Event::Data { bytes: 6 })
        );
        assert_eq!(v.stats().data_bytes, 6);
    }

    #[test]
    fn close_releases_the_slot_exactly_once() {
        let v = validator();
        let t = SEC;

        assert_eq!(v.process(t, "1.0.0.1:1.0.0.9:O"), Ok(Event::Opened));
        assert_eq!(v.process(t, "1.0.0.1:1.0.0.8:O"), Ok(Event::Opened));

        // Close is sender-addressed; the receiver cannot close from its side.
        assert_eq!(
            v.process(t, "1.0.0.9:1.0.0.1:C"),
            Err(Rejection::UnknownConnection)
        );
        assert_eq!(v.process(t, "1.0.0.1:1.0.0.9:C"), Ok(Event::Closed));

        // The identity is gone for data and for repeated closes.
        assert_eq!(
            v.process(t, "1.0.0.1:1.0.0.9:D:hi"),
            Err(Rejection::UnknownConnection)
        );
        assert_eq!(
            v.process(t, "1.0.0.1:1.0.0.9:C"),
            Err(Rejection::UnknownConnection)
        );

        // The slot it held is free again.
        assert_eq!(v.open_connections("1.0.0.1"), 1);
        assert_eq!(v.process(t, "1.0.0.1:1.0.0.7:O"), Ok(Event::Opened));
        assert_eq!(
            v.process(t, "1.0.0.1:1.0.0.6:O"),
            Err(Rejection::ConnectionLimit)
        );
    }

    #[test]
    fn idle_connections_expire() {
        let v = validator();
        let t = SEC;

        assert_eq!(v.process(t, "1.0.0.1:1.0.0.9:O"), Ok(Event::Opened));
        // Exactly at the timeout the connection is still alive.
        assert_eq!(v.handle_timeouts(t + 10 * SEC), 0);
        assert_eq!(v.handle_timeouts(t + 10 * SEC + 1), 1);

        assert_eq!(
            v.process(t + 10 * SEC + 1, "1.0.0.1:1.0.0.9:D:hi"),
            Err(Rejection::UnknownConnection)
        );
        assert_eq!(v.open_connections("1.0.0.1"), 0);
        assert_eq!(v.connection_count(), 0);
    }

    #[test]
    fn acks_refresh_the_reverse_direction() {
        let v = validator();
        let t = SEC;

        assert_eq!(v.process(t, "1.0.0.1:1.0.0.9:O"), Ok(Event::Opened));
        // An ack in the forward direction names a connection that does not exist.
        assert_eq!(
            v.process(t, "1.0.0.1:1.0.0.9:A"),
            Err(Rejection::UnknownConnection)
        );
        assert_eq!(
            v.process(t + 8 * SEC, "1.0.0.9:1.0.0.1:A"),
            Ok(Event::Acknowledged)
        );

        // The refresh moved the deadline to eight seconds past the open.
        assert_eq!(v.handle_timeouts(t + 12 * SEC), 0);
        assert_eq!(v.handle_timeouts(t + 18 * SEC + 1), 1);
    }

    #[test]
    fn keepalives_refresh_without_charging() {
        let v = validator();
        let t = SEC;

        assert_eq!(v.process(t, "1.0.0.1:1.0.0.9:O"), Ok(Event::Opened));
        let fifty = format!("1.0.0.1:1.0.0.9:D:{}", "x".repeat(50));
        assert_eq!(v.process(t, &fifty), Ok(Event::Data { bytes: 50 }));

        // No payload field at all, and an empty payload field, both refresh a
        // connection that has exhausted its budget.
        assert_eq!(
            v.process(t + 8 * SEC, "1.0.0.1:1.0.0.9:D"),
            Ok(Event::Data { bytes: 0 })
        );
        assert_eq!(
            v.process(t + 9 * SEC, "1.0.0.1:1.0.0.9:D:"),
            Ok(Event::Data { bytes: 0 })
        );
        assert_eq!(v.stats().data_bytes, 50);

        assert_eq!(v.handle_timeouts(t + 19 * SEC), 0);
        assert_eq!(v.handle_timeouts(t + 19 * SEC + 1), 1);
    }

    #[test]
    fn rejected_data_does_not_refresh() {
        let v = validator();
        let t = SEC;

        assert_eq!(v.process(t, "1.0.0.1:1.0.0.9:O"), Ok(Event::Opened));
        let thirty = format!("1.0.0.1:1.0.0.9:D:{}", "x".repeat(30));
        assert_eq!(v.process(t, &thirty), Ok(Event::Data { bytes: 30 }));
        assert_eq!(
            v.process(t + 8 * SEC, &thirty),
            Err(Rejection::ByteBudgetExceeded)
        );

        // Had the rejected packet refreshed the connection it would survive this sweep.
        assert_eq!(v.handle_timeouts(t + 10 * SEC + 1), 1);
    }

    #[test]
    fn unknown_message_types_are_rejected() {
        let v = validator();
        let t = SEC;

        assert_eq!(
            v.process(t, "1.0.0.1:1.0.0.9:X"),
            Err(Rejection::UnknownMessageType)
        );
        assert_eq!(
            v.process(t, "1.0.0.1:1.0.0.9:"),
            Err(Rejection::UnknownMessageType)
        );
        assert_eq!(v.process(t, "garbage"), Err(Rejection::UnknownMessageType));
        assert_eq!(v.stats().rejected, 3);
        assert_eq!(v.stats().accepted, 0);
    }

    #[test]
    fn empty_fields_are_opaque_identities() {
        let v = validator();
        let t = SEC;

        assert_eq!(v.process(t, "::O"), Ok(Event::Opened));
        assert_eq!(v.open_connections(""), 1);
        assert_eq!(v.process(t, "::D:hi"), Ok(Event::Data { bytes: 2 }));
        assert_eq!(v.process(t, "::C"), Ok(Event::Closed));
        assert_eq!(v.connection_count(), 0);
    }

    #[test]
    fn rejections_classify_by_kind() {
        use RejectionKind::*;
        assert_eq!(Rejection::UnknownMessageType.kind(), ProtocolViolation);
        assert_eq!(Rejection::DuplicateOpen.kind(), ProtocolViolation);
        assert_eq!(Rejection::UnknownConnection.kind(), ProtocolViolation);
        assert_eq!(Rejection::ConnectionLimit.kind(), ResourceLimit);
        assert_eq!(Rejection::ByteBudgetExceeded.kind(), ResourceLimit);
    }

    #[test]
    fn stats_reconcile_with_connection_lifecycle() {
        let v = validator();
        let t = SEC;

        assert!(v.handle_packet(t, "1.0.0.1:1.0.0.9:O"));
        assert!(v.handle_packet(t, "1.0.0.1:1.0.0.8:O"));
        assert!(v.handle_packet(t, "1.0.0.1:1.0.0.9:C"));
        assert!(!v.handle_packet(t, "1.0.0.1:1.0.0.9:D:hi"));
        assert_eq!(v.handle_timeouts(t + 11 * SEC), 1);

        let stats = v.stats();
        assert_eq!(stats.accepted, 3);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.opened, 2);
        assert_eq!(stats.closed, 1);
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.data_bytes, 0);
        assert_eq!(stats.opened, stats.closed + stats.expired);
        assert_eq!(v.connection_count(), 0);
    }
}
