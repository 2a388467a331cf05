//! Connection identity and per-connection accounting

use std::fmt;
use std::ops::{Index, IndexMut};

use slab::Slab;

/// Directional identity of one logical connection
///
/// The pair is ordered: the connection `a` opened to `b` is distinct from the one `b`
/// opened to `a`, and at most one live connection exists per identity. Addresses are
/// opaque strings taken from the wire record; they are not required to parse as IPs.
///
/// Keys are built only through [`ConnectionKey::forward`] and [`ConnectionKey::reverse`],
/// keeping the acknowledgment asymmetry in one named, testable place instead of scattered
/// field swaps.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    sender: Box<str>,
    receiver: Box<str>,
}

impl ConnectionKey {
    /// Identity of the connection a packet travels along, from its source to its destination
    ///
    /// Applies to `Open`, `Data` and `Close`, all of which are sent by the peer that opened
    /// the connection.
    pub fn forward(src: &str, dst: &str) -> Self {
        Self {
            sender: src.into(),
            receiver: dst.into(),
        }
    }

    /// Identity refreshed by an acknowledgment
    ///
    /// An `Ack` is sent by the connection's receiver back to the opener, so the identity
    /// it refreshes runs opposite to the packet's own addressing.
    pub fn reverse(src: &str, dst: &str) -> Self {
        Self::forward(dst, src)
    }

    /// The peer that opened the connection
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// The peer the connection was opened to
    pub fn receiver(&self) -> &str {
        &self.receiver
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.sender, self.receiver)
    }
}

/// Accumulated state for one live connection
#[derive(Debug)]
pub(crate) struct Connection {
    /// Identity, kept on the record so eviction can clean up the reverse indexes
    pub(crate) key: ConnectionKey,
    /// Timestamp of the packet that last refreshed this connection
    pub(crate) last_active: u64,
    /// Cumulative payload bytes admitted so far
    pub(crate) bytes_sent: u64,
}

/// Internal identifier for a connection currently known to the validator
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) struct ConnectionHandle(pub(crate) usize);

impl From<ConnectionHandle> for usize {
    fn from(x: ConnectionHandle) -> Self {
        x.0
    }
}

impl Index<ConnectionHandle> for Slab<Connection> {
    type Output = Connection;
    fn index(&self, ch: ConnectionHandle) -> &Connection {
        &self[ch.0]
    }
}

impl IndexMut<ConnectionHandle> for Slab<Connection> {
    fn index_mut(&mut self, ch: ConnectionHandle) -> &mut Connection {
        &mut self[ch.0]
    }
}
