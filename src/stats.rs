//! Counters describing validator activity

/// Running totals of everything a [`Validator`](crate::Validator) has decided
///
/// Snapshot returned by [`Validator::stats`](crate::Validator::stats). All counters are
/// monotonic; `opened` always equals `closed + expired` plus the number of currently live
/// connections.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ValidatorStats {
    /// Packets accepted, across all message types
    pub accepted: u64,
    /// Packets rejected, for any reason
    pub rejected: u64,
    /// Connections admitted by an `Open`
    pub opened: u64,
    /// Connections removed by an accepted `Close`
    pub closed: u64,
    /// Connections evicted by a timeout sweep
    pub expired: u64,
    /// Cumulative payload bytes admitted on `Data` packets
    pub data_bytes: u64,
}
