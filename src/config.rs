use std::time::Duration;

/// Parameters governing admission decisions and connection expiry
///
/// Defaults are deliberately permissive and suit tests and small deployments; production
/// callers should size the caps to their own resource budget. All values are fixed for the
/// lifetime of the [`Validator`](crate::Validator) they are handed to.
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) timeout: Duration,
    pub(crate) connections_per_ip: usize,
    pub(crate) bytes_per_connection: u64,
}

impl Config {
    /// Maximum quiet period before a connection is considered dead
    ///
    /// A connection that has not been refreshed by an accepted `Open`, `Ack` or `Data`
    /// packet for strictly longer than this is evicted by the next call to
    /// [`Validator::handle_timeouts`](crate::Validator::handle_timeouts), and never before.
    /// Defaults to 30 seconds.
    pub fn timeout(&mut self, value: Duration) -> &mut Self {
        self.timeout = value;
        self
    }

    /// Maximum number of connections a single sender may hold open concurrently
    ///
    /// The cap is checked before a new connection is admitted, so the open set of a sender
    /// never exceeds it at any observable instant. An `Open` arriving while the sender is at
    /// the cap is rejected outright; closing or timing out an existing connection frees the
    /// slot. Defaults to 64.
    pub fn connections_per_ip(&mut self, value: usize) -> &mut Self {
        self.connections_per_ip = value;
        self
    }

    /// Maximum cumulative payload bytes one connection may carry
    ///
    /// A `Data` packet whose payload would push the running total strictly past this budget
    /// is rejected without being counted; landing exactly on the budget is accepted.
    /// Defaults to 1 MiB.
    pub fn bytes_per_connection(&mut self, value: u64) -> &mut Self {
        self.bytes_per_connection = value;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connections_per_ip: 64,
            bytes_per_connection: 1024 * 1024,
        }
    }
}
