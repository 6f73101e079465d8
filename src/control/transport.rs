//! Transport boundary between the table model and the kernel-style store
//!
//! Four operations, mirroring the get-info / get-entries / set-entries /
//! set-counters sockopt pairs. The engine treats a rejection as opaque:
//! the reason string is wrapped into the crate error and never inspected.

use crate::control::record::Counter;
use std::fmt;

/// Table metadata returned by `get_info` and submitted with `set_entries`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableInfo {
    /// Bitmask of the hooks this table attaches to.
    pub valid_hooks: u32,
    /// Byte offset of each hooked chain's header, indexed by hook.
    /// Zero for hooks the table does not use.
    pub hook_offsets: [u32; 6],
    /// Total rule count across all chains.
    pub entry_count: u32,
    /// Size of the serialized chain blob.
    pub byte_size: u32,
}

/// Opaque rejection from the transport peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub reason: String,
}

impl TransportError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)
    }
}

impl std::error::Error for TransportError {}

/// The four table operations the control plane needs from its peer.
pub trait TableTransport {
    fn get_info(&mut self, table: &str) -> Result<TableInfo, TransportError>;

    /// Fetch the serialized chain blob. `byte_size` must come from a
    /// preceding `get_info` so the peer can size-check the request.
    fn get_entries(&mut self, table: &str, byte_size: u32) -> Result<Vec<u8>, TransportError>;

    /// Atomically replace the whole table.
    fn set_entries(
        &mut self,
        table: &str,
        info: &TableInfo,
        blob: &[u8],
    ) -> Result<(), TransportError>;

    /// Overwrite the position-aligned counter array.
    fn set_counters(&mut self, table: &str, counters: &[Counter]) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::new("table busy");
        assert_eq!(err.to_string(), "table busy");
    }
}
