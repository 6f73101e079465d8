//! Link and network layer types consumed by the data plane

pub mod ethernet;
pub mod ipv4;
pub mod types;

pub use types::{EtherType, MacAddr};
