//! brtables - Bridge-aware packet filtering engine
//!
//! Two cooperating halves:
//! - a control plane that maintains chain-structured rule tables in memory,
//!   compiles them into a flat kernel-style layout, and commits them
//!   atomically with counter reconciliation
//! - a data plane that classifies link-layer frames crossing a software
//!   bridge as bridged, routed, or locally originated, steering each frame
//!   through the bridge hook sequence exactly once

pub mod config;
pub mod control;
pub mod dataplane;
pub mod error;
pub mod protocol;
pub mod telemetry;

pub use error::{Error, Result};
