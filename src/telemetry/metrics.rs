//! Metrics collection for frame classification.
//!
//! Data-plane failures never cross the per-frame boundary as errors;
//! drops and anomalies are observable here instead.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counter for thread-safe increment operations.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Creates a new counter initialized to zero.
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Increments the counter by 1.
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds a value to the counter.
    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    /// Gets the current value of the counter.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Classification and drop accounting for the frame classifier.
#[derive(Debug, Default)]
pub struct ClassifierMetrics {
    /// Frames classified bridged after a destination rewrite.
    pub frames_bridged: Counter,
    /// Frames classified routed after a destination rewrite.
    pub frames_routed: Counter,
    /// Frames delivered to the local host (placeholder route detached).
    pub frames_local: Counter,
    /// Non-IPv4 frames passed through untouched at ingress.
    pub frames_passed: Counter,
    /// Frames dropped for failing structural validation at ingress.
    pub dropped_malformed: Counter,
    /// Frames dropped because no route covered the rewritten destination.
    pub dropped_no_route: Counter,
    /// Frames whose link-layer header failed the post-routing bounds
    /// check and were accepted unmodified.
    pub header_anomalies: Counter,
    /// Rate-limited no-route warnings actually emitted.
    pub no_route_warnings: Counter,
}

impl ClassifierMetrics {
    /// Creates a new metrics registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Exports all metrics as key-value pairs.
    pub fn export(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("frames_bridged", self.frames_bridged.get()),
            ("frames_routed", self.frames_routed.get()),
            ("frames_local", self.frames_local.get()),
            ("frames_passed", self.frames_passed.get()),
            ("dropped_malformed", self.dropped_malformed.get()),
            ("dropped_no_route", self.dropped_no_route.get()),
            ("header_anomalies", self.header_anomalies.get()),
            ("no_route_warnings", self.no_route_warnings.get()),
        ]
    }
}
