//! Route-lookup collaborator and the post-rewrite decision
//!
//! The classifier never consults a routing table itself. It asks the
//! embedder-supplied [`RouteLookup`] and interprets the result: a
//! rewritten destination that resolves back onto the ingress device is
//! bridged traffic, anything else is routed. When the primary lookup
//! fails, a forwarding-agnostic fallback lookup is made purely to
//! produce a diagnostic.

use std::net::Ipv4Addr;
use std::time::Duration;

use tracing::warn;

use crate::dataplane::frame::DeviceId;
use crate::dataplane::limiter::{Clock, RateLimiter};
use crate::telemetry::ClassifierMetrics;
use crate::Result;

/// A resolved route. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteHandle {
    pub out_device: DeviceId,
}

/// Route resolution supplied by the embedder.
pub trait RouteLookup {
    /// Input-path lookup, keyed by the receiving device. Fails with
    /// `NoRoute` when forwarding is disabled or no route covers `dst`.
    fn lookup_input(
        &mut self,
        dst: Ipv4Addr,
        src: Ipv4Addr,
        tos: u8,
        device: DeviceId,
    ) -> Result<RouteHandle>;

    /// Output-path lookup, ignoring forwarding state.
    fn lookup_output(&mut self, dst: Ipv4Addr, tos: u8) -> Result<RouteHandle>;
}

/// Locality test for the post-routing source fix-up.
pub trait AddressOwnership {
    fn is_locally_owned(&self, addr: Ipv4Addr) -> bool;
}

/// Outcome of the post-rewrite route decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteDecision {
    /// The rewritten destination resolves back onto the ingress device.
    Bridged(RouteHandle),
    /// The rewritten destination resolves elsewhere.
    Routed(RouteHandle),
    /// No usable route. The frame must be dropped.
    Drop,
}

/// Applies the route decision for frames whose destination was
/// rewritten during the network-layer pre-routing stage.
#[derive(Debug)]
pub struct RoutingDecisionEngine<R: RouteLookup, C: Clock> {
    routes: R,
    limiter: RateLimiter<C>,
}

impl<R: RouteLookup, C: Clock> RoutingDecisionEngine<R, C> {
    pub fn new(routes: R, clock: C, warn_interval: Duration) -> Self {
        Self {
            routes,
            limiter: RateLimiter::new(clock, warn_interval),
        }
    }

    /// Decide what to do with a destination-rewritten frame that
    /// arrived on `device`. The fallback lookup succeeding on a
    /// mismatched device means the rewrite points across the bridge
    /// boundary while forwarding is off, which is worth one warning
    /// per interval; a frame with no route at all drops silently.
    pub fn decide_rewritten(
        &mut self,
        dst: Ipv4Addr,
        src: Ipv4Addr,
        tos: u8,
        device: DeviceId,
        metrics: &ClassifierMetrics,
    ) -> RewriteDecision {
        match self.routes.lookup_input(dst, src, tos, device) {
            Ok(route) if route.out_device == device => RewriteDecision::Bridged(route),
            Ok(route) => RewriteDecision::Routed(route),
            Err(_) => match self.routes.lookup_output(dst, tos) {
                Ok(route) if route.out_device == device => RewriteDecision::Bridged(route),
                Ok(_) => {
                    if self.limiter.allow() {
                        warn!(
                            dst = %dst,
                            "cross-bridge DNAT requires IP forwarding to be enabled"
                        );
                        metrics.no_route_warnings.inc();
                    }
                    RewriteDecision::Drop
                }
                Err(_) => RewriteDecision::Drop,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct ManualClock {
        millis: AtomicU64,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                millis: AtomicU64::new(0),
            }
        }

        fn advance(&self, ms: u64) {
            self.millis.fetch_add(ms, Ordering::Relaxed);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Duration {
            Duration::from_millis(self.millis.load(Ordering::Relaxed))
        }
    }

    #[derive(Default)]
    struct ScriptedRoutes {
        input: HashMap<Ipv4Addr, RouteHandle>,
        output: HashMap<Ipv4Addr, RouteHandle>,
    }

    impl RouteLookup for ScriptedRoutes {
        fn lookup_input(
            &mut self,
            dst: Ipv4Addr,
            _src: Ipv4Addr,
            _tos: u8,
            _device: DeviceId,
        ) -> Result<RouteHandle> {
            self.input.get(&dst).copied().ok_or(Error::NoRoute { dst })
        }

        fn lookup_output(&mut self, dst: Ipv4Addr, _tos: u8) -> Result<RouteHandle> {
            self.output.get(&dst).copied().ok_or(Error::NoRoute { dst })
        }
    }

    const INGRESS: DeviceId = DeviceId(10);
    const OTHER: DeviceId = DeviceId(20);

    fn engine(
        routes: ScriptedRoutes,
    ) -> (RoutingDecisionEngine<ScriptedRoutes, Arc<ManualClock>>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let engine =
            RoutingDecisionEngine::new(routes, Arc::clone(&clock), Duration::from_secs(5));
        (engine, clock)
    }

    fn dst() -> Ipv4Addr {
        "10.0.0.9".parse().unwrap()
    }

    fn src() -> Ipv4Addr {
        "10.0.0.1".parse().unwrap()
    }

    #[test]
    fn test_primary_lookup_on_ingress_is_bridged() {
        let mut routes = ScriptedRoutes::default();
        routes.input.insert(dst(), RouteHandle { out_device: INGRESS });
        let (mut engine, _clock) = engine(routes);

        let metrics = ClassifierMetrics::new();
        assert_eq!(
            engine.decide_rewritten(dst(), src(), 0, INGRESS, &metrics),
            RewriteDecision::Bridged(RouteHandle { out_device: INGRESS })
        );
    }

    #[test]
    fn test_primary_lookup_elsewhere_is_routed() {
        let mut routes = ScriptedRoutes::default();
        routes.input.insert(dst(), RouteHandle { out_device: OTHER });
        let (mut engine, _clock) = engine(routes);

        let metrics = ClassifierMetrics::new();
        assert_eq!(
            engine.decide_rewritten(dst(), src(), 0, INGRESS, &metrics),
            RewriteDecision::Routed(RouteHandle { out_device: OTHER })
        );
    }

    #[test]
    fn test_fallback_on_ingress_continues_bridged() {
        let mut routes = ScriptedRoutes::default();
        routes.output.insert(dst(), RouteHandle { out_device: INGRESS });
        let (mut engine, _clock) = engine(routes);

        let metrics = ClassifierMetrics::new();
        assert_eq!(
            engine.decide_rewritten(dst(), src(), 0, INGRESS, &metrics),
            RewriteDecision::Bridged(RouteHandle { out_device: INGRESS })
        );
        assert_eq!(metrics.no_route_warnings.get(), 0);
    }

    #[test]
    fn test_fallback_mismatch_drops_with_rate_limited_warning() {
        let mut routes = ScriptedRoutes::default();
        routes.output.insert(dst(), RouteHandle { out_device: OTHER });
        let (mut engine, clock) = engine(routes);

        let metrics = ClassifierMetrics::new();
        assert_eq!(
            engine.decide_rewritten(dst(), src(), 0, INGRESS, &metrics),
            RewriteDecision::Drop
        );
        assert_eq!(metrics.no_route_warnings.get(), 1);

        // Within the interval the drop repeats but the warning does not.
        assert_eq!(
            engine.decide_rewritten(dst(), src(), 0, INGRESS, &metrics),
            RewriteDecision::Drop
        );
        assert_eq!(metrics.no_route_warnings.get(), 1);

        clock.advance(5_000);
        assert_eq!(
            engine.decide_rewritten(dst(), src(), 0, INGRESS, &metrics),
            RewriteDecision::Drop
        );
        assert_eq!(metrics.no_route_warnings.get(), 2);
    }

    #[test]
    fn test_no_route_at_all_drops_silently() {
        let (mut engine, _clock) = engine(ScriptedRoutes::default());

        let metrics = ClassifierMetrics::new();
        assert_eq!(
            engine.decide_rewritten(dst(), src(), 0, INGRESS, &metrics),
            RewriteDecision::Drop
        );
        assert_eq!(metrics.no_route_warnings.get(), 0);
    }
}
