//! Bridge hook state machine
//!
//! One method per hook point. Each method mutates the frame's traversal
//! state and returns a small action the datapath executes; the
//! classifier never dispatches a stage itself. Frames that are not IPv4
//! pass through untouched at ingress. Classification failures drop the
//! frame and bump a counter, they never surface as errors.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::dataplane::frame::{DeviceId, DeviceTable, Disposition, PendingStage, TaggedFrame};
use crate::dataplane::limiter::Clock;
use crate::dataplane::routing::{
    AddressOwnership, RewriteDecision, RouteHandle, RouteLookup, RoutingDecisionEngine,
};
use crate::protocol::ethernet;
use crate::protocol::ipv4::Ipv4Header;
use crate::telemetry::ClassifierMetrics;

/// Outcome of the ingress hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressAction {
    /// Not the protocol under scrutiny, continue normal bridging.
    Pass,
    Drop,
    /// Dispatch the network-layer pre-routing stage, then call
    /// [`FrameClassifier::post_prerouting`].
    RunNetPreRouting,
}

/// Outcome of the post-prerouting decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostPreRoutingAction {
    /// Re-enter bridge pre-routing on the physical ingress port.
    ReenterBridged,
    /// Continue normal bridge ingress processing.
    ContinueIngress,
    Drop,
}

/// Outcome of the bridge forward hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardAction {
    Skip,
    /// Dispatch the network-layer forward stage with the physical
    /// devices, so device-match rules see real interfaces.
    RunNetForward {
        in_device: DeviceId,
        out_device: DeviceId,
    },
}

/// Outcome of the bridge local-out hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalOutAction {
    Skip,
    /// A bridged frame being finished: resume at the forward hook.
    ResumeForward {
        in_device: DeviceId,
        out_device: DeviceId,
    },
    /// Routed or locally originated: run the local-out stage.
    RunNetLocalOut { out_device: DeviceId },
}

/// Outcome of the bridge post-routing hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostRoutingAction {
    Skip,
    /// Dispatch the network-layer post-routing stage, then call
    /// [`FrameClassifier::finish_post_routing`].
    RunNetPostRouting { out_device: DeviceId },
}

/// Verdict of a re-entrancy guard on a network-layer stage dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SabotageAction {
    /// The dispatch is legitimate, let the stage run.
    RunStage,
    /// The bridge already owns this frame: invoke its pending
    /// continuation directly and report the frame handled.
    InvokeContinuation,
}

/// Network-layer stages guarded on the output side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetStage {
    Forward,
    LocalOut,
    PostRouting,
}

/// Classifies frames crossing a software bridge as bridged, routed, or
/// locally originated, steering each through the hook sequence once.
#[derive(Debug)]
pub struct FrameClassifier<R: RouteLookup, O: AddressOwnership, C: Clock> {
    devices: DeviceTable,
    routing: RoutingDecisionEngine<R, C>,
    ownership: O,
    /// Shared sentinel attached to frames that saw no destination
    /// rewrite, so downstream consumers never observe a missing route.
    /// Distinguished from real routes by pointer identity.
    placeholder: Arc<RouteHandle>,
    metrics: Arc<ClassifierMetrics>,
}

impl<R: RouteLookup, O: AddressOwnership, C: Clock> FrameClassifier<R, O, C> {
    pub fn new(
        devices: DeviceTable,
        routes: R,
        ownership: O,
        clock: C,
        warn_interval: Duration,
    ) -> Self {
        Self {
            devices,
            routing: RoutingDecisionEngine::new(routes, clock, warn_interval),
            ownership,
            placeholder: Arc::new(RouteHandle {
                out_device: DeviceId(u32::MAX),
            }),
            metrics: Arc::new(ClassifierMetrics::new()),
        }
    }

    pub fn devices(&self) -> &DeviceTable {
        &self.devices
    }

    pub fn metrics(&self) -> Arc<ClassifierMetrics> {
        Arc::clone(&self.metrics)
    }

    /// First bridge hook. Validates structure, records the original
    /// destination and the physical ingress port, and retags the frame
    /// with the bridge's logical device before the network-layer
    /// pre-routing stage runs.
    pub fn ingress(&self, frame: &mut TaggedFrame) -> IngressAction {
        if !frame.is_ipv4() {
            self.metrics.frames_passed.inc();
            return IngressAction::Pass;
        }

        let (dst, frame_len) = {
            let payload = &frame.data()[ethernet::HEADER_LEN..];
            let header = match Ipv4Header::parse(payload) {
                Ok(header) => header,
                Err(e) => return self.drop_malformed(&e.to_string()),
            };
            if !header.validate_checksum() {
                return self.drop_malformed("bad header checksum");
            }
            let total = header.total_length() as usize;
            if total < header.header_len() || total > payload.len() {
                return self.drop_malformed("declared length inconsistent with capture");
            }
            (header.dst_addr(), ethernet::HEADER_LEN + total)
        };

        frame.truncate(frame_len);
        frame.orig_dst = Some(dst);
        frame.phys_in = Some(frame.device);
        frame.device = self
            .devices
            .bridge_parent(frame.device)
            .unwrap_or(frame.device);
        frame.pending = Some(PendingStage::PreRoutingFinish);
        IngressAction::RunNetPreRouting
    }

    fn drop_malformed(&self, reason: &str) -> IngressAction {
        debug!(reason, "dropping malformed frame at ingress");
        self.metrics.dropped_malformed.inc();
        IngressAction::Drop
    }

    /// Continuation after the network-layer pre-routing stage, where a
    /// target may have rewritten the destination address. Decides the
    /// frame's disposition and resets its device to the physical
    /// ingress port.
    pub fn post_prerouting(&mut self, frame: &mut TaggedFrame) -> PostPreRoutingAction {
        frame.pending = None;
        let ingress_device = frame.device;

        let (Some(dst), Some(src), Some(tos)) =
            (frame.ipv4_dst(), frame.ipv4_src(), frame.ipv4_tos())
        else {
            self.metrics.dropped_malformed.inc();
            return PostPreRoutingAction::Drop;
        };

        if frame.orig_dst == Some(dst) {
            frame.route = Some(Arc::clone(&self.placeholder));
            if let Some(phys_in) = frame.phys_in {
                frame.device = phys_in;
            }
            return PostPreRoutingAction::ContinueIngress;
        }

        match self
            .routing
            .decide_rewritten(dst, src, tos, ingress_device, &self.metrics)
        {
            RewriteDecision::Bridged(route) => {
                frame.route = Some(Arc::new(route));
                frame.disposition = Disposition::Bridged;
                if let Some(phys_in) = frame.phys_in {
                    frame.device = phys_in;
                }
                frame.pending = Some(PendingStage::PreRoutingFinishBridge);
                self.metrics.frames_bridged.inc();
                PostPreRoutingAction::ReenterBridged
            }
            RewriteDecision::Routed(route) => {
                frame.route = Some(Arc::new(route));
                frame.disposition = Disposition::Routed;
                // Retarget the link layer at the bridge itself so the
                // upper routing stack accepts and delivers the packet.
                if let Some(mac) = self.devices.hw_addr(ingress_device) {
                    frame.set_dst_mac(mac);
                }
                if let Some(phys_in) = frame.phys_in {
                    frame.device = phys_in;
                }
                self.metrics.frames_routed.inc();
                PostPreRoutingAction::ContinueIngress
            }
            RewriteDecision::Drop => {
                self.metrics.dropped_no_route.inc();
                PostPreRoutingAction::Drop
            }
        }
    }

    /// Local delivery needs a real route resolved by the ordinary
    /// stack, so the placeholder is detached here.
    pub fn local_in(&self, frame: &mut TaggedFrame) {
        if !frame.is_ipv4() {
            return;
        }
        if let Some(route) = &frame.route {
            if Arc::ptr_eq(route, &self.placeholder) {
                frame.route = None;
                self.metrics.frames_local.inc();
            }
        }
    }

    /// Bridge forward hook. Processes only frames that went through the
    /// post-prerouting decision; a frame with no recorded physical
    /// ingress was exempted by [`FrameClassifier::local_out`].
    pub fn forward(&self, frame: &mut TaggedFrame, out_device: DeviceId) -> ForwardAction {
        if !frame.is_ipv4() {
            return ForwardAction::Skip;
        }
        let Some(in_device) = frame.phys_in else {
            return ForwardAction::Skip;
        };
        frame.phys_out = Some(out_device);
        frame.pending = Some(PendingStage::ForwardFinish);
        ForwardAction::RunNetForward {
            in_device,
            out_device,
        }
    }

    /// Bridge local-out hook. Selects between finishing a bridged frame
    /// at the forward hook and running the local-out stage, keyed on
    /// the disposition set by the post-prerouting decision.
    pub fn local_out(&self, frame: &mut TaggedFrame, out_device: DeviceId) -> LocalOutAction {
        if !frame.is_ipv4() || frame.route.is_none() {
            return LocalOutAction::Skip;
        }
        frame.phys_out = Some(out_device);
        match (frame.disposition, frame.phys_in) {
            (Disposition::Bridged, Some(in_device)) => {
                // Exempt the frame from the forward hook, which would
                // otherwise reprocess it on resumption.
                frame.phys_in = None;
                frame.pending = Some(PendingStage::ForwardFinish);
                LocalOutAction::ResumeForward {
                    in_device,
                    out_device,
                }
            }
            _ => {
                frame.pending = Some(PendingStage::LocalOutFinish);
                LocalOutAction::RunNetLocalOut { out_device }
            }
        }
    }

    /// Bridge post-routing hook. The bounds check runs before anything
    /// else; a frame that fails it is accepted unmodified rather than
    /// risk reading outside the captured region.
    pub fn post_routing(&self, frame: &mut TaggedFrame, out_device: DeviceId) -> PostRoutingAction {
        if frame.data().len() < ethernet::HEADER_LEN {
            warn!(
                device = %frame.device,
                name = self.devices.name(frame.device).unwrap_or("unknown"),
                "link-layer header outside captured region, accepting frame unmodified"
            );
            self.metrics.header_anomalies.inc();
            return PostRoutingAction::Skip;
        }
        if !frame.is_ipv4() || frame.route.is_none() {
            return PostRoutingAction::Skip;
        }
        frame.orig_src = frame.ipv4_src();
        frame.phys_out = Some(out_device);
        frame.pending = Some(PendingStage::PostRoutingFinish);
        PostRoutingAction::RunNetPostRouting { out_device }
    }

    /// Continuation after the network-layer post-routing stage. If
    /// source NAT rewrote the address to one the host owns, the
    /// link-layer source becomes the bridge's own hardware address.
    pub fn finish_post_routing(&self, frame: &mut TaggedFrame) {
        frame.pending = None;
        let (Some(orig), Some(current)) = (frame.orig_src, frame.ipv4_src()) else {
            return;
        };
        if current == orig || !self.ownership.is_locally_owned(current) {
            return;
        }
        let device = frame.phys_out.unwrap_or(frame.device);
        let logical = self.devices.bridge_parent(device).unwrap_or(device);
        if let Some(mac) = self.devices.hw_addr(logical) {
            frame.set_src_mac(mac);
        }
    }

    /// Guard on the network-layer pre-routing stage: a frame entering
    /// through a bridge device already passed that stage at ingress, so
    /// any dispatch other than the one ingress installed is executed
    /// directly instead of re-running the stage.
    pub fn sabotage_in(&self, frame: &TaggedFrame, in_device: DeviceId) -> SabotageAction {
        if self.devices.is_bridge(in_device)
            && frame.pending != Some(PendingStage::PreRoutingFinish)
        {
            return SabotageAction::InvokeContinuation;
        }
        SabotageAction::RunStage
    }

    /// Guard on the output-side network-layer stages: execution is
    /// postponed until the bridge's own forward or local-out decision
    /// has determined the physical devices. A forward-stage frame the
    /// bridge has not seen yet gets its physical ingress backfilled.
    pub fn sabotage_out(
        &self,
        frame: &mut TaggedFrame,
        stage: NetStage,
        in_device: Option<DeviceId>,
        out_device: DeviceId,
    ) -> SabotageAction {
        if !self.devices.is_bridge(out_device) {
            return SabotageAction::RunStage;
        }
        if matches!(
            frame.pending,
            Some(
                PendingStage::ForwardFinish
                    | PendingStage::LocalOutFinish
                    | PendingStage::PostRoutingFinish
            )
        ) {
            return SabotageAction::RunStage;
        }
        if stage == NetStage::Forward && frame.phys_in.is_none() {
            frame.phys_in = in_device;
        }
        SabotageAction::InvokeContinuation
    }
}
