//! Bridge frame data plane
//!
//! Per-frame, reentrant classification of link-layer frames crossing a
//! software bridge. The [`classifier::FrameClassifier`] drives the hook
//! sequence; route lookups and address ownership come from embedder
//! traits in [`routing`].

pub mod classifier;
pub mod frame;
pub mod limiter;
pub mod routing;

pub use classifier::{
    ForwardAction, FrameClassifier, IngressAction, LocalOutAction, NetStage, PostPreRoutingAction,
    PostRoutingAction, SabotageAction,
};
pub use frame::{DeviceId, DeviceInfo, DeviceKind, DeviceTable, Disposition, PendingStage, TaggedFrame};
pub use limiter::{Clock, RateLimiter, SystemClock};
pub use routing::{
    AddressOwnership, RewriteDecision, RouteHandle, RouteLookup, RoutingDecisionEngine,
};
