//! Frame traversal state and the device registry
//!
//! A [`TaggedFrame`] owns the captured bytes plus everything the hook
//! sequence needs to carry between stages: the current device identity,
//! the physical ingress/egress ports, the addresses recorded before NAT
//! could rewrite them, the classification tag, the attached route, and
//! the pending continuation consumed by the re-entrancy guards.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::dataplane::routing::RouteHandle;
use crate::protocol::ethernet::{self, Frame, FrameMut};
use crate::protocol::ipv4::{Ipv4Header, Ipv4Packet};
use crate::protocol::{EtherType, MacAddr};
use crate::{Error, Result};

/// Opaque device identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a device is a logical bridge or one of its member ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Bridge,
    Port,
}

/// One registered device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub hw_addr: MacAddr,
    pub kind: DeviceKind,
    /// The logical bridge this port belongs to. `None` for bridge
    /// devices themselves and for ports outside any bridge.
    pub bridge: Option<DeviceId>,
}

/// Registry of the devices the classifier can see.
#[derive(Debug, Default)]
pub struct DeviceTable {
    devices: HashMap<DeviceId, DeviceInfo>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: DeviceId, info: DeviceInfo) {
        self.devices.insert(id, info);
    }

    pub fn get(&self, id: DeviceId) -> Option<&DeviceInfo> {
        self.devices.get(&id)
    }

    pub fn lookup_name(&self, name: &str) -> Option<DeviceId> {
        self.devices
            .iter()
            .find(|(_, info)| info.name == name)
            .map(|(id, _)| *id)
    }

    pub fn name(&self, id: DeviceId) -> Option<&str> {
        self.devices.get(&id).map(|d| d.name.as_str())
    }

    pub fn hw_addr(&self, id: DeviceId) -> Option<MacAddr> {
        self.devices.get(&id).map(|d| d.hw_addr)
    }

    pub fn bridge_parent(&self, id: DeviceId) -> Option<DeviceId> {
        self.devices.get(&id).and_then(|d| d.bridge)
    }

    pub fn is_bridge(&self, id: DeviceId) -> bool {
        self.devices
            .get(&id)
            .is_some_and(|d| d.kind == DeviceKind::Bridge)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// How the classifier has tagged the frame so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disposition {
    /// Never classified, or generated by the local host.
    #[default]
    LocalOrigin,
    /// Destination rewrite resolved back onto the ingress bridge.
    Bridged,
    /// Destination rewrite resolved to another device.
    Routed,
}

/// Continuation installed before handing the frame to a network-layer
/// stage. The sabotage guards compare against this to decide whether a
/// stage dispatch is the bridge's own or a spurious generic one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingStage {
    PreRoutingFinish,
    PreRoutingFinishBridge,
    ForwardFinish,
    LocalOutFinish,
    PostRoutingFinish,
}

/// A captured frame plus its traversal state.
#[derive(Debug)]
pub struct TaggedFrame {
    data: Vec<u8>,
    /// Device the frame is currently attributed to. Rewritten to the
    /// bridge's logical device at ingress, reset to the physical port
    /// once the pre-routing decision is made.
    pub device: DeviceId,
    /// Physical port the frame actually arrived on.
    pub phys_in: Option<DeviceId>,
    /// Physical port selected for transmission.
    pub phys_out: Option<DeviceId>,
    /// Destination address recorded at ingress, before NAT.
    pub orig_dst: Option<Ipv4Addr>,
    /// Source address recorded at post-routing, before NAT.
    pub orig_src: Option<Ipv4Addr>,
    pub disposition: Disposition,
    /// Attached route, real or the shared placeholder sentinel.
    pub route: Option<Arc<RouteHandle>>,
    pub pending: Option<PendingStage>,
}

impl TaggedFrame {
    pub fn new(data: Vec<u8>, device: DeviceId) -> Self {
        Self {
            data,
            device,
            phys_in: None,
            phys_out: None,
            orig_dst: None,
            orig_src: None,
            disposition: Disposition::LocalOrigin,
            route: None,
            pending: None,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    pub fn ethertype(&self) -> Option<u16> {
        Frame::parse(&self.data).ok().map(|f| f.ethertype())
    }

    pub fn is_ipv4(&self) -> bool {
        self.ethertype() == Some(EtherType::Ipv4 as u16)
    }

    pub fn dst_mac(&self) -> Option<MacAddr> {
        Frame::parse(&self.data).ok().map(|f| f.dst_mac())
    }

    pub fn src_mac(&self) -> Option<MacAddr> {
        Frame::parse(&self.data).ok().map(|f| f.src_mac())
    }

    /// Rewrites the link-layer destination. No-op on a frame too short
    /// to carry a link-layer header.
    pub fn set_dst_mac(&mut self, mac: MacAddr) {
        if let Ok(mut eth) = FrameMut::parse(&mut self.data) {
            eth.set_dst_mac(mac);
        }
    }

    /// Rewrites the link-layer source. No-op on a frame too short to
    /// carry a link-layer header.
    pub fn set_src_mac(&mut self, mac: MacAddr) {
        if let Ok(mut eth) = FrameMut::parse(&mut self.data) {
            eth.set_src_mac(mac);
        }
    }

    fn ipv4_payload(&self) -> Option<&[u8]> {
        self.data.get(ethernet::HEADER_LEN..)
    }

    pub fn ipv4_dst(&self) -> Option<Ipv4Addr> {
        let header = Ipv4Header::parse(self.ipv4_payload()?).ok()?;
        Some(header.dst_addr())
    }

    pub fn ipv4_src(&self) -> Option<Ipv4Addr> {
        let header = Ipv4Header::parse(self.ipv4_payload()?).ok()?;
        Some(header.src_addr())
    }

    pub fn ipv4_tos(&self) -> Option<u8> {
        let header = Ipv4Header::parse(self.ipv4_payload()?).ok()?;
        Some(header.tos())
    }

    /// Rewrites the IPv4 destination address, updating the header
    /// checksum. This is what a destination-NAT target does to the
    /// frame during the network-layer pre-routing stage.
    pub fn set_ipv4_dst(&mut self, addr: Ipv4Addr) -> Result<()> {
        self.rewrite_ipv4(|packet| packet.set_dst_addr(addr))
    }

    /// Rewrites the IPv4 source address, updating the header checksum.
    pub fn set_ipv4_src(&mut self, addr: Ipv4Addr) -> Result<()> {
        self.rewrite_ipv4(|packet| packet.set_src_addr(addr))
    }

    fn rewrite_ipv4(&mut self, apply: impl FnOnce(&mut Ipv4Packet)) -> Result<()> {
        let payload = self
            .data
            .get(ethernet::HEADER_LEN..)
            .ok_or_else(|| Error::MalformedFrame("frame too short for link-layer header".into()))?;
        let mut packet = Ipv4Packet::from_bytes(payload)?;
        apply(&mut packet);
        self.data[ethernet::HEADER_LEN..].copy_from_slice(packet.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ethernet::FrameBuilder;
    use crate::protocol::ipv4::{checksum, MIN_HEADER_SIZE};

    fn ipv4_payload(src: Ipv4Addr, dst: Ipv4Addr) -> Vec<u8> {
        let mut packet = vec![0u8; MIN_HEADER_SIZE + 8];
        packet[0] = 0x45;
        let total_len = packet.len() as u16;
        packet[2..4].copy_from_slice(&total_len.to_be_bytes());
        packet[8] = 64;
        packet[9] = 17;
        packet[12..16].copy_from_slice(&src.octets());
        packet[16..20].copy_from_slice(&dst.octets());
        let sum = checksum(&packet[..MIN_HEADER_SIZE]);
        packet[10..12].copy_from_slice(&sum.to_be_bytes());
        packet
    }

    fn sample_frame() -> TaggedFrame {
        let data = FrameBuilder::new()
            .dst_mac(MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]))
            .src_mac(MacAddr([0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb]))
            .ethertype(EtherType::Ipv4 as u16)
            .payload(&ipv4_payload(
                "10.0.0.1".parse().unwrap(),
                "10.0.0.5".parse().unwrap(),
            ))
            .build();
        TaggedFrame::new(data, DeviceId(1))
    }

    #[test]
    fn test_frame_accessors() {
        let frame = sample_frame();
        assert!(frame.is_ipv4());
        assert_eq!(frame.ipv4_src(), Some("10.0.0.1".parse().unwrap()));
        assert_eq!(frame.ipv4_dst(), Some("10.0.0.5".parse().unwrap()));
        assert_eq!(frame.ipv4_tos(), Some(0));
        assert_eq!(frame.disposition, Disposition::LocalOrigin);
        assert!(frame.route.is_none());
    }

    #[test]
    fn test_rewrite_dst_keeps_checksum_valid() {
        let mut frame = sample_frame();
        frame.set_ipv4_dst("10.0.0.9".parse().unwrap()).unwrap();

        assert_eq!(frame.ipv4_dst(), Some("10.0.0.9".parse().unwrap()));
        let header = Ipv4Header::parse(&frame.data()[ethernet::HEADER_LEN..]).unwrap();
        assert!(header.validate_checksum());
    }

    #[test]
    fn test_rewrite_macs() {
        let mut frame = sample_frame();
        let mac = MacAddr([0x02, 0, 0, 0, 0, 0x10]);
        frame.set_dst_mac(mac);
        frame.set_src_mac(mac);
        assert_eq!(frame.dst_mac(), Some(mac));
        assert_eq!(frame.src_mac(), Some(mac));
    }

    #[test]
    fn test_short_frame_has_no_ipv4_view() {
        let frame = TaggedFrame::new(vec![0u8; 4], DeviceId(1));
        assert_eq!(frame.ethertype(), None);
        assert!(!frame.is_ipv4());
        assert_eq!(frame.ipv4_dst(), None);
    }

    #[test]
    fn test_device_table_lookups() {
        let mut table = DeviceTable::new();
        table.insert(
            DeviceId(10),
            DeviceInfo {
                name: "br0".into(),
                hw_addr: MacAddr([2, 0, 0, 0, 0, 0x10]),
                kind: DeviceKind::Bridge,
                bridge: None,
            },
        );
        table.insert(
            DeviceId(1),
            DeviceInfo {
                name: "eth1".into(),
                hw_addr: MacAddr([2, 0, 0, 0, 0, 1]),
                kind: DeviceKind::Port,
                bridge: Some(DeviceId(10)),
            },
        );

        assert_eq!(table.bridge_parent(DeviceId(1)), Some(DeviceId(10)));
        assert_eq!(table.bridge_parent(DeviceId(10)), None);
        assert!(table.is_bridge(DeviceId(10)));
        assert!(!table.is_bridge(DeviceId(1)));
        assert!(!table.is_bridge(DeviceId(99)));
        assert_eq!(table.name(DeviceId(1)), Some("eth1"));
        assert_eq!(
            table.hw_addr(DeviceId(10)),
            Some(MacAddr([2, 0, 0, 0, 0, 0x10]))
        );
    }
}
