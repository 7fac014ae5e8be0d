//! Per-packet context and conversation keys.

use std::net::IpAddr;

use crate::config::ReassemblyConfig;

/// What the engine needs to know about the packet currently being decoded.
#[derive(Debug, Clone, Default)]
pub struct PacketInfo {
    /// Frame number of the packet (1-based in most captures).
    pub frame: u64,
    /// True on the second and later passes over the capture.
    pub visited: bool,
    /// Decode-layer number; distinguishes several decoders touching one frame.
    pub layer: u8,
    pub src_ip: Option<IpAddr>,
    pub dst_ip: Option<IpAddr>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub vlan_id: Option<u16>,
    pub interface_id: Option<u32>,
}

impl PacketInfo {
    /// Context for a first-pass visit of `frame`.
    pub fn new(frame: u64) -> Self {
        Self {
            frame,
            ..Default::default()
        }
    }

    /// Mark this context as belonging to a replay pass.
    pub fn visited(mut self, visited: bool) -> Self {
        self.visited = visited;
        self
    }

    pub fn with_layer(mut self, layer: u8) -> Self {
        self.layer = layer;
        self
    }

    pub fn with_addresses(mut self, src: IpAddr, dst: IpAddr) -> Self {
        self.src_ip = Some(src);
        self.dst_ip = Some(dst);
        self
    }

    pub fn with_ports(mut self, src: u16, dst: u16) -> Self {
        self.src_port = Some(src);
        self.dst_port = Some(dst);
        self
    }

    pub fn with_vlan(mut self, vlan_id: u16) -> Self {
        self.vlan_id = Some(vlan_id);
        self
    }

    pub fn with_interface(mut self, interface_id: u32) -> Self {
        self.interface_id = Some(interface_id);
        self
    }
}

/// Conversation key built from packet addresses.
///
/// Directional: fragments of one datagram always travel the same way, so
/// unlike a connection key the endpoints are not normalized.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct AddressKey {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub vlan_id: Option<u16>,
    pub interface_id: Option<u32>,
}

impl AddressKey {
    /// Key made of the two addresses only.
    pub fn new(src: IpAddr, dst: IpAddr) -> Self {
        Self {
            src,
            dst,
            src_port: None,
            dst_port: None,
            vlan_id: None,
            interface_id: None,
        }
    }

    /// Build a key from a packet, honouring the key strictness toggles.
    ///
    /// Returns `None` when the packet carries no addresses.
    pub fn from_packet(pinfo: &PacketInfo, config: &ReassemblyConfig) -> Option<Self> {
        let (src, dst) = (pinfo.src_ip?, pinfo.dst_ip?);
        Some(Self {
            src,
            dst,
            src_port: pinfo.src_port,
            dst_port: pinfo.dst_port,
            vlan_id: pinfo.vlan_id.filter(|_| config.key_includes_vlan),
            interface_id: pinfo.interface_id.filter(|_| config.key_includes_interface),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(a, b, c, d))
    }

    #[test]
    fn test_key_strictness() {
        let pinfo = PacketInfo::new(7)
            .with_addresses(ip(10, 0, 0, 1), ip(10, 0, 0, 2))
            .with_vlan(100)
            .with_interface(2);

        let strict = ReassemblyConfig {
            key_includes_interface: true,
            ..Default::default()
        };
        let key = AddressKey::from_packet(&pinfo, &strict).unwrap();
        assert_eq!(key.vlan_id, Some(100));
        assert_eq!(key.interface_id, Some(2));

        let loose = ReassemblyConfig::default().loose_keys();
        let key = AddressKey::from_packet(&pinfo, &loose).unwrap();
        assert_eq!(key, AddressKey::new(ip(10, 0, 0, 1), ip(10, 0, 0, 2)));
    }

    #[test]
    fn test_key_requires_addresses() {
        let pinfo = PacketInfo::new(1);
        assert!(AddressKey::from_packet(&pinfo, &ReassemblyConfig::default()).is_none());
    }
}
