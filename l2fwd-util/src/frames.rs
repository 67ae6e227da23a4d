//! Frame builders on top of `smoltcp::wire`, used by the traffic generator
//! and the tests.
//!
//! UDP frames carry a 32-bit big-endian sequence number at the start of the
//! payload so tests and the traffic sink can check ordering.

use smoltcp::wire::{
    ArpOperation, ArpPacket, ArpRepr, EthernetAddress, EthernetFrame, EthernetProtocol,
    IpProtocol, Ipv4Address, Ipv4Packet, UdpPacket,
};

/// Source MAC of generated traffic
pub const GEN_SRC_MAC: EthernetAddress = EthernetAddress([0x00, 0x50, 0x56, 0xae, 0x76, 0xf5]);

/// Destination MAC of generated traffic
pub const GEN_DST_MAC: EthernetAddress = EthernetAddress([0x00, 0x0b, 0x86, 0x64, 0x8b, 0xa0]);

pub const GEN_SRC_IP: Ipv4Address = Ipv4Address::new(192, 168, 29, 58);
pub const GEN_DST_IP: Ipv4Address = Ipv4Address::new(192, 168, 29, 160);

pub const ETH_HEADER_LEN: usize = 14;
const IPV4_HEADER_LEN: usize = 20;
const UDP_HEADER_LEN: usize = 8;

/// Length of the Ethernet, IPv4 and UDP headers together.
pub const UDP_HEADERS_LEN: usize = ETH_HEADER_LEN + IPV4_HEADER_LEN + UDP_HEADER_LEN;

/// Smallest payload that holds a sequence number.
pub const MIN_PAYLOAD_LEN: usize = 4;

/// Ethernet/IPv4/UDP frame template.
///
/// The payload always has room for the sequence number.
#[derive(Debug, Clone, Copy)]
pub struct UdpFrame {
    src_mac: EthernetAddress,
    dst_mac: EthernetAddress,
    src_ip: Ipv4Address,
    dst_ip: Ipv4Address,
    src_port: u16,
    dst_port: u16,
    payload_len: usize,
}

impl Default for UdpFrame {
    fn default() -> Self {
        Self {
            src_mac: GEN_SRC_MAC,
            dst_mac: GEN_DST_MAC,
            src_ip: GEN_SRC_IP,
            dst_ip: GEN_DST_IP,
            src_port: 60376,
            dst_port: 161,
            payload_len: 18,
        }
    }
}

impl UdpFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn macs(mut self, src: EthernetAddress, dst: EthernetAddress) -> Self {
        self.src_mac = src;
        self.dst_mac = dst;
        self
    }

    pub fn ips(mut self, src: Ipv4Address, dst: Ipv4Address) -> Self {
        self.src_ip = src;
        self.dst_ip = dst;
        self
    }

    pub fn ports(mut self, src: u16, dst: u16) -> Self {
        self.src_port = src;
        self.dst_port = dst;
        self
    }

    pub fn src_mac(&self) -> EthernetAddress {
        self.src_mac
    }

    pub fn dst_mac(&self) -> EthernetAddress {
        self.dst_mac
    }

    /// Payload length, raised to [`MIN_PAYLOAD_LEN`] if shorter.
    pub fn payload_len(mut self, len: usize) -> Self {
        self.payload_len = len.max(MIN_PAYLOAD_LEN);
        self
    }

    pub fn frame_len(&self) -> usize {
        UDP_HEADERS_LEN + self.payload_len
    }

    /// Build a frame tagged with `seq`.
    pub fn build(&self, seq: u32) -> Vec<u8> {
        let mut buf = vec![0u8; self.frame_len()];
        self.write(&mut buf, seq);
        buf
    }

    /// Write a frame tagged with `seq` into the start of `buf`.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is shorter than [`UdpFrame::frame_len`].
    pub fn write(&self, buf: &mut [u8], seq: u32) {
        let udp_len = UDP_HEADER_LEN + self.payload_len;

        let mut frame = EthernetFrame::new_unchecked(&mut buf[..]);
        frame.set_src_addr(self.src_mac);
        frame.set_dst_addr(self.dst_mac);
        frame.set_ethertype(EthernetProtocol::Ipv4);

        let mut ipv4_pkt = Ipv4Packet::new_unchecked(frame.payload_mut());
        ipv4_pkt.set_version(4);
        ipv4_pkt.set_header_len(IPV4_HEADER_LEN as u8);
        ipv4_pkt.set_dscp(0);
        ipv4_pkt.set_ecn(0);
        ipv4_pkt.set_total_len((IPV4_HEADER_LEN + udp_len) as u16);
        ipv4_pkt.set_ident(seq as u16);
        ipv4_pkt.clear_flags();
        ipv4_pkt.set_frag_offset(0);
        ipv4_pkt.set_hop_limit(64);
        ipv4_pkt.set_next_header(IpProtocol::Udp);
        ipv4_pkt.set_src_addr(self.src_ip);
        ipv4_pkt.set_dst_addr(self.dst_ip);
        ipv4_pkt.fill_checksum();

        let mut udp_pkt = UdpPacket::new_unchecked(ipv4_pkt.payload_mut());
        udp_pkt.set_src_port(self.src_port);
        udp_pkt.set_dst_port(self.dst_port);
        udp_pkt.set_len(udp_len as u16);
        udp_pkt.set_checksum(0);
        let payload = udp_pkt.payload_mut();
        payload[..MIN_PAYLOAD_LEN].copy_from_slice(&seq.to_be_bytes());
    }
}

/// Read the sequence number of a frame built by [`UdpFrame`].
///
/// Returns `None` for anything that is not a well-formed IPv4/UDP frame.
pub fn frame_seq(buf: &[u8]) -> Option<u32> {
    let frame = EthernetFrame::new_checked(buf).ok()?;
    if frame.ethertype() != EthernetProtocol::Ipv4 {
        return None;
    }
    let ipv4_pkt = Ipv4Packet::new_checked(frame.payload()).ok()?;
    if ipv4_pkt.next_header() != IpProtocol::Udp {
        return None;
    }
    let udp_pkt = UdpPacket::new_checked(ipv4_pkt.payload()).ok()?;
    let seq = udp_pkt.payload().get(..MIN_PAYLOAD_LEN)?;
    Some(u32::from_be_bytes([seq[0], seq[1], seq[2], seq[3]]))
}

/// Broadcast ARP request for `target_ip`.
pub fn arp_request(src_mac: EthernetAddress, src_ip: Ipv4Address, target_ip: Ipv4Address) -> Vec<u8> {
    let repr = ArpRepr::EthernetIpv4 {
        operation: ArpOperation::Request,
        source_hardware_addr: src_mac,
        source_protocol_addr: src_ip,
        target_hardware_addr: EthernetAddress([0; 6]),
        target_protocol_addr: target_ip,
    };
    let mut buf = vec![0u8; ETH_HEADER_LEN + repr.buffer_len()];
    let mut frame = EthernetFrame::new_unchecked(&mut buf[..]);
    frame.set_src_addr(src_mac);
    frame.set_dst_addr(EthernetAddress::BROADCAST);
    frame.set_ethertype(EthernetProtocol::Arp);
    repr.emit(&mut ArpPacket::new_unchecked(frame.payload_mut()));
    buf
}

/// `len` bytes that start with an Ethernet header when `len` allows one.
/// Shorter lengths give a runt filled with `0xee`.
pub fn raw_frame(dst: EthernetAddress, src: EthernetAddress, len: usize) -> Vec<u8> {
    let mut buf = vec![0xeeu8; len];
    if len >= ETH_HEADER_LEN {
        let mut frame = EthernetFrame::new_unchecked(&mut buf[..]);
        frame.set_dst_addr(dst);
        frame.set_src_addr(src);
        frame.set_ethertype(EthernetProtocol::Unknown(0x88b5));
    }
    buf
}

/// Source and destination MAC of a frame, or `None` for a runt.
pub fn macs(buf: &[u8]) -> Option<(EthernetAddress, EthernetAddress)> {
    let frame = EthernetFrame::new_checked(buf).ok()?;
    Some((frame.src_addr(), frame.dst_addr()))
}
