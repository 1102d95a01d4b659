use std::{
    io::{self, Error, ErrorKind},
    net::Ipv6Addr,
};

use crate::lladdr::{LLAddress, ARPHRD_ETHER};

/// Ethernet protocol number for IPv6.
pub const ETHERTYPE_IPV6: u16 = 0x86dd;
/// Length of an Ethernet II header.
pub const ETHER_HDR_LEN: usize = 14;
/// Length of the fixed IPv6 header.
pub const IPV6_HDR_LEN: usize = 40;

/// The parsed Ethernet and IPv6 header fields of a frame.
///
/// This view is what the raw socket produces on receive and consumes on
/// send; frames are never assembled outside of it. `flow` carries the
/// first 32 bits of the IPv6 header (version, traffic class and flow
/// label) verbatim, so proxied packets keep the class and label the
/// original sender chose.
#[derive(Debug, Clone, PartialEq)]
pub struct Ipv6EtherHeader {
    pub dst_ll: LLAddress,
    pub src_ll: LLAddress,
    pub flow: u32,
    pub next_header: u8,
    pub hop_limit: u8,
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
}

impl Ipv6EtherHeader {
    /// A header template with the plain version-6 flow word and
    /// unresolved link-layer addresses.
    pub fn new(src: Ipv6Addr, dst: Ipv6Addr, next_header: u8, hop_limit: u8) -> Self {
        Ipv6EtherHeader {
            dst_ll: LLAddress::Invalid,
            src_ll: LLAddress::Invalid,
            flow: 0x6000_0000,
            next_header,
            hop_limit,
            src,
            dst,
        }
    }

    /// Serializes the 40-byte IPv6 header for a payload of `payload_len`
    /// bytes. Used both for frame assembly and for the echoed header in
    /// ICMPv6 error messages.
    pub fn write_ipv6(&self, payload_len: u16, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.flow.to_be_bytes());
        out.extend_from_slice(&payload_len.to_be_bytes());
        out.push(self.next_header);
        out.push(self.hop_limit);
        out.extend_from_slice(&self.src.octets());
        out.extend_from_slice(&self.dst.octets());
    }
}

/// Parses the Ethernet and IPv6 headers of `frame`, returning the header
/// view and the IPv6 payload. The payload is cut to the length declared
/// by the IPv6 header; a declared length past the end of the frame is a
/// parse error.
pub fn parse_frame(frame: &[u8]) -> io::Result<(Ipv6EtherHeader, &[u8])> {
    if frame.len() < ETHER_HDR_LEN + IPV6_HDR_LEN {
        return Err(Error::new(
            ErrorKind::InvalidData,
            "frame shorter than ethernet and IPv6 headers",
        ));
    }

    let ether_type = u16::from_be_bytes([frame[12], frame[13]]);
    if ether_type != ETHERTYPE_IPV6 {
        return Err(Error::new(ErrorKind::InvalidData, "ethertype is not IPv6"));
    }

    let ip = &frame[ETHER_HDR_LEN..];
    let flow = u32::from_be_bytes([ip[0], ip[1], ip[2], ip[3]]);
    if flow >> 28 != 6 {
        return Err(Error::new(ErrorKind::InvalidData, "IP version is not 6"));
    }

    let payload_len = usize::from(u16::from_be_bytes([ip[4], ip[5]]));
    let payload = &ip[IPV6_HDR_LEN..];
    if payload_len > payload.len() {
        return Err(Error::new(ErrorKind::InvalidData, "truncated IPv6 payload"));
    }

    let mut src = [0u8; 16];
    let mut dst = [0u8; 16];
    src.copy_from_slice(&ip[8..24]);
    dst.copy_from_slice(&ip[24..40]);

    let header = Ipv6EtherHeader {
        dst_ll: LLAddress::from_bytes(ARPHRD_ETHER, &frame[0..6]),
        src_ll: LLAddress::from_bytes(ARPHRD_ETHER, &frame[6..12]),
        flow,
        next_header: ip[6],
        hop_limit: ip[7],
        src: Ipv6Addr::from(src),
        dst: Ipv6Addr::from(dst),
    };
    Ok((header, &payload[..payload_len]))
}

/// Assembles a full Ethernet frame from the header view and payload.
/// Both link-layer addresses must be 6-byte addresses.
pub fn build_frame(header: &Ipv6EtherHeader, payload: &[u8]) -> io::Result<Vec<u8>> {
    if header.dst_ll.len() != 6 || header.src_ll.len() != 6 {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            "frame requires EUI-48 link-layer addresses",
        ));
    }
    if payload.len() > usize::from(u16::MAX) {
        return Err(Error::new(ErrorKind::InvalidInput, "payload too large"));
    }

    let mut frame = Vec::with_capacity(ETHER_HDR_LEN + IPV6_HDR_LEN + payload.len());
    frame.extend_from_slice(header.dst_ll.as_slice());
    frame.extend_from_slice(header.src_ll.as_slice());
    frame.extend_from_slice(&ETHERTYPE_IPV6.to_be_bytes());
    header.write_ipv6(payload.len() as u16, &mut frame);
    frame.extend_from_slice(payload);
    Ok(frame)
}
