use std::{
    io::{self, Error, ErrorKind},
    net::Ipv6Addr,
    time::Duration,
};

use crate::lladdr::LLAddress;

// ND ICMPv6 message types, RFC 4861.
pub const ND_ROUTER_SOLICIT: u8 = 133;
pub const ND_ROUTER_ADVERT: u8 = 134;
pub const ND_NEIGHBOR_SOLICIT: u8 = 135;
pub const ND_NEIGHBOR_ADVERT: u8 = 136;
pub const ND_REDIRECT: u8 = 137;

// ND option types.
pub const OPT_SOURCE_LL_ADDR: u8 = 1;
pub const OPT_TARGET_LL_ADDR: u8 = 2;
pub const OPT_PREFIX_INFORMATION: u8 = 3;
pub const OPT_REDIRECTED_HEADER: u8 = 4;
pub const OPT_MTU: u8 = 5;

/// Option lengths are declared in units of 8 bytes.
const BYTES_PER_OPT_UNIT: usize = 8;
/// Length of the ICMPv6 header shared by all message types.
pub const ICMPV6_HDR_LEN: usize = 8;

// Router advertisement flag bits. Managed and Other from RFC 4861
// section 4.2, Proxy from RFC 4389 section 3.
const RA_FLAG_MANAGED: u8 = 0x80;
const RA_FLAG_OTHER: u8 = 0x40;
const RA_FLAG_PROXY: u8 = 0x04;

// Neighbor advertisement flag bits, RFC 4861 section 4.4.
const NA_FLAG_ROUTER: u8 = 0x80;
const NA_FLAG_SOLICITED: u8 = 0x40;
const NA_FLAG_OVERRIDE: u8 = 0x20;

// Prefix information flag bits, RFC 4861 section 4.6.2.
const PI_FLAG_ON_LINK: u8 = 0x80;
const PI_FLAG_AUTONOMOUS: u8 = 0x40;

/// Minimum (fixed-portion) length of a message of the given type, or
/// `None` for types that are not Neighbor Discovery.
pub fn type_min_length(nd_type: u8) -> Option<usize> {
    match nd_type {
        ND_ROUTER_SOLICIT => Some(8),
        ND_ROUTER_ADVERT => Some(16),
        ND_NEIGHBOR_SOLICIT => Some(24),
        ND_NEIGHBOR_ADVERT => Some(24),
        ND_REDIRECT => Some(40),
        _ => None,
    }
}

pub fn type_name(nd_type: u8) -> &'static str {
    match nd_type {
        ND_ROUTER_SOLICIT => "Router Solicitation",
        ND_ROUTER_ADVERT => "Router Advertisement",
        ND_NEIGHBOR_SOLICIT => "Neighbor Solicitation",
        ND_NEIGHBOR_ADVERT => "Neighbor Advertisement",
        ND_REDIRECT => "Redirect",
        _ => "Unknown Type",
    }
}

/// Minimum length of an option of the given type, or `None` for option
/// types this implementation does not recognize.
fn option_min_length(opt_type: u8) -> Option<usize> {
    match opt_type {
        OPT_SOURCE_LL_ADDR | OPT_TARGET_LL_ADDR => Some(8),
        OPT_PREFIX_INFORMATION => Some(32),
        OPT_REDIRECTED_HEADER => Some(8),
        OPT_MTU => Some(8),
        _ => None,
    }
}

/// A Neighbor Discovery ICMPv6 message.
///
/// The message is kept as the raw ICMPv6 bytes plus an index of its
/// options as `(type, offset)` pairs in order of occurrence. Accessors
/// decode fields out of the buffer on demand and mutators rewrite it in
/// place, so an unmodified message re-serializes byte-identically to its
/// input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdMessage {
    buf: Vec<u8>,
    opts: Vec<(u8, usize)>,
}

impl NdMessage {
    /// Parses a raw ICMPv6 payload into an ND message.
    ///
    /// Rejected outright: empty input, non-ND types, buffers shorter than
    /// the type's fixed portion, and total lengths that are not a
    /// multiple of 8. The option walk rejects the whole message for a
    /// zero-length option (RFC 4861 mandates a silent discard) or an
    /// option running past the buffer. A recognized fixed-size option
    /// declared shorter than its minimum is skipped without being
    /// indexed; oversize declarations and unknown option types are
    /// indexed as-is.
    pub fn parse(raw: &[u8]) -> io::Result<NdMessage> {
        if raw.is_empty() {
            return Err(Error::new(ErrorKind::InvalidData, "ND packet is empty"));
        }

        let nd_type = raw[0];
        let Some(min_len) = type_min_length(nd_type) else {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("unsupported ICMPv6 type {nd_type}"),
            ));
        };
        if raw.len() < min_len {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!(
                    "a {} must be at least {min_len} bytes, got {}",
                    type_name(nd_type),
                    raw.len()
                ),
            ));
        }
        if raw.len() % 8 != 0 {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "ND packet does not align on a 64-bit boundary",
            ));
        }

        let mut msg = NdMessage {
            buf: raw.to_vec(),
            opts: Vec::new(),
        };
        msg.index_options()?;
        Ok(msg)
    }

    fn index_options(&mut self) -> io::Result<()> {
        self.opts.clear();
        let min_len = type_min_length(self.nd_type()).unwrap_or(self.buf.len());

        let mut offset = min_len;
        while offset < self.buf.len() {
            let opt_type = self.buf[offset];
            let opt_len = usize::from(self.buf[offset + 1]) * BYTES_PER_OPT_UNIT;
            if opt_len == 0 {
                // RFC 4861: nodes MUST silently discard an ND packet that
                // contains an option with length zero.
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("zero-length option of type {opt_type}"),
                ));
            }
            if opt_len > self.buf.len() - offset {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    "option length is greater than remaining packet size",
                ));
            }

            match option_min_length(opt_type) {
                // Unknown options are indexed but carry no semantics.
                None => self.opts.push((opt_type, offset)),
                Some(opt_min) => {
                    // An undersized fixed-length option is dropped from
                    // the index; an oversize one is accepted as-is.
                    if opt_len >= opt_min {
                        self.opts.push((opt_type, offset));
                    }
                }
            }
            offset += opt_len;
        }
        Ok(())
    }

    // Constructors. Each starts from the zero-filled fixed portion with
    // only the type byte and parameter-derived fields set.

    pub fn router_solicit() -> NdMessage {
        NdMessage::fixed(ND_ROUTER_SOLICIT)
    }

    pub fn router_advert(
        cur_hop_limit: u8,
        managed: bool,
        other: bool,
        proxy: bool,
        router_lifetime: Duration,
        reachable_time: Duration,
        retransmit_timer: Duration,
    ) -> NdMessage {
        let mut msg = NdMessage::fixed(ND_ROUTER_ADVERT);
        msg.buf[4] = cur_hop_limit;
        msg.buf[5] = (if managed { RA_FLAG_MANAGED } else { 0 })
            | (if other { RA_FLAG_OTHER } else { 0 })
            | (if proxy { RA_FLAG_PROXY } else { 0 });
        msg.buf[6..8].copy_from_slice(&(router_lifetime.as_secs() as u16).to_be_bytes());
        msg.buf[8..12].copy_from_slice(&(reachable_time.as_millis() as u32).to_be_bytes());
        msg.buf[12..16].copy_from_slice(&(retransmit_timer.as_millis() as u32).to_be_bytes());
        msg
    }

    pub fn neighbor_solicit(target: Ipv6Addr) -> NdMessage {
        let mut msg = NdMessage::fixed(ND_NEIGHBOR_SOLICIT);
        msg.buf[8..24].copy_from_slice(&target.octets());
        msg
    }

    pub fn neighbor_advert(
        router: bool,
        solicited: bool,
        override_flag: bool,
        target: Ipv6Addr,
    ) -> NdMessage {
        let mut msg = NdMessage::fixed(ND_NEIGHBOR_ADVERT);
        msg.buf[4] = (if router { NA_FLAG_ROUTER } else { 0 })
            | (if solicited { NA_FLAG_SOLICITED } else { 0 })
            | (if override_flag { NA_FLAG_OVERRIDE } else { 0 });
        msg.buf[8..24].copy_from_slice(&target.octets());
        msg
    }

    pub fn redirect(target: Ipv6Addr, destination: Ipv6Addr) -> NdMessage {
        let mut msg = NdMessage::fixed(ND_REDIRECT);
        msg.buf[8..24].copy_from_slice(&target.octets());
        msg.buf[24..40].copy_from_slice(&destination.octets());
        msg
    }

    fn fixed(nd_type: u8) -> NdMessage {
        let mut buf = vec![0; type_min_length(nd_type).unwrap()];
        buf[0] = nd_type;
        NdMessage {
            buf,
            opts: Vec::new(),
        }
    }

    // Raw accessors.

    pub fn nd_type(&self) -> u8 {
        self.buf[0]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The ICMPv6 checksum field, as the 16-bit network-order word value.
    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.buf[2], self.buf[3]])
    }

    pub fn set_checksum(&mut self, checksum: u16) {
        self.buf[2..4].copy_from_slice(&checksum.to_be_bytes());
    }

    // Router advertisement fields.

    pub fn cur_hop_limit(&self) -> Option<u8> {
        self.ra().map(|buf| buf[4])
    }

    pub fn managed_flag(&self) -> Option<bool> {
        self.ra().map(|buf| buf[5] & RA_FLAG_MANAGED != 0)
    }

    pub fn other_flag(&self) -> Option<bool> {
        self.ra().map(|buf| buf[5] & RA_FLAG_OTHER != 0)
    }

    /// The RFC 4389 "Proxy" bit. Set on every RA that has already been
    /// proxied once; used for loop detection.
    pub fn proxy_flag(&self) -> Option<bool> {
        self.ra().map(|buf| buf[5] & RA_FLAG_PROXY != 0)
    }

    pub fn set_proxy_flag(&mut self, proxy: bool) -> bool {
        if self.nd_type() != ND_ROUTER_ADVERT {
            return false;
        }
        if proxy {
            self.buf[5] |= RA_FLAG_PROXY;
        } else {
            self.buf[5] &= !RA_FLAG_PROXY;
        }
        true
    }

    pub fn router_lifetime(&self) -> Option<Duration> {
        self.ra()
            .map(|buf| Duration::from_secs(u16::from_be_bytes([buf[6], buf[7]]).into()))
    }

    pub fn reachable_time(&self) -> Option<Duration> {
        self.ra().map(|buf| {
            Duration::from_millis(u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]).into())
        })
    }

    pub fn retransmit_timer(&self) -> Option<Duration> {
        self.ra().map(|buf| {
            Duration::from_millis(u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]).into())
        })
    }

    fn ra(&self) -> Option<&[u8]> {
        (self.nd_type() == ND_ROUTER_ADVERT).then_some(&self.buf[..])
    }

    // Fields shared by NS, NA and Redirect.

    /// The target address of an NS, NA or Redirect.
    pub fn target_address(&self) -> Option<Ipv6Addr> {
        match self.nd_type() {
            ND_NEIGHBOR_SOLICIT | ND_NEIGHBOR_ADVERT | ND_REDIRECT => {
                Some(read_addr(&self.buf[8..24]))
            }
            _ => None,
        }
    }

    /// The destination address field of a Redirect. This differs from the
    /// destination in the IPv6 header.
    pub fn destination_address(&self) -> Option<Ipv6Addr> {
        (self.nd_type() == ND_REDIRECT).then(|| read_addr(&self.buf[24..40]))
    }

    // Neighbor advertisement flags.

    pub fn router_flag(&self) -> Option<bool> {
        self.na().map(|buf| buf[4] & NA_FLAG_ROUTER != 0)
    }

    pub fn solicited_flag(&self) -> Option<bool> {
        self.na().map(|buf| buf[4] & NA_FLAG_SOLICITED != 0)
    }

    pub fn override_flag(&self) -> Option<bool> {
        self.na().map(|buf| buf[4] & NA_FLAG_OVERRIDE != 0)
    }

    fn na(&self) -> Option<&[u8]> {
        (self.nd_type() == ND_NEIGHBOR_ADVERT).then_some(&self.buf[..])
    }

    // Options.

    pub fn has_option(&self, opt_type: u8) -> bool {
        self.option_count(opt_type) > 0
    }

    pub fn option_count(&self, opt_type: u8) -> usize {
        self.opts.iter().filter(|(t, _)| *t == opt_type).count()
    }

    /// The raw bytes of the `index`-th occurrence of an option,
    /// including its type and length fields.
    pub fn raw_option(&self, opt_type: u8, index: usize) -> Option<&[u8]> {
        let offset = self.opt_offset(opt_type, index)?;
        let len = usize::from(self.buf[offset + 1]) * BYTES_PER_OPT_UNIT;
        Some(&self.buf[offset..offset + len])
    }

    /// Drops every option, truncating the message back to its fixed
    /// portion.
    pub fn clear_options(&mut self) {
        self.opts.clear();
        let min_len = type_min_length(self.nd_type()).unwrap_or(self.buf.len());
        self.buf.truncate(min_len);
    }

    fn opt_offset(&self, opt_type: u8, index: usize) -> Option<usize> {
        self.opts
            .iter()
            .filter(|(t, _)| *t == opt_type)
            .nth(index)
            .map(|&(_, offset)| offset)
    }

    // Source and target link-layer address options.

    pub fn has_source_ll_address(&self) -> bool {
        self.has_option(OPT_SOURCE_LL_ADDR)
    }

    pub fn source_ll_address(&self, index: usize) -> Option<LLAddress> {
        self.ll_option(OPT_SOURCE_LL_ADDR, index)
    }

    pub fn set_source_ll_address(&mut self, index: usize, addr: &LLAddress) -> bool {
        self.set_ll_option(OPT_SOURCE_LL_ADDR, index, addr)
    }

    pub fn push_source_ll_address(&mut self, addr: &LLAddress) -> bool {
        self.push_ll_option(OPT_SOURCE_LL_ADDR, addr)
    }

    pub fn has_target_ll_address(&self) -> bool {
        self.has_option(OPT_TARGET_LL_ADDR)
    }

    pub fn target_ll_address(&self, index: usize) -> Option<LLAddress> {
        self.ll_option(OPT_TARGET_LL_ADDR, index)
    }

    pub fn set_target_ll_address(&mut self, index: usize, addr: &LLAddress) -> bool {
        self.set_ll_option(OPT_TARGET_LL_ADDR, index, addr)
    }

    pub fn push_target_ll_address(&mut self, addr: &LLAddress) -> bool {
        self.push_ll_option(OPT_TARGET_LL_ADDR, addr)
    }

    fn ll_option(&self, opt_type: u8, index: usize) -> Option<LLAddress> {
        let raw = self.raw_option(opt_type, index)?;
        // Only EUI-48 payloads are understood; any other stored width
        // reads back as no address.
        if raw.len() - 2 != 6 {
            return None;
        }
        Some(LLAddress::from_bytes(
            crate::lladdr::ARPHRD_ETHER,
            &raw[2..8],
        ))
    }

    /// Overwrites the address stored in an existing option. The new
    /// address must have the same length as the stored one.
    fn set_ll_option(&mut self, opt_type: u8, index: usize, addr: &LLAddress) -> bool {
        if !addr.is_valid() {
            return false;
        }
        let Some(offset) = self.opt_offset(opt_type, index) else {
            return false;
        };
        let data_len = usize::from(self.buf[offset + 1]) * BYTES_PER_OPT_UNIT - 2;
        if addr.len() != data_len {
            return false;
        }
        self.buf[offset + 2..offset + 2 + data_len].copy_from_slice(addr.as_slice());
        true
    }

    fn push_ll_option(&mut self, opt_type: u8, addr: &LLAddress) -> bool {
        // A 6-byte address packs exactly into one 8-byte unit.
        let LLAddress::Eui48(raw) = addr else {
            return false;
        };
        let offset = self.buf.len();
        self.buf.push(opt_type);
        self.buf.push(1);
        self.buf.extend_from_slice(raw);
        self.opts.push((opt_type, offset));
        true
    }

    // Prefix information options.

    pub fn has_prefix_information(&self) -> bool {
        self.has_option(OPT_PREFIX_INFORMATION)
    }

    pub fn prefix_information_count(&self) -> usize {
        self.option_count(OPT_PREFIX_INFORMATION)
    }

    pub fn prefix_length(&self, index: usize) -> Option<u8> {
        self.raw_option(OPT_PREFIX_INFORMATION, index).map(|o| o[2])
    }

    pub fn on_link_flag(&self, index: usize) -> Option<bool> {
        self.raw_option(OPT_PREFIX_INFORMATION, index)
            .map(|o| o[3] & PI_FLAG_ON_LINK != 0)
    }

    pub fn autonomous_flag(&self, index: usize) -> Option<bool> {
        self.raw_option(OPT_PREFIX_INFORMATION, index)
            .map(|o| o[3] & PI_FLAG_AUTONOMOUS != 0)
    }

    pub fn prefix_valid_lifetime(&self, index: usize) -> Option<Duration> {
        self.raw_option(OPT_PREFIX_INFORMATION, index)
            .map(|o| Duration::from_secs(u32::from_be_bytes([o[4], o[5], o[6], o[7]]).into()))
    }

    pub fn prefix_preferred_lifetime(&self, index: usize) -> Option<Duration> {
        self.raw_option(OPT_PREFIX_INFORMATION, index)
            .map(|o| Duration::from_secs(u32::from_be_bytes([o[8], o[9], o[10], o[11]]).into()))
    }

    pub fn prefix(&self, index: usize) -> Option<Ipv6Addr> {
        self.raw_option(OPT_PREFIX_INFORMATION, index)
            .map(|o| read_addr(&o[16..32]))
    }

    pub fn push_prefix_information(
        &mut self,
        prefix_length: u8,
        on_link: bool,
        autonomous: bool,
        valid_lifetime: Duration,
        preferred_lifetime: Duration,
        prefix: Ipv6Addr,
    ) {
        let offset = self.buf.len();
        let mut opt = [0u8; 32];
        opt[0] = OPT_PREFIX_INFORMATION;
        opt[1] = 4;
        opt[2] = prefix_length;
        opt[3] = (if on_link { PI_FLAG_ON_LINK } else { 0 })
            | (if autonomous { PI_FLAG_AUTONOMOUS } else { 0 });
        opt[4..8].copy_from_slice(&(valid_lifetime.as_secs() as u32).to_be_bytes());
        opt[8..12].copy_from_slice(&(preferred_lifetime.as_secs() as u32).to_be_bytes());
        opt[16..32].copy_from_slice(&prefix.octets());
        self.buf.extend_from_slice(&opt);
        self.opts.push((OPT_PREFIX_INFORMATION, offset));
    }

    // Redirected header options.

    pub fn has_redirected_header(&self) -> bool {
        self.has_option(OPT_REDIRECTED_HEADER)
    }

    /// The encapsulated original IPv6 header and data of a Redirected
    /// Header option, trailing padding included.
    pub fn redirected_header(&self, index: usize) -> Option<&[u8]> {
        self.raw_option(OPT_REDIRECTED_HEADER, index)
            .map(|o| &o[8..])
    }

    /// Appends a Redirected Header option, padding the trailing user
    /// data to an 8-byte boundary. Fails only if the option would not fit
    /// its one-byte length field.
    pub fn push_redirected_header(&mut self, ip_header_and_data: &[u8]) -> bool {
        let data_units = ip_header_and_data.len().div_ceil(BYTES_PER_OPT_UNIT);
        let units = 1 + data_units;
        if units > usize::from(u8::MAX) {
            return false;
        }
        let offset = self.buf.len();
        self.buf.push(OPT_REDIRECTED_HEADER);
        self.buf.push(units as u8);
        self.buf.extend_from_slice(&[0; 6]);
        self.buf.extend_from_slice(ip_header_and_data);
        let padding = data_units * BYTES_PER_OPT_UNIT - ip_header_and_data.len();
        self.buf.extend(std::iter::repeat(0).take(padding));
        self.opts.push((OPT_REDIRECTED_HEADER, offset));
        true
    }

    // MTU options.

    pub fn has_mtu(&self) -> bool {
        self.has_option(OPT_MTU)
    }

    pub fn mtu(&self, index: usize) -> Option<u32> {
        self.raw_option(OPT_MTU, index)
            .map(|o| u32::from_be_bytes([o[4], o[5], o[6], o[7]]))
    }

    pub fn push_mtu(&mut self, mtu: u32) {
        let offset = self.buf.len();
        self.buf.push(OPT_MTU);
        self.buf.push(1);
        self.buf.extend_from_slice(&[0, 0]);
        self.buf.extend_from_slice(&mtu.to_be_bytes());
        self.opts.push((OPT_MTU, offset));
    }
}

fn read_addr(bytes: &[u8]) -> Ipv6Addr {
    let mut raw = [0u8; 16];
    raw.copy_from_slice(bytes);
    Ipv6Addr::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: [u8; 16] = [
        0x26, 0x20, 0x01, 0x5c, 0x02, 0x02, 0x02, 0x01, 0x0e, 0x8b, 0xfd, 0xff, 0xfe, 0x5a, 0xfa,
        0xf2,
    ];

    fn ns_with_sll() -> Vec<u8> {
        let mut raw = vec![0u8; 24];
        raw[0] = ND_NEIGHBOR_SOLICIT;
        raw[8..24].copy_from_slice(&TARGET);
        raw.extend_from_slice(&[0x01, 0x01, 0xa0, 0x8c, 0xfd, 0xc3, 0xb3, 0xc0]);
        raw
    }

    #[test]
    fn parse_neighbor_solicit() {
        let msg = NdMessage::parse(&ns_with_sll()).unwrap();
        assert_eq!(msg.nd_type(), ND_NEIGHBOR_SOLICIT);
        assert_eq!(msg.target_address(), Some(Ipv6Addr::from(TARGET)));
        assert!(msg.has_source_ll_address());
        assert_eq!(
            msg.source_ll_address(0),
            Some(LLAddress::from([0xa0, 0x8c, 0xfd, 0xc3, 0xb3, 0xc0]))
        );
        // Accessors for the wrong type return nothing.
        assert_eq!(msg.proxy_flag(), None);
        assert_eq!(msg.destination_address(), None);
    }

    #[test]
    fn parse_preserves_bytes() {
        let raw = ns_with_sll();
        let msg = NdMessage::parse(&raw).unwrap();
        assert_eq!(msg.as_bytes(), &raw[..]);
    }

    #[test]
    fn parse_rejects_empty_and_unknown_types() {
        assert!(NdMessage::parse(&[]).is_err());
        let mut raw = vec![0u8; 8];
        raw[0] = 128; // Echo request.
        assert!(NdMessage::parse(&raw).is_err());
    }

    #[test]
    fn parse_rejects_short_fixed_portion() {
        let mut raw = vec![0u8; 16];
        raw[0] = ND_NEIGHBOR_SOLICIT;
        assert!(NdMessage::parse(&raw).is_err());
    }

    #[test]
    fn parse_rejects_unaligned_length() {
        let mut raw = vec![0u8; 28];
        raw[0] = ND_NEIGHBOR_SOLICIT;
        assert!(NdMessage::parse(&raw).is_err());
    }

    #[test]
    fn parse_rejects_zero_length_option() {
        let mut raw = vec![0u8; 24];
        raw[0] = ND_NEIGHBOR_SOLICIT;
        raw.extend_from_slice(&[0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        assert!(NdMessage::parse(&raw).is_err());
    }

    #[test]
    fn parse_rejects_option_overrun() {
        let mut raw = vec![0u8; 24];
        raw[0] = ND_NEIGHBOR_SOLICIT;
        // Declares two units but only one is present.
        raw.extend_from_slice(&[0x01, 0x02, 0xa0, 0x8c, 0xfd, 0xc3, 0xb3, 0xc0]);
        assert!(NdMessage::parse(&raw).is_err());
    }

    #[test]
    fn undersized_fixed_option_is_skipped_not_indexed() {
        let mut raw = vec![0u8; 16];
        raw[0] = ND_ROUTER_ADVERT;
        // Prefix information declared as a single unit (8 bytes) instead
        // of its fixed 32. The message stays valid but the option is
        // dropped from the index.
        raw.extend_from_slice(&[0x03, 0x01, 64, 0, 0, 0, 0, 0]);
        let msg = NdMessage::parse(&raw).unwrap();
        assert!(!msg.has_prefix_information());
        assert_eq!(msg.option_count(OPT_PREFIX_INFORMATION), 0);
    }

    #[test]
    fn oversize_fixed_option_is_accepted() {
        let mut raw = vec![0u8; 16];
        raw[0] = ND_ROUTER_ADVERT;
        let mut opt = vec![0u8; 40];
        opt[0] = OPT_PREFIX_INFORMATION;
        opt[1] = 5; // 40 bytes, one unit more than the fixed 32.
        opt[2] = 64;
        opt[16..32].copy_from_slice(&TARGET);
        raw.extend_from_slice(&opt);
        let msg = NdMessage::parse(&raw).unwrap();
        assert!(msg.has_prefix_information());
        assert_eq!(msg.prefix_length(0), Some(64));
        assert_eq!(msg.prefix(0), Some(Ipv6Addr::from(TARGET)));
        assert_eq!(msg.raw_option(OPT_PREFIX_INFORMATION, 0).unwrap().len(), 40);
    }

    #[test]
    fn unknown_option_is_indexed() {
        let mut raw = vec![0u8; 24];
        raw[0] = ND_NEIGHBOR_SOLICIT;
        raw.extend_from_slice(&[0x0e, 0x01, 1, 2, 3, 4, 5, 6]);
        let msg = NdMessage::parse(&raw).unwrap();
        assert_eq!(msg.option_count(0x0e), 1);
        assert_eq!(
            msg.raw_option(0x0e, 0),
            Some(&[0x0e, 0x01, 1, 2, 3, 4, 5, 6][..])
        );
    }

    #[test]
    fn options_addressed_by_occurrence() {
        let mut raw = vec![0u8; 24];
        raw[0] = ND_NEIGHBOR_SOLICIT;
        raw.extend_from_slice(&[0x01, 0x01, 1, 1, 1, 1, 1, 1]);
        raw.extend_from_slice(&[0x01, 0x01, 2, 2, 2, 2, 2, 2]);
        let msg = NdMessage::parse(&raw).unwrap();
        assert_eq!(msg.option_count(OPT_SOURCE_LL_ADDR), 2);
        assert_eq!(msg.source_ll_address(0), Some(LLAddress::from([1u8; 6])));
        assert_eq!(msg.source_ll_address(1), Some(LLAddress::from([2u8; 6])));
        assert_eq!(msg.source_ll_address(2), None);
    }

    #[test]
    fn router_advert_fields() {
        let msg = NdMessage::router_advert(
            64,
            true,
            false,
            false,
            Duration::from_secs(1800),
            Duration::from_millis(30_000),
            Duration::from_millis(1_000),
        );
        assert_eq!(msg.len(), 16);
        assert_eq!(msg.cur_hop_limit(), Some(64));
        assert_eq!(msg.managed_flag(), Some(true));
        assert_eq!(msg.other_flag(), Some(false));
        assert_eq!(msg.proxy_flag(), Some(false));
        assert_eq!(msg.router_lifetime(), Some(Duration::from_secs(1800)));
        assert_eq!(msg.reachable_time(), Some(Duration::from_millis(30_000)));
        assert_eq!(msg.retransmit_timer(), Some(Duration::from_millis(1_000)));
    }

    #[test]
    fn proxy_flag_round_trip() {
        let mut msg = NdMessage::router_advert(
            0,
            false,
            false,
            false,
            Duration::ZERO,
            Duration::ZERO,
            Duration::ZERO,
        );
        assert_eq!(msg.proxy_flag(), Some(false));
        assert!(msg.set_proxy_flag(true));
        assert_eq!(msg.proxy_flag(), Some(true));
        assert_eq!(msg.as_bytes()[5], 0x04);
        assert!(msg.set_proxy_flag(false));
        assert_eq!(msg.proxy_flag(), Some(false));

        let mut ns = NdMessage::neighbor_solicit(Ipv6Addr::LOCALHOST);
        assert!(!ns.set_proxy_flag(true));
    }

    #[test]
    fn neighbor_advert_flags() {
        let msg = NdMessage::neighbor_advert(true, true, false, Ipv6Addr::from(TARGET));
        assert_eq!(msg.router_flag(), Some(true));
        assert_eq!(msg.solicited_flag(), Some(true));
        assert_eq!(msg.override_flag(), Some(false));
        assert_eq!(msg.target_address(), Some(Ipv6Addr::from(TARGET)));
        assert_eq!(msg.as_bytes()[4], 0xc0);
    }

    #[test]
    fn redirect_addresses() {
        let dest: Ipv6Addr = "fe80::42".parse().unwrap();
        let msg = NdMessage::redirect(Ipv6Addr::from(TARGET), dest);
        assert_eq!(msg.len(), 40);
        assert_eq!(msg.target_address(), Some(Ipv6Addr::from(TARGET)));
        assert_eq!(msg.destination_address(), Some(dest));
    }

    #[test]
    fn checksum_round_trip() {
        let mut msg = NdMessage::neighbor_solicit(Ipv6Addr::from(TARGET));
        assert_eq!(msg.checksum(), 0);
        msg.set_checksum(0xbeef);
        assert_eq!(msg.checksum(), 0xbeef);
        assert_eq!(&msg.as_bytes()[2..4], &[0xbe, 0xef]);
    }

    #[test]
    fn set_ll_address_requires_matching_length() {
        let mut msg = NdMessage::parse(&ns_with_sll()).unwrap();
        let replacement = LLAddress::from([1u8, 2, 3, 4, 5, 6]);
        assert!(msg.set_source_ll_address(0, &replacement));
        assert_eq!(msg.source_ll_address(0), Some(replacement));

        let eui64 = LLAddress::from([1u8, 2, 3, 4, 5, 6, 7, 8]);
        assert!(!msg.set_source_ll_address(0, &eui64));
        assert!(!msg.set_source_ll_address(0, &LLAddress::Invalid));
        assert!(!msg.set_source_ll_address(1, &LLAddress::from([0u8; 6])));
    }

    #[test]
    fn push_ll_address_options() {
        let mut msg = NdMessage::router_solicit();
        assert!(msg.push_source_ll_address(&LLAddress::from([9u8; 6])));
        assert_eq!(msg.len(), 16);
        assert_eq!(msg.source_ll_address(0), Some(LLAddress::from([9u8; 6])));
        // EUI-64 addresses do not fit the single-unit option.
        assert!(!msg.push_source_ll_address(&LLAddress::from([9u8; 8])));

        let mut na = NdMessage::neighbor_advert(false, false, true, Ipv6Addr::from(TARGET));
        assert!(na.push_target_ll_address(&LLAddress::from([7u8; 6])));
        assert_eq!(na.target_ll_address(0), Some(LLAddress::from([7u8; 6])));
    }

    #[test]
    fn push_prefix_information_round_trip() {
        let prefix: Ipv6Addr = "2001:db8::".parse().unwrap();
        let mut msg = NdMessage::router_advert(
            64,
            false,
            false,
            false,
            Duration::from_secs(1800),
            Duration::ZERO,
            Duration::ZERO,
        );
        msg.push_prefix_information(
            64,
            true,
            true,
            Duration::from_secs(86400),
            Duration::from_secs(14400),
            prefix,
        );
        assert_eq!(msg.len(), 48);
        assert_eq!(msg.prefix_information_count(), 1);
        assert_eq!(msg.prefix_length(0), Some(64));
        assert_eq!(msg.on_link_flag(0), Some(true));
        assert_eq!(msg.autonomous_flag(0), Some(true));
        assert_eq!(msg.prefix_valid_lifetime(0), Some(Duration::from_secs(86400)));
        assert_eq!(
            msg.prefix_preferred_lifetime(0),
            Some(Duration::from_secs(14400))
        );
        assert_eq!(msg.prefix(0), Some(prefix));

        // Re-parse the serialized form and read the same values back.
        let reparsed = NdMessage::parse(msg.as_bytes()).unwrap();
        assert_eq!(reparsed, msg);
    }

    #[test]
    fn push_redirected_header_pads_to_boundary() {
        let dest: Ipv6Addr = "fe80::42".parse().unwrap();
        let mut msg = NdMessage::redirect(Ipv6Addr::from(TARGET), dest);
        let original = [0xaau8; 13];
        assert!(msg.push_redirected_header(&original));
        assert_eq!(msg.len() % 8, 0);

        let stored = msg.redirected_header(0).unwrap();
        assert_eq!(stored.len(), 16);
        assert_eq!(&stored[..13], &original);
        assert_eq!(&stored[13..], &[0, 0, 0]);
        assert!(NdMessage::parse(msg.as_bytes()).is_ok());
    }

    #[test]
    fn push_mtu_round_trip() {
        let mut msg = NdMessage::router_advert(
            64,
            false,
            false,
            false,
            Duration::ZERO,
            Duration::ZERO,
            Duration::ZERO,
        );
        msg.push_mtu(1500);
        assert!(msg.has_mtu());
        assert_eq!(msg.mtu(0), Some(1500));
        assert_eq!(NdMessage::parse(msg.as_bytes()).unwrap().mtu(0), Some(1500));
    }

    #[test]
    fn clear_options_truncates() {
        let mut msg = NdMessage::parse(&ns_with_sll()).unwrap();
        msg.clear_options();
        assert_eq!(msg.len(), 24);
        assert!(!msg.has_source_ll_address());
    }
}
