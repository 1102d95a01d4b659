//! The per-interface facade: three raw sockets, the disable-label
//! bitset, the group back-edge, and the ND rewrite rules for proxied
//! traffic.

use std::{fmt, net::Ipv6Addr, rc::Rc};

use ndproxy_types::ether::{Ipv6EtherHeader, IPV6_HDR_LEN};
use ndproxy_types::ip::{upper_layer_checksum16, PROTO_ICMPV6};
use ndproxy_types::lladdr::LLAddress;
use ndproxy_types::ndmsg::{NdMessage, ICMPV6_HDR_LEN, ND_ROUTER_ADVERT};

use crate::bpf;
use crate::error::{Error, ErrorKind, Result, ResultExt};
use crate::labels::{DisableLabel, InterfaceDisableLabels};
use crate::sockets::{EtherSocket, Icmpv6Socket};

/// Hop limit required on all proxied ND traffic (RFC 4389).
const PROXIED_HOP_LIMIT: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfaceState {
    Invalid,
    Uninitialized,
    Enabled,
    Disabled,
    Deinitialized,
}

impl fmt::Display for IfaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IfaceState::Invalid => "Invalid",
            IfaceState::Uninitialized => "Uninitialized",
            IfaceState::Enabled => "Enabled",
            IfaceState::Disabled => "Disabled",
            IfaceState::Deinitialized => "Deinitialized",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug)]
enum IfaceIo {
    Raw {
        /// ND-filtered ether socket, shared with the fd watcher task.
        nd: Rc<EtherSocket>,
        /// Ether socket for every other IPv6 frame.
        ipv6: Rc<EtherSocket>,
        /// Send-only ICMPv6 socket for maintenance messages.
        icmp: Icmpv6Socket,
    },
    #[cfg(test)]
    Test(TestIo),
    Closed,
}

/// Recorded traffic of a test interface, standing in for the kernel.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct TestIo {
    pub sent_nd: Vec<(Ipv6EtherHeader, NdMessage)>,
    pub sent_ipv6: Vec<(Ipv6EtherHeader, Vec<u8>)>,
    pub sent_packet_too_big: Vec<(Ipv6Addr, u32)>,
    pub pending_nd: std::collections::VecDeque<(Ipv6EtherHeader, Vec<u8>)>,
    pub pending_ipv6: std::collections::VecDeque<(Ipv6EtherHeader, Vec<u8>)>,
    pub discarded: usize,
}

/// A network interface participating in ND proxying.
///
/// Owns the interface's sockets and disable labels; the engine owns the
/// interface. The `group` field is a back-edge carrying only the group
/// name, revalidated against the group manager on use.
#[derive(Debug)]
pub struct ProxyInterface {
    name: String,
    state: IfaceState,
    ll_address: LLAddress,
    mtu: u32,
    addresses: Vec<Ipv6Addr>,
    labels: InterfaceDisableLabels,
    group: Option<String>,
    io: IfaceIo,
}

impl ProxyInterface {
    /// Opens and configures the interface's sockets.
    ///
    /// Any failure tears down whatever was opened so far and leaves no
    /// usable object behind. On success the interface is Disabled and
    /// carries the groupless label, without the disable hook firing.
    pub fn init(if_name: &str) -> Result<ProxyInterface> {
        if if_name.is_empty() {
            return Err(Error::with(
                ErrorKind::InvalidArgument,
                "empty string is not a valid interface name",
            ));
        }

        let nd = EtherSocket::open(if_name)
            .context(format!("failed to initialize ND ether socket for {if_name}"))?;
        nd.set_nonblocking(true)?;
        nd.set_all_multicast(true)?;
        nd.attach_filter(Some(&bpf::nd_filter()))?;

        // A loopback proxy interface would echo every multicast frame
        // straight back into the proxy.
        if nd.is_loopback()? {
            return Err(Error::with(
                ErrorKind::InvalidArgument,
                format!("cannot make loopback interface {if_name} into a proxy interface"),
            ));
        }

        let ipv6 = EtherSocket::open(if_name)
            .context(format!("failed to initialize IPv6 ether socket for {if_name}"))?;
        ipv6.set_nonblocking(true)?;
        ipv6.set_all_multicast(true)?;
        ipv6.attach_filter(Some(&bpf::non_nd_filter()))?;

        let icmp = Icmpv6Socket::open(if_name)
            .context(format!("failed to initialize ICMPv6 socket for {if_name}"))?;
        icmp.set_nonblocking(true)?;
        icmp.block_all_input()?;
        icmp.set_multicast_hop_limit(PROXIED_HOP_LIMIT)?;
        icmp.set_unicast_hop_limit(PROXIED_HOP_LIMIT)?;

        let ll_address = nd.link_layer_address()?;
        let mtu = nd.link_mtu()?;
        let addresses = system_ipv6_addresses(if_name)
            .context(format!("failed to refresh IP address list on {if_name}"))?;

        let mut labels = InterfaceDisableLabels::new();
        // Freshly initialized interfaces are groupless by definition; no
        // hook fires for the initial label.
        labels.mark(DisableLabel::GROUPLESS);

        Ok(ProxyInterface {
            name: if_name.to_string(),
            state: IfaceState::Disabled,
            ll_address,
            mtu,
            addresses,
            labels,
            group: None,
            io: IfaceIo::Raw {
                nd: Rc::new(nd),
                ipv6: Rc::new(ipv6),
                icmp,
            },
        })
    }

    /// A socketless interface backed by recorded queues.
    #[cfg(test)]
    pub(crate) fn new_for_tests(
        if_name: &str,
        ll_address: LLAddress,
        mtu: u32,
        addresses: Vec<Ipv6Addr>,
    ) -> ProxyInterface {
        let mut labels = InterfaceDisableLabels::new();
        labels.mark(DisableLabel::GROUPLESS);
        ProxyInterface {
            name: if_name.to_string(),
            state: IfaceState::Disabled,
            ll_address,
            mtu,
            addresses,
            labels,
            group: None,
            io: IfaceIo::Test(TestIo::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> IfaceState {
        self.state
    }

    pub fn ll_address(&self) -> &LLAddress {
        &self.ll_address
    }

    pub fn mtu(&self) -> u32 {
        self.mtu
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state, IfaceState::Enabled | IfaceState::Disabled)
    }

    pub fn is_enabled(&self) -> bool {
        self.state == IfaceState::Enabled
    }

    // Group membership back-edge.

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn has_group(&self) -> bool {
        self.group.is_some()
    }

    /// Join notification from the engine: record the back-edge and
    /// clear the groupless label.
    pub(crate) fn post_join_group(&mut self, pg_name: &str) {
        self.group = Some(pg_name.to_string());
        if self.labels.clear(DisableLabel::GROUPLESS) {
            self.on_enabled();
        }
    }

    /// Leave notification from the engine.
    pub(crate) fn post_leave_group(&mut self) {
        self.group = None;
        if self.labels.mark(DisableLabel::GROUPLESS) {
            self.on_disabled();
        }
    }

    // Disable labels. Every mutation funnels the edge it caused into the
    // enable/disable hooks, so `Enabled` and "no labels set" can never
    // disagree.

    pub fn mark_software_disabled(&mut self) -> bool {
        let edge = self.labels.mark(DisableLabel::SOFTWARE_DISABLED);
        if edge {
            self.on_disabled();
        }
        edge
    }

    pub fn clear_software_disabled(&mut self) -> bool {
        let edge = self.labels.clear(DisableLabel::SOFTWARE_DISABLED);
        if edge {
            self.on_enabled();
        }
        edge
    }

    pub fn is_software_disabled(&self) -> bool {
        self.labels.is_marked(DisableLabel::SOFTWARE_DISABLED)
    }

    pub fn mark_loop_detected(&mut self) -> bool {
        let edge = self.labels.mark(DisableLabel::LOOP_DETECTED);
        if edge {
            self.on_disabled();
        }
        edge
    }

    pub fn clear_loop_detected(&mut self) -> bool {
        let edge = self.labels.clear(DisableLabel::LOOP_DETECTED);
        if edge {
            self.on_enabled();
        }
        edge
    }

    pub fn is_loop_detected(&self) -> bool {
        self.labels.is_marked(DisableLabel::LOOP_DETECTED)
    }

    pub fn mark_link_down(&mut self) -> bool {
        let edge = self.labels.mark(DisableLabel::LINK_DOWN);
        if edge {
            self.on_disabled();
        }
        edge
    }

    pub fn clear_link_down(&mut self) -> bool {
        let edge = self.labels.clear(DisableLabel::LINK_DOWN);
        if edge {
            self.on_enabled();
        }
        edge
    }

    pub fn is_link_down(&self) -> bool {
        self.labels.is_marked(DisableLabel::LINK_DOWN)
    }

    pub fn is_groupless(&self) -> bool {
        self.labels.is_marked(DisableLabel::GROUPLESS)
    }

    pub fn clear_soft_labels(&mut self) -> bool {
        if self.labels.clear_soft() {
            self.on_enabled();
            return true;
        }
        false
    }

    pub fn clear_all_labels(&mut self, use_callback: bool) {
        self.labels.clear_all();
        if use_callback {
            self.on_enabled();
        }
    }

    pub fn try_enable(&mut self) -> bool {
        if self.labels.try_enable() {
            self.on_enabled();
            return true;
        }
        false
    }

    fn on_enabled(&mut self) {
        if !self.is_initialized() {
            tracing::warn!(IFACE = %self.name, "cannot enable an uninitialized interface");
            return;
        }
        if self.state != IfaceState::Enabled {
            tracing::debug!(IFACE = %self.name, "proxy enabled");
            self.state = IfaceState::Enabled;
        }
    }

    fn on_disabled(&mut self) {
        if !self.is_initialized() {
            tracing::warn!(IFACE = %self.name, "cannot disable an uninitialized interface");
            return;
        }
        if self.state != IfaceState::Disabled {
            tracing::debug!(IFACE = %self.name, "proxy disabled");
            self.state = IfaceState::Disabled;
        }
    }

    // Assigned addresses.

    pub fn addresses(&self) -> &[Ipv6Addr] {
        &self.addresses
    }

    pub fn has_ipv6_address(&self, addr: Ipv6Addr) -> bool {
        self.addresses.contains(&addr)
    }

    /// Re-enumerates the interface's assigned IPv6 addresses.
    pub fn refresh_addresses(&mut self) -> Result<()> {
        if !self.is_initialized() {
            return Err(Error::with(
                ErrorKind::BadInternalState,
                "interface is not initialized",
            ));
        }
        #[cfg(test)]
        if matches!(self.io, IfaceIo::Test(_)) {
            return Ok(());
        }
        self.addresses = system_ipv6_addresses(&self.name)
            .context(format!("failed to refresh IP address list on {}", self.name))?;
        Ok(())
    }

    // Watcher handles.

    pub(crate) fn nd_socket(&self) -> Option<Rc<EtherSocket>> {
        match &self.io {
            IfaceIo::Raw { nd, .. } => Some(Rc::clone(nd)),
            _ => None,
        }
    }

    pub(crate) fn ipv6_socket(&self) -> Option<Rc<EtherSocket>> {
        match &self.io {
            IfaceIo::Raw { ipv6, .. } => Some(Rc::clone(ipv6)),
            _ => None,
        }
    }

    // The ND proxy path.

    /// Rewrites and sends a Neighbor Discovery message received on
    /// another interface of the group.
    ///
    /// In order: the hop limit becomes 255, the frame is re-addressed
    /// from this interface's own link-layer address to
    /// `destination_ll`, non-multicast source/target link-layer address
    /// options are rewritten to this interface's address, router
    /// advertisements get the Proxy flag, and the ICMPv6 checksum is
    /// recomputed over the rewritten bytes.
    pub fn proxy_nd(
        &mut self,
        mut header: Ipv6EtherHeader,
        destination_ll: &LLAddress,
        mut msg: NdMessage,
    ) -> Result<()> {
        if !self.is_initialized() {
            return Err(Error::with(
                ErrorKind::BadInternalState,
                format!("cannot proxy on uninitialized interface {}", self.name),
            ));
        }
        if header.dst.is_unspecified() {
            return Err(Error::with(
                ErrorKind::InvalidArgument,
                "cannot proxy to an unspecified destination address",
            ));
        }
        if header.next_header != PROTO_ICMPV6 {
            return Err(Error::with(
                ErrorKind::InvalidArgument,
                "cannot proxy a non-ICMPv6 packet on the ND socket",
            ));
        }

        // A proxied RA must announce itself as proxied (RFC 4389).
        if msg.nd_type() == ND_ROUTER_ADVERT {
            msg.set_proxy_flag(true);
        }

        header.hop_limit = PROXIED_HOP_LIMIT;
        header.src_ll = self.ll_address.clone();
        header.dst_ll = destination_ll.clone();

        if let Some(source_ll) = msg.source_ll_address(0) {
            if !source_ll.is_multicast() {
                msg.set_source_ll_address(0, &self.ll_address);
            }
        }
        if let Some(target_ll) = msg.target_ll_address(0) {
            if !target_ll.is_multicast() {
                msg.set_target_ll_address(0, &self.ll_address);
            }
        }

        msg.set_checksum(0);
        let checksum = upper_layer_checksum16(header.src, header.dst, PROTO_ICMPV6, msg.as_bytes());
        msg.set_checksum(!checksum);

        self.check_mtu(msg.len())?;
        match &mut self.io {
            IfaceIo::Raw { nd, .. } => nd
                .send(&header, msg.as_bytes())
                .context(format!("failed to proxy ND message on {}", self.name)),
            #[cfg(test)]
            IfaceIo::Test(test) => {
                test.sent_nd.push((header, msg));
                Ok(())
            }
            IfaceIo::Closed => Err(Error::with(ErrorKind::BadInternalState, "sockets closed")),
        }
    }

    /// Receives one message from the ND socket.
    ///
    /// `Ok(None)` means a frame was consumed but silently discarded, as
    /// RFC 4861 requires for hop limits other than 255. An empty socket
    /// surfaces as `ResultUnavailable`; truncated or unparsable
    /// payloads as `MalformedPacket`.
    pub fn receive_nd(&mut self) -> Result<Option<(Ipv6EtherHeader, NdMessage)>> {
        let (header, payload) = match &mut self.io {
            IfaceIo::Raw { nd, .. } => nd.receive()?,
            #[cfg(test)]
            IfaceIo::Test(test) => test
                .pending_nd
                .pop_front()
                .ok_or_else(|| Error::new(ErrorKind::ResultUnavailable))?,
            IfaceIo::Closed => {
                return Err(Error::with(ErrorKind::BadInternalState, "sockets closed"))
            }
        };

        if header.hop_limit != PROXIED_HOP_LIMIT {
            tracing::debug!(
                IFACE = %self.name,
                HOPS = header.hop_limit,
                "discarding ND message with non-255 hop limit"
            );
            return Ok(None);
        }
        debug_assert_eq!(header.next_header, PROTO_ICMPV6);
        if payload.len() < ICMPV6_HDR_LEN {
            return Err(Error::with(
                ErrorKind::MalformedPacket,
                "received ICMPv6 packet is smaller than the ICMPv6 header",
            ));
        }

        let msg = NdMessage::parse(&payload)
            .map_err(|e| Error::with(ErrorKind::MalformedPacket, e.to_string()))?;
        Ok(Some((header, msg)))
    }

    pub fn discard_nd_input(&mut self) -> Result<()> {
        match &mut self.io {
            IfaceIo::Raw { nd, .. } => nd.discard(),
            #[cfg(test)]
            IfaceIo::Test(test) => {
                test.pending_nd.pop_front();
                test.discarded += 1;
                Ok(())
            }
            IfaceIo::Closed => Err(Error::with(ErrorKind::BadInternalState, "sockets closed")),
        }
    }

    // The generic IPv6 path: only the link-layer addresses change.

    pub fn send_ipv6(
        &mut self,
        mut header: Ipv6EtherHeader,
        destination_ll: &LLAddress,
        payload: &[u8],
    ) -> Result<()> {
        if !self.is_initialized() {
            return Err(Error::with(
                ErrorKind::BadInternalState,
                format!("cannot proxy on uninitialized interface {}", self.name),
            ));
        }
        if header.dst.is_unspecified() {
            return Err(Error::with(
                ErrorKind::InvalidArgument,
                "cannot proxy to an unspecified destination address",
            ));
        }

        header.src_ll = self.ll_address.clone();
        header.dst_ll = destination_ll.clone();

        self.check_mtu(payload.len())?;
        match &mut self.io {
            IfaceIo::Raw { ipv6, .. } => ipv6
                .send(&header, payload)
                .context(format!("failed to proxy IPv6 packet on {}", self.name)),
            #[cfg(test)]
            IfaceIo::Test(test) => {
                test.sent_ipv6.push((header, payload.to_vec()));
                Ok(())
            }
            IfaceIo::Closed => Err(Error::with(ErrorKind::BadInternalState, "sockets closed")),
        }
    }

    pub fn receive_ipv6(&mut self) -> Result<(Ipv6EtherHeader, Vec<u8>)> {
        match &mut self.io {
            IfaceIo::Raw { ipv6, .. } => ipv6.receive(),
            #[cfg(test)]
            IfaceIo::Test(test) => test
                .pending_ipv6
                .pop_front()
                .ok_or_else(|| Error::new(ErrorKind::ResultUnavailable)),
            IfaceIo::Closed => Err(Error::with(ErrorKind::BadInternalState, "sockets closed")),
        }
    }

    pub fn discard_ipv6_input(&mut self) -> Result<()> {
        match &mut self.io {
            IfaceIo::Raw { ipv6, .. } => ipv6.discard(),
            #[cfg(test)]
            IfaceIo::Test(test) => {
                test.pending_ipv6.pop_front();
                test.discarded += 1;
                Ok(())
            }
            IfaceIo::Closed => Err(Error::with(ErrorKind::BadInternalState, "sockets closed")),
        }
    }

    /// Reports the MTU of this link back to a sender whose packet did
    /// not fit.
    pub fn send_packet_too_big(
        &mut self,
        destination: Ipv6Addr,
        mtu: u32,
        original_header: &Ipv6EtherHeader,
        original_body: &[u8],
    ) -> Result<()> {
        if !self.is_initialized() {
            return Err(Error::with(
                ErrorKind::BadInternalState,
                format!("cannot send packet too big on uninitialized interface {}", self.name),
            ));
        }
        match &mut self.io {
            IfaceIo::Raw { icmp, .. } => {
                icmp.send_packet_too_big(destination, mtu, original_header, original_body)
            }
            #[cfg(test)]
            IfaceIo::Test(test) => {
                test.sent_packet_too_big.push((destination, mtu));
                Ok(())
            }
            IfaceIo::Closed => Err(Error::with(ErrorKind::BadInternalState, "sockets closed")),
        }
    }

    /// Closes all sockets. The interface cannot be used afterwards.
    pub fn deinitialize(&mut self) {
        if !self.is_initialized() {
            return;
        }
        self.io = IfaceIo::Closed;
        self.state = IfaceState::Deinitialized;
    }

    fn check_mtu(&self, payload_len: usize) -> Result<()> {
        if IPV6_HDR_LEN + payload_len > self.mtu as usize {
            return Err(Error::with(
                ErrorKind::MtuExceeded,
                format!(
                    "packet of {} bytes exceeds the {} byte MTU of {}",
                    IPV6_HDR_LEN + payload_len,
                    self.mtu,
                    self.name
                ),
            ));
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn test_io(&self) -> &TestIo {
        match &self.io {
            IfaceIo::Test(test) => test,
            _ => panic!("not a test interface"),
        }
    }

    #[cfg(test)]
    pub(crate) fn test_io_mut(&mut self) -> &mut TestIo {
        match &mut self.io {
            IfaceIo::Test(test) => test,
            _ => panic!("not a test interface"),
        }
    }
}

/// All IPv6 addresses currently assigned to `if_name`.
fn system_ipv6_addresses(if_name: &str) -> Result<Vec<Ipv6Addr>> {
    let mut head: *mut libc::ifaddrs = std::ptr::null_mut();
    if unsafe { libc::getifaddrs(&mut head) } < 0 {
        return Err(Error::from_errno("getifaddrs()"));
    }

    let mut addresses = Vec::new();
    let mut node = head;
    while !node.is_null() {
        let ifa = unsafe { &*node };
        node = ifa.ifa_next;
        if ifa.ifa_addr.is_null() {
            continue;
        }
        let family = unsafe { (*ifa.ifa_addr).sa_family };
        if family != libc::AF_INET6 as libc::sa_family_t {
            continue;
        }
        let name = unsafe { std::ffi::CStr::from_ptr(ifa.ifa_name) };
        if name.to_str() != Ok(if_name) {
            continue;
        }
        let sin6 = unsafe { &*(ifa.ifa_addr as *const libc::sockaddr_in6) };
        addresses.push(Ipv6Addr::from(sin6.sin6_addr.s6_addr));
    }
    unsafe { libc::freeifaddrs(head) };
    Ok(addresses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn own_mac() -> LLAddress {
        LLAddress::from([0x02, 0x00, 0x00, 0x00, 0x00, 0x01])
    }

    fn test_iface(name: &str) -> ProxyInterface {
        ProxyInterface::new_for_tests(
            name,
            own_mac(),
            1500,
            vec!["fe80::42".parse().unwrap()],
        )
    }

    fn nd_header(src: &str, dst: &str) -> Ipv6EtherHeader {
        let mut header = Ipv6EtherHeader::new(
            src.parse().unwrap(),
            dst.parse().unwrap(),
            PROTO_ICMPV6,
            255,
        );
        header.src_ll = LLAddress::from([0xa0, 0x8c, 0xfd, 0xc3, 0xb3, 0xc0]);
        header.dst_ll = LLAddress::from([0x33, 0x33, 0x00, 0x00, 0x00, 0x02]);
        header
    }

    #[test]
    fn starts_disabled_and_groupless() {
        let iface = test_iface("vmtap0");
        assert_eq!(iface.state(), IfaceState::Disabled);
        assert!(iface.is_groupless());
        assert!(!iface.is_enabled());
        assert!(iface.is_initialized());
    }

    #[test]
    fn join_and_leave_flip_state_at_the_label_boundary() {
        let mut iface = test_iface("vmtap0");
        iface.post_join_group("g1");
        assert_eq!(iface.group(), Some("g1"));
        assert!(iface.is_enabled());

        iface.post_leave_group();
        assert_eq!(iface.group(), None);
        assert_eq!(iface.state(), IfaceState::Disabled);

        // With a second label present, joining a group is not enough.
        iface.mark_software_disabled();
        iface.post_join_group("g1");
        assert!(!iface.is_enabled());
        assert!(iface.clear_software_disabled());
        assert!(iface.is_enabled());
    }

    #[test]
    fn enabled_iff_no_labels() {
        let mut iface = test_iface("vmtap0");
        iface.post_join_group("g1");

        assert!(iface.mark_loop_detected());
        assert!(!iface.mark_software_disabled());
        assert_eq!(iface.state(), IfaceState::Disabled);

        assert!(!iface.clear_loop_detected());
        assert!(iface.clear_software_disabled());
        assert!(iface.is_enabled());

        iface.mark_software_disabled();
        iface.mark_loop_detected();
        assert!(iface.clear_soft_labels());
        assert!(iface.is_enabled());
    }

    #[test]
    fn proxy_nd_rewrites_the_frame() {
        let mut iface = test_iface("vmtap1");
        iface.post_join_group("g1");

        let mut msg = NdMessage::router_solicit();
        msg.push_source_ll_address(&LLAddress::from([0xa0, 0x8c, 0xfd, 0xc3, 0xb3, 0xc0]));
        let mut header = nd_header("fe80::1", "ff02::2");
        header.hop_limit = 255;

        let dst_ll = LLAddress::from([0x33, 0x33, 0x00, 0x00, 0x00, 0x02]);
        iface.proxy_nd(header, &dst_ll, msg).unwrap();

        let (sent_header, sent_msg) = &iface.test_io().sent_nd[0];
        assert_eq!(sent_header.hop_limit, 255);
        assert_eq!(sent_header.src_ll, own_mac());
        assert_eq!(sent_header.dst_ll, dst_ll);
        // The non-multicast source LL option now names this interface.
        assert_eq!(sent_msg.source_ll_address(0), Some(own_mac()));
    }

    #[test]
    fn proxy_nd_preserves_multicast_ll_options() {
        let mut iface = test_iface("vmtap1");
        iface.post_join_group("g1");

        let multicast = LLAddress::from([0x33, 0x33, 0x00, 0x00, 0x00, 0x01]);
        let mut msg = NdMessage::router_solicit();
        msg.push_source_ll_address(&multicast);

        iface
            .proxy_nd(nd_header("fe80::1", "ff02::2"), &multicast, msg)
            .unwrap();
        let (_, sent_msg) = &iface.test_io().sent_nd[0];
        assert_eq!(sent_msg.source_ll_address(0), Some(multicast));
    }

    #[test]
    fn proxy_nd_sets_proxy_flag_on_router_adverts() {
        let mut iface = test_iface("eth0");
        iface.post_join_group("g1");

        let msg = NdMessage::router_advert(
            64,
            false,
            false,
            false,
            Duration::from_secs(1800),
            Duration::ZERO,
            Duration::ZERO,
        );
        iface
            .proxy_nd(
                nd_header("fe80::1", "ff02::1"),
                &LLAddress::from([0x33, 0x33, 0x00, 0x00, 0x00, 0x01]),
                msg,
            )
            .unwrap();
        let (_, sent_msg) = &iface.test_io().sent_nd[0];
        assert_eq!(sent_msg.proxy_flag(), Some(true));
    }

    #[test]
    fn proxy_nd_checksum_is_the_ones_complement() {
        let mut iface = test_iface("vmtap1");
        iface.post_join_group("g1");

        iface
            .proxy_nd(
                nd_header("fe80::1", "ff02::2"),
                &LLAddress::from([0x33, 0x33, 0x00, 0x00, 0x00, 0x02]),
                NdMessage::router_solicit(),
            )
            .unwrap();

        let (header, sent_msg) = &iface.test_io().sent_nd[0];
        let mut check = sent_msg.clone();
        check.set_checksum(0);
        let expected =
            upper_layer_checksum16(header.src, header.dst, PROTO_ICMPV6, check.as_bytes());
        assert_eq!(sent_msg.checksum(), !expected);
    }

    #[test]
    fn proxy_nd_rejects_bad_headers() {
        let mut iface = test_iface("vmtap1");
        iface.post_join_group("g1");

        let unspecified = nd_header("fe80::1", "::");
        let err = iface
            .proxy_nd(
                unspecified,
                &own_mac(),
                NdMessage::router_solicit(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let mut not_icmp = nd_header("fe80::1", "ff02::2");
        not_icmp.next_header = 6;
        let err = iface
            .proxy_nd(not_icmp, &own_mac(), NdMessage::router_solicit())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn oversized_payload_is_mtu_exceeded() {
        let mut iface = ProxyInterface::new_for_tests("vmtap1", own_mac(), 1280, vec![]);
        iface.post_join_group("g1");

        let payload = vec![0u8; 1400];
        let err = iface
            .send_ipv6(nd_header("fe80::1", "fe80::2"), &own_mac(), &payload)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MtuExceeded);
        assert!(iface.test_io().sent_ipv6.is_empty());
    }

    #[test]
    fn receive_nd_discards_wrong_hop_limit() {
        let mut iface = test_iface("vmtap0");
        iface.post_join_group("g1");

        let mut header = nd_header("fe80::1", "ff02::2");
        header.hop_limit = 64;
        let msg = NdMessage::router_solicit();
        iface
            .test_io_mut()
            .pending_nd
            .push_back((header, msg.as_bytes().to_vec()));

        // The frame is consumed but yields nothing.
        assert!(iface.receive_nd().unwrap().is_none());
        let err = iface.receive_nd().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResultUnavailable);
    }

    #[test]
    fn receive_nd_reports_malformed_payloads() {
        let mut iface = test_iface("vmtap0");
        iface.post_join_group("g1");

        // Too short for an ICMPv6 header.
        iface
            .test_io_mut()
            .pending_nd
            .push_back((nd_header("fe80::1", "ff02::2"), vec![135, 0]));
        assert_eq!(
            iface.receive_nd().unwrap_err().kind(),
            ErrorKind::MalformedPacket
        );

        // Zero-length option.
        let mut raw = NdMessage::neighbor_solicit("fe80::9".parse().unwrap())
            .as_bytes()
            .to_vec();
        raw.extend_from_slice(&[0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        iface
            .test_io_mut()
            .pending_nd
            .push_back((nd_header("fe80::1", "ff02::2"), raw));
        assert_eq!(
            iface.receive_nd().unwrap_err().kind(),
            ErrorKind::MalformedPacket
        );
    }

    #[test]
    fn send_ipv6_rewrites_only_link_layer() {
        let mut iface = test_iface("vmtap1");
        iface.post_join_group("g1");

        let mut header = nd_header("2001:db8::1", "2001:db8::2");
        header.hop_limit = 37;
        header.flow = 0x6abc_def0;
        let dst_ll = LLAddress::from([0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]);
        iface.send_ipv6(header, &dst_ll, &[1, 2, 3]).unwrap();

        let (sent_header, payload) = &iface.test_io().sent_ipv6[0];
        assert_eq!(sent_header.src_ll, own_mac());
        assert_eq!(sent_header.dst_ll, dst_ll);
        // Hop limit and flow word pass through untouched.
        assert_eq!(sent_header.hop_limit, 37);
        assert_eq!(sent_header.flow, 0x6abc_def0);
        assert_eq!(payload, &vec![1u8, 2, 3]);
    }

    #[test]
    fn deinitialize_closes_io() {
        let mut iface = test_iface("vmtap0");
        iface.deinitialize();
        assert_eq!(iface.state(), IfaceState::Deinitialized);
        assert!(!iface.is_initialized());
        assert_eq!(
            iface.receive_ipv6().unwrap_err().kind(),
            ErrorKind::BadInternalState
        );
    }
}
