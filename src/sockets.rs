//! Raw sockets owned by a proxy interface.
//!
//! [`EtherSocket`] is an `AF_PACKET` socket bound to one interface and
//! the IPv6 ethertype; a classic BPF program narrows what the kernel
//! passes up. [`Icmpv6Socket`] is a raw ICMPv6 socket used only for
//! outbound maintenance messages. Opening either requires CAP_NET_RAW.

use std::{
    ffi::CString,
    mem,
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
};

use libc::{c_int, c_void, socklen_t};

use ndproxy_types::ether::{self, Ipv6EtherHeader, ETHER_HDR_LEN, ETHERTYPE_IPV6, IPV6_HDR_LEN};
use ndproxy_types::ip::PROTO_ICMPV6;
use ndproxy_types::lladdr::{LLAddress, ARPHRD_ETHER};
use ndproxy_types::ndmsg::ICMPV6_HDR_LEN;

use crate::error::{Error, ErrorKind, Result, ResultExt};

/// Large enough for any frame on a standard 1500-byte MTU link.
const RECEIVE_BUFFER_SIZE: usize = 2048;

/// The minimum MTU an IPv6 link may have (RFC 8200). Outgoing ICMPv6
/// error messages are sized so the whole ethernet frame fits in it.
const IPV6_MINIMUM_MTU: usize = 1280;

/// Maximum ICMPv6 message body for error messages.
const ICMPV6_PAYLOAD_MAX: usize = IPV6_MINIMUM_MTU - (ETHER_HDR_LEN + IPV6_HDR_LEN + ICMPV6_HDR_LEN);

/// RFC 3542 section 3.2 inbound ICMPv6 type filter.
const ICMP6_FILTER: c_int = 1;

/// ICMPv6 Destination Unreachable and Packet Too Big types (RFC 4443).
pub const ICMPV6_DEST_UNREACHABLE: u8 = 1;
pub const ICMPV6_PACKET_TOO_BIG: u8 = 2;

fn if_nametoindex(if_name: &str) -> Result<u32> {
    let c_name = CString::new(if_name)
        .map_err(|_| Error::with(ErrorKind::InvalidArgument, "interface name contains NUL"))?;
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    if index == 0 {
        return Err(Error::from_errno("if_nametoindex()")
            .context(format!("no interface found with name {if_name}")));
    }
    Ok(index)
}

fn ifreq_for(if_name: &str) -> libc::ifreq {
    let mut ifr: libc::ifreq = unsafe { mem::zeroed() };
    // Truncation to IFNAMSIZ-1 mirrors the kernel's own limit.
    for (dst, src) in ifr.ifr_name.iter_mut().take(15).zip(if_name.as_bytes()) {
        *dst = *src as libc::c_char;
    }
    ifr
}

fn setsockopt<T>(fd: RawFd, level: c_int, option: c_int, value: &T) -> Result<()> {
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            option,
            value as *const T as *const c_void,
            mem::size_of::<T>() as socklen_t,
        )
    };
    if rc < 0 {
        return Err(Error::from_errno("setsockopt()"));
    }
    Ok(())
}

fn set_nonblocking_fd(fd: RawFd, enabled: bool) -> Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(Error::from_errno("fcntl(F_GETFL)"));
    }
    let flags = if enabled {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } < 0 {
        return Err(Error::from_errno("fcntl(F_SETFL)"));
    }
    Ok(())
}

/// A raw ethernet socket for IPv6 frames on one interface.
#[derive(Debug)]
pub struct EtherSocket {
    name: String,
    index: u32,
    fd: Option<OwnedFd>,
}

impl EtherSocket {
    /// Opens a raw `AF_PACKET` socket and binds it to the interface and
    /// the IPv6 ethertype.
    pub fn open(if_name: &str) -> Result<EtherSocket> {
        if if_name.is_empty() {
            return Err(Error::with(
                ErrorKind::InvalidArgument,
                "empty string is not a valid interface name",
            ));
        }
        let index = if_nametoindex(if_name)?;

        let protocol = c_int::from(ETHERTYPE_IPV6.to_be());
        let raw_fd = unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW, protocol) };
        if raw_fd < 0 {
            return Err(Error::from_errno("socket()")
                .context("process cannot open a raw ethernet socket"));
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw_fd) };

        let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as u16;
        addr.sll_protocol = ETHERTYPE_IPV6.to_be();
        addr.sll_ifindex = index as c_int;
        let rc = unsafe {
            libc::bind(
                raw_fd,
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as socklen_t,
            )
        };
        if rc < 0 {
            return Err(
                Error::from_errno("bind()").context(format!("cannot bind to interface {if_name}"))
            );
        }

        Ok(EtherSocket {
            name: if_name.to_string(),
            index,
            fd: Some(fd),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn close(&mut self) {
        self.fd = None;
    }

    fn fd(&self) -> Result<RawFd> {
        self.fd
            .as_ref()
            .map(AsRawFd::as_raw_fd)
            .ok_or_else(|| Error::with(ErrorKind::BadInternalState, "socket is closed"))
    }

    /// Attaches a classic BPF program to inbound traffic, or detaches
    /// the current one when `program` is `None`.
    pub fn attach_filter(&self, program: Option<&[libc::sock_filter]>) -> Result<()> {
        let fd = self.fd()?;
        match program {
            Some(instructions) => {
                let prog = libc::sock_fprog {
                    len: instructions.len() as u16,
                    filter: instructions.as_ptr() as *mut libc::sock_filter,
                };
                setsockopt(fd, libc::SOL_SOCKET, libc::SO_ATTACH_FILTER, &prog)
                    .context("failed to attach socket filter")
            }
            None => {
                let rc = unsafe {
                    libc::setsockopt(
                        fd,
                        libc::SOL_SOCKET,
                        libc::SO_DETACH_FILTER,
                        std::ptr::null(),
                        0,
                    )
                };
                if rc < 0 {
                    return Err(Error::from_errno("setsockopt()")
                        .context("failed to detach socket filter"));
                }
                Ok(())
            }
        }
    }

    /// Receive all link-layer multicast and broadcast frames seen on the
    /// link, not only groups the host joined.
    pub fn set_all_multicast(&self, enabled: bool) -> Result<()> {
        self.update_interface_flags(libc::IFF_ALLMULTI as i16, enabled)
            .context("failed to set all-multicast mode")
    }

    pub fn set_promiscuous(&self, enabled: bool) -> Result<()> {
        self.update_interface_flags(libc::IFF_PROMISC as i16, enabled)
            .context("failed to set promiscuous mode")
    }

    pub fn set_nonblocking(&self, enabled: bool) -> Result<()> {
        set_nonblocking_fd(self.fd()?, enabled)
    }

    pub fn is_loopback(&self) -> Result<bool> {
        Ok(self.interface_flags()? & libc::IFF_LOOPBACK as i16 != 0)
    }

    /// The unicast link-layer address assigned to the interface. Only
    /// Ethernet hardware is supported.
    pub fn link_layer_address(&self) -> Result<LLAddress> {
        let fd = self.fd()?;
        let mut ifr = ifreq_for(&self.name);
        if unsafe { libc::ioctl(fd, libc::SIOCGIFHWADDR, &mut ifr) } < 0 {
            return Err(Error::from_errno("ioctl(SIOCGIFHWADDR)")
                .context("failed to get interface hardware address"));
        }
        let hwaddr = unsafe { ifr.ifr_ifru.ifru_hwaddr };
        if hwaddr.sa_family != ARPHRD_ETHER {
            return Err(Error::with(
                ErrorKind::UnsupportedType,
                format!("hardware type {} is not supported", hwaddr.sa_family),
            ));
        }
        let mut raw = [0u8; 6];
        for (dst, src) in raw.iter_mut().zip(hwaddr.sa_data.iter()) {
            *dst = *src as u8;
        }
        Ok(LLAddress::from(raw))
    }

    pub fn link_mtu(&self) -> Result<u32> {
        let fd = self.fd()?;
        let mut ifr = ifreq_for(&self.name);
        if unsafe { libc::ioctl(fd, libc::SIOCGIFMTU, &mut ifr) } < 0 {
            return Err(Error::from_errno("ioctl(SIOCGIFMTU)")
                .context("failed to get interface MTU"));
        }
        Ok(unsafe { ifr.ifr_ifru.ifru_mtu } as u32)
    }

    /// Receives one frame and parses its ethernet and IPv6 headers.
    pub fn receive(&self) -> Result<(Ipv6EtherHeader, Vec<u8>)> {
        let fd = self.fd()?;
        let mut buf = [0u8; RECEIVE_BUFFER_SIZE];
        let n = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut c_void, buf.len(), 0) };
        if n < 0 {
            return Err(Error::from_errno("recv()"));
        }
        if n == 0 {
            return Err(Error::with(
                ErrorKind::ResultUnavailable,
                "nothing was received",
            ));
        }
        let (header, payload) = ether::parse_frame(&buf[..n as usize])
            .map_err(|e| Error::with(ErrorKind::MalformedPacket, e.to_string()))?;
        Ok((header, payload.to_vec()))
    }

    /// Drains one queued frame without looking at it.
    pub fn discard(&self) -> Result<()> {
        let fd = self.fd()?;
        let mut buf = [0u8; RECEIVE_BUFFER_SIZE];
        let n = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut c_void, buf.len(), 0) };
        if n < 0 {
            return Err(Error::from_errno("recv()").context("failed to discard frame"));
        }
        Ok(())
    }

    /// Assembles and sends one frame. The caller is responsible for the
    /// MTU of the payload.
    pub fn send(&self, header: &Ipv6EtherHeader, payload: &[u8]) -> Result<()> {
        let fd = self.fd()?;
        let frame = ether::build_frame(header, payload)
            .map_err(|e| Error::with(ErrorKind::InvalidArgument, e.to_string()))?;
        let n = unsafe { libc::send(fd, frame.as_ptr() as *const c_void, frame.len(), 0) };
        if n < 0 {
            return Err(Error::from_errno("send()"));
        }
        if n as usize != frame.len() {
            return Err(Error::with(
                ErrorKind::UnexpectedFailure,
                format!("short send: {n} of {} bytes", frame.len()),
            ));
        }
        Ok(())
    }

    fn interface_flags(&self) -> Result<i16> {
        let fd = self.fd()?;
        let mut ifr = ifreq_for(&self.name);
        if unsafe { libc::ioctl(fd, libc::SIOCGIFFLAGS, &mut ifr) } < 0 {
            return Err(Error::from_errno("ioctl(SIOCGIFFLAGS)")
                .context("failed to get interface flags"));
        }
        Ok(unsafe { ifr.ifr_ifru.ifru_flags })
    }

    fn update_interface_flags(&self, bits: i16, enabled: bool) -> Result<()> {
        let fd = self.fd()?;
        let flags = self.interface_flags()?;
        let mut ifr = ifreq_for(&self.name);
        ifr.ifr_ifru.ifru_flags = if enabled { flags | bits } else { flags & !bits };
        if unsafe { libc::ioctl(fd, libc::SIOCSIFFLAGS, &ifr) } < 0 {
            return Err(Error::from_errno("ioctl(SIOCSIFFLAGS)")
                .context("failed to set interface flags"));
        }
        Ok(())
    }
}

impl AsRawFd for EtherSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_ref().map(AsRawFd::as_raw_fd).unwrap_or(-1)
    }
}

/// A raw ICMPv6 socket bound to one interface, used only for sending
/// maintenance messages. All inbound traffic is blocked by filter.
#[derive(Debug)]
pub struct Icmpv6Socket {
    name: String,
    index: u32,
    fd: Option<OwnedFd>,
}

impl Icmpv6Socket {
    pub fn open(if_name: &str) -> Result<Icmpv6Socket> {
        if if_name.is_empty() {
            return Err(Error::with(
                ErrorKind::InvalidArgument,
                "empty string is not a valid interface name",
            ));
        }
        let index = if_nametoindex(if_name)?;

        let raw_fd = unsafe {
            libc::socket(libc::AF_INET6, libc::SOCK_RAW, c_int::from(PROTO_ICMPV6))
        };
        if raw_fd < 0 {
            return Err(
                Error::from_errno("socket()").context("process cannot open a raw ICMPv6 socket")
            );
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw_fd) };

        let ifr = ifreq_for(if_name);
        setsockopt(raw_fd, libc::SOL_SOCKET, libc::SO_BINDTODEVICE, &ifr)
            .context(format!("cannot bind ICMPv6 socket to {if_name}"))?;

        Ok(Icmpv6Socket {
            name: if_name.to_string(),
            index,
            fd: Some(fd),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn close(&mut self) {
        self.fd = None;
    }

    fn fd(&self) -> Result<RawFd> {
        self.fd
            .as_ref()
            .map(AsRawFd::as_raw_fd)
            .ok_or_else(|| Error::with(ErrorKind::BadInternalState, "socket is closed"))
    }

    pub fn set_nonblocking(&self, enabled: bool) -> Result<()> {
        set_nonblocking_fd(self.fd()?, enabled)
    }

    /// Blocks every inbound ICMPv6 type; the socket is send-only.
    pub fn block_all_input(&self) -> Result<()> {
        let filter = [u32::MAX; 8];
        setsockopt(self.fd()?, c_int::from(PROTO_ICMPV6), ICMP6_FILTER, &filter)
            .context("failed to attach block-all ICMPv6 filter")
    }

    /// Default hop limit for outgoing multicast packets, ipv6(7).
    pub fn set_multicast_hop_limit(&self, hop_limit: u8) -> Result<()> {
        let value = c_int::from(hop_limit);
        setsockopt(
            self.fd()?,
            libc::IPPROTO_IPV6,
            libc::IPV6_MULTICAST_HOPS,
            &value,
        )
        .context("failed to set multicast hop limit")
    }

    /// Default hop limit for outgoing unicast packets.
    pub fn set_unicast_hop_limit(&self, hop_limit: u8) -> Result<()> {
        let value = c_int::from(hop_limit);
        setsockopt(
            self.fd()?,
            libc::IPPROTO_IPV6,
            libc::IPV6_UNICAST_HOPS,
            &value,
        )
        .context("failed to set unicast hop limit")
    }

    /// Sends an ICMPv6 Destination Unreachable with the given RFC 4443
    /// section 3.1 code, echoing the offending packet.
    pub fn send_destination_unreachable(
        &self,
        destination: std::net::Ipv6Addr,
        code: u8,
        original_header: &Ipv6EtherHeader,
        original_body: &[u8],
    ) -> Result<()> {
        self.send_error_message(
            destination,
            ICMPV6_DEST_UNREACHABLE,
            code,
            [0; 4],
            original_header,
            original_body,
        )
        .context("failed to send destination unreachable")
    }

    /// Sends an ICMPv6 Packet Too Big carrying the MTU of the link that
    /// rejected the packet.
    pub fn send_packet_too_big(
        &self,
        destination: std::net::Ipv6Addr,
        mtu: u32,
        original_header: &Ipv6EtherHeader,
        original_body: &[u8],
    ) -> Result<()> {
        self.send_error_message(
            destination,
            ICMPV6_PACKET_TOO_BIG,
            0,
            mtu.to_be_bytes(),
            original_header,
            original_body,
        )
        .context("failed to send packet too big")
    }

    fn send_error_message(
        &self,
        destination: std::net::Ipv6Addr,
        icmp_type: u8,
        code: u8,
        data: [u8; 4],
        original_header: &Ipv6EtherHeader,
        original_body: &[u8],
    ) -> Result<()> {
        let fd = self.fd()?;

        // ICMPv6 header with a zero checksum; the kernel fills it in.
        let mut message = Vec::with_capacity(ICMPV6_PAYLOAD_MAX + ICMPV6_HDR_LEN);
        message.push(icmp_type);
        message.push(code);
        message.extend_from_slice(&[0, 0]);
        message.extend_from_slice(&data);

        // Echo the offending packet, truncated so the whole frame stays
        // within the IPv6 minimum MTU.
        let body_len = original_body.len().min(ICMPV6_PAYLOAD_MAX - IPV6_HDR_LEN);
        original_header.write_ipv6(original_body.len() as u16, &mut message);
        message.extend_from_slice(&original_body[..body_len]);

        let mut addr: libc::sockaddr_in6 = unsafe { mem::zeroed() };
        addr.sin6_family = libc::AF_INET6 as u16;
        addr.sin6_addr.s6_addr = destination.octets();

        let n = unsafe {
            libc::sendto(
                fd,
                message.as_ptr() as *const c_void,
                message.len(),
                0,
                &addr as *const libc::sockaddr_in6 as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in6>() as socklen_t,
            )
        };
        if n < 0 {
            return Err(Error::from_errno("sendto()"));
        }
        Ok(())
    }
}

impl AsRawFd for Icmpv6Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_ref().map(AsRawFd::as_raw_fd).unwrap_or(-1)
    }
}
