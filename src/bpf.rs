//! Classic BPF programs attached to the raw ether sockets.
//!
//! Two programs split inbound IPv6 between the two sockets of a proxy
//! interface. The ND program accepts only proxyable Neighbor Discovery
//! frames; the non-ND program accepts every other IPv6 frame. ICMPv6
//! frames carrying an ND type that fails the ND program's hop-limit or
//! code checks are dropped by both programs, never proxied as generic
//! IPv6.
//!
//! A program returns the number of packet bytes to pass to user space;
//! zero drops the frame in the kernel before any wake-up. Out-of-bounds
//! loads terminate the program as if it returned zero, so truncated
//! frames need no explicit bounds checks.

use libc::sock_filter;

use ndproxy_types::ether::{ETHER_HDR_LEN, IPV6_HDR_LEN};
use ndproxy_types::ip::PROTO_ICMPV6;
use ndproxy_types::ndmsg::{
    ND_NEIGHBOR_ADVERT, ND_NEIGHBOR_SOLICIT, ND_REDIRECT, ND_ROUTER_ADVERT, ND_ROUTER_SOLICIT,
};

// Classic BPF opcode fields, from the kernel ABI.
const BPF_LD: u16 = 0x00;
const BPF_LDX: u16 = 0x01;
const BPF_ALU: u16 = 0x04;
const BPF_JMP: u16 = 0x05;
const BPF_RET: u16 = 0x06;
const BPF_MISC: u16 = 0x07;

const BPF_H: u16 = 0x08;
const BPF_B: u16 = 0x10;

const BPF_IMM: u16 = 0x00;
const BPF_ABS: u16 = 0x20;
const BPF_IND: u16 = 0x40;

const BPF_JEQ: u16 = 0x10;
const BPF_K: u16 = 0x00;
const BPF_ADD: u16 = 0x00;

const BPF_TAX: u16 = 0x00;
const BPF_TXA: u16 = 0x80;

/// Accept the whole frame regardless of its length.
const ENTIRE_PACKET: u32 = i32::MAX as u32;

/// Byte offset of the ethertype within the Ethernet header.
const ETHERTYPE_OFFSET: u32 = 12;
/// Offsets of next-header and hop-limit within the IPv6 header.
const IPV6_NEXT_HEADER_OFFSET: u32 = 6;
const IPV6_HOP_LIMIT_OFFSET: u32 = 7;

/// Hop limit required on every proxied ND packet (RFC 4861).
const PROXIED_HOP_LIMIT: u32 = 255;

const ETHERTYPE_IPV6: u32 = ndproxy_types::ether::ETHERTYPE_IPV6 as u32;

const fn stmt(code: u16, k: u32) -> sock_filter {
    sock_filter {
        code,
        jt: 0,
        jf: 0,
        k,
    }
}

const fn jump(code: u16, k: u32, jt: u8, jf: u8) -> sock_filter {
    sock_filter { code, jt, jf, k }
}

/// The Neighbor Discovery program: accept a frame only if the ethertype
/// is IPv6, the IPv6 next header is ICMPv6, the hop limit is exactly
/// 255, and the ICMPv6 type is one of the five ND types with code 0.
pub fn nd_filter() -> Vec<sock_filter> {
    vec![
        stmt(BPF_LD | BPF_H | BPF_ABS, ETHERTYPE_OFFSET),
        jump(BPF_JMP | BPF_JEQ | BPF_K, ETHERTYPE_IPV6, 1, 0),
        stmt(BPF_RET | BPF_K, 0),
        // X = start of the IPv6 header.
        stmt(BPF_LDX | BPF_IMM, ETHER_HDR_LEN as u32),
        stmt(BPF_LD | BPF_B | BPF_IND, IPV6_NEXT_HEADER_OFFSET),
        jump(BPF_JMP | BPF_JEQ | BPF_K, PROTO_ICMPV6 as u32, 0, 2),
        stmt(BPF_LD | BPF_B | BPF_IND, IPV6_HOP_LIMIT_OFFSET),
        jump(BPF_JMP | BPF_JEQ | BPF_K, PROXIED_HOP_LIMIT, 1, 0),
        stmt(BPF_RET | BPF_K, 0),
        // X = start of the ICMPv6 header.
        stmt(BPF_MISC | BPF_TXA, 0),
        stmt(BPF_ALU | BPF_ADD | BPF_IMM, IPV6_HDR_LEN as u32),
        stmt(BPF_MISC | BPF_TAX, 0),
        stmt(BPF_LD | BPF_B | BPF_IND, 0),
        jump(BPF_JMP | BPF_JEQ | BPF_K, ND_ROUTER_SOLICIT as u32, 5, 0),
        jump(BPF_JMP | BPF_JEQ | BPF_K, ND_ROUTER_ADVERT as u32, 4, 0),
        jump(BPF_JMP | BPF_JEQ | BPF_K, ND_NEIGHBOR_SOLICIT as u32, 3, 0),
        jump(BPF_JMP | BPF_JEQ | BPF_K, ND_NEIGHBOR_ADVERT as u32, 2, 0),
        jump(BPF_JMP | BPF_JEQ | BPF_K, ND_REDIRECT as u32, 1, 0),
        stmt(BPF_RET | BPF_K, 0),
        stmt(BPF_LD | BPF_B | BPF_IND, 1),
        jump(BPF_JMP | BPF_JEQ | BPF_K, 0, 1, 0),
        stmt(BPF_RET | BPF_K, 0),
        stmt(BPF_RET | BPF_K, ENTIRE_PACKET),
    ]
}

/// The complementary program: accept any IPv6 frame except ICMPv6
/// messages of the five ND types, which belong to the ND socket.
pub fn non_nd_filter() -> Vec<sock_filter> {
    vec![
        stmt(BPF_LD | BPF_H | BPF_ABS, ETHERTYPE_OFFSET),
        jump(BPF_JMP | BPF_JEQ | BPF_K, ETHERTYPE_IPV6, 1, 0),
        stmt(BPF_RET | BPF_K, 0),
        stmt(BPF_LDX | BPF_IMM, ETHER_HDR_LEN as u32),
        stmt(BPF_LD | BPF_B | BPF_IND, IPV6_NEXT_HEADER_OFFSET),
        jump(BPF_JMP | BPF_JEQ | BPF_K, PROTO_ICMPV6 as u32, 1, 0),
        stmt(BPF_RET | BPF_K, ENTIRE_PACKET),
        stmt(BPF_MISC | BPF_TXA, 0),
        stmt(BPF_ALU | BPF_ADD | BPF_IMM, IPV6_HDR_LEN as u32),
        stmt(BPF_MISC | BPF_TAX, 0),
        stmt(BPF_LD | BPF_B | BPF_IND, 0),
        jump(BPF_JMP | BPF_JEQ | BPF_K, ND_ROUTER_SOLICIT as u32, 5, 0),
        jump(BPF_JMP | BPF_JEQ | BPF_K, ND_ROUTER_ADVERT as u32, 4, 0),
        jump(BPF_JMP | BPF_JEQ | BPF_K, ND_NEIGHBOR_SOLICIT as u32, 3, 0),
        jump(BPF_JMP | BPF_JEQ | BPF_K, ND_NEIGHBOR_ADVERT as u32, 2, 0),
        jump(BPF_JMP | BPF_JEQ | BPF_K, ND_REDIRECT as u32, 1, 0),
        stmt(BPF_RET | BPF_K, ENTIRE_PACKET),
        stmt(BPF_RET | BPF_K, 0),
    ]
}
