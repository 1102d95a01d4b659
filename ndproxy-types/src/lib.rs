//! Wire-level types for the IPv6 Neighbor Discovery proxy: link-layer
//! addresses, IPv6 checksum and address helpers, the parsed
//! ethernet+IPv6 header view, and Neighbor Discovery messages.

pub mod ether;
pub mod ip;
pub mod lladdr;
pub mod ndmsg;
