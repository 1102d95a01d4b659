//! A user-space IPv6 Neighbor Discovery proxy (RFC 4389).
//!
//! Interfaces are organized into proxy groups; Neighbor Discovery and
//! other IPv6 traffic received on one member is rewritten and forwarded
//! to the others, so the attached links appear as a single subnet
//! without a layer-2 bridge.

pub mod bpf;
pub mod error;
pub mod group;
pub mod iface;
pub mod labels;
pub mod neighbor;
pub mod proxy;
pub mod sockets;
pub mod timer;

pub use ndproxy_types as types;

pub use error::{Error, ErrorKind, Result};
pub use proxy::NdProxy;
