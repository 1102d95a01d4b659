use std::fmt;

/// ARP hardware type for Ethernet (EUI-48) devices.
pub const ARPHRD_ETHER: u16 = 1;
/// ARP hardware type for EUI-64 devices.
pub const ARPHRD_EUI64: u16 = 27;

/// A link-layer address.
///
/// Only the EUI-48 and EUI-64 formats are representable. Anything else,
/// including byte strings of the wrong width for their claimed format,
/// collapses into [`LLAddress::Invalid`]. An invalid address compares
/// unequal to everything, itself included.
#[derive(Debug, Clone)]
pub enum LLAddress {
    Eui48([u8; 6]),
    Eui64([u8; 8]),
    Invalid,
}

impl LLAddress {
    /// Builds an address from a raw byte slice. The slice length must match
    /// the expected width of `arp_type` (6 for Ethernet, 8 for EUI-64).
    pub fn from_bytes(arp_type: u16, bytes: &[u8]) -> LLAddress {
        match (arp_type, bytes.len()) {
            (ARPHRD_ETHER, 6) => {
                let mut raw = [0; 6];
                raw.copy_from_slice(bytes);
                LLAddress::Eui48(raw)
            }
            (ARPHRD_EUI64, 8) => {
                let mut raw = [0; 8];
                raw.copy_from_slice(bytes);
                LLAddress::Eui64(raw)
            }
            _ => LLAddress::Invalid,
        }
    }

    /// Parses the textual form of an address: two hex digits per octet,
    /// all octets joined by `:` or by `-`. Mixed case is accepted, mixed
    /// separators, missing leading zeros, or a wrong octet count are not.
    pub fn parse(arp_type: u16, s: &str) -> LLAddress {
        let expected = match arp_type {
            ARPHRD_ETHER => 6,
            ARPHRD_EUI64 => 8,
            _ => return LLAddress::Invalid,
        };

        let sep = match s.as_bytes().get(2) {
            Some(b':') => ':',
            Some(b'-') => '-',
            _ => return LLAddress::Invalid,
        };

        let mut raw = [0u8; 8];
        let mut count = 0;
        for part in s.split(sep) {
            if count >= expected || part.len() != 2 {
                return LLAddress::Invalid;
            }
            if !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return LLAddress::Invalid;
            }
            let Ok(byte) = u8::from_str_radix(part, 16) else {
                return LLAddress::Invalid;
            };
            raw[count] = byte;
            count += 1;
        }
        if count != expected {
            return LLAddress::Invalid;
        }

        LLAddress::from_bytes(arp_type, &raw[..expected])
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        !matches!(self, LLAddress::Invalid)
    }

    /// The ARP hardware type the kernel uses for this address format,
    /// or `None` for an invalid address.
    pub fn arp_type(&self) -> Option<u16> {
        match self {
            LLAddress::Eui48(_) => Some(ARPHRD_ETHER),
            LLAddress::Eui64(_) => Some(ARPHRD_EUI64),
            LLAddress::Invalid => None,
        }
    }

    /// The raw octets. Empty for an invalid address.
    pub fn as_slice(&self) -> &[u8] {
        match self {
            LLAddress::Eui48(raw) => raw,
            LLAddress::Eui64(raw) => raw,
            LLAddress::Invalid => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    /// Unicast addresses have the least significant bit of the first
    /// octet cleared.
    #[must_use]
    pub fn is_unicast(&self) -> bool {
        match self.as_slice().first() {
            Some(first) => first & 0x01 == 0,
            None => false,
        }
    }

    #[must_use]
    pub fn is_multicast(&self) -> bool {
        self.is_valid() && !self.is_unicast()
    }

    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.is_valid() && self.as_slice().iter().all(|&b| b == 0xff)
    }

    /// Universally administered addresses have the second least
    /// significant bit of the first octet cleared.
    #[must_use]
    pub fn is_universal(&self) -> bool {
        match self.as_slice().first() {
            Some(first) => first & 0x02 == 0,
            None => false,
        }
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        self.is_valid() && !self.is_universal()
    }
}

impl From<[u8; 6]> for LLAddress {
    fn from(raw: [u8; 6]) -> Self {
        LLAddress::Eui48(raw)
    }
}

impl From<[u8; 8]> for LLAddress {
    fn from(raw: [u8; 8]) -> Self {
        LLAddress::Eui64(raw)
    }
}

// Deliberately not `Eq`: comparison against an invalid address is always
// false, even between two invalid addresses.
impl PartialEq for LLAddress {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (LLAddress::Eui48(l), LLAddress::Eui48(r)) => l == r,
            (LLAddress::Eui64(l), LLAddress::Eui64(r)) => l == r,
            _ => false,
        }
    }
}

impl fmt::Display for LLAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return write!(f, "invalid");
        }
        for (i, byte) in self.as_slice().iter().enumerate() {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_eui48() {
        let addr = LLAddress::parse(ARPHRD_ETHER, "a0:8c:fd:c3:b3:c0");
        assert_eq!(addr, LLAddress::from([0xa0, 0x8c, 0xfd, 0xc3, 0xb3, 0xc0]));
        let dashed = LLAddress::parse(ARPHRD_ETHER, "A0-8C-FD-C3-B3-C0");
        assert_eq!(addr, dashed);
    }

    #[test]
    fn parse_eui64() {
        let addr = LLAddress::parse(ARPHRD_EUI64, "01:23:45:67:89:ab:cd:ef");
        assert_eq!(
            addr,
            LLAddress::from([0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef])
        );
    }

    #[test]
    fn parse_rejects_malformed() {
        // Missing leading zero.
        assert!(!LLAddress::parse(ARPHRD_ETHER, "50:ef:f:00:11:22").is_valid());
        // Mixed separators.
        assert!(!LLAddress::parse(ARPHRD_ETHER, "50:ef-0f:00:11:22").is_valid());
        // Too few / too many octets.
        assert!(!LLAddress::parse(ARPHRD_ETHER, "50:ef:0f:00:11").is_valid());
        assert!(!LLAddress::parse(ARPHRD_ETHER, "50:ef:0f:00:11:22:33").is_valid());
        // Not hex.
        assert!(!LLAddress::parse(ARPHRD_ETHER, "5g:ef:0f:00:11:22").is_valid());
        // Unknown hardware type.
        assert!(!LLAddress::parse(0xffff, "50:ef:0f:00:11:22").is_valid());
        assert!(!LLAddress::parse(ARPHRD_ETHER, "").is_valid());
    }

    #[test]
    fn from_bytes_length_mismatch() {
        assert!(!LLAddress::from_bytes(ARPHRD_ETHER, &[1, 2, 3]).is_valid());
        assert!(!LLAddress::from_bytes(ARPHRD_EUI64, &[1, 2, 3, 4, 5, 6]).is_valid());
        assert!(LLAddress::from_bytes(ARPHRD_ETHER, &[1, 2, 3, 4, 5, 6]).is_valid());
    }

    #[test]
    fn routing_scheme_predicates() {
        let unicast = LLAddress::from([0xa0, 0x8c, 0xfd, 0xc3, 0xb3, 0xc0]);
        assert!(unicast.is_unicast());
        assert!(!unicast.is_multicast());
        assert!(!unicast.is_broadcast());

        let multicast = LLAddress::from([0x33, 0x33, 0x00, 0x00, 0x00, 0x02]);
        assert!(multicast.is_multicast());
        assert!(!multicast.is_unicast());

        let broadcast = LLAddress::from([0xff; 6]);
        assert!(broadcast.is_broadcast());
        assert!(broadcast.is_multicast());

        assert!(!LLAddress::Invalid.is_unicast());
        assert!(!LLAddress::Invalid.is_multicast());
        assert!(!LLAddress::Invalid.is_broadcast());
    }

    #[test]
    fn administration_predicates() {
        let universal = LLAddress::from([0xa0, 0x8c, 0xfd, 0xc3, 0xb3, 0xc0]);
        assert!(universal.is_universal());
        assert!(!universal.is_local());

        let local = LLAddress::from([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
        assert!(local.is_local());
        assert!(!local.is_universal());
    }

    #[test]
    fn invalid_never_equal() {
        assert_ne!(LLAddress::Invalid, LLAddress::Invalid);
        assert_ne!(LLAddress::Invalid, LLAddress::from([0u8; 6]));
        // Same bytes, different widths.
        let eui48 = LLAddress::from([1, 2, 3, 4, 5, 6]);
        let eui64 = LLAddress::from([1, 2, 3, 4, 5, 6, 0, 0]);
        assert_ne!(eui48, eui64);
    }

    #[test]
    fn display() {
        let addr = LLAddress::from([0xa0, 0x8c, 0xfd, 0xc3, 0xb3, 0xc0]);
        assert_eq!(addr.to_string(), "a0:8c:fd:c3:b3:c0");
        assert_eq!(LLAddress::Invalid.to_string(), "invalid");
    }
}
