//! `Ipv6Addr` newtype plus SLAAC address derivation. Grounded on
//! `original_source/RPL/address.py`.

use crate::constants::ALL_RPL_NODES;
use crate::error::RplError;
use std::fmt;
use std::net::Ipv6Addr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(Ipv6Addr);

impl Address {
    pub fn new(addr: Ipv6Addr) -> Self {
        Self(addr)
    }

    pub fn inner(&self) -> Ipv6Addr {
        self.0
    }

    pub fn is_link_local(&self) -> bool {
        let segments = self.0.segments();
        (segments[0] & 0xffc0) == 0xfe80
    }

    pub fn is_all_rpl_nodes(&self) -> bool {
        self.0 == ALL_RPL_NODES
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Ipv6Addr> for Address {
    fn from(addr: Ipv6Addr) -> Self {
        Self(addr)
    }
}

/// Derives a SLAAC address from a prefix and a link-layer address, the way
/// `address.py`'s `derive_address`/`lladdr_to_iid` do: an EUI-64 lladdr
/// becomes the interface identifier directly (with the universal/local bit
/// flipped); an EUI-48 (MAC-48) lladdr is first expanded to EUI-64 by
/// inserting `ff:fe` in the middle.
pub fn derive_address(prefix: &Ipv6Addr, lladdr: &[u8]) -> Result<Address, RplError> {
    let eui64: [u8; 8] = match lladdr.len() {
        8 => lladdr.try_into().unwrap(),
        6 => {
            let mut buf = [0u8; 8];
            buf[..3].copy_from_slice(&lladdr[..3]);
            buf[3] = 0xff;
            buf[4] = 0xfe;
            buf[5..].copy_from_slice(&lladdr[3..]);
            buf
        }
        _ => return Err(RplError::UnsupportedLladdrLength(lladdr.to_vec())),
    };

    let mut iid = eui64;
    iid[0] ^= 0x02;

    let prefix_segments = prefix.segments();
    let segments = [
        prefix_segments[0],
        prefix_segments[1],
        prefix_segments[2],
        prefix_segments[3],
        u16::from_be_bytes([iid[0], iid[1]]),
        u16::from_be_bytes([iid[2], iid[3]]),
        u16::from_be_bytes([iid[4], iid[5]]),
        u16::from_be_bytes([iid[6], iid[7]]),
    ];

    Ok(Address::new(Ipv6Addr::new(
        segments[0], segments[1], segments[2], segments[3], segments[4], segments[5], segments[6], segments[7],
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_local_is_recognized() {
        let addr = Address::new("fe80::1".parse().unwrap());
        assert!(addr.is_link_local());
        let addr = Address::new("2001:db8::1".parse().unwrap());
        assert!(!addr.is_link_local());
    }

    #[test]
    fn all_rpl_nodes_matches_the_well_known_multicast_address() {
        let addr = Address::new(ALL_RPL_NODES);
        assert!(addr.is_all_rpl_nodes());
    }

    #[test]
    fn derives_an_address_from_an_eui48_lladdr() {
        let prefix: Ipv6Addr = "2001:db8::".parse().unwrap();
        let lladdr = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55];
        let addr = derive_address(&prefix, &lladdr).unwrap();
        let segments = addr.inner().segments();
        assert_eq!(segments[0], 0x2001);
        assert_eq!(segments[1], 0x0db8);
        assert_eq!(segments[4], 0x0211);
        assert_eq!(segments[5], 0x22ff);
        assert_eq!(segments[6], 0xfe33);
        assert_eq!(segments[7], 0x4455);
    }

    #[test]
    fn rejects_an_unsupported_lladdr_length() {
        let prefix: Ipv6Addr = "2001:db8::".parse().unwrap();
        assert!(derive_address(&prefix, &[0x00, 0x11]).is_err());
    }
}
