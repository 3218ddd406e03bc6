use std::fmt;
use std::net::Ipv6Addr;

use serde::{Deserialize, Serialize};

/// An 128-bit identifier used to identify a port on a network adapter, a port
/// on a router, or a multicast group.
///
/// The upper 64 bits are the subnet prefix and the lower 64 bits are the
/// interface ID, both in network byte order.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Gid([u8; 16]);

impl Gid {
    /// Assemble a GID from its subnet prefix and interface ID.
    #[inline]
    pub fn new(subnet_prefix: u64, interface_id: u64) -> Self {
        let mut raw = [0; 16];
        raw[..8].copy_from_slice(&subnet_prefix.to_be_bytes());
        raw[8..].copy_from_slice(&interface_id.to_be_bytes());
        Self(raw)
    }

    /// Get the subnet prefix of this GID.
    #[inline]
    pub fn subnet_prefix(&self) -> u64 {
        let mut buf = [0; 8];
        buf.copy_from_slice(&self.0[..8]);
        u64::from_be_bytes(buf)
    }

    /// Get the interface ID of this GID.
    #[inline]
    pub fn interface_id(&self) -> u64 {
        let mut buf = [0; 8];
        buf.copy_from_slice(&self.0[8..]);
        u64::from_be_bytes(buf)
    }

    /// Get the raw bytes of this GID.
    #[inline]
    pub fn raw(&self) -> [u8; 16] {
        self.0
    }
}

impl fmt::Debug for Gid {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let gid = Ipv6Addr::from(*self);
        f.debug_tuple("Gid").field(&gid.to_string()).finish()
    }
}

impl fmt::Display for Gid {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Ipv6Addr::from(*self).fmt(f)
    }
}

impl From<Ipv6Addr> for Gid {
    #[inline]
    fn from(addr: Ipv6Addr) -> Self {
        Self(addr.octets())
    }
}

impl From<Gid> for Ipv6Addr {
    #[inline]
    fn from(gid: Gid) -> Self {
        Ipv6Addr::from(gid.0)
    }
}

impl From<[u8; 16]> for Gid {
    #[inline]
    fn from(raw: [u8; 16]) -> Self {
        Self(raw)
    }
}

impl From<Gid> for [u8; 16] {
    #[inline]
    fn from(gid: Gid) -> Self {
        gid.0
    }
}

impl Serialize for Gid {
    #[inline]
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        <[u8; 16] as Serialize>::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for Gid {
    #[inline]
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        <[u8; 16] as Deserialize<'de>>::deserialize(deserializer).map(Self::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_and_interface() {
        let gid = Gid::new(0xfe80_0000_0000_0000, 0x0002_c903_00a1_b2c3);
        assert_eq!(gid.subnet_prefix(), 0xfe80_0000_0000_0000);
        assert_eq!(gid.interface_id(), 0x0002_c903_00a1_b2c3);
        assert_eq!(
            Ipv6Addr::from(gid),
            "fe80::2:c903:a1:b2c3".parse::<Ipv6Addr>().unwrap()
        );
    }

    #[test]
    fn test_serde() {
        let gid = Gid::from("fe80::1".parse::<Ipv6Addr>().unwrap());
        let json = serde_json::to_string(&gid).unwrap();
        assert_eq!(serde_json::from_str::<Gid>(&json).unwrap(), gid);
    }
}
