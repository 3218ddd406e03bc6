use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::rdma::gid::Gid;
use crate::rdma::types::*;

/// Physical port information.
///
/// This is a snapshot taken when queried: it does not follow later changes
/// of the port. Use [`Nic::is_active`](super::Nic::is_active) to observe the
/// live link state.
#[derive(Debug, Clone)]
pub struct Port {
    /// Index of this port.
    pub(crate) num: PortNum,

    /// Logical link state.
    pub(crate) state: PortState,

    /// LID assigned to this port.
    pub(crate) lid: Lid,

    /// GID table of this port.
    pub(crate) gids: Vec<Gid>,

    /// Active MTU.
    pub(crate) mtu: PortMtu,

    /// Link layer protocol.
    pub(crate) link_layer: PortLinkLayer,

    /// Active speed.
    pub(crate) speed: PortSpeed,
}

impl Port {
    /// Get the index of this port.
    #[inline]
    pub fn num(&self) -> PortNum {
        self.num
    }

    /// Get the state of this port.
    #[inline]
    pub fn state(&self) -> PortState {
        self.state
    }

    /// Get the LID of this port.
    #[inline]
    pub fn lid(&self) -> Lid {
        self.lid
    }

    /// Get the link layer protocol of this port.
    #[inline]
    pub fn link_layer(&self) -> PortLinkLayer {
        self.link_layer
    }

    /// Get the active MTU of this port.
    #[inline]
    pub fn mtu(&self) -> PortMtu {
        self.mtu
    }

    /// Get the active speed of this port.
    #[inline]
    pub fn speed(&self) -> PortSpeed {
        self.speed
    }

    /// Get the GIDs of this port.
    pub fn gids(&self) -> &[Gid] {
        &self.gids
    }
}

/// Port state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortState {
    /// Logical link is down. The physical link of the port isn't up.
    /// All TX packets will be dropped, and RX is impossible.
    Down,

    /// Logical link is Initializing.
    /// The physical link of the port is up, but the SM haven't yet configured the logical link.
    Init,

    /// Logical link is Armed.
    /// The physical link of the port is up, but the SM haven't yet fully configured the logical link.
    Armed,

    /// Logical link is Active.
    /// TX/RX all packets.
    Active,

    /// Logical link is Active Deferred.
    /// The physical link of the port is suffering from a failure.
    ActiveDefer,
}

impl Display for PortState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Down => "DOWN",
            Self::Init => "INIT",
            Self::Armed => "ARMED",
            Self::Active => "ACTIVE",
            Self::ActiveDefer => "ACTIVE_DEFER",
        })
    }
}

/// Port link layer protocol type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortLinkLayer {
    /// Infiniband.
    #[default]
    Infiniband,

    /// Ethernet.
    Ethernet,
}

/// Port MTU size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PortMtu {
    /// 256 bytes.
    Mtu256,

    /// 512 bytes.
    Mtu512,

    /// 1024 bytes.
    Mtu1024,

    /// 2048 bytes.
    Mtu2048,

    /// 4096 bytes.
    Mtu4096,
}

impl PortMtu {
    /// Get the MTU in bytes.
    #[inline]
    pub fn bytes(&self) -> usize {
        match self {
            Self::Mtu256 => 256,
            Self::Mtu512 => 512,
            Self::Mtu1024 => 1024,
            Self::Mtu2048 => 2048,
            Self::Mtu4096 => 4096,
        }
    }
}

impl Display for PortMtu {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}B", self.bytes())
    }
}

/// Port speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct PortSpeed(pub(crate) u32);

impl PortSpeed {
    /// Build from a speed in Gbps, rounded to one decimal.
    #[inline]
    pub(crate) fn from_gbps(gbps: f32) -> Self {
        // Speed times 10 to avoid floating point numbers, which are `!Eq`.
        Self((gbps * 10.0).round().max(0.0) as u32)
    }

    /// Get the speed in Gbps.
    #[inline]
    pub fn gbps(&self) -> f32 {
        self.0 as f32 / 10.0
    }
}

impl Display for PortSpeed {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1}Gbps", self.gbps())
    }
}
