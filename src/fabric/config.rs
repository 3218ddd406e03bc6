use serde::{Deserialize, Serialize};

use crate::rdma::nic::{PortLinkLayer, PortState};
use crate::rdma::types::*;

/// Topology of a software fabric.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FabricConfig {
    /// Devices, in discovery order.
    pub devices: Vec<DeviceConfig>,
}

impl Default for FabricConfig {
    /// Two devices `soft_0` and `soft_1`, each with one active port.
    fn default() -> Self {
        Self {
            devices: vec![DeviceConfig::new("soft_0"), DeviceConfig::new("soft_1")],
        }
    }
}

/// A device on the software fabric.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device name, as `ibv_devinfo` would show it.
    pub name: String,

    /// Physical ports, numbered from 1.
    pub ports: Vec<PortConfig>,

    /// Maximum number of outstanding work requests on one queue.
    pub max_qp_wr: u32,

    /// Maximum completion queue depth.
    pub max_cqe: u32,
}

impl DeviceConfig {
    /// A device with one active port and default capabilities.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            ports: vec![PortConfig::default()],
            max_qp_wr: 16384,
            max_cqe: 65536,
        }
    }
}

/// A physical port of a software device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    /// Initial logical link state.
    pub state: PortState,

    /// LID of the port. Assigned by the fabric if absent.
    pub lid: Option<Lid>,

    /// Number of GID table entries.
    pub gid_count: usize,

    /// Link layer protocol.
    pub link_layer: PortLinkLayer,

    /// Active speed in Gbps.
    pub speed_gbps: f32,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            state: PortState::Active,
            lid: None,
            gid_count: 2,
            link_layer: PortLinkLayer::Infiniband,
            speed_gbps: 100.0,
        }
    }
}
