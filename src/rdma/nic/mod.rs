//! RDMA hardware resource discovery and the NIC handle.

mod port;

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub use self::port::*;
use crate::error::{Error, Result};
use crate::provider::{self, Provider};
use crate::rdma::context::Context;
use crate::rdma::gid::Gid;
use crate::rdma::pd::Pd;
use crate::rdma::types::*;

/// A device/port pair, as enumerated by [`Nic::query_devices`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DevIdx {
    pub dev_id: usize,
    pub port_id: PortNum,
}

impl DevIdx {
    #[inline]
    pub fn new(dev_id: usize, port_id: PortNum) -> Self {
        Self { dev_id, port_id }
    }
}

impl fmt::Display for DevIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dev_id, self.port_id)
    }
}

/// An opened RDMA device bound to one port and one GID.
///
/// Owns the device context and a protection domain. Cloning is cheap and
/// shares both; the device is closed when the last clone, and the last
/// resource created from it, drops.
#[derive(Clone)]
pub struct Nic {
    context: Context,
    pd: Pd,
    port_num: PortNum,
    gid_index: GidIndex,
    gid: Gid,
    lid: Lid,
}

impl fmt::Debug for Nic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Nic")
            .field("dev", &self.context.name())
            .field("port", &self.port_num)
            .field("gid", &self.gid)
            .finish()
    }
}

impl Nic {
    /// Open a device port on the default provider, see
    /// [`provider::default_provider`].
    pub fn open(idx: DevIdx, gid_index: GidIndex) -> Result<Self> {
        Self::open_on(provider::default_provider()?, idx, gid_index)
    }

    /// Open a device port on the given provider.
    ///
    /// Fails with [`Error::NotFound`] if the device or port does not exist or
    /// the GID index is out of the port's GID table. Nothing stays open in
    /// that case.
    pub fn open_on(provider: Arc<dyn Provider>, idx: DevIdx, gid_index: GidIndex) -> Result<Self> {
        let context = Context::open(&provider, idx.dev_id)?;
        Self::bind(context, idx.port_id, gid_index)
    }

    /// Bind an opened device to one of its ports.
    fn bind(context: Context, port_num: PortNum, gid_index: GidIndex) -> Result<Self> {
        let idx = DevIdx::new(context.dev_index(), port_num);
        let port = context
            .query_port(port_num)
            .map_err(|_| Error::NotFound(format!("device port {}", idx)))?;
        let gid = *port.gids().get(gid_index as usize).ok_or_else(|| {
            Error::NotFound(format!(
                "GID index {} on device port {} ({} entries)",
                gid_index,
                idx,
                port.gids().len()
            ))
        })?;

        let pd = Pd::new(&context)?;
        Ok(Self {
            context,
            pd,
            port_num,
            gid_index,
            gid,
            lid: port.lid(),
        })
    }

    /// Enumerate all device/port pairs of the default provider.
    pub fn query_devices() -> Vec<DevIdx> {
        match provider::default_provider() {
            Ok(provider) => Self::query_devices_on(&*provider),
            Err(e) => {
                log::error!("qpman: no RDMA provider: {}", e);
                Vec::new()
            }
        }
    }

    /// Enumerate all device/port pairs of the given provider.
    pub fn query_devices_on(provider: &dyn Provider) -> Vec<DevIdx> {
        let devices = match provider.devices() {
            Ok(devices) => devices,
            Err(e) => {
                log::error!("qpman: cannot list {} devices: {}", provider.name(), e);
                return Vec::new();
            }
        };
        devices
            .into_iter()
            .enumerate()
            .flat_map(|(dev, info)| (1..=info.ports).map(move |p| DevIdx::new(dev, p as PortNum)))
            .collect()
    }

    /// Create a new finder instance.
    #[inline]
    pub fn finder() -> NicFinder {
        Default::default()
    }

    /// Check whether the bound port is active.
    ///
    /// The port state is queried on every call, so the answer follows link
    /// changes. On failure the error describes the observed state.
    pub fn is_active(&self) -> Result<()> {
        let port = self
            .context
            .query_port(self.port_num)
            .map_err(|e| Error::LinkDown(e.to_string()))?;
        match port.state() {
            PortState::Active => Ok(()),
            state => Err(Error::LinkDown(format!(
                "{} port {} is {}",
                self.context.name(),
                self.port_num,
                state
            ))),
        }
    }

    /// Get the device context.
    #[inline]
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Get the protection domain.
    #[inline]
    pub fn pd(&self) -> &Pd {
        &self.pd
    }

    /// Get the device/port pair this handle is bound to.
    #[inline]
    pub fn dev_idx(&self) -> DevIdx {
        DevIdx::new(self.context.dev_index(), self.port_num)
    }

    #[inline]
    pub fn port_num(&self) -> PortNum {
        self.port_num
    }

    #[inline]
    pub fn gid_index(&self) -> GidIndex {
        self.gid_index
    }

    #[inline]
    pub fn gid(&self) -> Gid {
        self.gid
    }

    #[inline]
    pub fn lid(&self) -> Lid {
        self.lid
    }

    /// Query the current attributes of the bound port.
    pub fn port(&self) -> Result<Port> {
        self.context.query_port(self.port_num)
    }
}

/// Port speed filter type.
enum PortSpeedFilter {
    AtLeast(f32),
    Exactly(f32),
}

/// RDMA hardware resource finder.
pub struct NicFinder {
    /// Device name filters (match any).
    dev_names: Vec<String>,

    /// Port number filter.
    port_nums: Vec<PortNum>,

    /// Port speed filter.
    port_speed: PortSpeedFilter,

    /// Port link layer protocol filter.
    port_link_layer: Option<PortLinkLayer>,

    /// Accept only active ports.
    active_only: bool,

    /// GID index to bind.
    gid_index: GidIndex,
}

impl NicFinder {
    /// Create a new finder that matches any device and any port.
    pub fn new() -> Self {
        Self {
            dev_names: Vec::new(),
            port_nums: Vec::new(),
            port_speed: PortSpeedFilter::AtLeast(0.0),
            port_link_layer: None,
            active_only: false,
            gid_index: 0,
        }
    }

    /// Set a device name filter.
    /// Permit only devices whose name matches *any* of the filters.
    ///
    /// Regular expressions are supported. Invalid patterns make [`Self::probe`]
    /// fail with [`Error::Config`].
    #[inline]
    pub fn dev_name(mut self, name: impl AsRef<str>) -> Self {
        self.dev_names.push(name.as_ref().to_owned());
        self
    }

    /// Set a port number filter.
    /// Permit only ports with *any* of the specified port numbers.
    #[inline]
    pub fn port_num(mut self, num: PortNum) -> Self {
        self.port_nums.push(num);
        self
    }

    /// Set the port speed filter to be at least `speed` Gbps.
    ///
    /// This will override the previous port speed filter, if any.
    #[inline]
    pub fn port_speed_at_least(mut self, speed: f32) -> Self {
        self.port_speed = PortSpeedFilter::AtLeast(speed);
        self
    }

    /// Set the port speed filter to be exactly `speed` Gbps.
    ///
    /// This will override the previous port speed filter, if any.
    #[inline]
    pub fn port_speed_exactly(mut self, speed: f32) -> Self {
        self.port_speed = PortSpeedFilter::Exactly(speed);
        self
    }

    /// Set the port link layer protocol filter.
    #[inline]
    pub fn port_link_layer(mut self, link_layer: PortLinkLayer) -> Self {
        self.port_link_layer = Some(link_layer);
        self
    }

    /// Permit only ports whose link is active.
    #[inline]
    pub fn active_only(mut self) -> Self {
        self.active_only = true;
        self
    }

    /// Set the GID index the returned handle binds. Defaults to 0.
    #[inline]
    pub fn gid_index(mut self, gid_index: GidIndex) -> Self {
        self.gid_index = gid_index;
        self
    }

    fn is_port_eligible(&self, port: &Port) -> bool {
        // Short-circuit evaluation.
        (self.port_nums.is_empty() || self.port_nums.contains(&port.num()))
            && (match self.port_speed {
                PortSpeedFilter::AtLeast(speed) => speed <= port.speed().gbps(),
                PortSpeedFilter::Exactly(speed) => speed == port.speed().gbps(),
            })
            && (self.port_link_layer.is_none() || self.port_link_layer == Some(port.link_layer()))
            && (!self.active_only || port.state() == PortState::Active)
    }

    /// Find the first eligible port on the default provider and open it.
    #[inline]
    pub fn probe(self) -> Result<Nic> {
        self.probe_nth_port_on(provider::default_provider()?, 0)
    }

    /// Find the `n`-th eligible port on the given provider and open it.
    /// Start counting from 0.
    pub fn probe_nth_port_on(self, provider: Arc<dyn Provider>, mut n: usize) -> Result<Nic> {
        let patterns = self
            .dev_names
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Error::Config(format!("invalid device name pattern: {}", e)))?;

        for (dev, info) in provider.devices()?.into_iter().enumerate() {
            if !patterns.is_empty() && !patterns.iter().any(|re| re.is_match(&info.name)) {
                continue;
            }
            let context = match Context::open(&provider, dev) {
                Ok(context) => context,
                Err(e) => {
                    log::warn!("qpman: cannot open device {}: {}", info.name, e);
                    continue;
                }
            };
            for port_num in 1..=info.ports as PortNum {
                let Ok(port) = context.query_port(port_num) else {
                    continue;
                };
                if self.is_port_eligible(&port) {
                    if n == 0 {
                        return Nic::bind(context, port_num, self.gid_index);
                    }
                    n -= 1;
                }
            }
        }
        Err(Error::NotFound("no eligible RDMA device port".to_owned()))
    }
}

impl Default for NicFinder {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
