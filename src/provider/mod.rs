//! Device providers.
//!
//! The handles in this crate never touch a device directly. A [`Provider`]
//! lists and opens devices, and the objects it hands out carry out the
//! verbs: protection domains register memory and create queue pairs,
//! completion queues are polled, queue pairs are modified and posted to.
//!
//! Two providers exist:
//! - the in-process software [`Fabric`], always available;
//! - [`VerbsProvider`], built on libibverbs with the `verbs` feature, which
//!   talks to real RDMA NICs and reaches queue pairs on other hosts.
//!
//! Which one [`Nic::open`](crate::Nic::open) uses is decided by
//! [`default_provider`].

#[cfg(feature = "verbs")]
mod verbs;

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "verbs")]
pub use self::verbs::VerbsProvider;
use crate::error::{Error, Result};
use crate::fabric::Fabric;
use crate::rdma::cq::Wc;
use crate::rdma::gid::Gid;
use crate::rdma::mr::Permission;
use crate::rdma::nic::{Port, PortMtu};
use crate::rdma::qp::{QpState, WrOpcode};
use crate::rdma::types::*;

/// A scatter/gather element.
#[derive(Debug, Clone, Copy)]
pub struct Sge {
    pub addr: u64,
    pub len: u32,
    pub lkey: LKey,
}

/// A send-queue work request.
#[derive(Debug, Clone, Copy)]
pub struct SendWr {
    pub wr_id: WrId,
    pub opcode: WrOpcode,
    pub signaled: bool,
    pub local: Sge,
    pub remote_addr: u64,
    pub rkey: RKey,
    pub imm: Option<ImmData>,
}

/// A receive-queue work request.
#[derive(Debug, Clone, Copy)]
pub struct RecvWr {
    pub wr_id: WrId,
    pub sge: Sge,
}

/// Device capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCaps {
    pub max_qp_wr: u32,
    pub max_cqe: u32,
}

/// A device as listed by a provider, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub ports: usize,
}

/// Parameters of a queue pair to create.
pub struct QpInit<'a> {
    pub port: PortNum,
    pub access: Permission,
    pub pkey_index: PKeyIndex,
    pub max_send_wr: u32,
    pub max_recv_wr: u32,
    pub send_cq: &'a Arc<dyn CqOps>,
    pub recv_cq: &'a Arc<dyn CqOps>,
}

/// Attributes of the CREATED to RTR transition.
#[derive(Debug, Clone, Copy)]
pub struct RtrAttr {
    pub remote_gid: Gid,
    pub remote_lid: Lid,
    pub remote_qpn: Qpn,
    pub rq_psn: Psn,
    pub port_num: PortNum,
    pub gid_index: GidIndex,
    pub mtu: PortMtu,
    pub max_dest_rd_atomic: u8,
    pub min_rnr_timer: u8,
}

/// Attributes of the RTR to RTS transition.
#[derive(Debug, Clone, Copy)]
pub struct RtsAttr {
    pub sq_psn: Psn,
    pub timeout: u8,
    pub retry_cnt: u8,
    pub rnr_retry: u8,
    pub max_rd_atomic: u8,
}

/// Source of RDMA devices.
pub trait Provider: Send + Sync {
    /// Short name of the provider, as accepted by [`by_name`].
    fn name(&self) -> &'static str;

    /// List the devices.
    fn devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Open the `dev`-th device.
    fn open_device(self: Arc<Self>, dev: usize) -> Result<Arc<dyn DeviceOps>>;
}

/// An opened device.
pub trait DeviceOps: Send + Sync {
    fn name(&self) -> &str;

    fn caps(&self) -> DeviceCaps;

    /// Query the current attributes of a port.
    fn query_port(&self, port: PortNum) -> Result<Port>;

    fn alloc_pd(&self) -> Result<Arc<dyn PdOps>>;

    fn create_cq(&self, depth: u32) -> Result<Arc<dyn CqOps>>;
}

/// A protection domain.
pub trait PdOps: Send + Sync {
    /// Register memory. Dropping the result deregisters it.
    fn reg_mr(&self, addr: u64, len: u64, perm: Permission) -> Result<Box<dyn MrOps>>;

    /// Create a queue pair in CREATED. Dropping the result destroys it.
    fn create_qp(&self, init: QpInit<'_>) -> Result<Box<dyn QpOps>>;
}

/// A memory registration.
pub trait MrOps: Send + Sync {
    fn lkey(&self) -> LKey;

    fn rkey(&self) -> RKey;
}

/// A completion queue.
pub trait CqOps: Send + Sync {
    /// Non-blockingly poll up to `max` completions.
    fn poll(&self, max: usize) -> Vec<Wc>;

    /// Wait until one completion arrives or `timeout` elapses.
    ///
    /// The default spins on [`Self::poll`].
    fn wait_one(&self, timeout: Duration) -> Option<Wc> {
        let start = quanta::Instant::now();
        loop {
            if let Some(wc) = self.poll(1).pop() {
                return Some(wc);
            }
            if start.elapsed() >= timeout {
                return None;
            }
            std::hint::spin_loop();
        }
    }

    /// Downcast support, so that a provider can get its own completion
    /// queues back when a queue pair is created.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// A reliable-connected queue pair.
pub trait QpOps: Send + Sync {
    fn qp_num(&self) -> Qpn;

    /// Get the current state. A queue pair that cannot be queried is in
    /// ERROR.
    fn state(&self) -> QpState;

    fn modify_rtr(&self, attr: &RtrAttr) -> Result<()>;

    fn modify_rts(&self, attr: &RtsAttr) -> Result<()>;

    /// Move to ERROR, flushing all outstanding work requests.
    fn set_error(&self);

    /// Post a send work request. Return 0 or an errno value, like `ibv_post_send`.
    fn post_send(&self, wr: &SendWr) -> i32;

    /// Post a receive work request. Return 0 or an errno value, like `ibv_post_recv`.
    fn post_recv(&self, wr: &RecvWr) -> i32;
}

/// Environment variable naming the provider of [`default_provider`].
pub const PROVIDER_ENV: &str = "QPMAN_PROVIDER";

/// Provider used when [`PROVIDER_ENV`] is not set.
pub const DEFAULT_PROVIDER: &str = if cfg!(feature = "verbs") {
    "verbs"
} else {
    "soft"
};

/// Get a provider by name: `"soft"` for the process-wide [`Fabric`], or
/// `"verbs"` for libibverbs if compiled in.
pub fn by_name(name: &str) -> Result<Arc<dyn Provider>> {
    match name {
        "soft" => Ok(Fabric::global()),
        #[cfg(feature = "verbs")]
        "verbs" => Ok(Arc::new(VerbsProvider)),
        #[cfg(not(feature = "verbs"))]
        "verbs" => Err(Error::Config(
            "verbs provider not compiled in, enable the `verbs` feature".to_owned(),
        )),
        _ => Err(Error::Config(format!("unknown RDMA provider {:?}", name))),
    }
}

/// Get the provider named by [`PROVIDER_ENV`], or [`DEFAULT_PROVIDER`].
pub fn default_provider() -> Result<Arc<dyn Provider>> {
    match std::env::var(PROVIDER_ENV) {
        Ok(name) => by_name(name.trim()),
        Err(_) => by_name(DEFAULT_PROVIDER),
    }
}

/// Check whether two provider handles refer to the same provider.
#[inline]
pub(crate) fn same_provider(a: &Arc<dyn Provider>, b: &Arc<dyn Provider>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}
