//! The fabric as a [`Provider`].

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use super::{CqShared, Fabric};
use crate::error::{Error, Result};
use crate::provider::*;
use crate::rdma::cq::Wc;
use crate::rdma::mr::Permission;
use crate::rdma::nic::Port;
use crate::rdma::qp::QpState;
use crate::rdma::types::*;

impl Provider for Fabric {
    fn name(&self) -> &'static str {
        "soft"
    }

    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self
            .lock()
            .devices
            .iter()
            .map(|d| DeviceInfo {
                name: d.name.clone(),
                ports: d.ports.len(),
            })
            .collect())
    }

    fn open_device(self: Arc<Self>, dev: usize) -> Result<Arc<dyn DeviceOps>> {
        let (name, caps) = self
            .lock()
            .devices
            .get(dev)
            .map(|d| (d.name.clone(), d.caps))
            .ok_or_else(|| Error::NotFound(format!("device {}", dev)))?;
        Ok(Arc::new(SoftDevice {
            fabric: self,
            dev,
            name,
            caps,
        }))
    }
}

struct SoftDevice {
    fabric: Arc<Fabric>,
    dev: usize,
    name: String,
    caps: DeviceCaps,
}

impl DeviceOps for SoftDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn caps(&self) -> DeviceCaps {
        self.caps
    }

    fn query_port(&self, port: PortNum) -> Result<Port> {
        self.fabric
            .query_port(self.dev, port)
            .ok_or_else(|| Error::NotFound(format!("port {} of device {}", port, self.name)))
    }

    fn alloc_pd(&self) -> Result<Arc<dyn PdOps>> {
        Ok(Arc::new(SoftPd {
            fabric: self.fabric.clone(),
            dev: self.dev,
            handle: self.fabric.alloc_pd(),
        }))
    }

    fn create_cq(&self, depth: u32) -> Result<Arc<dyn CqOps>> {
        Ok(Arc::new(CqShared::new(depth as usize)))
    }
}

struct SoftPd {
    fabric: Arc<Fabric>,
    dev: usize,
    handle: u32,
}

/// Get the fabric storage behind a completion queue.
fn soft_cq(cq: &Arc<dyn CqOps>) -> Result<Arc<CqShared>> {
    cq.clone()
        .into_any()
        .downcast::<CqShared>()
        .map_err(|_| Error::CreationError("completion queue of another provider".to_owned()))
}

impl PdOps for SoftPd {
    fn reg_mr(&self, addr: u64, len: u64, perm: Permission) -> Result<Box<dyn MrOps>> {
        let (lkey, rkey) = self.fabric.reg_mr(self.handle, addr, len, perm);
        Ok(Box::new(SoftMr {
            fabric: self.fabric.clone(),
            lkey,
            rkey,
        }))
    }

    fn create_qp(&self, init: QpInit<'_>) -> Result<Box<dyn QpOps>> {
        let scq = soft_cq(init.send_cq)?;
        let rcq = soft_cq(init.recv_cq)?;
        let qpn = self
            .fabric
            .create_qp(self.dev, self.handle, &init, scq, rcq);
        Ok(Box::new(SoftQp {
            fabric: self.fabric.clone(),
            qpn,
        }))
    }
}

struct SoftMr {
    fabric: Arc<Fabric>,
    lkey: LKey,
    rkey: RKey,
}

impl Drop for SoftMr {
    fn drop(&mut self) {
        self.fabric.dereg_mr(self.lkey);
    }
}

impl MrOps for SoftMr {
    fn lkey(&self) -> LKey {
        self.lkey
    }

    fn rkey(&self) -> RKey {
        self.rkey
    }
}

impl CqOps for CqShared {
    fn poll(&self, max: usize) -> Vec<Wc> {
        CqShared::poll(self, max)
    }

    fn wait_one(&self, timeout: Duration) -> Option<Wc> {
        CqShared::wait_one(self, timeout)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

struct SoftQp {
    fabric: Arc<Fabric>,
    qpn: Qpn,
}

impl Drop for SoftQp {
    fn drop(&mut self) {
        self.fabric.destroy_qp(self.qpn);
    }
}

impl QpOps for SoftQp {
    fn qp_num(&self) -> Qpn {
        self.qpn
    }

    fn state(&self) -> QpState {
        self.fabric.qp_state(self.qpn)
    }

    fn modify_rtr(&self, attr: &RtrAttr) -> Result<()> {
        self.fabric.modify_rtr(self.qpn, attr)
    }

    fn modify_rts(&self, attr: &RtsAttr) -> Result<()> {
        self.fabric.modify_rts(self.qpn, attr)
    }

    fn set_error(&self) {
        self.fabric.set_error(self.qpn)
    }

    fn post_send(&self, wr: &SendWr) -> i32 {
        self.fabric.post_send(self.qpn, wr)
    }

    fn post_recv(&self, wr: &RecvWr) -> i32 {
        self.fabric.post_recv(self.qpn, wr)
    }
}
