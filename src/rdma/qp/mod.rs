//! Reliable-connected queue pair and related types.

mod attr;
mod config;
mod req;
mod state;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub use self::attr::*;
pub use self::config::*;
pub use self::req::*;
pub use self::state::*;
use crate::error::{Error, Result};
use crate::provider::{QpInit, QpOps, RecvWr, RtrAttr, RtsAttr, SendWr, Sge};
use crate::rdma::cq::{Cq, Wc, WcStatus};
use crate::rdma::mr::MrAttr;
use crate::rdma::nic::Nic;
use crate::rdma::types::*;
use crate::utils::interop::*;

/// Default memory regions and the connected peer.
#[derive(Default)]
struct Binding {
    local: Option<MrAttr>,
    remote: Option<MrAttr>,
    peer: Option<QpAttr>,
}

/// Ownership holder of queue pair.
struct QpInner {
    // Destroyed before its completion queues.
    qp: Box<dyn QpOps>,
    nic: Nic,
    config: QpConfig,
    qpn: Qpn,
    attr: QpAttr,
    scq: Cq,
    rcq: Cq,
    binding: Mutex<Binding>,
}

impl Drop for QpInner {
    fn drop(&mut self) {
        log::debug!("qpman: destroying QP {:#x}", self.qpn);
    }
}

/// Reliable-connected queue pair.
///
/// Cloning shares the queue pair, which is destroyed when the last clone
/// drops. One queue pair should be driven by one thread at a time.
#[derive(Clone)]
pub struct Qp {
    inner: Arc<QpInner>,
}

impl fmt::Debug for Qp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("Qp<{:#x}>", self.inner.qpn))
    }
}

impl Qp {
    /// Minimum RNR NAK timer, 0.96 milliseconds.
    const MIN_RNR_TIMER: u8 = 12;

    /// Transport retries before a work request fails.
    const RETRY_CNT: u8 = 6;

    /// RNR retries before a work request fails. 7 means infinite.
    const RNR_RETRY: u8 = 7;

    /// Check whether the given configuration is supported by the device.
    fn check_config(nic: &Nic, config: &QpConfig) -> Result<()> {
        let max_wr = nic.context().caps().max_qp_wr;
        for (name, value) in [
            ("max_send_wr", config.max_send_wr),
            ("max_recv_wr", config.max_recv_wr),
        ] {
            if value == 0 || value > max_wr {
                return Err(Error::CreationError(format!(
                    "capability not enough: {} supports up to {}, {} required",
                    name, max_wr, value
                )));
            }
        }
        for (name, value) in [
            ("max_rd_atomic", config.max_rd_atomic),
            ("max_dest_rd_atomic", config.max_dest_rd_atomic),
        ] {
            if value > QpConfig::MAX_RD_ATOMIC {
                return Err(Error::CreationError(format!(
                    "capability not enough: {} supports up to {}, {} required",
                    name,
                    QpConfig::MAX_RD_ATOMIC,
                    value
                )));
            }
        }
        Ok(())
    }

    /// Create a queue pair in [`QpState::Created`].
    ///
    /// The send completion queue is private to the queue pair. The receive
    /// completion queue is `recv_cq` if given (it must belong to the same
    /// device), or else a private one deep enough for `max_recv_wr`.
    pub fn create(nic: &Nic, config: QpConfig, recv_cq: Option<&Cq>) -> Result<Self> {
        Self::check_config(nic, &config)?;

        let ctx = nic.context();
        let rcq = match recv_cq {
            Some(cq) => {
                if !cq.context().same_device(ctx) {
                    return Err(Error::CreationError(
                        "receive CQ belongs to another device".to_owned(),
                    ));
                }
                cq.clone()
            }
            None => Cq::new(ctx, config.max_recv_wr.min(ctx.caps().max_cqe))?,
        };
        let scq = Cq::new(ctx, config.max_send_wr.min(ctx.caps().max_cqe))?;

        let qp = nic.pd().ops().create_qp(QpInit {
            port: nic.port_num(),
            access: config.access,
            pkey_index: config.pkey_index,
            max_send_wr: config.max_send_wr,
            max_recv_wr: config.max_recv_wr,
            send_cq: scq.ops(),
            recv_cq: rcq.ops(),
        })?;
        let qpn = qp.qp_num();
        let gid = nic.gid();
        let attr = QpAttr {
            subnet_prefix: gid.subnet_prefix(),
            interface_id: gid.interface_id(),
            lid: nic.lid(),
            psn: config.psn,
            port_id: nic.port_num(),
            qpn,
            qkey: config.qkey,
        };
        log::debug!("qpman: created QP {:#x} on {:?}", qpn, nic);

        Ok(Self {
            inner: Arc::new(QpInner {
                qp,
                nic: nic.clone(),
                config,
                qpn,
                attr,
                scq,
                rcq,
                binding: Mutex::new(Binding::default()),
            }),
        })
    }

    #[inline]
    fn ops(&self) -> &dyn QpOps {
        self.inner.qp.as_ref()
    }

    fn binding(&self) -> MutexGuard<'_, Binding> {
        self.inner
            .binding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the local attributes to disclose to the peer.
    #[inline]
    pub fn my_attr(&self) -> QpAttr {
        self.inner.attr
    }

    /// Get the QP number.
    #[inline]
    pub fn qp_num(&self) -> Qpn {
        self.inner.qpn
    }

    /// Get the current state.
    #[inline]
    pub fn state(&self) -> QpState {
        self.ops().state()
    }

    /// Get the configuration.
    #[inline]
    pub fn config(&self) -> &QpConfig {
        &self.inner.config
    }

    /// Get the NIC this queue pair is created on.
    #[inline]
    pub fn nic(&self) -> &Nic {
        &self.inner.nic
    }

    /// Get the send completion queue.
    #[inline]
    pub fn send_cq(&self) -> &Cq {
        &self.inner.scq
    }

    /// Get the receive completion queue.
    #[inline]
    pub fn recv_cq(&self) -> &Cq {
        &self.inner.rcq
    }

    /// Get the send queue depth.
    #[inline]
    pub fn max_send_wr(&self) -> u32 {
        self.inner.config.max_send_wr
    }

    /// Get the attributes of the connected peer, if connected.
    pub fn peer(&self) -> Option<QpAttr> {
        self.binding().peer
    }

    /// Connect to the remote endpoint, moving CREATED to RTR to RTS.
    ///
    /// Only legal in [`QpState::Created`]:
    /// - an RTR or RTS queue pair fails with [`Error::AlreadyConnected`] and
    ///   is left untouched;
    /// - an ERROR queue pair fails with [`Error::NotReady`].
    ///
    /// **NOTE:** If either transition fails, the queue pair is left in ERROR
    /// and must be recreated.
    pub fn connect(&self, remote: &QpAttr) -> Result<()> {
        let mut binding = self.binding();
        match self.state() {
            QpState::Created => {}
            QpState::Rtr | QpState::Rts => return Err(Error::AlreadyConnected),
            QpState::Error => {
                return Err(Error::NotReady(
                    "queue pair is in ERROR state and must be recreated".to_owned(),
                ))
            }
        }

        let qpn = self.inner.qpn;
        let config = &self.inner.config;
        let nic = &self.inner.nic;
        let res = nic
            .is_active()
            .and_then(|_| nic.port())
            .map_err(|e| Error::ConnectError(e.to_string()))
            .and_then(|port| {
                self.ops().modify_rtr(&RtrAttr {
                    remote_gid: remote.gid(),
                    remote_lid: remote.lid,
                    remote_qpn: remote.qpn,
                    rq_psn: remote.psn,
                    port_num: nic.port_num(),
                    gid_index: nic.gid_index(),
                    mtu: port.mtu(),
                    max_dest_rd_atomic: config.max_dest_rd_atomic,
                    min_rnr_timer: Self::MIN_RNR_TIMER,
                })
            })
            .and_then(|_| {
                self.ops().modify_rts(&RtsAttr {
                    sq_psn: config.psn,
                    timeout: config.timeout,
                    retry_cnt: Self::RETRY_CNT,
                    rnr_retry: Self::RNR_RETRY,
                    max_rd_atomic: config.max_rd_atomic,
                })
            });

        match res {
            Ok(()) => {
                binding.peer = Some(*remote);
                log::debug!("qpman: QP {:#x} connected to {:#x}", qpn, remote.qpn);
                Ok(())
            }
            Err(e) => {
                self.ops().set_error();
                log::warn!("qpman: QP {:#x} failed to connect: {}", qpn, e);
                Err(match e {
                    Error::NotFound(msg) => Error::ConnectError(msg),
                    e => e,
                })
            }
        }
    }

    /// Move to ERROR, flushing every outstanding work request to the
    /// completion queues.
    pub(crate) fn set_error(&self) {
        self.ops().set_error();
        log::debug!("qpman: QP {:#x} moved to ERROR", self.inner.qpn);
    }

    /// Set the default local memory region of [`Self::send_normal`].
    /// Does not affect posted work requests.
    pub fn bind_local_mr(&self, attr: MrAttr) {
        self.binding().local = Some(attr);
    }

    /// Set the default remote memory region of [`Self::send_normal`].
    /// Does not affect posted work requests.
    pub fn bind_remote_mr(&self, attr: MrAttr) {
        self.binding().remote = Some(attr);
    }

    /// Post one work request using the bound default memory regions.
    ///
    /// Fails with [`Error::NotReady`] if not connected, or if a needed
    /// region is not bound.
    pub fn send_normal(&self, desc: ReqDesc, payload: ReqPayload) -> Result<()> {
        let (local, remote) = {
            let binding = self.binding();
            (binding.local, binding.remote)
        };
        let local = local.ok_or_else(|| {
            Error::NotReady("no local memory region bound".to_owned())
        })?;
        self.send_normal_with(desc, payload, &local, remote.as_ref())
    }

    /// Post one work request with explicit memory regions, bypassing the
    /// bound defaults.
    ///
    /// `remote` may be `None` for two-sided opcodes.
    ///
    /// **NOTE:** this function is only equivalent to calling `ibv_post_send`.
    /// Bad buffers are reported by an error completion, not here.
    pub fn send_normal_with(
        &self,
        desc: ReqDesc,
        payload: ReqPayload,
        local: &MrAttr,
        remote: Option<&MrAttr>,
    ) -> Result<()> {
        let state = self.state();
        if state != QpState::Rts {
            return Err(Error::NotReady(format!(
                "queue pair is {}, not READY_TO_SEND",
                state
            )));
        }

        let rkey = match (desc.opcode.needs_remote(), remote) {
            (true, Some(remote)) => remote.rkey,
            (true, None) => {
                return Err(Error::NotReady(
                    "no remote memory region bound".to_owned(),
                ))
            }
            (false, _) => 0,
        };
        let wr = SendWr {
            wr_id: desc.wr_id,
            opcode: desc.opcode,
            signaled: desc.flags.contains(SendFlags::SIGNALED),
            local: Sge {
                addr: payload.local_addr,
                len: desc.len,
                lkey: local.lkey,
            },
            remote_addr: payload.remote_addr,
            rkey,
            imm: desc.opcode.carries_imm().then_some(payload.imm),
        };
        let ret = self.ops().post_send(&wr);
        from_c_ret_explained(ret, Self::send_err_explanation)
    }

    /// Post a receive buffer.
    ///
    /// **NOTE:** This method has no mutable borrows to the buffer, but can
    /// cause its content to be modified!
    pub fn post_recv(&self, addr: u64, len: u32, lkey: LKey, wr_id: WrId) -> Result<()> {
        let wr = RecvWr {
            wr_id,
            sge: Sge { addr, len, lkey },
        };
        let ret = self.ops().post_recv(&wr);
        from_c_ret_explained(ret, Self::recv_err_explanation)
    }

    /// Non-blockingly poll one send completion.
    ///
    /// It is the caller's responsibility to check the status code. A failed
    /// completion means the queue pair is already in ERROR.
    #[inline]
    pub fn poll_completion(&self) -> Option<(WrId, Wc)> {
        self.inner.scq.poll_one().map(|wc| (wc.wr_id(), wc))
    }

    /// Block until one send completion arrives or `timeout` elapses.
    ///
    /// A completion with a non-success status is reported as
    /// [`Error::PollError`], and the queue pair is left in ERROR.
    pub fn wait_completion(&self, timeout: Duration) -> Result<(WrId, Wc)> {
        let wc = self.inner.scq.wait_one(timeout)?;
        match wc.status() {
            WcStatus::Success => Ok((wc.wr_id(), wc)),
            status => {
                self.ops().set_error();
                Err(Error::PollError(status))
            }
        }
    }

    /// Non-blockingly poll up to `num` receive completions.
    #[inline]
    pub fn poll_recv_completions(&self, num: u32) -> Vec<Wc> {
        self.inner.rcq.poll(num)
    }

    /// Explain post receive errors.
    fn recv_err_explanation(ret: i32) -> Option<&'static str> {
        match ret {
            libc::EINVAL => Some("invalid work request"),
            libc::ENOMEM => {
                Some("recv queue is full, or not enough resources to complete this operation")
            }
            libc::EFAULT => Some("invalid QP"),
            _ => None,
        }
    }

    /// Explain post send errors.
    fn send_err_explanation(ret: i32) -> Option<&'static str> {
        match ret {
            libc::EINVAL => Some("invalid work request"),
            libc::ENOMEM => {
                Some("send queue is full, or not enough resources to complete this operation")
            }
            libc::EFAULT => Some("invalid QP"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::fabric::{Fabric, FabricConfig};
    use crate::rdma::cq::WcOpcode;
    use crate::rdma::mr::{Mem, Mr};
    use crate::rdma::nic::{DevIdx, PortState};

    struct Side {
        qp: Qp,
        mem: Mem,
        mr: Mr,
    }

    fn side(fabric: &Arc<Fabric>, dev: usize) -> Side {
        let nic = Nic::open_on(fabric.clone(), DevIdx::new(dev, 1), 0).unwrap();
        let mem = Mem::new(4096);
        let mr = Mr::reg(&mem, &nic).unwrap();
        let qp = Qp::create(&nic, QpConfig::default(), None).unwrap();
        qp.bind_local_mr(mr.attr());
        Side { qp, mem, mr }
    }

    fn connected_pair() -> (Arc<Fabric>, Side, Side) {
        let fabric = Fabric::new(FabricConfig::default());
        let a = side(&fabric, 0);
        let b = side(&fabric, 1);
        a.qp.connect(&b.qp.my_attr()).unwrap();
        b.qp.connect(&a.qp.my_attr()).unwrap();
        a.qp.bind_remote_mr(b.mr.attr());
        b.qp.bind_remote_mr(a.mr.attr());
        (fabric, a, b)
    }

    const WAIT: Duration = Duration::from_secs(1);

    #[test]
    fn create_starts_unconnected() {
        let fabric = Fabric::new(FabricConfig::default());
        let a = side(&fabric, 0);
        assert_eq!(a.qp.state(), QpState::Created);
        assert_eq!(a.qp.my_attr().qpn, a.qp.qp_num());
        assert_eq!(a.qp.my_attr().psn, QpConfig::DEFAULT_PSN);
        assert!(a.qp.peer().is_none());
    }

    #[test]
    fn create_rejects_oversized_queues() {
        let fabric = Fabric::new(FabricConfig::default());
        let nic = Nic::open_on(fabric.clone(), DevIdx::new(0, 1), 0).unwrap();
        let config = QpConfig::default().with_max_send_wr(u32::MAX);
        assert!(matches!(
            Qp::create(&nic, config, None),
            Err(Error::CreationError(_))
        ));
        let config = QpConfig::default().with_max_recv_wr(0);
        assert!(matches!(
            Qp::create(&nic, config, None),
            Err(Error::CreationError(_))
        ));
    }

    #[test]
    fn create_rejects_foreign_recv_cq() {
        let fabric = Fabric::new(FabricConfig::default());
        let nic0 = Nic::open_on(fabric.clone(), DevIdx::new(0, 1), 0).unwrap();
        let nic1 = Nic::open_on(fabric.clone(), DevIdx::new(1, 1), 0).unwrap();
        let cq = Cq::new(nic1.context(), 64).unwrap();
        assert!(matches!(
            Qp::create(&nic0, QpConfig::default(), Some(&cq)),
            Err(Error::CreationError(_))
        ));

        let shared = Cq::new(nic0.context(), 64).unwrap();
        let qp = Qp::create(&nic0, QpConfig::default(), Some(&shared)).unwrap();
        assert!(qp.recv_cq().same_as(&shared));
    }

    #[test]
    fn connect_reaches_rts_once() {
        let (_fabric, a, b) = connected_pair();
        assert_eq!(a.qp.state(), QpState::Rts);
        assert_eq!(a.qp.peer(), Some(b.qp.my_attr()));

        assert!(matches!(
            a.qp.connect(&b.qp.my_attr()),
            Err(Error::AlreadyConnected)
        ));
        assert_eq!(a.qp.state(), QpState::Rts);
    }

    #[test]
    fn connect_to_unreachable_peer_fails() {
        let fabric = Fabric::new(FabricConfig::default());
        let a = side(&fabric, 0);
        let b = side(&fabric, 1);
        let mut attr = b.qp.my_attr();
        attr.lid = attr.lid.wrapping_add(100);

        assert!(matches!(a.qp.connect(&attr), Err(Error::ConnectError(_))));
        assert_eq!(a.qp.state(), QpState::Error);
        assert!(matches!(
            a.qp.connect(&b.qp.my_attr()),
            Err(Error::NotReady(_))
        ));
    }

    #[test]
    fn connect_with_local_link_down_fails() {
        let fabric = Fabric::new(FabricConfig::default());
        let a = side(&fabric, 0);
        let b = side(&fabric, 1);
        fabric.set_port_state(0, 1, PortState::Down).unwrap();

        assert!(matches!(
            a.qp.connect(&b.qp.my_attr()),
            Err(Error::ConnectError(_))
        ));
        assert_eq!(a.qp.state(), QpState::Error);
    }

    #[test]
    fn send_requires_connection() {
        let fabric = Fabric::new(FabricConfig::default());
        let a = side(&fabric, 0);
        let desc = ReqDesc::new(WrOpcode::RdmaWrite, 8, 1);
        let payload = ReqPayload::new(a.mr.addr(), 0, 0);
        assert!(matches!(
            a.qp.send_normal_with(desc, payload, &a.mr.attr(), Some(&a.mr.attr())),
            Err(Error::NotReady(_))
        ));
    }

    #[test]
    fn send_requires_bound_regions() {
        let fabric = Fabric::new(FabricConfig::default());
        let a = side(&fabric, 0);
        let b = side(&fabric, 1);
        a.qp.connect(&b.qp.my_attr()).unwrap();
        b.qp.connect(&a.qp.my_attr()).unwrap();

        let desc = ReqDesc::new(WrOpcode::RdmaWrite, 8, 1);
        let payload = ReqPayload::new(a.mr.addr(), b.mr.addr(), 0);
        assert!(matches!(
            a.qp.send_normal(desc, payload),
            Err(Error::NotReady(_))
        ));

        let unbound = Qp::create(a.qp.nic(), QpConfig::default(), None).unwrap();
        assert!(matches!(
            unbound.send_normal(desc, payload),
            Err(Error::NotReady(_))
        ));
    }

    #[test]
    fn write_then_read_back() {
        let (_fabric, a, b) = connected_pair();
        a.mem.write_u64(0, 0xdead_beef).unwrap();

        let desc = ReqDesc::new(WrOpcode::RdmaWrite, 8, 7);
        let payload = ReqPayload::new(a.mr.addr(), b.mr.addr() + 64, 0);
        a.qp.send_normal(desc, payload).unwrap();
        let (wr_id, wc) = a.qp.wait_completion(WAIT).unwrap();
        assert_eq!(wr_id, 7);
        assert_eq!(wc.opcode(), WcOpcode::RdmaWrite);
        assert_eq!(b.mem.read_u64(64).unwrap(), 0xdead_beef);

        let desc = ReqDesc::new(WrOpcode::RdmaRead, 8, 8);
        let payload = ReqPayload::new(a.mr.addr() + 128, b.mr.addr() + 64, 0);
        a.qp.send_normal(desc, payload).unwrap();
        let (wr_id, _) = a.qp.wait_completion(WAIT).unwrap();
        assert_eq!(wr_id, 8);
        assert_eq!(a.mem.read_u64(128).unwrap(), 0xdead_beef);
    }

    #[test]
    fn completions_keep_post_order() {
        let (_fabric, a, b) = connected_pair();
        for i in 0..16 {
            let desc = ReqDesc::new(WrOpcode::RdmaWrite, 8, i);
            let payload = ReqPayload::new(a.mr.addr(), b.mr.addr() + i * 8, 0);
            a.qp.send_normal(desc, payload).unwrap();
        }
        for i in 0..16 {
            let (wr_id, _) = a.qp.wait_completion(WAIT).unwrap();
            assert_eq!(wr_id, i);
        }
    }

    #[test]
    fn unsignaled_requests_complete_silently() {
        let (_fabric, a, b) = connected_pair();
        let desc = ReqDesc::new(WrOpcode::RdmaWrite, 8, 1).unsignaled();
        let payload = ReqPayload::new(a.mr.addr(), b.mr.addr(), 0);
        a.qp.send_normal(desc, payload).unwrap();
        assert!(a.qp.poll_completion().is_none());
    }

    #[test]
    fn send_with_imm_delivers_to_peer() {
        let (_fabric, a, b) = connected_pair();
        b.qp.post_recv(b.mr.addr(), 64, b.mr.lkey(), 99).unwrap();
        a.mem.write(0, b"hello").unwrap();

        let desc = ReqDesc::new(WrOpcode::SendWithImm, 5, 1);
        let payload = ReqPayload::new(a.mr.addr(), 0, 42);
        a.qp.send_normal(desc, payload).unwrap();
        a.qp.wait_completion(WAIT).unwrap();

        let wcs = b.qp.poll_recv_completions(4);
        assert_eq!(wcs.len(), 1);
        assert_eq!(wcs[0].wr_id(), 99);
        assert_eq!(wcs[0].imm(), Some(42));
        assert_eq!(wcs[0].bytes(), 5);
        let mut buf = [0u8; 5];
        b.mem.read(0, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn atomics_operate_on_remote_word() {
        let (_fabric, a, b) = connected_pair();
        b.mem.write_u64(8, 10).unwrap();

        let desc = ReqDesc::new(WrOpcode::FetchAdd { add: 5 }, 8, 1);
        let payload = ReqPayload::new(a.mr.addr(), b.mr.addr() + 8, 0);
        a.qp.send_normal(desc, payload).unwrap();
        a.qp.wait_completion(WAIT).unwrap();
        assert_eq!(a.mem.read_u64(0).unwrap(), 10);
        assert_eq!(b.mem.read_u64(8).unwrap(), 15);

        let desc = ReqDesc::new(WrOpcode::CompSwap { compare: 15, swap: 1 }, 8, 2);
        a.qp.send_normal(desc, payload).unwrap();
        a.qp.wait_completion(WAIT).unwrap();
        assert_eq!(b.mem.read_u64(8).unwrap(), 1);
    }

    #[test]
    fn empty_poll_returns_none() {
        let (_fabric, a, _b) = connected_pair();
        let start = quanta::Instant::now();
        assert!(a.qp.poll_completion().is_none());
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn wait_times_out() {
        let (_fabric, a, _b) = connected_pair();
        let timeout = Duration::from_millis(50);
        let start = quanta::Instant::now();
        assert!(matches!(
            a.qp.wait_completion(timeout),
            Err(Error::Timeout(_))
        ));
        let elapsed = start.elapsed();
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_millis(200));
        assert_eq!(a.qp.state(), QpState::Rts);
    }

    #[test]
    fn remote_access_violation_moves_to_error() {
        let (_fabric, a, b) = connected_pair();
        let desc = ReqDesc::new(WrOpcode::RdmaWrite, 8, 1);
        let payload = ReqPayload::new(a.mr.addr(), b.mr.addr() + (1 << 20), 0);
        a.qp.send_normal(desc, payload).unwrap();

        assert!(matches!(
            a.qp.wait_completion(WAIT),
            Err(Error::PollError(WcStatus::RemAccessErr))
        ));
        assert_eq!(a.qp.state(), QpState::Error);
        assert!(matches!(
            a.qp.send_normal(desc, payload),
            Err(Error::NotReady(_))
        ));
        assert!(matches!(
            a.qp.connect(&b.qp.my_attr()),
            Err(Error::NotReady(_))
        ));
    }

    #[test]
    fn send_queue_overflow_is_reported() {
        let fabric = Fabric::new(FabricConfig::default());
        let nic0 = Nic::open_on(fabric.clone(), DevIdx::new(0, 1), 0).unwrap();
        let nic1 = Nic::open_on(fabric.clone(), DevIdx::new(1, 1), 0).unwrap();
        let mem = Mem::new(4096);
        let mr = Mr::reg(&mem, &nic0).unwrap();
        let a = Qp::create(&nic0, QpConfig::default().with_max_send_wr(2), None).unwrap();
        let b = Qp::create(&nic1, QpConfig::default(), None).unwrap();
        a.connect(&b.my_attr()).unwrap();
        b.connect(&a.my_attr()).unwrap();

        // Sends stall with no receive posted at the peer.
        let desc = ReqDesc::new(WrOpcode::Send, 8, 0);
        let payload = ReqPayload::new(mr.addr(), 0, 0);
        a.send_normal_with(desc, payload, &mr.attr(), None).unwrap();
        a.send_normal_with(desc, payload, &mr.attr(), None).unwrap();
        assert!(matches!(
            a.send_normal_with(desc, payload, &mr.attr(), None),
            Err(Error::PostFailed(_))
        ));
    }
}
