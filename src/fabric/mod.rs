//! In-process software RDMA provider.
//!
//! [`Fabric`] plays the role of the verbs library and the device driver. It
//! keeps devices and ports, memory registrations, queue pairs and completion
//! queues in one table and moves real bytes between registered buffers of the
//! current process. Queue pairs can only reach each other if they live on the
//! same fabric: two fabrics behave like two disjoint subnets. Hosts that talk
//! over a real network use the verbs provider instead.
//!
//! Every access is validated against the registration table, and violations
//! surface as error completions the way a real HCA reports them. Send-type
//! work requests that find no posted receive at the peer wait at the head of
//! the send queue until one is posted, which is what an RC queue pair with
//! infinite RNR retries does.

mod config;
mod cq;
mod exec;
mod ops;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

pub use self::config::*;
pub(crate) use self::cq::CqShared;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::provider::{DeviceCaps, QpInit, RecvWr, RtrAttr, RtsAttr, SendWr};
use crate::rdma::cq::{Wc, WcOpcode, WcStatus};
use crate::rdma::gid::Gid;
use crate::rdma::mr::Permission;
use crate::rdma::nic::{Port, PortMtu, PortSpeed, PortState};
use crate::rdma::qp::QpState;
use crate::rdma::types::*;

struct DeviceEntry {
    name: String,
    ports: Vec<Port>,
    caps: DeviceCaps,
}

struct MrEntry {
    pd: u32,
    addr: u64,
    len: u64,
    perm: Permission,
    rkey: RKey,
}

impl MrEntry {
    fn covers(&self, addr: u64, len: u64) -> bool {
        match (addr.checked_add(len), self.addr.checked_add(self.len)) {
            (Some(end), Some(mr_end)) => addr >= self.addr && end <= mr_end,
            _ => false,
        }
    }
}

struct QpEntry {
    dev: usize,
    port: PortNum,
    pd: u32,
    access: Permission,
    state: QpState,
    sq_psn: Psn,
    rq_psn: Psn,
    remote: Option<Qpn>,
    max_send_wr: u32,
    max_recv_wr: u32,
    sq: VecDeque<SendWr>,
    rq: VecDeque<RecvWr>,
    scq: Arc<CqShared>,
    rcq: Arc<CqShared>,
}

struct FabricState {
    devices: Vec<DeviceEntry>,
    mrs: HashMap<LKey, MrEntry>,
    rkeys: HashMap<RKey, LKey>,
    qps: HashMap<Qpn, QpEntry>,
    next_key: u32,
    next_qpn: Qpn,
    next_pd: u32,
    next_lid: Lid,
    next_port_serial: u64,
}

impl FabricState {
    fn port(&self, dev: usize, num: PortNum) -> Option<&Port> {
        let idx = (num as usize).checked_sub(1)?;
        self.devices.get(dev)?.ports.get(idx)
    }

    fn port_mut(&mut self, dev: usize, num: PortNum) -> Option<&mut Port> {
        let idx = (num as usize).checked_sub(1)?;
        self.devices.get_mut(dev)?.ports.get_mut(idx)
    }

    fn port_active(&self, dev: usize, num: PortNum) -> bool {
        self.port(dev, num)
            .is_some_and(|p| p.state == PortState::Active)
    }

    fn build_device(&mut self, config: DeviceConfig) -> DeviceEntry {
        const LINK_LOCAL_PREFIX: u64 = 0xfe80 << 48;

        let ports = config
            .ports
            .iter()
            .enumerate()
            .map(|(i, pc)| {
                self.next_port_serial += 1;
                let serial = self.next_port_serial;
                let lid = pc.lid.unwrap_or_else(|| {
                    self.next_lid += 1;
                    self.next_lid
                });
                Port {
                    num: (i + 1) as PortNum,
                    state: pc.state,
                    lid,
                    gids: (0..pc.gid_count as u64)
                        .map(|g| Gid::new(LINK_LOCAL_PREFIX, 0x0200_0000_0000_0000 | serial << 8 | g))
                        .collect(),
                    mtu: PortMtu::Mtu4096,
                    link_layer: pc.link_layer,
                    speed: PortSpeed::from_gbps(pc.speed_gbps),
                }
            })
            .collect();
        DeviceEntry {
            name: config.name,
            ports,
            caps: DeviceCaps {
                max_qp_wr: config.max_qp_wr,
                max_cqe: config.max_cqe,
            },
        }
    }
}

/// A software RDMA fabric.
pub struct Fabric {
    state: Mutex<FabricState>,
}

static GLOBAL_FABRIC: OnceLock<Arc<Fabric>> = OnceLock::new();

impl Fabric {
    /// Environment variable naming a TOML file whose `[qpman.fabric]` table
    /// describes the process-wide fabric.
    pub const CONFIG_ENV: &'static str = "QPMAN_FABRIC";

    /// Create a fabric with the given topology.
    pub fn new(config: FabricConfig) -> Arc<Self> {
        let mut state = FabricState {
            devices: Vec::new(),
            mrs: HashMap::new(),
            rkeys: HashMap::new(),
            qps: HashMap::new(),
            next_key: 0x100,
            next_qpn: 0x10,
            next_pd: 1,
            next_lid: 0,
            next_port_serial: 0,
        };
        for dev in config.devices {
            let dev = state.build_device(dev);
            state.devices.push(dev);
        }
        Arc::new(Self {
            state: Mutex::new(state),
        })
    }

    /// Get the process-wide fabric, creating it on first use.
    ///
    /// The topology is read from the file named by [`Self::CONFIG_ENV`] if
    /// set, or else [`FabricConfig::default()`] is used.
    pub fn global() -> Arc<Self> {
        GLOBAL_FABRIC
            .get_or_init(|| {
                let config = match std::env::var(Self::CONFIG_ENV) {
                    Ok(path) => match Config::load_toml(&path) {
                        Ok(config) => config.fabric,
                        Err(e) => {
                            log::error!(
                                "qpman: cannot load fabric config from {}: {}, using defaults",
                                path,
                                e
                            );
                            FabricConfig::default()
                        }
                    },
                    Err(_) => FabricConfig::default(),
                };
                Fabric::new(config)
            })
            .clone()
    }

    fn lock(&self) -> MutexGuard<'_, FabricState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Plug in a new device. Return its device index.
    pub fn add_device(&self, config: DeviceConfig) -> usize {
        let mut state = self.lock();
        let dev = state.build_device(config);
        state.devices.push(dev);
        state.devices.len() - 1
    }

    /// Change the logical link state of a port.
    pub fn set_port_state(&self, dev: usize, port: PortNum, port_state: PortState) -> Result<()> {
        let mut state = self.lock();
        let p = state
            .port_mut(dev, port)
            .ok_or_else(|| Error::NotFound(format!("device {} port {}", dev, port)))?;
        log::info!(
            "qpman: device {} port {} state {} -> {}",
            dev,
            port,
            p.state,
            port_state
        );
        p.state = port_state;
        Ok(())
    }

    /// Get the number of devices.
    pub fn device_count(&self) -> usize {
        self.lock().devices.len()
    }

    pub(crate) fn query_port(&self, dev: usize, port: PortNum) -> Option<Port> {
        self.lock().port(dev, port).cloned()
    }

    pub(crate) fn alloc_pd(&self) -> u32 {
        let mut state = self.lock();
        state.next_pd += 1;
        state.next_pd
    }

    /// Register memory. Keys are never reused on one fabric.
    pub(crate) fn reg_mr(&self, pd: u32, addr: u64, len: u64, perm: Permission) -> (LKey, RKey) {
        let mut state = self.lock();
        let lkey = state.next_key;
        let rkey = lkey + 1;
        state.next_key += 2;
        state.mrs.insert(
            lkey,
            MrEntry {
                pd,
                addr,
                len,
                perm,
                rkey,
            },
        );
        state.rkeys.insert(rkey, lkey);
        (lkey, rkey)
    }

    pub(crate) fn dereg_mr(&self, lkey: LKey) {
        let mut state = self.lock();
        if let Some(mr) = state.mrs.remove(&lkey) {
            state.rkeys.remove(&mr.rkey);
        }
    }

    pub(crate) fn create_qp(
        &self,
        dev: usize,
        pd: u32,
        init: &QpInit<'_>,
        scq: Arc<CqShared>,
        rcq: Arc<CqShared>,
    ) -> Qpn {
        let mut state = self.lock();
        state.next_qpn += 1;
        let qpn = state.next_qpn;
        state.qps.insert(
            qpn,
            QpEntry {
                dev,
                port: init.port,
                pd,
                access: init.access,
                state: QpState::Created,
                sq_psn: 0,
                rq_psn: 0,
                remote: None,
                max_send_wr: init.max_send_wr,
                max_recv_wr: init.max_recv_wr,
                sq: VecDeque::new(),
                rq: VecDeque::new(),
                scq,
                rcq,
            },
        );
        qpn
    }

    pub(crate) fn destroy_qp(&self, qpn: Qpn) {
        self.lock().qps.remove(&qpn);
    }

    /// Get the current state of a queue pair. Destroyed queue pairs report
    /// [`QpState::Error`].
    pub(crate) fn qp_state(&self, qpn: Qpn) -> QpState {
        self.lock()
            .qps
            .get(&qpn)
            .map_or(QpState::Error, |qp| qp.state)
    }

    /// Modify a queue pair from CREATED to RTR, targeting the queue pair
    /// `attr.remote_qpn` reachable at `attr.remote_gid`/`attr.remote_lid`.
    pub(crate) fn modify_rtr(&self, qpn: Qpn, attr: &RtrAttr) -> Result<()> {
        let mut state = self.lock();
        match state.qps.get(&qpn) {
            Some(qp) if qp.state == QpState::Created => {}
            Some(qp) => {
                return Err(Error::ConnectError(format!(
                    "cannot modify QP {:#x} from {} to READY_TO_RECEIVE",
                    qpn, qp.state
                )))
            }
            None => return Err(Error::NotFound(format!("QP {:#x}", qpn))),
        }

        let (gid, lid, remote_qpn) = (attr.remote_gid, attr.remote_lid, attr.remote_qpn);
        let routable = state.qps.get(&remote_qpn).is_some_and(|peer| {
            state.port(peer.dev, peer.port).is_some_and(|p| {
                p.state == PortState::Active && p.lid == lid && p.gids.contains(&gid)
            })
        });
        if !routable {
            return Err(Error::ConnectError(format!(
                "no route to QP {:#x} at GID {} LID {}",
                remote_qpn, gid, lid
            )));
        }

        if let Some(qp) = state.qps.get_mut(&qpn) {
            qp.remote = Some(remote_qpn);
            qp.rq_psn = attr.rq_psn;
            qp.state = QpState::Rtr;
        }

        // The peer may have sends stalled on this queue pair.
        state.progress(remote_qpn);
        Ok(())
    }

    /// Modify a queue pair from RTR to RTS.
    pub(crate) fn modify_rts(&self, qpn: Qpn, attr: &RtsAttr) -> Result<()> {
        let mut state = self.lock();
        let qp = state
            .qps
            .get_mut(&qpn)
            .ok_or_else(|| Error::NotFound(format!("QP {:#x}", qpn)))?;
        if qp.state != QpState::Rtr {
            return Err(Error::ConnectError(format!(
                "cannot modify QP {:#x} from {} to READY_TO_SEND",
                qpn, qp.state
            )));
        }
        qp.sq_psn = attr.sq_psn;
        qp.state = QpState::Rts;
        Ok(())
    }

    /// Move a queue pair to ERROR, flushing all outstanding work requests.
    pub(crate) fn set_error(&self, qpn: Qpn) {
        self.lock().fail_qp(qpn);
    }

    /// Post a send work request. Return 0 or an errno value, like `ibv_post_send`.
    pub(crate) fn post_send(&self, qpn: Qpn, wr: &SendWr) -> i32 {
        let mut state = self.lock();
        let Some(qp) = state.qps.get_mut(&qpn) else {
            return libc::EFAULT;
        };
        if qp.state != QpState::Rts {
            return libc::EINVAL;
        }
        if qp.sq.len() >= qp.max_send_wr as usize {
            return libc::ENOMEM;
        }
        qp.sq.push_back(*wr);
        state.progress(qpn);
        0
    }

    /// Post a receive work request. Return 0 or an errno value, like `ibv_post_recv`.
    pub(crate) fn post_recv(&self, qpn: Qpn, wr: &RecvWr) -> i32 {
        let mut state = self.lock();
        let Some(qp) = state.qps.get_mut(&qpn) else {
            return libc::EFAULT;
        };
        if qp.state == QpState::Error {
            // Receives posted in ERROR are flushed right away.
            let wc = Wc {
                wr_id: wr.wr_id,
                status: WcStatus::WrFlushErr,
                opcode: WcOpcode::Recv,
                byte_len: 0,
                imm: None,
                qpn,
            };
            if !qp.rcq.push(wc) {
                return libc::ENOMEM;
            }
            return 0;
        }
        if qp.rq.len() >= qp.max_recv_wr as usize {
            return libc::ENOMEM;
        }
        qp.rq.push_back(*wr);

        let stalled_peer = match qp.state {
            QpState::Rtr | QpState::Rts => qp.remote,
            _ => None,
        };
        if let Some(peer) = stalled_peer {
            state.progress(peer);
        }
        0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, Once, PoisonError};
    use std::time::Duration;

    use super::*;
    use crate::provider::{DeviceInfo, Provider};
    use crate::rdma::cq::Cq;
    use crate::rdma::mr::{Mem, Mr};
    use crate::rdma::nic::{DevIdx, Nic};
    use crate::rdma::qp::{Qp, QpConfig, ReqDesc, ReqPayload, WrOpcode};

    const WAIT: Duration = Duration::from_secs(1);

    /// Logger keeping every message, installed once for all tests.
    struct Capture(Mutex<Vec<String>>);

    impl log::Log for Capture {
        fn enabled(&self, _: &log::Metadata<'_>) -> bool {
            true
        }

        fn log(&self, record: &log::Record<'_>) {
            self.0
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(record.args().to_string());
        }

        fn flush(&self) {}
    }

    static CAPTURE: Capture = Capture(Mutex::new(Vec::new()));

    fn logged(needle: &str) -> bool {
        static INSTALL: Once = Once::new();
        INSTALL.call_once(|| {
            if log::set_logger(&CAPTURE).is_ok() {
                log::set_max_level(log::LevelFilter::Debug);
            }
        });
        CAPTURE
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|msg| msg.contains(needle))
    }

    fn nic(fabric: &Arc<Fabric>, dev: usize) -> Nic {
        Nic::open_on(fabric.clone(), DevIdx::new(dev, 1), 0).unwrap()
    }

    fn pair(fabric: &Arc<Fabric>, config: QpConfig) -> (Qp, Qp) {
        let a = Qp::create(&nic(fabric, 0), config, None).unwrap();
        let b = Qp::create(&nic(fabric, 1), config, None).unwrap();
        a.connect(&b.my_attr()).unwrap();
        b.connect(&a.my_attr()).unwrap();
        (a, b)
    }

    #[test]
    fn keys_never_reused() {
        let fabric = Fabric::new(FabricConfig::default());
        let nic = nic(&fabric, 0);
        let mem = Mem::new(4096);

        let mut keys = Vec::new();
        for _ in 0..4 {
            let mr = Mr::reg(&mem, &nic).unwrap();
            keys.push(mr.lkey());
            keys.push(mr.rkey());
        }
        let mut dedup = keys.clone();
        dedup.sort_unstable();
        dedup.dedup();
        assert_eq!(dedup.len(), keys.len());
    }

    #[test]
    fn topology_from_config() {
        let fabric = Fabric::new(FabricConfig {
            devices: vec![DeviceConfig {
                ports: vec![PortConfig::default(), PortConfig::default()],
                ..DeviceConfig::new("mlx5_0")
            }],
        });
        assert_eq!(fabric.device_count(), 1);
        assert_eq!(
            fabric.devices().unwrap(),
            vec![DeviceInfo {
                name: "mlx5_0".to_owned(),
                ports: 2
            }]
        );

        let p1 = fabric.query_port(0, 1).unwrap();
        let p2 = fabric.query_port(0, 2).unwrap();
        assert_ne!(p1.lid(), p2.lid());
        assert_eq!(p1.gids().len(), 2);
        assert!(fabric.query_port(0, 3).is_none());
        assert!(fabric.query_port(0, 0).is_none());

        let dev = fabric.add_device(DeviceConfig::new("mlx5_1"));
        assert_eq!(dev, 1);
        assert!(fabric.set_port_state(dev, 2, PortState::Down).is_err());
    }

    #[test]
    fn send_stalls_until_peer_connects() {
        let fabric = Fabric::new(FabricConfig::default());
        let nic0 = nic(&fabric, 0);
        let nic1 = nic(&fabric, 1);
        let mem = Mem::new(4096);
        let mr = Mr::reg(&mem, &nic1).unwrap();
        let a = Qp::create(&nic0, QpConfig::default(), None).unwrap();
        let b = Qp::create(&nic1, QpConfig::default(), None).unwrap();
        b.post_recv(mr.addr(), 64, mr.lkey(), 5).unwrap();

        let src = Mr::reg(&Mem::new(64), &nic0).unwrap();
        a.connect(&b.my_attr()).unwrap();
        let desc = ReqDesc::new(WrOpcode::Send, 8, 1);
        let payload = ReqPayload::new(src.addr(), 0, 0);
        a.send_normal_with(desc, payload, &src.attr(), None).unwrap();
        assert!(a.poll_completion().is_none());

        b.connect(&a.my_attr()).unwrap();
        assert_eq!(a.wait_completion(WAIT).unwrap().0, 1);
        let wc = b.recv_cq().wait_one(WAIT).unwrap();
        assert_eq!(wc.wr_id(), 5);
        assert_eq!(wc.opcode(), WcOpcode::Recv);
    }

    #[test]
    fn error_flushes_outstanding_requests() {
        let fabric = Fabric::new(FabricConfig::default());
        let (a, b) = pair(&fabric, QpConfig::default());
        let mem = Mem::new(4096);
        let mr = Mr::reg(&mem, a.nic()).unwrap();
        for i in 0..3 {
            a.post_recv(mr.addr() + i * 64, 64, mr.lkey(), i).unwrap();
        }

        // Sends stall without receives at the peer.
        let desc = ReqDesc::new(WrOpcode::Send, 8, 10);
        let payload = ReqPayload::new(mr.addr(), 0, 0);
        a.send_normal_with(desc, payload, &mr.attr(), None).unwrap();

        fabric.set_error(a.qp_num());
        assert_eq!(a.state(), QpState::Error);
        assert!(matches!(
            a.wait_completion(WAIT),
            Err(Error::PollError(WcStatus::WrFlushErr))
        ));
        let flushed = a.poll_recv_completions(8);
        assert_eq!(flushed.len(), 3);
        assert!(flushed.iter().all(|wc| wc.status() == WcStatus::WrFlushErr));

        // Receives posted in ERROR are flushed right away.
        a.post_recv(mr.addr(), 64, mr.lkey(), 99).unwrap();
        assert_eq!(a.poll_recv_completions(8)[0].wr_id(), 99);
        assert_eq!(b.state(), QpState::Rts);
    }

    #[test]
    fn peer_access_flags_are_enforced() {
        let fabric = Fabric::new(FabricConfig::default());
        let config = QpConfig::default().with_access(Permission::REMOTE_READ);
        let (a, b) = pair(&fabric, config);
        let src = Mr::reg(&Mem::new(64), a.nic()).unwrap();
        let dst = Mr::reg(&Mem::new(64), b.nic()).unwrap();

        let payload = ReqPayload::new(src.addr(), dst.addr(), 0);
        let read = ReqDesc::new(WrOpcode::RdmaRead, 8, 1);
        a.send_normal_with(read, payload, &src.attr(), Some(&dst.attr()))
            .unwrap();
        a.wait_completion(WAIT).unwrap();

        let write = ReqDesc::new(WrOpcode::RdmaWrite, 8, 2);
        a.send_normal_with(write, payload, &src.attr(), Some(&dst.attr()))
            .unwrap();
        assert!(matches!(
            a.wait_completion(WAIT),
            Err(Error::PollError(WcStatus::RemAccessErr))
        ));
    }

    #[test]
    fn bad_local_key_is_protection_error() {
        let fabric = Fabric::new(FabricConfig::default());
        let (a, b) = pair(&fabric, QpConfig::default());
        let dst = Mr::reg(&Mem::new(64), b.nic()).unwrap();

        // A registration of another protection domain.
        let foreign = Mr::reg(&Mem::new(64), &nic(&fabric, 0)).unwrap();
        let desc = ReqDesc::new(WrOpcode::RdmaWrite, 8, 1);
        let payload = ReqPayload::new(foreign.addr(), dst.addr(), 0);
        a.send_normal_with(desc, payload, &foreign.attr(), Some(&dst.attr()))
            .unwrap();
        assert!(matches!(
            a.wait_completion(WAIT),
            Err(Error::PollError(WcStatus::LocProtErr))
        ));
    }

    #[test]
    fn link_down_exhausts_retries() {
        let fabric = Fabric::new(FabricConfig::default());
        let (a, b) = pair(&fabric, QpConfig::default());
        let src = Mr::reg(&Mem::new(64), a.nic()).unwrap();
        let dst = Mr::reg(&Mem::new(64), b.nic()).unwrap();
        fabric.set_port_state(1, 1, PortState::Down).unwrap();

        let desc = ReqDesc::new(WrOpcode::RdmaWrite, 8, 1);
        let payload = ReqPayload::new(src.addr(), dst.addr(), 0);
        a.send_normal_with(desc, payload, &src.attr(), Some(&dst.attr()))
            .unwrap();
        assert!(matches!(
            a.wait_completion(WAIT),
            Err(Error::PollError(WcStatus::RetryExcErr))
        ));
        assert!(matches!(b.nic().is_active(), Err(Error::LinkDown(_))));
    }

    #[test]
    fn atomic_needs_eight_aligned_bytes() {
        let fabric = Fabric::new(FabricConfig::default());
        let (a, b) = pair(&fabric, QpConfig::default());
        let src = Mr::reg(&Mem::new(64), a.nic()).unwrap();
        let dst = Mr::reg(&Mem::new(64), b.nic()).unwrap();

        let desc = ReqDesc::new(WrOpcode::FetchAdd { add: 1 }, 8, 1);
        let payload = ReqPayload::new(src.addr(), dst.addr() + 4, 0);
        a.send_normal_with(desc, payload, &src.attr(), Some(&dst.attr()))
            .unwrap();
        assert!(matches!(
            a.wait_completion(WAIT),
            Err(Error::PollError(WcStatus::RemInvReqErr))
        ));
    }

    #[test]
    fn oversized_send_fails_both_sides() {
        let fabric = Fabric::new(FabricConfig::default());
        let (a, b) = pair(&fabric, QpConfig::default());
        let src = Mr::reg(&Mem::new(4096), a.nic()).unwrap();
        let dst = Mr::reg(&Mem::new(4096), b.nic()).unwrap();
        b.post_recv(dst.addr(), 16, dst.lkey(), 7).unwrap();

        let desc = ReqDesc::new(WrOpcode::Send, 64, 1);
        let payload = ReqPayload::new(src.addr(), 0, 0);
        a.send_normal_with(desc, payload, &src.attr(), None).unwrap();
        assert!(matches!(
            a.wait_completion(WAIT),
            Err(Error::PollError(WcStatus::RemInvReqErr))
        ));
        let wc = b.recv_cq().poll_one().unwrap();
        assert_eq!(wc.status(), WcStatus::LocLenErr);
        assert_eq!(b.state(), QpState::Error);
    }

    #[test]
    fn flush_overrun_is_logged() {
        logged("");
        let fabric = Fabric::new(FabricConfig::default());
        let nic = nic(&fabric, 0);
        let cq = Cq::new(nic.context(), 2).unwrap();
        let qp = Qp::create(&nic, QpConfig::default(), Some(&cq)).unwrap();
        let mr = Mr::reg(&Mem::new(4096), &nic).unwrap();
        for i in 0..4 {
            qp.post_recv(mr.addr() + i * 64, 64, mr.lkey(), i).unwrap();
        }

        fabric.set_error(qp.qp_num());
        assert_eq!(qp.state(), QpState::Error);
        assert_eq!(cq.poll(8).len(), 2);
        assert!(logged(&format!(
            "recv CQ overrun on QP {:#x}, 2 flush completions dropped",
            qp.qp_num()
        )));
    }
}
