//! The libibverbs provider.
//!
//! Every object holds a reference to its parent (queue pairs to their
//! protection domain and completion queues, those to the device context),
//! so libibverbs always sees children destroyed before parents.

use std::any::Any;
use std::ffi::CStr;
use std::io;
use std::ptr::{self, NonNull};
use std::slice;
use std::sync::Arc;

use libc::{c_int, c_void};

use super::*;
use crate::bindings::*;
use crate::rdma::cq::{WcOpcode, WcStatus};
use crate::rdma::nic::{PortLinkLayer, PortSpeed, PortState};

/// Provider of the RDMA devices found by libibverbs.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerbsProvider;

/// The device list returned by `ibv_get_device_list`.
struct DeviceList {
    list: NonNull<*mut ibv_device>,
    num: usize,
}

impl DeviceList {
    fn get() -> Result<Self> {
        let mut num: c_int = 0;
        // SAFETY: FFI.
        let list = unsafe { ibv_get_device_list(&mut num) };
        NonNull::new(list)
            .map(|list| Self {
                list,
                num: num.max(0) as usize,
            })
            .ok_or_else(|| Error::Io(io::Error::last_os_error()))
    }

    fn as_slice(&self) -> &[*mut ibv_device] {
        // SAFETY: `ibv_get_device_list` returned `num` valid entries.
        unsafe { slice::from_raw_parts(self.list.as_ptr(), self.num) }
    }
}

impl Drop for DeviceList {
    fn drop(&mut self) {
        // SAFETY: FFI.
        unsafe { ibv_free_device_list(self.list.as_ptr()) };
    }
}

/// An opened device context, closed on drop.
struct DeviceCtx(NonNull<ibv_context>);

// SAFETY: libibverbs contexts are thread-safe.
unsafe impl Send for DeviceCtx {}
unsafe impl Sync for DeviceCtx {}

impl DeviceCtx {
    fn open(dev: *mut ibv_device) -> Result<Self> {
        // SAFETY: FFI.
        let ctx = unsafe { ibv_open_device(dev) };
        NonNull::new(ctx)
            .map(Self)
            .ok_or_else(|| verbs_error("ibv_open_device"))
    }

    fn as_ptr(&self) -> *mut ibv_context {
        self.0.as_ptr()
    }

    fn query(&self) -> Result<ibv_device_attr> {
        let mut attr = ibv_device_attr::default();
        // SAFETY: FFI.
        let ret = unsafe { ibv_query_device(self.as_ptr(), &mut attr) };
        if ret != 0 {
            return Err(Error::Io(io::Error::from_raw_os_error(ret)));
        }
        Ok(attr)
    }
}

impl Drop for DeviceCtx {
    fn drop(&mut self) {
        // SAFETY: FFI.
        let ret = unsafe { ibv_close_device(self.as_ptr()) };
        if ret != 0 {
            log::warn!("qpman: ibv_close_device failed: {}", io::Error::from_raw_os_error(ret));
        }
    }
}

/// Get the name of a listed device.
fn device_name(dev: *mut ibv_device) -> String {
    // SAFETY: FFI, the name is a NUL-terminated string owned by the device.
    unsafe {
        let name = ibv_get_device_name(dev);
        if name.is_null() {
            return String::new();
        }
        CStr::from_ptr(name).to_string_lossy().into_owned()
    }
}

/// Build an error out of `errno` after a failed verb.
fn verbs_error(verb: &str) -> Error {
    Error::CreationError(format!("{} failed: {}", verb, io::Error::last_os_error()))
}

impl Provider for VerbsProvider {
    fn name(&self) -> &'static str {
        "verbs"
    }

    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        let list = DeviceList::get()?;
        let mut devices = Vec::with_capacity(list.num);
        for &dev in list.as_slice() {
            let ports = DeviceCtx::open(dev)
                .and_then(|ctx| ctx.query())
                .map(|attr| attr.phys_port_cnt as usize)
                .unwrap_or_else(|e| {
                    log::warn!("qpman: cannot query device {}: {}", device_name(dev), e);
                    0
                });
            devices.push(DeviceInfo {
                name: device_name(dev),
                ports,
            });
        }
        Ok(devices)
    }

    fn open_device(self: Arc<Self>, dev: usize) -> Result<Arc<dyn DeviceOps>> {
        let list = DeviceList::get()?;
        let &raw = list
            .as_slice()
            .get(dev)
            .ok_or_else(|| Error::NotFound(format!("device {}", dev)))?;

        let ctx = DeviceCtx::open(raw)?;
        let attr = ctx.query()?;
        let caps = DeviceCaps {
            max_qp_wr: attr.max_qp_wr.max(0) as u32,
            max_cqe: attr.max_cqe.max(0) as u32,
        };
        Ok(Arc::new(VerbsDevice {
            ctx: Arc::new(ctx),
            name: device_name(raw),
            ports: attr.phys_port_cnt,
            caps,
        }))
    }
}

struct VerbsDevice {
    ctx: Arc<DeviceCtx>,
    name: String,
    ports: u8,
    caps: DeviceCaps,
}

/// `IBV_LINK_LAYER_ETHERNET`.
const LINK_LAYER_ETHERNET: u8 = 2;

impl VerbsDevice {
    fn query_gids(&self, port: PortNum, len: i32) -> Vec<Gid> {
        (0..len)
            .map(|index| {
                let mut gid = ibv_gid::default();
                // SAFETY: FFI.
                let ret = unsafe { ibv_query_gid(self.ctx.as_ptr(), port, index, &mut gid) };
                if ret != 0 {
                    return Gid::default();
                }
                // SAFETY: every GID is plain bytes.
                Gid::from(unsafe { gid.raw })
            })
            .collect()
    }
}

impl DeviceOps for VerbsDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn caps(&self) -> DeviceCaps {
        self.caps
    }

    fn query_port(&self, port: PortNum) -> Result<Port> {
        if port == 0 || port > self.ports {
            return Err(Error::NotFound(format!("port {} of device {}", port, self.name)));
        }

        let mut attr = ibv_port_attr::default();
        // SAFETY: FFI, the compat structure is a prefix of `ibv_port_attr`.
        let ret = unsafe {
            ibv_query_port(
                self.ctx.as_ptr(),
                port,
                (&mut attr as *mut ibv_port_attr).cast(),
            )
        };
        if ret != 0 {
            return Err(Error::NotFound(format!(
                "port {} of device {}: {}",
                port,
                self.name,
                io::Error::from_raw_os_error(ret)
            )));
        }

        Ok(Port {
            num: port,
            state: port_state(attr.state),
            lid: attr.lid,
            gids: self.query_gids(port, attr.gid_tbl_len),
            mtu: port_mtu(attr.active_mtu),
            link_layer: if attr.link_layer == LINK_LAYER_ETHERNET {
                PortLinkLayer::Ethernet
            } else {
                PortLinkLayer::Infiniband
            },
            speed: port_speed(attr.active_width, attr.active_speed),
        })
    }

    fn alloc_pd(&self) -> Result<Arc<dyn PdOps>> {
        // SAFETY: FFI.
        let pd = unsafe { ibv_alloc_pd(self.ctx.as_ptr()) };
        let pd = NonNull::new(pd).ok_or_else(|| verbs_error("ibv_alloc_pd"))?;
        Ok(Arc::new(VerbsPd(Arc::new(PdHandle {
            pd,
            _ctx: self.ctx.clone(),
        }))))
    }

    fn create_cq(&self, depth: u32) -> Result<Arc<dyn CqOps>> {
        // SAFETY: FFI.
        let cq = unsafe {
            ibv_create_cq(
                self.ctx.as_ptr(),
                depth as c_int,
                ptr::null_mut(),
                ptr::null_mut(),
                0,
            )
        };
        let cq = NonNull::new(cq).ok_or_else(|| verbs_error("ibv_create_cq"))?;
        Ok(Arc::new(VerbsCq {
            cq,
            _ctx: self.ctx.clone(),
        }))
    }
}

fn port_state(state: ibv_port_state::Type) -> PortState {
    match state {
        ibv_port_state::IBV_PORT_INIT => PortState::Init,
        ibv_port_state::IBV_PORT_ARMED => PortState::Armed,
        ibv_port_state::IBV_PORT_ACTIVE => PortState::Active,
        ibv_port_state::IBV_PORT_ACTIVE_DEFER => PortState::ActiveDefer,
        _ => PortState::Down,
    }
}

fn port_mtu(mtu: ibv_mtu::Type) -> PortMtu {
    match mtu {
        ibv_mtu::IBV_MTU_256 => PortMtu::Mtu256,
        ibv_mtu::IBV_MTU_512 => PortMtu::Mtu512,
        ibv_mtu::IBV_MTU_2048 => PortMtu::Mtu2048,
        ibv_mtu::IBV_MTU_4096 => PortMtu::Mtu4096,
        _ => PortMtu::Mtu1024,
    }
}

fn raw_mtu(mtu: PortMtu) -> ibv_mtu::Type {
    match mtu {
        PortMtu::Mtu256 => ibv_mtu::IBV_MTU_256,
        PortMtu::Mtu512 => ibv_mtu::IBV_MTU_512,
        PortMtu::Mtu1024 => ibv_mtu::IBV_MTU_1024,
        PortMtu::Mtu2048 => ibv_mtu::IBV_MTU_2048,
        PortMtu::Mtu4096 => ibv_mtu::IBV_MTU_4096,
    }
}

/// Compute the port speed out of the active width and per-lane speed codes.
fn port_speed(active_width: u8, active_speed: u8) -> PortSpeed {
    let width: u32 = match active_width {
        1 => 1,
        2 => 4,
        4 => 8,
        8 => 12,
        _ => 0,
    };

    // Speed times 10 to avoid floating point numbers, which are `!Eq`.
    let speed10x: u32 = match active_speed {
        1 => 25,
        2 => 50,
        4 | 8 => 100,
        16 => 140,
        32 => 250,
        64 => 500,
        _ => 0,
    };
    PortSpeed(width * speed10x)
}

fn access_flags(perm: Permission) -> c_int {
    let mut flags = ibv_access_flags(0);
    for (p, f) in [
        (Permission::LOCAL_WRITE, ibv_access_flags::IBV_ACCESS_LOCAL_WRITE),
        (Permission::REMOTE_WRITE, ibv_access_flags::IBV_ACCESS_REMOTE_WRITE),
        (Permission::REMOTE_READ, ibv_access_flags::IBV_ACCESS_REMOTE_READ),
        (Permission::REMOTE_ATOMIC, ibv_access_flags::IBV_ACCESS_REMOTE_ATOMIC),
    ] {
        if perm.contains(p) {
            flags |= f;
        }
    }
    flags.0 as c_int
}

/// An allocated protection domain, deallocated on drop.
struct PdHandle {
    pd: NonNull<ibv_pd>,
    _ctx: Arc<DeviceCtx>,
}

// SAFETY: libibverbs protection domains are thread-safe.
unsafe impl Send for PdHandle {}
unsafe impl Sync for PdHandle {}

impl Drop for PdHandle {
    fn drop(&mut self) {
        // SAFETY: FFI.
        let ret = unsafe { ibv_dealloc_pd(self.pd.as_ptr()) };
        if ret != 0 {
            log::warn!("qpman: ibv_dealloc_pd failed: {}", io::Error::from_raw_os_error(ret));
        }
    }
}

struct VerbsPd(Arc<PdHandle>);

impl PdOps for VerbsPd {
    fn reg_mr(&self, addr: u64, len: u64, perm: Permission) -> Result<Box<dyn MrOps>> {
        // SAFETY: FFI, the caller keeps the memory alive while registered.
        let mr = unsafe {
            ibv_reg_mr(
                self.0.pd.as_ptr(),
                addr as *mut c_void,
                len as usize,
                access_flags(perm),
            )
        };
        let mr = NonNull::new(mr).ok_or_else(|| verbs_error("ibv_reg_mr"))?;
        Ok(Box::new(VerbsMr {
            mr,
            _pd: self.0.clone(),
        }))
    }

    fn create_qp(&self, init: QpInit<'_>) -> Result<Box<dyn QpOps>> {
        let scq = verbs_cq(init.send_cq)?;
        let rcq = verbs_cq(init.recv_cq)?;

        let mut init_attr = ibv_qp_init_attr {
            send_cq: scq.cq.as_ptr(),
            recv_cq: rcq.cq.as_ptr(),
            cap: ibv_qp_cap {
                max_send_wr: init.max_send_wr,
                max_recv_wr: init.max_recv_wr,
                max_send_sge: 1,
                max_recv_sge: 1,
                max_inline_data: 0,
            },
            qp_type: ibv_qp_type::IBV_QPT_RC,
            sq_sig_all: 0,
            ..Default::default()
        };
        // SAFETY: FFI.
        let qp = unsafe { ibv_create_qp(self.0.pd.as_ptr(), &mut init_attr) };
        let qp = NonNull::new(qp).ok_or_else(|| verbs_error("ibv_create_qp"))?;
        let qp = VerbsQp {
            qp,
            _scq: scq,
            _rcq: rcq,
            _pd: self.0.clone(),
        };

        // RESET to INIT. A failure destroys the queue pair on return.
        let mut attr = ibv_qp_attr {
            qp_state: ibv_qp_state::IBV_QPS_INIT,
            pkey_index: init.pkey_index,
            port_num: init.port,
            qp_access_flags: access_flags(init.access) as u32,
            ..Default::default()
        };
        let mask = ibv_qp_attr_mask::IBV_QP_STATE
            | ibv_qp_attr_mask::IBV_QP_PKEY_INDEX
            | ibv_qp_attr_mask::IBV_QP_PORT
            | ibv_qp_attr_mask::IBV_QP_ACCESS_FLAGS;
        qp.modify(&mut attr, mask)
            .map_err(|e| Error::CreationError(format!("RESET to INIT: {}", e)))?;
        Ok(Box::new(qp))
    }
}

/// A memory registration, deregistered on drop.
struct VerbsMr {
    mr: NonNull<ibv_mr>,
    _pd: Arc<PdHandle>,
}

// SAFETY: the registration is immutable after creation.
unsafe impl Send for VerbsMr {}
unsafe impl Sync for VerbsMr {}

impl Drop for VerbsMr {
    fn drop(&mut self) {
        // SAFETY: FFI.
        let ret = unsafe { ibv_dereg_mr(self.mr.as_ptr()) };
        if ret != 0 {
            log::warn!("qpman: ibv_dereg_mr failed: {}", io::Error::from_raw_os_error(ret));
        }
    }
}

impl MrOps for VerbsMr {
    fn lkey(&self) -> LKey {
        // SAFETY: valid until deregistered.
        unsafe { (*self.mr.as_ptr()).lkey }
    }

    fn rkey(&self) -> RKey {
        // SAFETY: valid until deregistered.
        unsafe { (*self.mr.as_ptr()).rkey }
    }
}

/// A completion queue, destroyed on drop.
struct VerbsCq {
    cq: NonNull<ibv_cq>,
    _ctx: Arc<DeviceCtx>,
}

// SAFETY: libibverbs completion queues are thread-safe.
unsafe impl Send for VerbsCq {}
unsafe impl Sync for VerbsCq {}

impl Drop for VerbsCq {
    fn drop(&mut self) {
        // SAFETY: FFI.
        let ret = unsafe { ibv_destroy_cq(self.cq.as_ptr()) };
        if ret != 0 {
            log::warn!("qpman: ibv_destroy_cq failed: {}", io::Error::from_raw_os_error(ret));
        }
    }
}

/// Get the libibverbs completion queue behind a completion queue.
fn verbs_cq(cq: &Arc<dyn CqOps>) -> Result<Arc<VerbsCq>> {
    cq.clone()
        .into_any()
        .downcast::<VerbsCq>()
        .map_err(|_| Error::CreationError("completion queue of another provider".to_owned()))
}

fn wc_status(status: ibv_wc_status::Type) -> WcStatus {
    match status {
        ibv_wc_status::IBV_WC_SUCCESS => WcStatus::Success,
        ibv_wc_status::IBV_WC_LOC_LEN_ERR => WcStatus::LocLenErr,
        ibv_wc_status::IBV_WC_LOC_QP_OP_ERR => WcStatus::LocQpOpErr,
        ibv_wc_status::IBV_WC_LOC_PROT_ERR => WcStatus::LocProtErr,
        ibv_wc_status::IBV_WC_WR_FLUSH_ERR => WcStatus::WrFlushErr,
        ibv_wc_status::IBV_WC_REM_INV_REQ_ERR => WcStatus::RemInvReqErr,
        ibv_wc_status::IBV_WC_REM_ACCESS_ERR => WcStatus::RemAccessErr,
        ibv_wc_status::IBV_WC_REM_OP_ERR => WcStatus::RemOpErr,
        ibv_wc_status::IBV_WC_RETRY_EXC_ERR => WcStatus::RetryExcErr,
        _ => WcStatus::GeneralErr,
    }
}

fn wc_opcode(opcode: ibv_wc_opcode::Type) -> WcOpcode {
    match opcode {
        ibv_wc_opcode::IBV_WC_RDMA_WRITE => WcOpcode::RdmaWrite,
        ibv_wc_opcode::IBV_WC_RDMA_READ => WcOpcode::RdmaRead,
        ibv_wc_opcode::IBV_WC_COMP_SWAP => WcOpcode::CompSwap,
        ibv_wc_opcode::IBV_WC_FETCH_ADD => WcOpcode::FetchAdd,
        ibv_wc_opcode::IBV_WC_RECV => WcOpcode::Recv,
        ibv_wc_opcode::IBV_WC_RECV_RDMA_WITH_IMM => WcOpcode::RecvRdmaImm,
        // Opcodes of failed completions are undefined.
        _ => WcOpcode::Send,
    }
}

impl CqOps for VerbsCq {
    fn poll(&self, max: usize) -> Vec<Wc> {
        let mut wcs = vec![ibv_wc::default(); max];
        // SAFETY: FFI, `wcs` has room for `max` entries.
        let n = unsafe { ibv_poll_cq(self.cq.as_ptr(), max as c_int, wcs.as_mut_ptr()) };
        if n < 0 {
            log::error!("qpman: ibv_poll_cq failed: {}", io::Error::from_raw_os_error(-n));
            return Vec::new();
        }

        wcs.truncate(n as usize);
        wcs.iter()
            .map(|wc| {
                let has_imm = wc.wc_flags & ibv_wc_flags::IBV_WC_WITH_IMM.0 != 0;
                // SAFETY: the union is plain integers.
                let imm = has_imm.then(|| u32::from_be(unsafe { wc.__bindgen_anon_1.imm_data }));
                Wc {
                    wr_id: wc.wr_id,
                    status: wc_status(wc.status),
                    opcode: wc_opcode(wc.opcode),
                    byte_len: wc.byte_len,
                    imm,
                    qpn: wc.qp_num,
                }
            })
            .collect()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A reliable-connected queue pair, destroyed on drop.
struct VerbsQp {
    qp: NonNull<ibv_qp>,
    _scq: Arc<VerbsCq>,
    _rcq: Arc<VerbsCq>,
    _pd: Arc<PdHandle>,
}

// SAFETY: libibverbs queue pairs are thread-safe.
unsafe impl Send for VerbsQp {}
unsafe impl Sync for VerbsQp {}

impl Drop for VerbsQp {
    fn drop(&mut self) {
        // SAFETY: FFI.
        let ret = unsafe { ibv_destroy_qp(self.qp.as_ptr()) };
        if ret != 0 {
            log::warn!("qpman: ibv_destroy_qp failed: {}", io::Error::from_raw_os_error(ret));
        }
    }
}

impl VerbsQp {
    fn modify(&self, attr: &mut ibv_qp_attr, mask: ibv_qp_attr_mask) -> io::Result<()> {
        // SAFETY: FFI.
        let ret = unsafe { ibv_modify_qp(self.qp.as_ptr(), attr, mask.0 as c_int) };
        match ret {
            0 => Ok(()),
            ret => Err(io::Error::from_raw_os_error(ret)),
        }
    }
}

impl QpOps for VerbsQp {
    fn qp_num(&self) -> Qpn {
        // SAFETY: valid until destroyed.
        unsafe { (*self.qp.as_ptr()).qp_num }
    }

    fn state(&self) -> QpState {
        let mut attr = ibv_qp_attr::default();
        let mut init_attr = ibv_qp_init_attr::default();
        // SAFETY: FFI.
        let ret = unsafe {
            ibv_query_qp(
                self.qp.as_ptr(),
                &mut attr,
                ibv_qp_attr_mask::IBV_QP_STATE.0 as c_int,
                &mut init_attr,
            )
        };
        if ret != 0 {
            return QpState::Error;
        }
        match attr.qp_state {
            ibv_qp_state::IBV_QPS_INIT => QpState::Created,
            ibv_qp_state::IBV_QPS_RTR => QpState::Rtr,
            ibv_qp_state::IBV_QPS_RTS => QpState::Rts,
            _ => QpState::Error,
        }
    }

    fn modify_rtr(&self, rtr: &RtrAttr) -> Result<()> {
        let mut attr = ibv_qp_attr {
            qp_state: ibv_qp_state::IBV_QPS_RTR,
            path_mtu: raw_mtu(rtr.mtu),
            dest_qp_num: rtr.remote_qpn,
            rq_psn: rtr.rq_psn,
            max_dest_rd_atomic: rtr.max_dest_rd_atomic,
            min_rnr_timer: rtr.min_rnr_timer,
            ..Default::default()
        };
        attr.ah_attr.dlid = rtr.remote_lid;
        attr.ah_attr.port_num = rtr.port_num;
        attr.ah_attr.is_global = 1;
        attr.ah_attr.grh.dgid.raw = rtr.remote_gid.raw();
        attr.ah_attr.grh.sgid_index = rtr.gid_index;
        attr.ah_attr.grh.hop_limit = 0xFF;

        let mask = ibv_qp_attr_mask::IBV_QP_STATE
            | ibv_qp_attr_mask::IBV_QP_AV
            | ibv_qp_attr_mask::IBV_QP_PATH_MTU
            | ibv_qp_attr_mask::IBV_QP_DEST_QPN
            | ibv_qp_attr_mask::IBV_QP_RQ_PSN
            | ibv_qp_attr_mask::IBV_QP_MAX_DEST_RD_ATOMIC
            | ibv_qp_attr_mask::IBV_QP_MIN_RNR_TIMER;
        self.modify(&mut attr, mask)
            .map_err(|e| Error::ConnectError(format!("INIT to RTR: {}", e)))
    }

    fn modify_rts(&self, rts: &RtsAttr) -> Result<()> {
        let mut attr = ibv_qp_attr {
            qp_state: ibv_qp_state::IBV_QPS_RTS,
            sq_psn: rts.sq_psn,
            timeout: rts.timeout,
            retry_cnt: rts.retry_cnt,
            rnr_retry: rts.rnr_retry,
            max_rd_atomic: rts.max_rd_atomic,
            ..Default::default()
        };
        let mask = ibv_qp_attr_mask::IBV_QP_STATE
            | ibv_qp_attr_mask::IBV_QP_SQ_PSN
            | ibv_qp_attr_mask::IBV_QP_TIMEOUT
            | ibv_qp_attr_mask::IBV_QP_RETRY_CNT
            | ibv_qp_attr_mask::IBV_QP_RNR_RETRY
            | ibv_qp_attr_mask::IBV_QP_MAX_QP_RD_ATOMIC;
        self.modify(&mut attr, mask)
            .map_err(|e| Error::ConnectError(format!("RTR to RTS: {}", e)))
    }

    fn set_error(&self) {
        let mut attr = ibv_qp_attr {
            qp_state: ibv_qp_state::IBV_QPS_ERR,
            ..Default::default()
        };
        if let Err(e) = self.modify(&mut attr, ibv_qp_attr_mask::IBV_QP_STATE) {
            log::error!("qpman: cannot move QP {:#x} to ERROR: {}", self.qp_num(), e);
        }
    }

    fn post_send(&self, wr: &SendWr) -> i32 {
        let mut sge = ibv_sge {
            addr: wr.local.addr,
            length: wr.local.len,
            lkey: wr.local.lkey,
        };
        let mut send_wr = ibv_send_wr {
            wr_id: wr.wr_id,
            sg_list: &mut sge,
            num_sge: 1,
            send_flags: if wr.signaled {
                ibv_send_flags::IBV_SEND_SIGNALED.0
            } else {
                0
            },
            ..Default::default()
        };

        send_wr.opcode = match wr.opcode {
            WrOpcode::Send => ibv_wr_opcode::IBV_WR_SEND,
            WrOpcode::SendWithImm => ibv_wr_opcode::IBV_WR_SEND_WITH_IMM,
            WrOpcode::RdmaWrite => ibv_wr_opcode::IBV_WR_RDMA_WRITE,
            WrOpcode::RdmaWriteWithImm => ibv_wr_opcode::IBV_WR_RDMA_WRITE_WITH_IMM,
            WrOpcode::RdmaRead => ibv_wr_opcode::IBV_WR_RDMA_READ,
            WrOpcode::CompSwap { .. } => ibv_wr_opcode::IBV_WR_ATOMIC_CMP_AND_SWP,
            WrOpcode::FetchAdd { .. } => ibv_wr_opcode::IBV_WR_ATOMIC_FETCH_AND_ADD,
        };

        // SAFETY: writes to plain-integer unions, then FFI.
        unsafe {
            if let Some(imm) = wr.imm {
                send_wr.__bindgen_anon_1.imm_data = imm.to_be();
            }
            match wr.opcode {
                WrOpcode::CompSwap { compare, swap } => {
                    send_wr.wr.atomic.remote_addr = wr.remote_addr;
                    send_wr.wr.atomic.rkey = wr.rkey;
                    send_wr.wr.atomic.compare_add = compare;
                    send_wr.wr.atomic.swap = swap;
                }
                WrOpcode::FetchAdd { add } => {
                    send_wr.wr.atomic.remote_addr = wr.remote_addr;
                    send_wr.wr.atomic.rkey = wr.rkey;
                    send_wr.wr.atomic.compare_add = add;
                }
                _ => {
                    send_wr.wr.rdma.remote_addr = wr.remote_addr;
                    send_wr.wr.rdma.rkey = wr.rkey;
                }
            }

            let mut bad_wr = ptr::null_mut();
            ibv_post_send(self.qp.as_ptr(), &mut send_wr, &mut bad_wr)
        }
    }

    fn post_recv(&self, wr: &RecvWr) -> i32 {
        let mut sge = ibv_sge {
            addr: wr.sge.addr,
            length: wr.sge.len,
            lkey: wr.sge.lkey,
        };
        let mut recv_wr = ibv_recv_wr {
            wr_id: wr.wr_id,
            next: ptr::null_mut(),
            sg_list: &mut sge,
            num_sge: 1,
        };
        let mut bad_wr = ptr::null_mut();
        // SAFETY: FFI.
        unsafe { ibv_post_recv(self.qp.as_ptr(), &mut recv_wr, &mut bad_wr) }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::rdma::mr::{Mem, Mr};
    use crate::rdma::nic::{DevIdx, Nic};
    use crate::rdma::qp::{Qp, QpConfig, ReqDesc, ReqPayload};

    #[test]
    fn test_speed_table() {
        assert_eq!(port_speed(2, 32).gbps(), 100.0);
        assert_eq!(port_speed(2, 64).gbps(), 200.0);
        assert_eq!(port_speed(1, 1).gbps(), 2.5);
        assert_eq!(port_speed(0, 0).gbps(), 0.0);
    }

    #[test]
    fn test_mtu_codes() {
        for mtu in [
            PortMtu::Mtu256,
            PortMtu::Mtu512,
            PortMtu::Mtu1024,
            PortMtu::Mtu2048,
            PortMtu::Mtu4096,
        ] {
            assert_eq!(port_mtu(raw_mtu(mtu)), mtu);
        }
    }

    #[test]
    fn test_access_flags() {
        assert_eq!(access_flags(Permission::EMPTY), 0);
        let all = access_flags(Permission::default());
        assert_eq!(
            all as u32,
            (ibv_access_flags::IBV_ACCESS_LOCAL_WRITE
                | ibv_access_flags::IBV_ACCESS_REMOTE_WRITE
                | ibv_access_flags::IBV_ACCESS_REMOTE_READ
                | ibv_access_flags::IBV_ACCESS_REMOTE_ATOMIC)
                .0
        );
    }

    #[test]
    #[ignore = "needs an active RDMA NIC"]
    fn loopback_write() {
        let provider: Arc<dyn Provider> = Arc::new(VerbsProvider);
        let nic = Nic::open_on(provider, DevIdx::new(0, 1), 0).unwrap();
        let mem = Mem::new(4096);
        let mr = Mr::reg(&mem, &nic).unwrap();
        let a = Qp::create(&nic, QpConfig::default(), None).unwrap();
        let b = Qp::create(&nic, QpConfig::default(), None).unwrap();
        a.connect(&b.my_attr()).unwrap();
        b.connect(&a.my_attr()).unwrap();
        assert_eq!(a.state(), QpState::Rts);

        mem.write_u64(0, 0xabcd).unwrap();
        let desc = ReqDesc::new(WrOpcode::RdmaWrite, 8, 1);
        let payload = ReqPayload::new(mr.addr(), mr.addr() + 64, 0);
        a.send_normal_with(desc, payload, &mr.attr(), Some(&mr.attr()))
            .unwrap();
        a.wait_completion(Duration::from_secs(1)).unwrap();
        assert_eq!(mem.read_u64(64).unwrap(), 0xabcd);
    }
}
