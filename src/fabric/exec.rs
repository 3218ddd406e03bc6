//! Work request execution.

use std::ptr;

use super::FabricState;
use crate::provider::{RecvWr, SendWr, Sge};
use crate::rdma::cq::{Wc, WcOpcode, WcStatus};
use crate::rdma::mr::Permission;
use crate::rdma::qp::{QpState, WrOpcode};
use crate::rdma::types::*;

/// Why a work request did not complete successfully.
#[derive(Debug, Clone, Copy)]
enum Outcome {
    /// The peer cannot accept the request yet; retry later.
    Stall,

    /// The request failed. `responder` is the status of the receive the
    /// request consumed at the peer, if the peer is also at fault.
    Fail {
        status: WcStatus,
        responder: Option<WcStatus>,
    },
}

/// Copy `len` bytes between two validated addresses.
///
/// # Safety
///
/// Both ranges must lie in live registrations.
#[inline]
unsafe fn copy_bytes(src: u64, dst: u64, len: u32) {
    if len > 0 {
        ptr::copy(src as *const u8, dst as *mut u8, len as usize);
    }
}

#[inline]
fn fail(status: WcStatus) -> Outcome {
    Outcome::Fail {
        status,
        responder: None,
    }
}

/// Snapshot of the requester and responder of one work request.
struct Route {
    pd: u32,
    peer: Qpn,
    peer_pd: u32,
    peer_access: Permission,
    peer_recv: Option<RecvWr>,
}

impl FabricState {
    /// Execute the send queue of `qpn` in order until it is empty, stalls,
    /// or fails.
    pub(super) fn progress(&mut self, qpn: Qpn) {
        loop {
            let wr = match self.qps.get(&qpn) {
                Some(qp) if qp.state == QpState::Rts => match qp.sq.front() {
                    Some(wr) => *wr,
                    None => return,
                },
                _ => return,
            };

            match self.execute(qpn, &wr) {
                Ok(bytes) => {
                    let Some(qp) = self.qps.get_mut(&qpn) else {
                        return;
                    };
                    qp.sq.pop_front();
                    if wr.signaled {
                        let wc = Wc {
                            wr_id: wr.wr_id,
                            status: WcStatus::Success,
                            opcode: wr.opcode.wc_opcode(),
                            byte_len: bytes,
                            imm: None,
                            qpn,
                        };
                        if !qp.scq.push(wc) {
                            log::error!("qpman: send CQ overrun on QP {:#x}", qpn);
                            self.fail_qp(qpn);
                            return;
                        }
                    }
                }
                Err(Outcome::Stall) => return,
                Err(Outcome::Fail { status, responder }) => {
                    log::warn!(
                        "qpman: QP {:#x} work request {} failed: {}",
                        qpn,
                        wr.wr_id,
                        status
                    );
                    let peer = match self.qps.get_mut(&qpn) {
                        Some(qp) => {
                            qp.sq.pop_front();
                            let wc = Wc {
                                wr_id: wr.wr_id,
                                status,
                                opcode: wr.opcode.wc_opcode(),
                                byte_len: 0,
                                imm: None,
                                qpn,
                            };
                            if !qp.scq.push(wc) {
                                log::error!(
                                    "qpman: send CQ overrun on QP {:#x}, error completion dropped",
                                    qpn
                                );
                            }
                            qp.remote
                        }
                        None => None,
                    };
                    if let (Some(status), Some(peer)) = (responder, peer) {
                        self.fail_responder(peer, status);
                    }
                    self.fail_qp(qpn);
                    return;
                }
            }
        }
    }

    /// Move a queue pair to ERROR and flush its queues.
    pub(super) fn fail_qp(&mut self, qpn: Qpn) {
        let Some(qp) = self.qps.get_mut(&qpn) else {
            return;
        };
        if qp.state != QpState::Error {
            log::debug!("qpman: QP {:#x} {} -> ERROR", qpn, qp.state);
        }
        qp.state = QpState::Error;

        let flushed = |wr_id, opcode| Wc {
            wr_id,
            status: WcStatus::WrFlushErr,
            opcode,
            byte_len: 0,
            imm: None,
            qpn,
        };
        let mut dropped = 0;
        for wr in qp.sq.drain(..) {
            if !qp.scq.push(flushed(wr.wr_id, wr.opcode.wc_opcode())) {
                dropped += 1;
            }
        }
        if dropped > 0 {
            log::error!(
                "qpman: send CQ overrun on QP {:#x}, {} flush completions dropped",
                qpn,
                dropped
            );
        }

        let mut dropped = 0;
        for wr in qp.rq.drain(..) {
            if !qp.rcq.push(flushed(wr.wr_id, WcOpcode::Recv)) {
                dropped += 1;
            }
        }
        if dropped > 0 {
            log::error!(
                "qpman: recv CQ overrun on QP {:#x}, {} flush completions dropped",
                qpn,
                dropped
            );
        }
    }

    /// Complete the head receive of `qpn` with an error and fail the queue pair.
    fn fail_responder(&mut self, qpn: Qpn, status: WcStatus) {
        if let Some(qp) = self.qps.get_mut(&qpn) {
            if let Some(recv) = qp.rq.pop_front() {
                let wc = Wc {
                    wr_id: recv.wr_id,
                    status,
                    opcode: WcOpcode::Recv,
                    byte_len: 0,
                    imm: None,
                    qpn,
                };
                if !qp.rcq.push(wc) {
                    log::error!(
                        "qpman: recv CQ overrun on QP {:#x}, error completion dropped",
                        qpn
                    );
                }
            }
        }
        self.fail_qp(qpn);
    }

    /// Resolve the responder of a work request posted on `qpn`.
    fn route(&self, qpn: Qpn) -> Result<Route, Outcome> {
        let qp = self.qps.get(&qpn).ok_or(fail(WcStatus::LocQpOpErr))?;
        if !self.port_active(qp.dev, qp.port) {
            return Err(fail(WcStatus::RetryExcErr));
        }

        let peer_qpn = qp.remote.ok_or(fail(WcStatus::RetryExcErr))?;
        let peer = self
            .qps
            .get(&peer_qpn)
            .ok_or(fail(WcStatus::RetryExcErr))?;
        match peer.state {
            QpState::Created => return Err(Outcome::Stall),
            QpState::Error => return Err(fail(WcStatus::RetryExcErr)),
            QpState::Rtr | QpState::Rts => {}
        }

        // Packets of a mismatched connection or PSN are dropped by the
        // responder, so the requester eventually runs out of retries.
        if peer.remote != Some(qpn)
            || peer.rq_psn != qp.sq_psn
            || !self.port_active(peer.dev, peer.port)
        {
            return Err(fail(WcStatus::RetryExcErr));
        }

        Ok(Route {
            pd: qp.pd,
            peer: peer_qpn,
            peer_pd: peer.pd,
            peer_access: peer.access,
            peer_recv: peer.rq.front().copied(),
        })
    }

    /// Validate a local buffer. Return its address.
    fn check_local(&self, pd: u32, sge: &Sge, need: Permission) -> Result<u64, WcStatus> {
        if sge.len == 0 {
            return Ok(sge.addr);
        }
        match self.mrs.get(&sge.lkey) {
            Some(mr)
                if mr.pd == pd && mr.perm.contains(need) && mr.covers(sge.addr, sge.len as u64) =>
            {
                Ok(sge.addr)
            }
            _ => Err(WcStatus::LocProtErr),
        }
    }

    /// Validate a remote buffer against both the registration and the
    /// responder queue pair's access flags. Return its address.
    fn check_remote(
        &self,
        route: &Route,
        addr: u64,
        rkey: RKey,
        len: u32,
        need: Permission,
    ) -> Result<u64, Outcome> {
        let mr = self
            .rkeys
            .get(&rkey)
            .and_then(|lkey| self.mrs.get(lkey))
            .ok_or(fail(WcStatus::RemAccessErr))?;
        if mr.pd != route.peer_pd
            || !mr.perm.contains(need)
            || !route.peer_access.contains(need)
            || !mr.covers(addr, len as u64)
        {
            return Err(fail(WcStatus::RemAccessErr));
        }
        Ok(addr)
    }

    /// Consume the head receive of the responder and complete it.
    fn deliver(
        &mut self,
        peer: Qpn,
        opcode: WcOpcode,
        byte_len: u32,
        imm: Option<ImmData>,
    ) -> Result<(), Outcome> {
        let Some(qp) = self.qps.get_mut(&peer) else {
            return Err(fail(WcStatus::RetryExcErr));
        };
        let Some(recv) = qp.rq.pop_front() else {
            return Err(Outcome::Stall);
        };
        let wc = Wc {
            wr_id: recv.wr_id,
            status: WcStatus::Success,
            opcode,
            byte_len,
            imm,
            qpn: peer,
        };
        if !qp.rcq.push(wc) {
            log::error!("qpman: recv CQ overrun on QP {:#x}", peer);
            self.fail_qp(peer);
            return Err(fail(WcStatus::RemOpErr));
        }
        Ok(())
    }

    /// Execute one work request. Return the number of bytes transferred.
    fn execute(&mut self, qpn: Qpn, wr: &SendWr) -> Result<u32, Outcome> {
        let route = self.route(qpn)?;
        let len = wr.local.len;

        if wr.opcode.consumes_recv() && route.peer_recv.is_none() {
            return Err(Outcome::Stall);
        }

        match wr.opcode {
            WrOpcode::Send | WrOpcode::SendWithImm => {
                let src = self
                    .check_local(route.pd, &wr.local, Permission::EMPTY)
                    .map_err(fail)?;
                let Some(recv) = route.peer_recv else {
                    return Err(Outcome::Stall);
                };
                if len > recv.sge.len {
                    return Err(Outcome::Fail {
                        status: WcStatus::RemInvReqErr,
                        responder: Some(WcStatus::LocLenErr),
                    });
                }
                let dst_sge = Sge { len, ..recv.sge };
                let dst = self
                    .check_local(route.peer_pd, &dst_sge, Permission::LOCAL_WRITE)
                    .map_err(|status| Outcome::Fail {
                        status: WcStatus::RemOpErr,
                        responder: Some(status),
                    })?;

                // SAFETY: both ranges lie in live registrations, and every
                // registration keeps its backing memory alive.
                unsafe { copy_bytes(src, dst, len) };

                let imm = if wr.opcode.carries_imm() { wr.imm } else { None };
                self.deliver(route.peer, WcOpcode::Recv, len, imm)?;
            }
            WrOpcode::RdmaWrite | WrOpcode::RdmaWriteWithImm => {
                let src = self
                    .check_local(route.pd, &wr.local, Permission::EMPTY)
                    .map_err(fail)?;
                let dst = self.check_remote(
                    &route,
                    wr.remote_addr,
                    wr.rkey,
                    len,
                    Permission::REMOTE_WRITE,
                )?;

                // SAFETY: see above.
                unsafe { copy_bytes(src, dst, len) };

                if wr.opcode.carries_imm() {
                    self.deliver(route.peer, WcOpcode::RecvRdmaImm, len, wr.imm)?;
                }
            }
            WrOpcode::RdmaRead => {
                let dst = self
                    .check_local(route.pd, &wr.local, Permission::LOCAL_WRITE)
                    .map_err(fail)?;
                let src = self.check_remote(
                    &route,
                    wr.remote_addr,
                    wr.rkey,
                    len,
                    Permission::REMOTE_READ,
                )?;

                // SAFETY: see above.
                unsafe { copy_bytes(src, dst, len) };
            }
            WrOpcode::CompSwap { .. } | WrOpcode::FetchAdd { .. } => {
                if len != 8 {
                    return Err(fail(WcStatus::LocLenErr));
                }
                let dst = self
                    .check_local(route.pd, &wr.local, Permission::LOCAL_WRITE)
                    .map_err(fail)?;
                if wr.remote_addr % 8 != 0 {
                    return Err(fail(WcStatus::RemInvReqErr));
                }
                let target = self.check_remote(
                    &route,
                    wr.remote_addr,
                    wr.rkey,
                    8,
                    Permission::REMOTE_ATOMIC,
                )?;

                // SAFETY: `target` is an 8-byte aligned word inside a live
                // registration, `dst` is 8 bytes inside another. The fabric
                // lock serializes all atomics.
                unsafe {
                    let target = target as *mut u64;
                    let old = ptr::read(target);
                    let new = match wr.opcode {
                        WrOpcode::CompSwap { compare, swap } if old == compare => swap,
                        WrOpcode::FetchAdd { add } => old.wrapping_add(add),
                        _ => old,
                    };
                    ptr::write(target, new);
                    ptr::write_unaligned(dst as *mut u64, old);
                }
            }
        }
        Ok(len)
    }
}
