use std::fmt;

use thiserror::Error;

use crate::rdma::types::*;

/// Opcode of a completion queue entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WcOpcode {
    /// Send request.
    Send,
    /// RDMA write request.
    RdmaWrite,
    /// RDMA read request.
    RdmaRead,
    /// RDMA compare-and-swap request.
    CompSwap,
    /// RDMA fetch-and-add request.
    FetchAdd,
    /// Receive request.
    Recv,
    /// Receive request consumed by an RDMA write with immediate.
    RecvRdmaImm,
}

/// Status of a completion queue entry.
///
/// The documentation and error messages are heavily borrowed from [RDMAmojo](https://www.rdmamojo.com/2013/02/15/ibv_poll_cq/).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WcStatus {
    /// **Operation completed successfully:** the corresponding Work Request
    /// ended and the memory buffers that it refers to are ready to be (re)used.
    #[error("success")]
    Success,

    /// **Local Length Error:** a posted receive buffer isn't big enough for
    /// the incoming message, or an atomic operation whose size is different
    /// than 8 bytes was sent.
    #[error("local length error")]
    LocLenErr,

    /// **Local QP Operation Error:** an internal QP consistency error was
    /// detected while processing this Work Request.
    #[error("local QP operation error")]
    LocQpOpErr,

    /// **Local Protection Error:** the locally posted Work Request's buffer
    /// does not reference a Memory Region that is valid for the requested
    /// operation.
    #[error("local protection error")]
    LocProtErr,

    /// **Work Request Flushed Error:** a Work Request was in process or
    /// outstanding when the QP transitioned into the Error State.
    #[error("WR flush error")]
    WrFlushErr,

    /// **Remote Invalid Request Error:** the responder detected an invalid
    /// message on the channel, e.g., a message larger than the posted receive
    /// buffer or a misaligned atomic target.
    #[error("remote invalid request error")]
    RemInvReqErr,

    /// **Remote Access Error:** a protection error occurred on a remote data
    /// buffer to be read by an RDMA Read, written by an RDMA Write or accessed
    /// by an atomic operation.
    #[error("remote access error")]
    RemAccessErr,

    /// **Remote Operation Error:** the operation could not be completed
    /// successfully by the responder.
    #[error("remote operation error")]
    RemOpErr,

    /// **Transport Retry Counter Exceeded:** the remote side didn't send any
    /// Ack or Nack.
    /// - If this happens when sending the first message, usually this mean that
    ///   the connection attributes are wrong or the remote side isn't in a state
    ///   that it can respond to messages.
    /// - If this happens after sending the first message, usually it means that
    ///   the remote QP isn't available anymore.
    #[error("transport retry counter exceeded")]
    RetryExcErr,

    /// **General Error:** other error which isn't one of the above errors.
    #[error("general error")]
    GeneralErr,
}

/// Work completion entry, representing an entry polled from a completion queue.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Wc {
    pub(crate) wr_id: WrId,
    pub(crate) status: WcStatus,
    pub(crate) opcode: WcOpcode,
    pub(crate) byte_len: u32,
    pub(crate) imm: Option<ImmData>,
    pub(crate) qpn: Qpn,
}

impl Wc {
    /// Get the work request ID.
    #[inline]
    pub fn wr_id(&self) -> WrId {
        self.wr_id
    }

    /// Get the completion status.
    #[inline]
    pub fn status(&self) -> WcStatus {
        self.status
    }

    /// Get the completion status as a `Result`.
    ///
    /// - If the status is success, return the number of bytes processed or transferred.
    /// - Otherwise, return an error.
    #[inline]
    pub fn ok(&self) -> Result<usize, WcStatus> {
        match self.status {
            WcStatus::Success => Ok(self.bytes()),
            status => Err(status),
        }
    }

    /// Get the opcode of the work request.
    #[inline]
    pub fn opcode(&self) -> WcOpcode {
        self.opcode
    }

    /// Get the number of bytes processed or transferred.
    #[inline]
    pub fn bytes(&self) -> usize {
        self.byte_len as usize
    }

    /// Get the immediate data.
    #[inline]
    pub fn imm(&self) -> Option<ImmData> {
        self.imm
    }

    /// Get the number of the local queue pair this completion belongs to.
    #[inline]
    pub fn qp_num(&self) -> Qpn {
        self.qpn
    }
}

impl fmt::Debug for Wc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wc")
            .field("wr_id", &self.wr_id)
            .field("status", &self.status)
            .field("opcode", &self.opcode)
            .finish()
    }
}
