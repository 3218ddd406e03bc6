use std::ops::BitOr;

use crate::rdma::cq::WcOpcode;
use crate::rdma::types::*;

/// Opcode of a send-queue work request.
///
/// Atomic opcodes carry their operands. Their local buffer must be exactly
/// 8 bytes and receives the original value of the remote target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrOpcode {
    /// Two-sided send. Consumes one receive posted by the peer.
    Send,

    /// Two-sided send carrying [`ReqPayload::imm`].
    SendWithImm,

    /// One-sided write to the remote address.
    RdmaWrite,

    /// One-sided write carrying [`ReqPayload::imm`]. Consumes one receive
    /// posted by the peer.
    RdmaWriteWithImm,

    /// One-sided read from the remote address.
    RdmaRead,

    /// 8-byte compare-and-swap on the remote address.
    CompSwap { compare: u64, swap: u64 },

    /// 8-byte fetch-and-add on the remote address.
    FetchAdd { add: u64 },
}

impl WrOpcode {
    /// Whether this opcode accesses remote memory by address and therefore
    /// needs a remote registration.
    #[inline]
    pub fn needs_remote(&self) -> bool {
        !matches!(self, WrOpcode::Send | WrOpcode::SendWithImm)
    }

    /// Whether this opcode carries immediate data.
    #[inline]
    pub fn carries_imm(&self) -> bool {
        matches!(self, WrOpcode::SendWithImm | WrOpcode::RdmaWriteWithImm)
    }

    /// Whether this opcode consumes a receive posted by the peer.
    #[inline]
    pub(crate) fn consumes_recv(&self) -> bool {
        matches!(
            self,
            WrOpcode::Send | WrOpcode::SendWithImm | WrOpcode::RdmaWriteWithImm
        )
    }

    /// Opcode of the sender-side completion.
    pub(crate) fn wc_opcode(&self) -> WcOpcode {
        match self {
            WrOpcode::Send | WrOpcode::SendWithImm => WcOpcode::Send,
            WrOpcode::RdmaWrite | WrOpcode::RdmaWriteWithImm => WcOpcode::RdmaWrite,
            WrOpcode::RdmaRead => WcOpcode::RdmaRead,
            WrOpcode::CompSwap { .. } => WcOpcode::CompSwap,
            WrOpcode::FetchAdd { .. } => WcOpcode::FetchAdd,
        }
    }
}

/// Send flags of a work request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendFlags(u8);

impl SendFlags {
    pub const EMPTY: Self = Self(0);

    /// Generate a completion on success. Failed work requests always
    /// generate a completion.
    pub const SIGNALED: Self = Self(1 << 0);

    #[inline]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for SendFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Work request descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReqDesc {
    pub opcode: WrOpcode,
    pub flags: SendFlags,
    pub len: u32,
    pub wr_id: WrId,
}

impl ReqDesc {
    /// A signaled work request.
    #[inline]
    pub fn new(opcode: WrOpcode, len: u32, wr_id: WrId) -> Self {
        Self {
            opcode,
            flags: SendFlags::SIGNALED,
            len,
            wr_id,
        }
    }

    /// Clear the signaled flag.
    #[inline]
    pub fn unsignaled(mut self) -> Self {
        self.flags = SendFlags::EMPTY;
        self
    }
}

/// Work request payload.
///
/// `remote_addr` is ignored by two-sided opcodes, `imm` by opcodes that do
/// not carry immediate data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReqPayload {
    pub local_addr: u64,
    pub remote_addr: u64,
    pub imm: ImmData,
}

impl ReqPayload {
    #[inline]
    pub fn new(local_addr: u64, remote_addr: u64, imm: ImmData) -> Self {
        Self {
            local_addr,
            remote_addr,
            imm,
        }
    }
}
