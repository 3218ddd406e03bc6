use serde::{Deserialize, Serialize};

use crate::rdma::mr::Permission;
use crate::rdma::types::*;

/// Queue pair configuration.
///
/// Supplied at creation and immutable for the life of the queue pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QpConfig {
    /// Access rights granted to the peer.
    pub access: Permission,

    /// Maximum outstanding RDMA read/atomic operations as initiator.
    pub max_rd_atomic: u8,

    /// Maximum outstanding RDMA read/atomic operations as responder.
    pub max_dest_rd_atomic: u8,

    /// Initial packet sequence number of the send queue.
    pub psn: Psn,

    /// Local ACK timeout exponent.
    pub timeout: u8,

    /// Send queue depth.
    pub max_send_wr: u32,

    /// Receive queue depth.
    pub max_recv_wr: u32,

    /// Queue key advertised in the attributes.
    pub qkey: QKey,

    /// Partition key index.
    pub pkey_index: PKeyIndex,

    /// Dynamically-connected access key. Carried for wire compatibility only.
    pub dc_key: u64,
}

impl QpConfig {
    /// The initial PSN used unless configured otherwise.
    pub const DEFAULT_PSN: Psn = 3185;

    /// The most outstanding RDMA read/atomic operations a device supports.
    pub const MAX_RD_ATOMIC: u8 = 16;

    #[inline]
    pub fn with_access(mut self, access: Permission) -> Self {
        self.access = access;
        self
    }

    #[inline]
    pub fn with_psn(mut self, psn: Psn) -> Self {
        self.psn = psn;
        self
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: u8) -> Self {
        self.timeout = timeout;
        self
    }

    #[inline]
    pub fn with_max_send_wr(mut self, max_send_wr: u32) -> Self {
        self.max_send_wr = max_send_wr;
        self
    }

    #[inline]
    pub fn with_max_recv_wr(mut self, max_recv_wr: u32) -> Self {
        self.max_recv_wr = max_recv_wr;
        self
    }
}

impl Default for QpConfig {
    fn default() -> Self {
        Self {
            access: Permission::REMOTE_ALL,
            max_rd_atomic: Self::MAX_RD_ATOMIC,
            max_dest_rd_atomic: Self::MAX_RD_ATOMIC,
            psn: Self::DEFAULT_PSN,
            timeout: 20,
            max_send_wr: 128,
            max_recv_wr: 2048,
            qkey: 0x111111,
            pkey_index: 0,
            dc_key: 1024,
        }
    }
}
