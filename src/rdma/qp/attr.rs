use serde::{Deserialize, Serialize};

use crate::rdma::gid::Gid;
use crate::rdma::types::*;

/// Identity of one endpoint of a connection, exchanged verbatim between peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QpAttr {
    pub subnet_prefix: u64,
    pub interface_id: u64,
    pub lid: Lid,
    pub psn: Psn,
    pub port_id: PortNum,
    pub qpn: Qpn,
    pub qkey: QKey,
}

impl QpAttr {
    /// Get the GID of the endpoint's port.
    #[inline]
    pub fn gid(&self) -> Gid {
        Gid::new(self.subnet_prefix, self.interface_id)
    }
}
