//! The `qpman` prelude.
//!
//! The purpose of this module is to alleviate imports of common
//! functionalities.

pub use crate::ctrl::{Connecter, Daemon, RecvManager};
pub use crate::error::{Error, IoCode};
pub use crate::rdma::context::Context;
pub use crate::rdma::cq::{Cq, Wc, WcOpcode, WcStatus};
pub use crate::rdma::gid::Gid;
pub use crate::rdma::mr::{Mem, Mr, MrAttr, Permission};
pub use crate::rdma::nic::{DevIdx, Nic, NicFinder, Port, PortState};
pub use crate::rdma::pd::Pd;
pub use crate::rdma::qp::{
    Qp, QpAttr, QpConfig, QpState, ReqDesc, ReqPayload, SendFlags, WrOpcode,
};
pub use crate::rdma::recv::{RecvAllocator, RecvEntries, RecvIter, SimpleAllocator};
