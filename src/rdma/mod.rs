//! RDMA functionalities.

pub mod context;
pub mod cq;
pub mod gid;
pub mod mr;
pub mod nic;
pub mod pd;
pub mod qp;
pub mod recv;
pub mod types;
