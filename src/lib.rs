//! Lifecycle management of RDMA reliable-connected queue pairs.
//!
//! `qpman` wraps NICs, memory registrations and RC queue pairs in
//! `Arc`-based handles. All resource holder types ([`Nic`], [`Mem`], [`Mr`],
//! [`Cq`], [`Qp`] and [`RecvEntries`]) should be viewed as references to the
//! true underlying resources: share them by `clone()`-ing, and the resource
//! is released when the last handle drops.
//!
//! Queue pairs are connected out of band through the [`ctrl`] module: a
//! [`ctrl::Daemon`] publishes local resources, and a [`ctrl::Connecter`] in
//! the peer process fetches them and sets up the connection.
//!
//! Devices come from a [`provider::Provider`]. The in-process software
//! [`fabric`] works on hosts without RDMA hardware; the `verbs` feature adds
//! a libibverbs provider for real NICs.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use qpman::prelude::*;
//!
//! fn main() -> qpman::Result<()> {
//!     let fabric = qpman::fabric::Fabric::new(Default::default());
//!     let nic0 = Nic::open_on(fabric.clone(), DevIdx::new(0, 1), 0)?;
//!     let nic1 = Nic::open_on(fabric.clone(), DevIdx::new(1, 1), 0)?;
//!
//!     let mem0 = Mem::new(4096);
//!     let mr0 = Mr::reg(&mem0, &nic0)?;
//!     let mem1 = Mem::new(4096);
//!     let mr1 = Mr::reg(&mem1, &nic1)?;
//!
//!     let qp0 = Qp::create(&nic0, QpConfig::default(), None)?;
//!     let qp1 = Qp::create(&nic1, QpConfig::default(), None)?;
//!     qp0.connect(&qp1.my_attr())?;
//!     qp1.connect(&qp0.my_attr())?;
//!
//!     mem0.write_u64(0, 42)?;
//!     qp0.bind_local_mr(mr0.attr());
//!     qp0.bind_remote_mr(mr1.attr());
//!     qp0.send_normal(
//!         ReqDesc::new(WrOpcode::RdmaWrite, 8, 1),
//!         ReqPayload::new(mr0.addr(), mr1.addr(), 0),
//!     )?;
//!     qp0.wait_completion(Duration::from_secs(1))?;
//!     assert_eq!(mem1.read_u64(0)?, 42);
//!     Ok(())
//! }
//! ```

#[cfg(feature = "verbs")]
mod bindings;
mod rdma;
mod utils;

pub mod config;
pub mod ctrl;
pub mod error;
pub mod fabric;
pub mod prelude;
pub mod provider;

pub use config::Config;
pub use error::{Error, IoCode, Result};
pub use rdma::gid::Gid;
pub use rdma::{context::Context, cq::*, mr::*, nic::*, pd::Pd, qp::*, recv::*, types::*};
