//! Completion queue and Work completion.

mod wc;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use self::wc::*;
use crate::error::{Error, Result};
use crate::provider::CqOps;
use crate::rdma::context::Context;

/// Ownership holder of completion queue.
struct CqInner {
    ctx: Context,
    cq: Arc<dyn CqOps>,
    capacity: u32,
}

/// Completion queue.
#[derive(Clone)]
pub struct Cq {
    inner: Arc<CqInner>,
}

impl fmt::Debug for Cq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("Cq<{:p}>", Arc::as_ptr(&self.inner)))
    }
}

impl Cq {
    /// The default CQ depth.
    pub const DEFAULT_CQ_DEPTH: u32 = 128;

    /// Create a new completion queue.
    pub fn new(ctx: &Context, capacity: u32) -> Result<Cq> {
        let max_capacity = ctx.caps().max_cqe;
        if capacity == 0 || capacity > max_capacity {
            return Err(Error::CreationError(format!(
                "CQ depth {} not in [1, {}]",
                capacity, max_capacity
            )));
        }

        let cq = ctx.ops().create_cq(capacity)?;
        Ok(Self {
            inner: Arc::new(CqInner {
                ctx: ctx.clone(),
                cq,
                capacity,
            }),
        })
    }

    #[inline]
    pub(crate) fn ops(&self) -> &Arc<dyn CqOps> {
        &self.inner.cq
    }

    /// Get the underlying [`Context`].
    #[inline]
    pub fn context(&self) -> &Context {
        &self.inner.ctx
    }

    /// Get the capacity of the completion queue.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.inner.capacity
    }

    /// Check whether two handles refer to the same completion queue.
    #[inline]
    pub fn same_as(&self, other: &Cq) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Non-blockingly poll with a limited number of expected work completions.
    ///
    /// It is the caller's responsibility to check the status codes of the
    /// returned work completion entries.
    #[inline]
    pub fn poll(&self, num: u32) -> Vec<Wc> {
        self.inner.cq.poll(num as usize)
    }

    /// Non-blockingly poll one work completion.
    ///
    /// It is the caller's responsibility to check the status code of the
    /// returned work completion entry.
    #[inline]
    pub fn poll_one(&self) -> Option<Wc> {
        self.inner.cq.poll(1).pop()
    }

    /// Block until one work completion is polled or `timeout` elapses.
    ///
    /// It is the caller's responsibility to check the status code of the
    /// returned work completion entry.
    pub fn wait_one(&self, timeout: Duration) -> Result<Wc> {
        self.inner
            .cq
            .wait_one(timeout)
            .ok_or(Error::Timeout(timeout))
    }
}
