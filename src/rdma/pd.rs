use std::fmt;
use std::sync::Arc;

use super::context::Context;
use crate::error::Result;
use crate::provider::PdOps;

struct PdInner {
    ctx: Context,
    pd: Arc<dyn PdOps>,
}

/// Protection domain.
///
/// Registrations and queue pairs can only be used together if they belong to
/// the same protection domain.
#[derive(Clone)]
pub struct Pd {
    inner: Arc<PdInner>,
}

impl fmt::Debug for Pd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!(
            "Pd<{}:{:p}>",
            self.inner.ctx.name(),
            Arc::as_ptr(&self.inner)
        ))
    }
}

impl Pd {
    /// Allocate a protection domain on the given device.
    pub fn new(ctx: &Context) -> Result<Self> {
        let pd = ctx.ops().alloc_pd()?;
        Ok(Self {
            inner: Arc::new(PdInner {
                ctx: ctx.clone(),
                pd,
            }),
        })
    }

    /// Get the device context of this protection domain.
    #[inline]
    pub fn context(&self) -> &Context {
        &self.inner.ctx
    }

    #[inline]
    pub(crate) fn ops(&self) -> &Arc<dyn PdOps> {
        &self.inner.pd
    }
}
