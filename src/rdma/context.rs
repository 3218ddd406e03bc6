use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::provider::{self, DeviceCaps, DeviceOps, Provider};
use crate::rdma::nic::Port;
use crate::rdma::types::*;

/// Ownership holder of an opened device.
struct ContextInner {
    provider: Arc<dyn Provider>,
    dev: Arc<dyn DeviceOps>,
    index: usize,
    caps: DeviceCaps,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        log::debug!("qpman: closing device {}", self.dev.name());
    }
}

/// Device context.
///
/// The device is closed when the last clone of its context drops. Every
/// protection domain, completion queue, registration and queue pair keeps
/// one.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("provider", &self.inner.provider.name())
            .field("dev", &self.inner.index)
            .field("name", &self.name())
            .finish()
    }
}

impl Context {
    /// Open the `dev`-th device of a provider.
    pub(crate) fn open(provider: &Arc<dyn Provider>, dev: usize) -> Result<Self> {
        let ops = provider.clone().open_device(dev)?;
        let caps = ops.caps();
        log::debug!(
            "qpman: opened {} device {} ({})",
            provider.name(),
            ops.name(),
            dev
        );

        Ok(Self {
            inner: Arc::new(ContextInner {
                provider: provider.clone(),
                dev: ops,
                index: dev,
                caps,
            }),
        })
    }

    /// Get the provider this device was opened from.
    #[inline]
    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.inner.provider
    }

    #[inline]
    pub(crate) fn ops(&self) -> &Arc<dyn DeviceOps> {
        &self.inner.dev
    }

    /// Get the device index.
    #[inline]
    pub fn dev_index(&self) -> usize {
        self.inner.index
    }

    /// Get the device name.
    #[inline]
    pub fn name(&self) -> &str {
        self.inner.dev.name()
    }

    #[inline]
    pub(crate) fn caps(&self) -> DeviceCaps {
        self.inner.caps
    }

    /// Query the current attributes of a port of this device.
    pub fn query_port(&self, port: PortNum) -> Result<Port> {
        self.inner.dev.query_port(port)
    }

    /// Check whether two contexts refer to the same opened device.
    #[inline]
    pub fn same_as(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Check whether two contexts refer to the same device of the same
    /// provider, even if opened separately.
    pub fn same_device(&self, other: &Context) -> bool {
        self.inner.index == other.inner.index
            && provider::same_provider(&self.inner.provider, &other.inner.provider)
    }
}
