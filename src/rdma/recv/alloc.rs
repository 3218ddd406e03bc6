use crate::error::{Error, Result};
use crate::rdma::mr::Mr;
use crate::rdma::types::*;

/// Source of receive buffers.
///
/// Implementations are not required to be thread-safe. They are used once,
/// when a receive ring is populated.
pub trait RecvAllocator {
    /// Hand out a buffer of `size` bytes as `(address, lkey)`.
    fn alloc(&mut self, size: usize) -> Result<(u64, LKey)>;
}

/// Bump allocator over one memory registration.
///
/// Never reclaims: once the remaining capacity is smaller than a request,
/// every further request of that size fails with [`Error::OutOfMemory`].
pub struct SimpleAllocator {
    mr: Mr,
    offset: usize,
}

impl SimpleAllocator {
    pub fn new(mr: &Mr) -> Self {
        log::trace!("qpman: simple allocator uses lkey {:#x}", mr.lkey());
        Self {
            mr: mr.clone(),
            offset: 0,
        }
    }

    /// Get the number of bytes not yet handed out.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.mr.len() - self.offset
    }
}

impl RecvAllocator for SimpleAllocator {
    fn alloc(&mut self, size: usize) -> Result<(u64, LKey)> {
        let remaining = self.remaining();
        if remaining < size {
            return Err(Error::OutOfMemory {
                requested: size,
                remaining,
            });
        }
        let addr = self.mr.addr() + self.offset as u64;
        self.offset += size;
        Ok((addr, self.mr.lkey()))
    }
}
