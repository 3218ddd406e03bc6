//! Memory regions and their registrations.

mod mem;
mod perm;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use self::mem::*;
pub use self::perm::*;
use crate::error::{Error, Result};
use crate::provider::MrOps;
use crate::rdma::nic::Nic;
use crate::rdma::pd::Pd;
use crate::rdma::types::*;

/// Access attributes of a registration.
///
/// This is what gets disclosed to peers for one-sided operations. The keys
/// are capability tokens: anyone holding them may access the memory with the
/// permissions granted at registration, for the life of the registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MrAttr {
    pub addr: u64,
    pub len: u64,
    pub lkey: LKey,
    pub rkey: RKey,
}

impl MrAttr {
    /// Get an address at the given offset.
    #[inline]
    pub fn at(&self, offset: u64) -> u64 {
        self.addr + offset
    }

    /// Get the attributes of a sub-range, which share the keys.
    pub fn slice(&self, offset: u64, len: u64) -> Result<MrAttr> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(MrAttr {
                addr: self.addr + offset,
                len,
                ..*self
            }),
            _ => Err(Error::OutOfBounds {
                offset: offset as usize,
                len: len as usize,
                size: self.len as usize,
            }),
        }
    }
}

/// Ownership holder of a registration.
struct MrInner {
    // Deregistered before the memory and the protection domain go away.
    _mr: Box<dyn MrOps>,
    pd: Pd,
    mem: Mem,
    attr: MrAttr,
    perm: Permission,
}

impl Drop for MrInner {
    fn drop(&mut self) {
        log::trace!("qpman: deregistering MR lkey {:#x}", self.attr.lkey);
    }
}

/// Memory registration handle.
///
/// Created by registering a [`Mem`] against a [`Nic`]. Immutable after
/// creation, and deregistered when the last clone drops. The handle keeps
/// its memory region alive.
#[derive(Clone)]
pub struct Mr {
    inner: Arc<MrInner>,
}

impl fmt::Debug for Mr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mr")
            .field("attr", &self.inner.attr)
            .field("perm", &self.inner.perm)
            .finish()
    }
}

impl Mr {
    /// Register a whole memory region with default permissions.
    pub fn reg(mem: &Mem, nic: &Nic) -> Result<Self> {
        Self::reg_with_perm(mem, nic, Permission::default())
    }

    /// Register a whole memory region with the given permissions.
    pub fn reg_with_perm(mem: &Mem, nic: &Nic, perm: Permission) -> Result<Self> {
        if !mem.valid() {
            return Err(Error::CreationError(
                "cannot register an unallocated memory region".to_owned(),
            ));
        }

        let pd = nic.pd().clone();
        let mr = pd.ops().reg_mr(mem.addr(), mem.len() as u64, perm)?;
        let (lkey, rkey) = (mr.lkey(), mr.rkey());
        log::trace!(
            "qpman: registered MR {:#x}+{} lkey {:#x} rkey {:#x}",
            mem.addr(),
            mem.len(),
            lkey,
            rkey
        );

        Ok(Self {
            inner: Arc::new(MrInner {
                _mr: mr,
                pd,
                mem: mem.clone(),
                attr: MrAttr {
                    addr: mem.addr(),
                    len: mem.len() as u64,
                    lkey,
                    rkey,
                },
                perm,
            }),
        })
    }

    /// Get the registration attributes.
    #[inline]
    pub fn attr(&self) -> MrAttr {
        self.inner.attr
    }

    /// Get the local key.
    #[inline]
    pub fn lkey(&self) -> LKey {
        self.inner.attr.lkey
    }

    /// Get the remote key.
    #[inline]
    pub fn rkey(&self) -> RKey {
        self.inner.attr.rkey
    }

    /// Get the registered address.
    #[inline]
    pub fn addr(&self) -> u64 {
        self.inner.attr.addr
    }

    /// Get the registered length.
    #[allow(clippy::len_without_is_empty)]
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.attr.len as usize
    }

    /// Get the registered permissions.
    #[inline]
    pub fn perm(&self) -> Permission {
        self.inner.perm
    }

    /// Get the underlying memory region.
    #[inline]
    pub fn mem(&self) -> &Mem {
        &self.inner.mem
    }

    /// Get the protection domain of this registration.
    #[inline]
    pub fn pd(&self) -> &Pd {
        &self.inner.pd
    }
}
