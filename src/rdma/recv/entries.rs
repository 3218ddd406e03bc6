use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::RecvAllocator;
use crate::error::{Error, Result};
use crate::rdma::qp::Qp;
use crate::rdma::types::*;

/// Number of receive buffers in one ring.
pub const RECV_ENTRIES: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotState {
    /// Owned by the application, not on any receive queue.
    Idle,
    /// On the receive queue, waiting for a message.
    Posted,
    /// Holds a message that has not been consumed yet.
    Arrived { imm: ImmData, len: u32 },
}

pub(crate) struct Slot {
    pub addr: u64,
    pub lkey: LKey,
    pub state: SlotState,
}

pub(crate) struct Ring {
    pub slots: Vec<Slot>,
    pub msg_size: u32,
}

impl Ring {
    /// Put one slot onto the receive queue of `qp`.
    pub fn post(&mut self, qp: &Qp, idx: usize) -> Result<()> {
        let msg_size = self.msg_size;
        let slot = &mut self.slots[idx];
        qp.post_recv(slot.addr, msg_size, slot.lkey, idx as WrId)?;
        slot.state = SlotState::Posted;
        Ok(())
    }

    fn count(&self, f: impl Fn(&SlotState) -> bool) -> usize {
        self.slots.iter().filter(|s| f(&s.state)).count()
    }
}

/// Fixed-capacity ring of receive buffers.
///
/// Cloning shares the ring. Buffers are identified on the receive queue by
/// their slot index, used as the work request ID.
#[derive(Clone)]
pub struct RecvEntries {
    inner: Arc<Mutex<Ring>>,
}

impl fmt::Debug for RecvEntries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ring = self.lock();
        f.debug_struct("RecvEntries")
            .field("msg_size", &ring.msg_size)
            .field("posted", &ring.count(|s| *s == SlotState::Posted))
            .finish()
    }
}

impl RecvEntries {
    /// Carve [`RECV_ENTRIES`] buffers of `max_msg_size` bytes each out of
    /// `allocator`.
    pub fn new(allocator: &mut dyn RecvAllocator, max_msg_size: u32) -> Result<Self> {
        if max_msg_size == 0 {
            return Err(Error::CreationError(
                "receive buffers must not be empty".to_owned(),
            ));
        }
        let slots = (0..RECV_ENTRIES)
            .map(|_| {
                let (addr, lkey) = allocator.alloc(max_msg_size as usize)?;
                Ok(Slot {
                    addr,
                    lkey,
                    state: SlotState::Idle,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            inner: Arc::new(Mutex::new(Ring {
                slots,
                msg_size: max_msg_size,
            })),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Ring> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Size of each buffer in bytes.
    pub fn max_msg_size(&self) -> u32 {
        self.lock().msg_size
    }

    /// Post every idle buffer onto the receive queue of `qp`.
    pub fn post_all(&self, qp: &Qp) -> Result<()> {
        let mut ring = self.lock();
        for idx in 0..ring.slots.len() {
            if ring.slots[idx].state == SlotState::Idle {
                ring.post(qp, idx)?;
            }
        }
        Ok(())
    }

    /// Take every buffer back from a queue pair that is gone.
    pub(crate) fn reset(&self) {
        for slot in self.lock().slots.iter_mut() {
            slot.state = SlotState::Idle;
        }
    }

    /// Number of buffers on the receive queue.
    pub fn posted(&self) -> usize {
        self.lock().count(|s| *s == SlotState::Posted)
    }

    /// Number of buffers holding a message not yet consumed.
    pub fn unconsumed(&self) -> usize {
        self.lock()
            .count(|s| matches!(s, SlotState::Arrived { .. }))
    }

    /// Check whether two handles share one ring.
    #[inline]
    pub fn same_as(&self, other: &RecvEntries) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
