//! Receive buffer pools and message iteration.
//!
//! A [`RecvEntries`] ring owns a fixed number of receive buffers carved out
//! of a registered region by a [`RecvAllocator`]. A [`RecvIter`] walks the
//! messages that arrived in those buffers and hands consumed buffers back to
//! the receive queue on [`RecvIter::clear`].

mod alloc;
mod entries;
mod iter;

pub use self::alloc::*;
pub use self::entries::*;
pub use self::iter::*;
