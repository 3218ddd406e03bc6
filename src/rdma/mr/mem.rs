use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Get the system page size.
fn page_size() -> usize {
    // SAFETY: FFI.
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if sz > 0 {
        sz as usize
    } else {
        4096
    }
}

struct MemInner {
    buf: Option<(NonNull<u8>, Layout)>,
}

// SAFETY: the buffer is a plain heap allocation; concurrent access follows
// the same rules as memory handed to an RDMA device.
unsafe impl Send for MemInner {}
unsafe impl Sync for MemInner {}

impl Drop for MemInner {
    fn drop(&mut self) {
        if let Some((ptr, layout)) = self.buf.take() {
            // SAFETY: allocated in `Mem::new` with the same layout.
            unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
        }
    }
}

/// A page-aligned, zero-initialized memory region.
///
/// Cloning shares the buffer. Registrations made from a region keep it
/// alive, so the region always outlives every handle derived from it.
#[derive(Clone)]
pub struct Mem {
    inner: Arc<MemInner>,
}

impl fmt::Debug for Mem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mem")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("len", &self.len())
            .finish()
    }
}

impl Mem {
    /// Allocate a region of `size` bytes.
    ///
    /// Allocation failure does not panic: check [`Self::valid`].
    pub fn new(size: usize) -> Self {
        let buf = Layout::from_size_align(size, page_size())
            .ok()
            .filter(|layout| layout.size() > 0)
            .and_then(|layout| {
                // SAFETY: `layout` has non-zero size.
                NonNull::new(unsafe { alloc::alloc_zeroed(layout) }).map(|ptr| (ptr, layout))
            });
        if buf.is_none() {
            log::warn!("qpman: failed to allocate memory region of {} bytes", size);
        }
        Self {
            inner: Arc::new(MemInner { buf }),
        }
    }

    /// Whether the allocation succeeded.
    #[inline]
    pub fn valid(&self) -> bool {
        self.inner.buf.is_some()
    }

    /// Get the base address, or 0 if invalid.
    #[inline]
    pub fn addr(&self) -> u64 {
        self.inner
            .buf
            .map_or(0, |(ptr, _)| ptr.as_ptr() as u64)
    }

    /// Get the size in bytes, or 0 if invalid.
    #[allow(clippy::len_without_is_empty)]
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.buf.map_or(0, |(_, layout)| layout.size())
    }

    fn check(&self, offset: usize, len: usize) -> Result<*mut u8> {
        let Some((ptr, layout)) = self.inner.buf else {
            return Err(Error::NotReady("memory region is not allocated".to_owned()));
        };
        match offset.checked_add(len) {
            Some(end) if end <= layout.size() => {
                // SAFETY: in bounds of the allocation.
                Ok(unsafe { ptr.as_ptr().add(offset) })
            }
            _ => Err(Error::OutOfBounds {
                offset,
                len,
                size: layout.size(),
            }),
        }
    }

    /// Copy bytes out of the region.
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        let src = self.check(offset, buf.len())?;
        // SAFETY: bounds checked; the region may be concurrently written by
        // RDMA operations, like any registered buffer.
        unsafe { ptr::copy(src, buf.as_mut_ptr(), buf.len()) };
        Ok(())
    }

    /// Copy bytes into the region.
    pub fn write(&self, offset: usize, buf: &[u8]) -> Result<()> {
        let dst = self.check(offset, buf.len())?;
        // SAFETY: see `read`.
        unsafe { ptr::copy(buf.as_ptr(), dst, buf.len()) };
        Ok(())
    }

    /// Read a native-endian `u64` at `offset`.
    pub fn read_u64(&self, offset: usize) -> Result<u64> {
        let mut buf = [0; 8];
        self.read(offset, &mut buf)?;
        Ok(u64::from_ne_bytes(buf))
    }

    /// Write a native-endian `u64` at `offset`.
    pub fn write_u64(&self, offset: usize, value: u64) -> Result<()> {
        self.write(offset, &value.to_ne_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc() {
        let mem = Mem::new(4096);
        assert!(mem.valid());
        assert_eq!(mem.len(), 4096);
        assert_eq!(mem.addr() as usize % page_size(), 0);

        let mut buf = [0xffu8; 16];
        mem.read(100, &mut buf).unwrap();
        assert_eq!(buf, [0; 16]);
    }

    #[test]
    fn test_invalid() {
        let mem = Mem::new(0);
        assert!(!mem.valid());
        assert_eq!(mem.addr(), 0);
        assert!(matches!(mem.write(0, &[1]), Err(Error::NotReady(_))));

        assert!(!Mem::new(usize::MAX - 4096).valid());
    }

    #[test]
    fn test_bounds() {
        let mem = Mem::new(64);
        mem.write_u64(56, 0xdead_beef).unwrap();
        assert_eq!(mem.read_u64(56).unwrap(), 0xdead_beef);
        assert!(matches!(
            mem.write(60, &[0; 8]),
            Err(Error::OutOfBounds { offset: 60, len: 8, size: 64 })
        ));
        assert!(mem.read(usize::MAX, &mut [0; 2]).is_err());
    }
}
