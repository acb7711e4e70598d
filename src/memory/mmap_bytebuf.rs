//! Virtual-memory linear-memory buffer.
//!
//! Reserves one large `PROT_NONE` region per instance and exposes only the
//! pages that currently belong to the Wasm memory with read/write
//! protection. Growing becomes an `mprotect` of the already-reserved tail;
//! nothing is ever copied. The oversized guard tail is what lets a JIT rely
//! on hardware faults for bounds checks (the interpreter keeps its software
//! checks either way).
//!
//! When the module's data image is available as a backing file, the head of
//! the region is a `MAP_PRIVATE` mapping of that file, so instantiation does
//! not touch the data bytes at all.

use crate::memory::backing::MemoryBacking;
use core::ffi::c_void;
use core::ptr::NonNull;
use core::slice;
use rustix::mm::{mmap, mmap_anonymous, mprotect, munmap, MapFlags, MprotectFlags, ProtFlags};
use std::sync::Arc;
use wasmet_core::{Error, ErrorKind};

/// Size of the reserved virtual-address region: 8 GiB, twice the 4 GiB a
/// 32-bit Wasm memory can address, leaving a permanent guard tail.
pub(crate) const RESERVATION_SIZE: usize = 8 << 30;

pub(crate) struct MmapByteBuf {
    base: NonNull<u8>,
    len: usize,
    /// Bytes at the start of the region backed by the shared image file.
    image_len: usize,
    /// Keeps the shared backing file alive while mapped.
    backing: Option<Arc<MemoryBacking>>,
}

impl MmapByteBuf {
    /// Reserves the region and exposes the first `len` bytes.
    pub(crate) fn new(len: usize, backing: Option<Arc<MemoryBacking>>) -> Result<MmapByteBuf, Error> {
        if len > RESERVATION_SIZE {
            return Err(Error::new(ErrorKind::MemorySizeTooLarge));
        }
        // SAFETY: a fresh anonymous PROT_NONE reservation at a kernel-chosen
        // address; nothing aliases it until we hand out slices below.
        let base = unsafe {
            mmap_anonymous(
                core::ptr::null_mut(),
                RESERVATION_SIZE,
                ProtFlags::empty(),
                MapFlags::PRIVATE,
            )
        }
        .map_err(|_| Error::new(ErrorKind::OutOfMemory))?;
        let base = NonNull::new(base as *mut u8).expect("mmap never returns a null mapping");

        let mut buf = MmapByteBuf {
            base,
            len: 0,
            image_len: 0,
            backing: None,
        };

        if let Some(backing) = backing {
            let image_len = backing.mapped_len().min(len);
            if image_len > 0 {
                // SAFETY: remaps the head of our own reservation; the file
                // mapping is private, so instance writes never reach the
                // shared image.
                unsafe {
                    mmap(
                        base.as_ptr() as *mut c_void,
                        image_len,
                        ProtFlags::READ | ProtFlags::WRITE,
                        MapFlags::PRIVATE | MapFlags::FIXED,
                        backing.file(),
                        0,
                    )
                }
                .map_err(|_| Error::new(ErrorKind::OutOfMemory))?;
            }
            buf.image_len = image_len;
            buf.backing = Some(backing);
        }

        buf.expose(buf.image_len, len)?;
        buf.len = len;
        Ok(buf)
    }

    /// Whether this region came up pre-seeded from a backing image.
    pub(crate) fn has_image(&self) -> bool {
        self.backing.is_some()
    }

    /// Grows the exposed prefix to `new_len` bytes. Newly exposed pages are
    /// untouched anonymous pages and therefore zero.
    pub(crate) fn grow(&mut self, new_len: usize) -> Result<(), Error> {
        debug_assert!(new_len >= self.len);
        if new_len > RESERVATION_SIZE {
            return Err(Error::new(ErrorKind::MemorySizeTooLarge));
        }
        self.expose(self.len, new_len)?;
        self.len = new_len;
        Ok(())
    }

    fn expose(&self, from: usize, to: usize) -> Result<(), Error> {
        if to <= from {
            return Ok(());
        }
        // SAFETY: [from, to) lies within our own reservation; Wasm sizes are
        // 64 KiB multiples and thus host-page aligned.
        unsafe {
            mprotect(
                self.base.as_ptr().add(from) as *mut c_void,
                to - from,
                MprotectFlags::READ | MprotectFlags::WRITE,
            )
        }
        .map_err(|_| Error::new(ErrorKind::OutOfMemory))
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        // SAFETY: the first `len` bytes are mapped readable and exclusively
        // owned by this buffer.
        unsafe { slice::from_raw_parts(self.base.as_ptr(), self.len) }
    }

    pub(crate) fn as_slice_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees unique access.
        unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.len) }
    }
}

impl Drop for MmapByteBuf {
    fn drop(&mut self) {
        // SAFETY: unmaps exactly the reservation created in `new`.
        let _ = unsafe { munmap(self.base.as_ptr() as *mut c_void, RESERVATION_SIZE) };
    }
}

#[cfg(test)]
mod tests {
    use super::MmapByteBuf;

    const WASM_PAGE: usize = 65536;

    #[test]
    fn exposed_bytes_are_zero_and_growable() {
        let mut buf = MmapByteBuf::new(WASM_PAGE, None).unwrap();
        assert_eq!(buf.len(), WASM_PAGE);
        assert!(buf.as_slice().iter().all(|b| *b == 0));
        buf.as_slice_mut()[0] = 7;
        buf.grow(3 * WASM_PAGE).unwrap();
        assert_eq!(buf.as_slice()[0], 7);
        assert!(buf.as_slice()[WASM_PAGE..].iter().all(|b| *b == 0));
    }

    #[test]
    fn zero_length_memory_is_representable() {
        let buf = MmapByteBuf::new(0, None).unwrap();
        assert_eq!(buf.len(), 0);
        assert!(buf.as_slice().is_empty());
    }
}
