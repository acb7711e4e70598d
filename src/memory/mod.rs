//! Linear-memory allocation.
//!
//! A memory page is 64 KiB and a single memory addresses at most 4 GiB.
//! Two strategies back a [`MemoryRegion`]:
//!
//! 1. **Heap** ([`vec_bytebuf`]): zeroed heap memory, grown by
//!    reallocate-and-copy. Always available.
//! 2. **Virtual memory** ([`mmap_bytebuf`], 64-bit unix hosts): an 8 GiB
//!    `PROT_NONE` reservation per instance with only the live prefix exposed
//!    read/write; growth is an `mprotect` with no data movement, and a
//!    module's data image can be pre-seeded from a shared backing file.
//!
//! The strategy actually used is reflected by the region's variant; callers
//! that pre-seeded a backing image check [`MemoryRegion::has_backing_image`]
//! to know whether the data segments still need copying.

use std::sync::Arc;
use wasmet_core::Error;

mod backing;
mod vec_bytebuf;

#[cfg(all(unix, target_pointer_width = "64"))]
mod mmap_bytebuf;

pub(crate) use self::backing::MemoryBacking;
use self::vec_bytebuf::VecByteBuf;

#[cfg(all(unix, target_pointer_width = "64"))]
use self::mmap_bytebuf::MmapByteBuf;

use memory_units::Bytes;

/// Size of a page of linear memory - 64KiB.
///
/// The size of a memory is always an integer multiple of a page size.
pub const LINEAR_MEMORY_PAGE_SIZE: Bytes = Bytes(65536);

/// Maximum number of pages of a single linear memory (4 GiB).
pub(crate) const MAX_MEMORY_PAGES: u32 = 65536;

/// Whether the virtual-memory strategy is compiled in on this host.
pub(crate) const fn virtual_memory_supported() -> bool {
    cfg!(all(unix, target_pointer_width = "64"))
}

/// Converts a page count to bytes. Cannot overflow: page counts are capped
/// at [`MAX_MEMORY_PAGES`].
pub(crate) fn pages_to_bytes(pages: u32) -> u64 {
    pages as u64 * LINEAR_MEMORY_PAGE_SIZE.0 as u64
}

/// A linear-memory allocation; the variant records the strategy in use.
pub(crate) enum MemoryRegion {
    Heap(VecByteBuf),
    #[cfg(all(unix, target_pointer_width = "64"))]
    Mmap(MmapByteBuf),
}

impl MemoryRegion {
    pub(crate) fn len(&self) -> usize {
        match self {
            MemoryRegion::Heap(buf) => buf.len(),
            #[cfg(all(unix, target_pointer_width = "64"))]
            MemoryRegion::Mmap(buf) => buf.len(),
        }
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        match self {
            MemoryRegion::Heap(buf) => buf.as_slice(),
            #[cfg(all(unix, target_pointer_width = "64"))]
            MemoryRegion::Mmap(buf) => buf.as_slice(),
        }
    }

    pub(crate) fn as_slice_mut(&mut self) -> &mut [u8] {
        match self {
            MemoryRegion::Heap(buf) => buf.as_slice_mut(),
            #[cfg(all(unix, target_pointer_width = "64"))]
            MemoryRegion::Mmap(buf) => buf.as_slice_mut(),
        }
    }

    /// Whether the region came up pre-seeded with the module's data image.
    pub(crate) fn has_backing_image(&self) -> bool {
        match self {
            MemoryRegion::Heap(_) => false,
            #[cfg(all(unix, target_pointer_width = "64"))]
            MemoryRegion::Mmap(buf) => buf.has_image(),
        }
    }
}

/// Allocates a zeroed region of `size` bytes.
///
/// Prefers the virtual-memory strategy when `want_mmap` is set and the host
/// supports it, falling back to the heap strategy otherwise. When a backing
/// image is supplied the mmap path maps it privately; the heap path copies
/// it.
pub(crate) fn alloc_init(
    size: usize,
    want_mmap: bool,
    backing: Option<&Arc<MemoryBacking>>,
) -> Result<MemoryRegion, Error> {
    #[cfg(all(unix, target_pointer_width = "64"))]
    if want_mmap {
        match MmapByteBuf::new(size, backing.cloned()) {
            Ok(buf) => return Ok(MemoryRegion::Mmap(buf)),
            Err(error) => {
                tracing::warn!(%error, "virtual memory allocation failed, falling back to heap");
            }
        }
    }
    #[cfg(not(all(unix, target_pointer_width = "64")))]
    let _ = want_mmap;

    let mut buf = VecByteBuf::new(size)?;
    if let Some(backing) = backing {
        backing.read_into(buf.as_slice_mut())?;
    }
    Ok(MemoryRegion::Heap(buf))
}

/// Grows a region in place when possible, preserving old bytes and zeroing
/// new ones. A virtual-memory region whose reservation would be exceeded is
/// copied over to the heap strategy instead.
pub(crate) fn enlarge(region: &mut MemoryRegion, new_size: usize) -> Result<(), Error> {
    match region {
        MemoryRegion::Heap(buf) => buf.realloc(new_size),
        #[cfg(all(unix, target_pointer_width = "64"))]
        MemoryRegion::Mmap(buf) => {
            if new_size <= self::mmap_bytebuf::RESERVATION_SIZE {
                return buf.grow(new_size);
            }
            // Out of reserved space: copy and switch strategies.
            let mut heap = VecByteBuf::new(new_size)?;
            heap.as_slice_mut()[..buf.len()].copy_from_slice(buf.as_slice());
            *region = MemoryRegion::Heap(heap);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_strategy_is_always_available() {
        let region = alloc_init(65536, false, None).unwrap();
        assert!(matches!(region, MemoryRegion::Heap(_)));
        assert_eq!(region.len(), 65536);
        assert!(region.as_slice().iter().all(|b| *b == 0));
    }

    #[test]
    fn enlarge_preserves_content() {
        let mut region = alloc_init(65536, false, None).unwrap();
        region.as_slice_mut()[100] = 42;
        enlarge(&mut region, 2 * 65536).unwrap();
        assert_eq!(region.len(), 2 * 65536);
        assert_eq!(region.as_slice()[100], 42);
        assert!(region.as_slice()[65536..].iter().all(|b| *b == 0));
    }

    #[cfg(all(unix, target_pointer_width = "64"))]
    #[test]
    fn mmap_strategy_is_preferred_when_requested() {
        let mut region = alloc_init(65536, true, None).unwrap();
        assert!(matches!(region, MemoryRegion::Mmap(_)));
        region.as_slice_mut()[0] = 1;
        enlarge(&mut region, 4 * 65536).unwrap();
        assert_eq!(region.as_slice()[0], 1);
        assert!(region.as_slice()[1..].iter().all(|b| *b == 0));
    }

    #[cfg(all(unix, target_pointer_width = "64"))]
    #[test]
    fn backing_image_is_private_per_region() {
        let image = {
            let mut image = vec![0u8; 1024];
            image[20..34].copy_from_slice(b"Hello, World!\0");
            image
        };
        let backing = Arc::new(MemoryBacking::new(&image).unwrap());
        let mut first = alloc_init(65536, true, Some(&backing)).unwrap();
        let second = alloc_init(65536, true, Some(&backing)).unwrap();
        assert_eq!(&first.as_slice()[20..33], b"Hello, World!");
        assert_eq!(&second.as_slice()[20..33], b"Hello, World!");
        // Writes through one instance never reach the other.
        first.as_slice_mut()[20] = b'X';
        assert_eq!(second.as_slice()[20], b'H');
    }
}
