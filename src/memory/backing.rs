//! Shared data-segment image backing.
//!
//! When every data segment of a module has a constant init offset inside the
//! initial memory, the loader renders the segments into one image and writes
//! it to an ephemeral scratch file. Each instance then maps the file
//! privately, which makes instantiation O(1) in data-segment bytes. The file
//! is unlinked the moment it is created; the shared handle is dropped when
//! the last module or instance referencing it goes away.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use wasmet_core::{Error, ErrorKind};

const WASM_PAGE: usize = 65536;

static NEXT_IMAGE_ID: AtomicU64 = AtomicU64::new(0);

fn scratch_dir() -> PathBuf {
    let shm = PathBuf::from("/dev/shm");
    if shm.is_dir() {
        shm
    } else {
        std::env::temp_dir()
    }
}

pub(crate) struct MemoryBacking {
    file: File,
    image_len: usize,
    mapped_len: usize,
}

impl MemoryBacking {
    /// Writes `image` to a fresh, already-unlinked scratch file.
    pub(crate) fn new(image: &[u8]) -> Result<MemoryBacking, Error> {
        let id = NEXT_IMAGE_ID.fetch_add(1, Ordering::Relaxed);
        let path = scratch_dir().join(format!(
            "wasmet-image-{}-{}",
            std::process::id(),
            id
        ));
        let result = Self::create_at(&path, image);
        // Unlink regardless of outcome; content stays reachable through the
        // open handle only.
        let _ = std::fs::remove_file(&path);
        result
    }

    fn create_at(path: &std::path::Path, image: &[u8]) -> Result<MemoryBacking, Error> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|_| Error::new(ErrorKind::OutOfMemory))?;
        file.write_all(image)
            .map_err(|_| Error::new(ErrorKind::OutOfMemory))?;
        // Round up so a page-granular mapping never reaches past EOF.
        let mapped_len = image.len().div_ceil(WASM_PAGE) * WASM_PAGE;
        file.set_len(mapped_len as u64)
            .map_err(|_| Error::new(ErrorKind::OutOfMemory))?;
        Ok(MemoryBacking {
            file,
            image_len: image.len(),
            mapped_len,
        })
    }

    pub(crate) fn file(&self) -> &File {
        &self.file
    }

    /// Length of the raw image, before page rounding.
    pub(crate) fn image_len(&self) -> usize {
        self.image_len
    }

    /// Page-rounded length safe to map.
    pub(crate) fn mapped_len(&self) -> usize {
        self.mapped_len
    }

    /// Copies the image into `target`; the fallback used when an instance
    /// ends up on the heap-allocated strategy.
    pub(crate) fn read_into(&self, target: &mut [u8]) -> Result<(), Error> {
        let len = self.image_len.min(target.len());
        let mut file = &self.file;
        file.seek(SeekFrom::Start(0))
            .map_err(|_| Error::new(ErrorKind::OutOfMemory))?;
        file.read_exact(&mut target[..len])
            .map_err(|_| Error::new(ErrorKind::OutOfMemory))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryBacking;

    #[test]
    fn image_round_trips_and_is_page_rounded() {
        let image = vec![0xabu8; 100];
        let backing = MemoryBacking::new(&image).unwrap();
        assert_eq!(backing.image_len(), 100);
        assert_eq!(backing.mapped_len(), 65536);
        let mut out = vec![0u8; 128];
        backing.read_into(&mut out).unwrap();
        assert_eq!(&out[..100], &image[..]);
        assert!(out[100..].iter().all(|b| *b == 0));
    }
}
