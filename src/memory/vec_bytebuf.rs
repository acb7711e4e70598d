//! Heap-allocated linear-memory buffer.
//!
//! The always-available strategy: plain zeroed heap memory, grown by
//! reallocate-and-copy. Every access is software bounds checked by the
//! interpreter.

use wasmet_core::{Error, ErrorKind};

pub(crate) struct VecByteBuf {
    bytes: Vec<u8>,
}

impl VecByteBuf {
    /// Creates a zero-initialised buffer of `len` bytes.
    pub(crate) fn new(len: usize) -> Result<VecByteBuf, Error> {
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|_| Error::new(ErrorKind::OutOfMemory))?;
        bytes.resize(len, 0);
        Ok(VecByteBuf { bytes })
    }

    /// Grows to `new_len` bytes; old content is preserved, new bytes are
    /// zero.
    pub(crate) fn realloc(&mut self, new_len: usize) -> Result<(), Error> {
        debug_assert!(new_len >= self.bytes.len());
        let additional = new_len - self.bytes.len();
        self.bytes
            .try_reserve_exact(additional)
            .map_err(|_| Error::new(ErrorKind::OutOfMemory))?;
        self.bytes.resize(new_len, 0);
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn as_slice_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::VecByteBuf;

    #[test]
    fn grow_preserves_and_zeroes() {
        let mut buf = VecByteBuf::new(16).unwrap();
        buf.as_slice_mut()[..4].copy_from_slice(&[1, 2, 3, 4]);
        buf.realloc(64).unwrap();
        assert_eq!(&buf.as_slice()[..4], &[1, 2, 3, 4]);
        assert!(buf.as_slice()[4..].iter().all(|b| *b == 0));
    }
}
