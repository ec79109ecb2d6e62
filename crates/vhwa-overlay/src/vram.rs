//! Guest video memory as seen by the host.
//!
//! Commands, VRAM-backed surfaces and the saved command queue all address VRAM by byte offset.
//! The producer thread patches command status words while the render thread reads surface
//! contents, so implementations are shared behind an [`Arc`].

use std::sync::{Arc, Mutex};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VramError {
    #[error("vram access out of bounds (offset=0x{offset:x}, len={len})")]
    OutOfBounds { offset: u64, len: usize },
    #[error("vram lock poisoned")]
    Poisoned,
}

pub trait Vram: Send + Sync {
    fn size(&self) -> u64;

    fn read(&self, offset: u64, dst: &mut [u8]) -> Result<(), VramError>;

    fn write(&self, offset: u64, src: &[u8]) -> Result<(), VramError>;

    /// Runs `f` over `len` bytes at `offset` without copying them out first.
    fn with_slice(
        &self,
        offset: u64,
        len: usize,
        f: &mut dyn FnMut(&[u8]),
    ) -> Result<(), VramError>;

    /// Whether `offset` (and `len` bytes after it) lies inside VRAM.
    fn contains(&self, offset: u64, len: usize) -> bool {
        offset
            .checked_add(len as u64)
            .is_some_and(|end| end <= self.size())
    }
}

pub type SharedVram = Arc<dyn Vram>;

/// VRAM backed by a single host buffer starting at offset 0.
#[derive(Debug)]
pub struct VecVram {
    data: Mutex<Vec<u8>>,
}

impl VecVram {
    pub fn new(size_bytes: usize) -> Self {
        Self {
            data: Mutex::new(vec![0u8; size_bytes]),
        }
    }

    pub fn shared(size_bytes: usize) -> SharedVram {
        Arc::new(Self::new(size_bytes))
    }
}

fn range(offset: u64, len: usize, size: usize) -> Result<std::ops::Range<usize>, VramError> {
    let oob = VramError::OutOfBounds { offset, len };
    let start: usize = offset.try_into().map_err(|_| oob.clone())?;
    let end = start.checked_add(len).ok_or(oob.clone())?;
    if end > size {
        return Err(oob);
    }
    Ok(start..end)
}

impl Vram for VecVram {
    fn size(&self) -> u64 {
        self.data.lock().map(|d| d.len() as u64).unwrap_or(0)
    }

    fn read(&self, offset: u64, dst: &mut [u8]) -> Result<(), VramError> {
        let data = self.data.lock().map_err(|_| VramError::Poisoned)?;
        let r = range(offset, dst.len(), data.len())?;
        dst.copy_from_slice(&data[r]);
        Ok(())
    }

    fn write(&self, offset: u64, src: &[u8]) -> Result<(), VramError> {
        let mut data = self.data.lock().map_err(|_| VramError::Poisoned)?;
        let r = range(offset, src.len(), data.len())?;
        data[r].copy_from_slice(src);
        Ok(())
    }

    fn with_slice(
        &self,
        offset: u64,
        len: usize,
        f: &mut dyn FnMut(&[u8]),
    ) -> Result<(), VramError> {
        let data = self.data.lock().map_err(|_| VramError::Poisoned)?;
        let r = range(offset, len, data.len())?;
        f(&data[r]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_bounds_access_is_an_error() {
        let vram = VecVram::new(16);
        let mut buf = [0u8; 4];
        assert_eq!(
            vram.read(14, &mut buf),
            Err(VramError::OutOfBounds { offset: 14, len: 4 })
        );
        assert!(vram.write(u64::MAX, &[1]).is_err());
        assert!(vram.contains(12, 4));
        assert!(!vram.contains(13, 4));
    }

    #[test]
    fn with_slice_sees_written_bytes() {
        let vram = VecVram::new(16);
        vram.write(4, &[1, 2, 3]).unwrap();
        let mut seen = Vec::new();
        vram.with_slice(4, 3, &mut |bytes| seen.extend_from_slice(bytes))
            .unwrap();
        assert_eq!(seen, [1, 2, 3]);
    }
}
