use std::io::{Read, Write};

use crate::error::{Result, SnapshotError};

pub trait WriteLeExt: Write {
    fn write_u8(&mut self, v: u8) -> Result<()> {
        self.write_all(&[v])?;
        Ok(())
    }

    fn write_u32_le(&mut self, v: u32) -> Result<()> {
        self.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    fn write_i32_le(&mut self, v: i32) -> Result<()> {
        self.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    fn write_u64_le(&mut self, v: u64) -> Result<()> {
        self.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    /// Booleans take one byte.
    fn write_bool(&mut self, v: bool) -> Result<()> {
        self.write_u8(u8::from(v))
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_all(bytes)?;
        Ok(())
    }
}

impl<T: Write + ?Sized> WriteLeExt for T {}

pub trait ReadLeExt: Read {
    fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_u32_le(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_i32_le(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    fn read_u64_le(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn read_bool(&mut self) -> Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(SnapshotError::Corrupt("bool byte out of range")),
        }
    }

    /// Reads a `u32` and fails with [`SnapshotError::InvalidMagic`] unless it equals `expected`.
    fn expect_magic_u32(&mut self, expected: u32) -> Result<()> {
        let found = self.read_u32_le()?;
        if found != expected {
            return Err(SnapshotError::InvalidMagic { expected, found });
        }
        Ok(())
    }

    fn read_exact_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| SnapshotError::OutOfMemory { len })?;
        buf.resize(len, 0);
        self.read_exact(&mut buf)?;
        Ok(buf)
    }
}

impl<T: Read + ?Sized> ReadLeExt for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn read_exact_vec_allocation_failure_returns_error() {
        let mut cursor = Cursor::new(Vec::new());
        let err = cursor.read_exact_vec(usize::MAX).unwrap_err();
        assert!(matches!(err, SnapshotError::OutOfMemory { .. }));
    }

    #[test]
    fn truncated_stream_reports_eof() {
        let mut cursor = Cursor::new(vec![1u8, 2]);
        let err = cursor.read_u32_le().unwrap_err();
        assert!(err.is_eof());
    }

    #[test]
    fn magic_mismatch_reports_both_values() {
        let mut cursor = Cursor::new(0x1234_5678u32.to_le_bytes().to_vec());
        let err = cursor.expect_magic_u32(0x89ab_cdef).unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::InvalidMagic {
                expected: 0x89ab_cdef,
                found: 0x1234_5678
            }
        ));
    }

    #[test]
    fn bool_rejects_garbage() {
        let mut out = Vec::new();
        out.write_bool(true).unwrap();
        out.write_u8(7).unwrap();
        let mut cursor = Cursor::new(out);
        assert!(cursor.read_bool().unwrap());
        assert!(matches!(
            cursor.read_bool().unwrap_err(),
            SnapshotError::Corrupt(_)
        ));
    }

    #[test]
    fn signed_fields_keep_their_sign() {
        let mut out = Vec::new();
        out.write_i32_le(-5).unwrap();
        out.write_u64_le(u64::MAX).unwrap();
        let mut cursor = Cursor::new(out);
        assert_eq!(cursor.read_i32_le().unwrap(), -5);
        assert_eq!(cursor.read_u64_le().unwrap(), u64::MAX);
    }
}
