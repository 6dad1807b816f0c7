//! Byte-level (de)serialization helpers for the ledger wire format

use crate::errors::CovenantError;

/// Append a compact-size length prefix
pub fn write_compact_size(out: &mut Vec<u8>, size: u64) {
    if size < 0xfd {
        out.push(size as u8);
    } else if size <= 0xffff {
        out.push(0xfd);
        out.extend_from_slice(&(size as u16).to_le_bytes());
    } else if size <= 0xffff_ffff {
        out.push(0xfe);
        out.extend_from_slice(&(size as u32).to_le_bytes());
    } else {
        out.push(0xff);
        out.extend_from_slice(&size.to_le_bytes());
    }
}

/// Append a compact-size prefixed byte slice
pub fn write_var_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_compact_size(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

/// The number of bytes a compact-size prefix of `size` takes
pub fn compact_size_len(size: u64) -> usize {
    match size {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// A cursor over a byte slice that fails on truncated input
#[derive(Clone, Debug)]
pub struct ByteReader<'a> {
    /// The underlying bytes
    data: &'a [u8],
    /// The read offset
    idx: usize,
}

impl<'a> ByteReader<'a> {
    /// Start reading from the beginning of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, idx: 0 }
    }

    /// The number of bytes left
    pub fn remaining(&self) -> usize {
        self.data.len() - self.idx
    }

    /// Read `n` bytes
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], CovenantError> {
        if self.remaining() < n {
            return Err(CovenantError::serialization(format!(
                "expected {n} bytes at offset {}, only {} left",
                self.idx,
                self.remaining()
            )));
        }
        let slice = &self.data[self.idx..self.idx + n];
        self.idx += n;
        Ok(slice)
    }

    /// Read a fixed size array
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CovenantError> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.read_bytes(N)?);
        Ok(array)
    }

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8, CovenantError> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Read a little endian u32
    pub fn read_u32(&mut self) -> Result<u32, CovenantError> {
        self.read_array().map(u32::from_le_bytes)
    }

    /// Read a little endian u64
    pub fn read_u64(&mut self) -> Result<u64, CovenantError> {
        self.read_array().map(u64::from_le_bytes)
    }

    /// Read a compact-size integer
    pub fn read_compact_size(&mut self) -> Result<u64, CovenantError> {
        Ok(match self.read_u8()? {
            0xfd => u16::from_le_bytes(self.read_array()?) as u64,
            0xfe => self.read_u32()? as u64,
            0xff => self.read_u64()?,
            small => small as u64,
        })
    }

    /// Read a compact-size prefixed byte slice
    pub fn read_var_bytes(&mut self) -> Result<&'a [u8], CovenantError> {
        let len = self.read_compact_size()?;
        let len = usize::try_from(len)
            .map_err(|_| CovenantError::serialization(format!("length {len} too large")))?;
        self.read_bytes(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_size() {
        for size in [0u64, 0xfc, 0xfd, 0xffff, 0x10000, 0xffff_ffff, 0x1_0000_0000] {
            let mut out = Vec::new();
            write_compact_size(&mut out, size);
            assert_eq!(out.len(), compact_size_len(size));
            assert_eq!(ByteReader::new(&out).read_compact_size().unwrap(), size);
        }
    }

    #[test]
    fn test_truncated_input() {
        let mut reader = ByteReader::new(&[0x05, 1, 2]);
        assert!(reader.read_var_bytes().is_err());

        let mut reader = ByteReader::new(&[1, 2, 3]);
        assert!(reader.read_u32().is_err());
    }
}
