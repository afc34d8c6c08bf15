//! Sequential little-endian reader over advertisement payloads.

use super::error::DecodeError;

/// Cursor over a borrowed byte buffer. Reads past the end fail instead of
/// panicking since payloads come straight off the air.
pub struct BinaryReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> BinaryReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    pub fn position(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_le_bytes(self.take()?))
    }

    /// Advance by `count` bytes, negative counts are a no-op.
    pub fn skip(&mut self, count: isize) -> Result<(), DecodeError> {
        let count = count.max(0) as usize;
        self.check(count)?;
        self.offset += count;
        Ok(())
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        self.check(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.offset..self.offset + N]);
        self.offset += N;
        Ok(out)
    }

    fn check(&self, requested: usize) -> Result<(), DecodeError> {
        if requested > self.remaining() {
            return Err(DecodeError::OutOfRange {
                offset: self.offset,
                requested,
                len: self.bytes.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian() {
        let bytes = [0x01, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12];
        let mut reader = BinaryReader::new(&bytes);
        assert_eq!(reader.read_u8().unwrap(), 0x01);
        assert_eq!(reader.read_u16().unwrap(), 0x1234);
        assert_eq!(reader.read_u32().unwrap(), 0x12345678);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn reads_float() {
        let bytes = 1.5f32.to_le_bytes();
        let mut reader = BinaryReader::new(&bytes);
        assert_eq!(reader.read_f32().unwrap(), 1.5);
    }

    #[test]
    fn skip_ignores_negative_counts() {
        let bytes = [1, 2, 3];
        let mut reader = BinaryReader::new(&bytes);
        reader.skip(-4).unwrap();
        assert_eq!(reader.position(), 0);
        reader.skip(2).unwrap();
        assert_eq!(reader.read_u8().unwrap(), 3);
    }

    #[test]
    fn out_of_range_read_fails_without_advancing() {
        let bytes = [1, 2, 3];
        let mut reader = BinaryReader::new(&bytes);
        reader.read_u8().unwrap();
        assert_eq!(
            reader.read_u32(),
            Err(DecodeError::OutOfRange {
                offset: 1,
                requested: 4,
                len: 3
            })
        );
        assert_eq!(reader.position(), 1);
        assert!(reader.skip(3).is_err());
        assert_eq!(reader.read_u16().unwrap(), 0x0302);
    }
}
