use std::io::{Cursor, Error, ErrorKind, Read, Result};

/// Big endian reader over an owned box payload.
#[derive(Clone, Default)]
pub struct Reader {
    inner: Cursor<Vec<u8>>,
}

impl Reader {
    pub fn new_big_endian(data: impl Into<Vec<u8>>) -> Self {
        Self {
            inner: Cursor::new(data.into()),
        }
    }

    pub fn has_more_data(&self) -> bool {
        self.inner.position() < self.get_length()
    }

    pub fn get_length(&self) -> u64 {
        self.inner.get_ref().len() as u64
    }

    pub fn get_position(&self) -> u64 {
        self.inner.position()
    }

    pub fn remaining(&self) -> u64 {
        self.get_length().saturating_sub(self.get_position())
    }

    /// Move the read head to an absolute position inside the payload.
    pub fn seek(&mut self, position: u64) -> Result<()> {
        if position > self.get_length() {
            return Err(Error::new(
                ErrorKind::UnexpectedEof,
                "Reader seeks out of payload bounds.",
            ));
        }

        self.inner.set_position(position);
        Ok(())
    }

    pub fn skip(&mut self, bytes: u64) -> Result<()> {
        self.seek(self.get_position() + bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0; 1];
        self.inner.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0; 2];
        self.inner.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    pub fn read_u24(&mut self) -> Result<u32> {
        let mut buf = [0; 4];
        self.inner.read_exact(&mut buf[1..])?;
        Ok(u32::from_be_bytes(buf))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0; 4];
        self.inner.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let mut buf = [0; 4];
        self.inner.read_exact(&mut buf)?;
        Ok(i32::from_be_bytes(buf))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0; 8];
        self.inner.read_exact(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    pub fn read_bytes_u8(&mut self, bytes: usize) -> Result<Vec<u8>> {
        if bytes as u64 > self.remaining() {
            return Err(Error::new(
                ErrorKind::UnexpectedEof,
                "Reader reads out of payload bounds.",
            ));
        }

        let mut buf = vec![0; bytes];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0; N];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Read everything left in the payload.
    pub fn read_to_end(&mut self) -> Result<Vec<u8>> {
        self.read_bytes_u8(self.remaining() as usize)
    }
}
