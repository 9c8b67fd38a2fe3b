//! Byte-level cursor over a binary source

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use std::io::{self, Read};

/// Byte order of a multi-byte field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// Forward-only reader that keeps track of how many bytes it has consumed
pub struct ByteCursor<R> {
    reader: R,
    position: u64,
}

macro_rules! read_endian {
    ($name:ident, $ty:ty, $method:ident, $size:expr) => {
        pub fn $name(&mut self, endian: Endian) -> io::Result<$ty> {
            let value = match endian {
                Endian::Little => self.reader.$method::<LittleEndian>()?,
                Endian::Big => self.reader.$method::<BigEndian>()?,
            };
            self.position += $size;
            Ok(value)
        }
    };
}

impl<R: Read> ByteCursor<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            position: 0,
        }
    }

    /// Number of bytes consumed so far
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn read_u8(&mut self) -> io::Result<u8> {
        let value = self.reader.read_u8()?;
        self.position += 1;
        Ok(value)
    }

    pub fn read_i8(&mut self) -> io::Result<i8> {
        let value = self.reader.read_i8()?;
        self.position += 1;
        Ok(value)
    }

    read_endian!(read_u16, u16, read_u16, 2);
    read_endian!(read_i16, i16, read_i16, 2);
    read_endian!(read_u32, u32, read_u32, 4);
    read_endian!(read_i32, i32, read_i32, 4);
    read_endian!(read_u64, u64, read_u64, 8);
    read_endian!(read_i64, i64, read_i64, 8);
    read_endian!(read_f32, f32, read_f32, 4);
    read_endian!(read_f64, f64, read_f64, 8);

    /// Read exactly `N` bytes
    pub fn read_array<const N: usize>(&mut self) -> io::Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.reader.read_exact(&mut buf)?;
        self.position += N as u64;
        Ok(buf)
    }

    /// Read exactly `len` bytes
    pub fn read_bytes(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf)?;
        self.position += len as u64;
        Ok(buf)
    }

    /// Discard exactly `len` bytes
    pub fn skip(&mut self, len: u64) -> io::Result<()> {
        let copied = io::copy(&mut (&mut self.reader).take(len), &mut io::sink())?;
        self.position += copied;
        if copied < len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("wanted to skip {} bytes, only {} available", len, copied),
            ));
        }
        Ok(())
    }
}
