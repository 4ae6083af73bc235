//! The binary record format §4.8/§4.10 describe: fixed magic numbers, u32/u64
//! little-endian integers, and length-prefixed UTF-8 strings. This is the
//! logical payload that gets sealed/opened through [`crate::crypto`].

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

pub const MAGIC_FILE_START: u32 = 0xFEFE_FEFE;
pub const MAGIC_ENTRY_START: u32 = 0xFFFF_FFFF;
pub const MAGIC_ENTRY_END: u32 = 0xEEEE_EEEE;
pub const MAGIC_FILE_END: u32 = 0xEFEF_EFEF;

pub const CURRENT_VERSION: u32 = 5000;
pub const MIN_SUPPORTED_VERSION: u32 = 4999;

pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Writer { buf: Vec::new() }
    }

    pub fn write_u32(&mut self, v: u32) -> io::Result<()> {
        self.buf.write_u32::<LittleEndian>(v)
    }

    pub fn write_u64(&mut self, v: u64) -> io::Result<()> {
        self.buf.write_u64::<LittleEndian>(v)
    }

    pub fn write_string(&mut self, s: &str) -> io::Result<()> {
        let bytes = s.as_bytes();
        self.buf.write_u32::<LittleEndian>(bytes.len() as u32)?;
        self.buf.write_all(bytes)
    }

    /// Writes the `(null, null)`-terminated pair encoding used for
    /// optional strings (tag values, and the tag-list terminator itself).
    pub fn write_optional_string(&mut self, s: Option<&str>) -> io::Result<()> {
        match s {
            Some(s) => {
                self.write_u32(1)?;
                self.write_string(s)
            }
            None => self.write_u32(0),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Reader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Reader {
            cursor: Cursor::new(bytes),
        }
    }

    pub fn read_u32(&mut self) -> io::Result<u32> {
        self.cursor.read_u32::<LittleEndian>()
    }

    pub fn read_u64(&mut self) -> io::Result<u64> {
        self.cursor.read_u64::<LittleEndian>()
    }

    pub fn read_string(&mut self) -> io::Result<String> {
        let len = self.cursor.read_u32::<LittleEndian>()? as usize;
        let mut bytes = vec![0u8; len];
        self.cursor.read_exact(&mut bytes)?;
        String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn read_optional_string(&mut self) -> io::Result<Option<String>> {
        match self.read_u32()? {
            0 => Ok(None),
            _ => Ok(Some(self.read_string()?)),
        }
    }

    pub fn at_eof(&self) -> bool {
        self.cursor.position() >= self.cursor.get_ref().len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_primitives() {
        let mut w = Writer::new();
        w.write_u32(MAGIC_FILE_START).unwrap();
        w.write_u64(12345).unwrap();
        w.write_string("hello").unwrap();
        w.write_optional_string(None).unwrap();
        w.write_optional_string(Some("world")).unwrap();
        let bytes = w.into_bytes();

        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_u32().unwrap(), MAGIC_FILE_START);
        assert_eq!(r.read_u64().unwrap(), 12345);
        assert_eq!(r.read_string().unwrap(), "hello");
        assert_eq!(r.read_optional_string().unwrap(), None);
        assert_eq!(r.read_optional_string().unwrap(), Some("world".to_string()));
        assert!(r.at_eof());
    }
}
