use std::collections::HashMap;
use std::io::{self, Write};

use byteorder::{LittleEndian, WriteBytesExt};

/// Null-terminated strings addressed by byte offset. Each distinct string
/// is stored once.
#[derive(Debug, Default)]
pub struct StringPool {
    bytes: Vec<u8>,
    offset_by_string: HashMap<String, u32>,
}

impl StringPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, string: &str) -> u32 {
        if let Some(offset) = self.offset_by_string.get(string) {
            return *offset;
        }
        let offset = self.bytes.len() as u32;
        self.bytes.extend_from_slice(string.as_bytes());
        self.bytes.push(0);
        self.offset_by_string.insert(string.to_string(), offset);
        offset
    }

    /// Total size in bytes, terminators included.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Reads the string starting at `offset` in a pool written by [`StringPool`].
pub fn read_pooled(pool: &[u8], offset: u32) -> Option<&str> {
    let tail = pool.get(offset as usize..)?;
    let end = tail.iter().position(|b| *b == 0)?;
    std::str::from_utf8(&tail[..end]).ok()
}

/// Writes `strings` as a fixed-width table: a u32 slot width (longest
/// string plus terminator) followed by one zero-padded slot per string.
/// Returns the number of bytes written.
pub fn write_string_table<W: Write, S: AsRef<str>>(out: &mut W, strings: &[S]) -> io::Result<u64> {
    let width = strings
        .iter()
        .map(|s| s.as_ref().len())
        .max()
        .unwrap_or(0)
        + 1;
    out.write_u32::<LittleEndian>(width as u32)?;
    let mut slot = vec![0u8; width];
    for string in strings {
        let bytes = string.as_ref().as_bytes();
        slot.fill(0);
        slot[..bytes.len()].copy_from_slice(bytes);
        out.write_all(&slot)?;
    }
    Ok(4 + (width * strings.len()) as u64)
}

/// Fixed-width string table inside a mapped file.
#[derive(Debug, Clone, Copy)]
pub struct StringTable<'a> {
    width: usize,
    slots: &'a [u8],
}

impl<'a> StringTable<'a> {
    /// `data` starts at the table's width field and holds at least `n`
    /// slots.
    pub fn parse(data: &'a [u8], n: usize) -> Option<StringTable<'a>> {
        let width = u32::from_le_bytes(data.get(..4)?.try_into().ok()?) as usize;
        let slots = data.get(4..4 + width.checked_mul(n)?)?;
        Some(StringTable { width, slots })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn len(&self) -> usize {
        if self.width == 0 {
            0
        } else {
            self.slots.len() / self.width
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, i: usize) -> Option<&'a str> {
        let slot = self.slots.get(i * self.width..(i + 1) * self.width)?;
        let end = slot.iter().position(|b| *b == 0).unwrap_or(slot.len());
        std::str::from_utf8(&slot[..end]).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_deduplicates_strings() {
        let mut pool = StringPool::new();
        assert_eq!(pool.put(""), 0);
        assert_eq!(pool.put("Centraal"), 1);
        assert_eq!(pool.put("Zuid"), 10);
        assert_eq!(pool.put("Centraal"), 1);
        assert_eq!(pool.len(), 15);
        assert_eq!(read_pooled(pool.as_bytes(), 10), Some("Zuid"));
        assert_eq!(read_pooled(pool.as_bytes(), 0), Some(""));
        assert_eq!(read_pooled(pool.as_bytes(), 99), None);
    }

    #[test]
    fn string_table_uses_longest_entry_for_width() {
        let mut out = vec![];
        let written = write_string_table(&mut out, &["ab", "abcd", ""]).unwrap();
        assert_eq!(written, 4 + 3 * 5);
        assert_eq!(out.len() as u64, written);
        assert_eq!(&out[..4], &5u32.to_le_bytes());
        assert_eq!(&out[4..9], b"ab\0\0\0");

        let table = StringTable::parse(&out, 3).unwrap();
        assert_eq!(table.width(), 5);
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(1), Some("abcd"));
        assert_eq!(table.get(2), Some(""));
        assert_eq!(table.get(3), None);
    }

    #[test]
    fn empty_string_table_has_width_one() {
        let mut out = vec![];
        let strings: [&str; 0] = [];
        write_string_table(&mut out, &strings).unwrap();
        assert_eq!(out, 1u32.to_le_bytes());
        assert!(StringTable::parse(&out, 0).unwrap().is_empty());
    }
}
