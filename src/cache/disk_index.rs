//! Disk-backed random-access store for shared strings.
//!
//! Shared strings are only ever appended once, in table order, during the
//! workbook's single forward pass. This module persists them to an anonymous
//! temp file as length-prefixed UTF-8 records and keeps a second temp file of
//! sparse byte offsets - one per `2^k` records - so that string #i can later
//! be fetched with one seek plus a bounded linear skip instead of a full
//! scan.
//!
//! Record format: 4-byte little-endian length followed by the UTF-8 bytes.
//! A negative length is a shortcut for a single-character string: the
//! negated value is the code point and no payload follows. Both files are
//! anonymous (`tempfile::tempfile`), so they disappear when the index is
//! dropped.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};

use crate::error::{Result, SheetError};

/// Flush threshold for buffered record bytes.
const WRITE_BUF_LIMIT: usize = 64 * 1024;

/// Append-only value store plus sparse offset index over two temp files.
pub struct DiskBackedIndex {
    values: File,
    offsets: File,
    /// Pending record bytes not yet written to `values`
    value_buf: Vec<u8>,
    /// Pending offset entries not yet written to `offsets`
    offset_buf: Vec<u8>,
    /// Logical end of the value store, buffered bytes included
    value_end: u64,
    /// Bytes actually flushed to `values`
    values_flushed: u64,
    /// Bytes actually flushed to `offsets`
    offsets_flushed: u64,
    count: usize,
    /// log2 of records per offset entry
    block_shift: u32,
}

impl DiskBackedIndex {
    /// Create an empty index recording one offset every `block_size` records.
    ///
    /// `block_size` must be a power of two; it is normally the cache's page
    /// size so that a window reload is exactly one indexed block.
    pub fn new(block_size: usize) -> Result<Self> {
        debug_assert!(block_size.is_power_of_two());
        Ok(DiskBackedIndex {
            values: tempfile::tempfile()?,
            offsets: tempfile::tempfile()?,
            value_buf: Vec::with_capacity(WRITE_BUF_LIMIT),
            offset_buf: Vec::new(),
            value_end: 0,
            values_flushed: 0,
            offsets_flushed: 0,
            count: 0,
            block_shift: block_size.trailing_zeros(),
        })
    }

    /// Number of records pushed so far.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether no record has been pushed yet.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Append one string to the value store.
    ///
    /// Every `2^k`-th push also records the store's current byte offset in
    /// the side index. Writes are buffered; readers flush before seeking.
    pub fn push(&mut self, value: &str) -> Result<()> {
        let mask = (1usize << self.block_shift) - 1;
        if self.count & mask == 0 {
            self.offset_buf.extend_from_slice(&self.value_end.to_le_bytes());
        }

        let mut chars = value.chars();
        match (chars.next(), chars.next()) {
            // Single-character shortcut: negative length, no payload.
            // '\0' would collide with an empty record's zero length.
            (Some(c), None) if c != '\0' => {
                self.value_buf.extend_from_slice(&(-(c as i32)).to_le_bytes());
                self.value_end += 4;
            }
            _ => {
                let bytes = value.as_bytes();
                self.value_buf.extend_from_slice(&(bytes.len() as i32).to_le_bytes());
                self.value_buf.extend_from_slice(bytes);
                self.value_end += 4 + bytes.len() as u64;
            }
        }

        self.count += 1;
        if self.value_buf.len() >= WRITE_BUF_LIMIT {
            self.flush_values()?;
        }
        Ok(())
    }

    /// Fetch record `i`.
    ///
    /// Seeks to the offset of the block containing `i`, then linearly skips
    /// the at most `2^k - 1` records in front of it.
    pub fn get(&mut self, i: usize) -> Result<String> {
        if i >= self.count {
            return Err(SheetError::StringIndexOutOfRange {
                index: i,
                len: self.count,
            });
        }
        self.flush()?;

        let block = i >> self.block_shift;
        let offset = self.read_offset(block)?;
        self.values.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(&self.values);

        let skip = i - (block << self.block_shift);
        for _ in 0..skip {
            skip_record(&mut reader)?;
        }
        decode_record(&mut reader)
    }

    /// Fill `out` with `count` consecutive records starting at `first`,
    /// amortizing one seek over the whole page.
    ///
    /// `out` is cleared first. `count` is clamped to the records actually
    /// stored; requesting a page that starts past the end is a bounds error.
    pub fn read_page(&mut self, first: usize, count: usize, out: &mut Vec<String>) -> Result<()> {
        out.clear();
        if count == 0 {
            return Ok(());
        }
        if first >= self.count {
            return Err(SheetError::StringIndexOutOfRange {
                index: first,
                len: self.count,
            });
        }
        self.flush()?;

        let block = first >> self.block_shift;
        let offset = self.read_offset(block)?;
        self.values.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(&self.values);

        let skip = first - (block << self.block_shift);
        for _ in 0..skip {
            skip_record(&mut reader)?;
        }

        let count = count.min(self.count - first);
        out.reserve(count);
        for _ in 0..count {
            out.push(decode_record(&mut reader)?);
        }
        Ok(())
    }

    /// Flush buffered records and offsets to their files.
    pub fn flush(&mut self) -> Result<()> {
        self.flush_values()?;
        if !self.offset_buf.is_empty() {
            self.offsets.seek(SeekFrom::Start(self.offsets_flushed))?;
            self.offsets.write_all(&self.offset_buf)?;
            self.offsets_flushed += self.offset_buf.len() as u64;
            self.offset_buf.clear();
        }
        Ok(())
    }

    fn flush_values(&mut self) -> Result<()> {
        if !self.value_buf.is_empty() {
            self.values.seek(SeekFrom::Start(self.values_flushed))?;
            self.values.write_all(&self.value_buf)?;
            self.values_flushed += self.value_buf.len() as u64;
            self.value_buf.clear();
        }
        Ok(())
    }

    fn read_offset(&mut self, block: usize) -> Result<u64> {
        self.offsets.seek(SeekFrom::Start(block as u64 * 8))?;
        let mut buf = [0u8; 8];
        self.offsets.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }
}

fn read_len(reader: &mut impl Read) -> Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn skip_record(reader: &mut BufReader<&File>) -> Result<()> {
    let len = read_len(reader)?;
    if len > 0 {
        // Relative seek stays inside the BufReader's buffer when it can.
        reader.seek_relative(len as i64)?;
    }
    Ok(())
}

fn decode_record(reader: &mut impl Read) -> Result<String> {
    let len = read_len(reader)?;
    if len < 0 {
        let code = (-len) as u32;
        let c = char::from_u32(code).ok_or_else(|| {
            SheetError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid code point {code} in string record"),
            ))
        })?;
        return Ok(c.to_string());
    }
    let mut bytes = vec![0u8; len as usize];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| {
        SheetError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("corrupt UTF-8 in string record: {e}"),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_get_roundtrip() {
        let mut index = DiskBackedIndex::new(4).unwrap();
        let values = ["Alpha", "Beta", "", "Gamma", "Delta and friends"];
        for v in values {
            index.push(v).unwrap();
        }
        assert_eq!(index.len(), 5);
        for (i, v) in values.iter().enumerate() {
            assert_eq!(index.get(i).unwrap(), *v);
        }
        // Reverse order hits the same records.
        for (i, v) in values.iter().enumerate().rev() {
            assert_eq!(index.get(i).unwrap(), *v);
        }
    }

    #[test]
    fn test_single_char_sentinel() {
        let mut index = DiskBackedIndex::new(2).unwrap();
        index.push("x").unwrap();
        index.push("\u{4e2d}").unwrap();
        index.push("xy").unwrap();
        assert_eq!(index.get(0).unwrap(), "x");
        assert_eq!(index.get(1).unwrap(), "\u{4e2d}");
        assert_eq!(index.get(2).unwrap(), "xy");
    }

    #[test]
    fn test_out_of_range() {
        let mut index = DiskBackedIndex::new(4).unwrap();
        index.push("only").unwrap();
        match index.get(1) {
            Err(SheetError::StringIndexOutOfRange { index: 1, len: 1 }) => {}
            other => panic!("expected out-of-range, got {other:?}"),
        }
        assert!(index.get(0).is_ok());
    }

    #[test]
    fn test_interleaved_push_and_get() {
        // Reads flush pending writes; later pushes must still land after.
        let mut index = DiskBackedIndex::new(4).unwrap();
        for i in 0..6 {
            index.push(&format!("s{i}")).unwrap();
        }
        assert_eq!(index.get(5).unwrap(), "s5");
        for i in 6..20 {
            index.push(&format!("s{i}")).unwrap();
        }
        assert_eq!(index.get(3).unwrap(), "s3");
        assert_eq!(index.get(19).unwrap(), "s19");
        assert_eq!(index.get(6).unwrap(), "s6");
    }

    #[test]
    fn test_read_page() {
        let mut index = DiskBackedIndex::new(8).unwrap();
        for i in 0..30 {
            index.push(&format!("value-{i}")).unwrap();
        }
        let mut page = Vec::new();
        index.read_page(8, 8, &mut page).unwrap();
        assert_eq!(page.len(), 8);
        for (j, s) in page.iter().enumerate() {
            assert_eq!(s, &format!("value-{}", 8 + j));
        }
        // Final short page clamps to what exists.
        index.read_page(24, 8, &mut page).unwrap();
        assert_eq!(page.len(), 6);
        assert_eq!(page[5], "value-29");
        // Unaligned start works too.
        index.read_page(10, 3, &mut page).unwrap();
        assert_eq!(page, vec!["value-10", "value-11", "value-12"]);
    }

    #[test]
    fn test_read_page_past_end() {
        let mut index = DiskBackedIndex::new(4).unwrap();
        index.push("a").unwrap();
        let mut page = Vec::new();
        assert!(index.read_page(4, 4, &mut page).is_err());
    }

    #[test]
    fn test_large_table_random_access() {
        let mut index = DiskBackedIndex::new(512).unwrap();
        for i in 0..5000 {
            index.push(&format!("string number {i}")).unwrap();
        }
        // Probe a spread of blocks in a deliberately non-sequential order.
        for &i in &[4999, 0, 2500, 511, 512, 513, 1023, 4096, 1] {
            assert_eq!(index.get(i).unwrap(), format!("string number {i}"));
        }
    }
}
