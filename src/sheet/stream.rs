//! Row-boundary stream over a worksheet part.
//!
//! Delivers successive rows from the serialized `sheetData` without loading
//! the part: fixed-size chunks are read into one growable buffer and scanned
//! for row element boundaries. A row split across reads is handled by
//! doubling the buffer and compacting the unconsumed tail, so a single pass
//! is bounded only by the largest row in the file.
//!
//! The returned [`Row`] is the stream's own reusable buffer: it is valid
//! only until the next `next_row()` call.

use std::io::{Read, Seek, SeekFrom};

use memchr::memmem;

use crate::error::{Result, SheetError};
use crate::sheet::cell::{Dimension, Row};
use crate::sheet::scanner::RowTokenizer;

/// Bytes pulled from the source per read.
const CHUNK_SIZE: usize = 8 * 1024;

/// Buffer growth gives up past this point; a sane row never gets close.
const MAX_ROW_BYTES: usize = 256 * 1024 * 1024;

/// How much of the part's tail to inspect when recovering the used range.
const TAIL_SCAN_BYTES: u64 = 64 * 1024;

/// Lifecycle of a [`RowStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Constructed, header not yet parsed
    Unopened,
    /// Header parsed, no row delivered yet
    Loaded,
    /// Rows are being delivered
    Streaming,
    /// The sheet has no `sheetData` content; terminal with zero rows
    EmptySheet,
    /// Explicitly closed; only `reset()` leaves this state
    Closed,
}

/// Forward-only row iterator over one worksheet part.
pub struct RowStream<RS: Read + Seek, T: RowTokenizer> {
    source: RS,
    tokenizer: T,
    /// Growable read window; `window_start..window_len` holds unconsumed bytes
    buf: Vec<u8>,
    window_start: usize,
    window_len: usize,
    eof: bool,
    /// No `<row>` can follow; set when `</sheetData>` is seen
    drained: bool,
    /// Byte position just past the opening `<sheetData>` tag
    mark: u64,
    state: StreamState,
    row: Row,
    rows_read: u64,
    /// 1-based fallback numbering for rows without `r=`
    next_row_num: u32,
    dimension_hint: Option<Dimension>,
    sheet_first_col: u32,
}

impl<RS: Read + Seek, T: RowTokenizer> RowStream<RS, T> {
    /// Open a worksheet part: parse the header up to `<sheetData>`, record
    /// the replay mark and capture the `<dimension>` hint if present.
    ///
    /// The source must be positioned at the start of the part.
    pub fn open(source: RS, tokenizer: T) -> Result<Self> {
        let mut stream = RowStream {
            source,
            tokenizer,
            buf: vec![0; CHUNK_SIZE],
            window_start: 0,
            window_len: 0,
            eof: false,
            drained: false,
            mark: 0,
            state: StreamState::Unopened,
            row: Row::default(),
            rows_read: 0,
            next_row_num: 1,
            dimension_hint: None,
            sheet_first_col: 0,
        };
        stream.load_header()?;
        Ok(stream)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Rows delivered since the last open or reset.
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Advance to the next row.
    ///
    /// The returned reference aliases the stream's reused row buffer and is
    /// invalidated by the next call; copy values out to keep them.
    pub fn next_row(&mut self) -> Result<Option<&Row>> {
        match self.state {
            StreamState::Unopened => {
                return Err(SheetError::InvalidState("stream was never opened"));
            }
            StreamState::Closed => {
                return Err(SheetError::InvalidState("stream is closed, call reset()"));
            }
            StreamState::EmptySheet => return Ok(None),
            StreamState::Loaded => self.state = StreamState::Streaming,
            StreamState::Streaming => {}
        }

        let span = match self.find_row_span()? {
            Some(span) => span,
            None => return Ok(None),
        };

        let raw_start = self.window_start;
        self.window_start += span;
        // The span borrows the buffer the row does not touch, but the
        // borrow checker cannot see that; split via raw index bookkeeping.
        let (raw, row) = (&self.buf[raw_start..raw_start + span], &mut self.row);
        self.tokenizer
            .tokenize(raw, self.next_row_num, self.sheet_first_col, row)?;

        self.rows_read += 1;
        self.next_row_num = self.row.row_num + 1;
        Ok(Some(&self.row))
    }

    /// The worksheet's used range.
    ///
    /// Prefers the declared `<dimension>` hint. Without one, seeks to the
    /// end of the part and scans backward for the last `<row>` to derive
    /// the range without a forward pass; if that also fails the size is
    /// unknown (`None`), not an error.
    pub fn dimension(&mut self) -> Result<Option<Dimension>> {
        if let Some(dim) = self.dimension_hint {
            return Ok(Some(dim));
        }
        let saved = self.source.stream_position()?;
        let result = self.tail_scan_dimension();
        self.source.seek(SeekFrom::Start(saved))?;
        let dim = result?;
        if dim.is_none() {
            log::warn!("worksheet has no dimension hint and tail scan failed, size unknown");
        }
        Ok(dim)
    }

    /// Rewind to the remembered mark right after `<sheetData>` so the sheet
    /// can be iterated again. Valid from `Streaming`, `Loaded` and
    /// `Closed`; an `EmptySheet` stays empty.
    pub fn reset(&mut self) -> Result<()> {
        if self.state == StreamState::Unopened {
            return Err(SheetError::InvalidState("stream was never opened"));
        }
        if self.state == StreamState::EmptySheet {
            return Ok(());
        }
        self.source.seek(SeekFrom::Start(self.mark))?;
        if self.buf.is_empty() {
            self.buf = vec![0; CHUNK_SIZE];
        }
        self.window_start = 0;
        self.window_len = 0;
        self.eof = false;
        self.drained = false;
        self.rows_read = 0;
        self.next_row_num = 1;
        self.state = StreamState::Streaming;
        Ok(())
    }

    /// Release the buffers. Terminal until `reset()`.
    pub fn close(&mut self) {
        self.buf = Vec::new();
        self.window_start = 0;
        self.window_len = 0;
        self.row = Row::default();
        self.state = StreamState::Closed;
    }

    /// Parse up to and through the opening `<sheetData>` tag.
    fn load_header(&mut self) -> Result<()> {
        // The whole header stays buffered until the mark is known, so
        // hint attributes never straddle a read boundary.
        let (sheet_data_pos, tag_end, self_closed) = loop {
            let window = &self.buf[self.window_start..self.window_len];
            if let Some(pos) = find_element(window, b"<sheetData") {
                if let Some(rel_gt) = memchr::memchr(b'>', &window[pos..]) {
                    break (pos, pos + rel_gt, window[pos + rel_gt - 1] == b'/');
                }
            }
            if self.eof {
                // No sheetData at all: a sheet with zero rows.
                self.parse_dimension_hint(self.window_len);
                self.mark = self.window_len as u64;
                self.state = StreamState::EmptySheet;
                return Ok(());
            }
            self.refill()?;
        };

        self.parse_dimension_hint(sheet_data_pos);
        self.mark = (tag_end + 1) as u64;
        self.window_start = tag_end + 1;
        self.state = if self_closed {
            StreamState::EmptySheet
        } else {
            StreamState::Loaded
        };
        Ok(())
    }

    /// Capture `<dimension ref="A1:C10"/>` from the buffered header.
    fn parse_dimension_hint(&mut self, header_end: usize) {
        let header = &self.buf[..header_end];
        let Some(pos) = find_element(header, b"<dimension") else {
            return;
        };
        let hint = find_quoted(&header[pos..], b" ref=\"")
            .and_then(|v| std::str::from_utf8(v).ok())
            .and_then(|v| Dimension::parse(v).ok());
        match hint {
            Some(dim) => {
                self.dimension_hint = Some(dim);
                self.sheet_first_col = dim.first_col;
            }
            None => {
                log::warn!("unparseable dimension hint, will fall back to tail scan");
            }
        }
    }

    /// Locate the next complete row element in the window, refilling and
    /// growing as needed. Returns its length from `window_start`, or `None`
    /// once `</sheetData>` or the end of input is reached.
    fn find_row_span(&mut self) -> Result<Option<usize>> {
        loop {
            if self.drained {
                return Ok(None);
            }
            let window = &self.buf[self.window_start..self.window_len];
            let row_pos = find_element(window, b"<row");
            let end_pos = memmem::find(window, b"</sheetData>");

            if let (Some(row), Some(end)) = (row_pos, end_pos) {
                if end < row {
                    self.drained = true;
                    return Ok(None);
                }
            }

            if let Some(pos) = row_pos {
                if let Some(span_end) = row_element_end(&window[pos..]) {
                    // Skip anything between rows (whitespace, comments).
                    self.window_start += pos;
                    return Ok(Some(span_end));
                }
            } else if let Some(end) = end_pos {
                self.window_start += end;
                self.drained = true;
                return Ok(None);
            }

            if self.eof {
                if row_pos.is_some() {
                    return Err(SheetError::MalformedRow(format!(
                        "row {} is truncated at end of input",
                        self.next_row_num
                    )));
                }
                self.drained = true;
                return Ok(None);
            }
            self.refill()?;
        }
    }

    /// Read another chunk, compacting the consumed prefix and doubling the
    /// buffer when a row element outgrows it.
    fn refill(&mut self) -> Result<()> {
        if self.window_start > 0 {
            self.buf.copy_within(self.window_start..self.window_len, 0);
            self.window_len -= self.window_start;
            self.window_start = 0;
        }
        if self.window_len == self.buf.len() {
            let grown = (self.buf.len() * 2).max(CHUNK_SIZE);
            if grown > MAX_ROW_BYTES {
                return Err(SheetError::RowNeverCloses {
                    row: self.next_row_num,
                    limit: self.buf.len(),
                });
            }
            self.buf.resize(grown, 0);
        }
        let n = self.source.read(&mut self.buf[self.window_len..])?;
        if n == 0 {
            self.eof = true;
        }
        self.window_len += n;
        Ok(())
    }

    /// Derive the used range from the last `<row>` in the part.
    fn tail_scan_dimension(&mut self) -> Result<Option<Dimension>> {
        let end = self.source.seek(SeekFrom::End(0))?;
        let scan_len = end.min(TAIL_SCAN_BYTES);
        self.source.seek(SeekFrom::Start(end - scan_len))?;
        let mut tail = vec![0u8; scan_len as usize];
        self.source.read_exact(&mut tail)?;

        let Some(pos) = rfind_element(&tail, b"<row") else {
            return Ok(None);
        };
        let attrs_end = memchr::memchr(b'>', &tail[pos..]).map_or(tail.len(), |g| pos + g);
        let attrs = &tail[pos..attrs_end];

        let Some(last_row) = find_quoted(attrs, b" r=\"")
            .and_then(|v| atoi_simd::parse::<u32>(v).ok())
            .filter(|&r| r >= 1)
        else {
            return Ok(None);
        };
        // spans gives the width; without it fall back to a single column.
        let (first_col, last_col) = find_quoted(attrs, b" spans=\"")
            .and_then(parse_spans_bounds)
            .unwrap_or((0, 0));

        Ok(Some(Dimension {
            first_row: 0,
            last_row: last_row - 1,
            first_col,
            last_col,
        }))
    }
}

/// Find `name` as an element opener: the byte after it must terminate the
/// tag name, so `<row` does not match `<rowBreaks`.
fn find_element(haystack: &[u8], name: &[u8]) -> Option<usize> {
    let mut from = 0;
    while let Some(rel) = memmem::find(&haystack[from..], name) {
        let pos = from + rel;
        match haystack.get(pos + name.len()) {
            Some(b' ') | Some(b'>') | Some(b'/') | Some(b'\t') | Some(b'\r') | Some(b'\n') => {
                return Some(pos);
            }
            None => return Some(pos), // boundary byte not read yet; caller refills
            _ => from = pos + name.len(),
        }
    }
    None
}

/// Like [`find_element`] but for the last occurrence.
fn rfind_element(haystack: &[u8], name: &[u8]) -> Option<usize> {
    let mut upto = haystack.len();
    while let Some(pos) = memmem::rfind(&haystack[..upto], name) {
        match haystack.get(pos + name.len()) {
            Some(b' ') | Some(b'>') | Some(b'/') => return Some(pos),
            _ => upto = pos,
        }
    }
    None
}

/// Length of the row element starting at `window[0]`, if it is complete:
/// through `/>` for a self-closed row, through `</row>` otherwise.
fn row_element_end(window: &[u8]) -> Option<usize> {
    let gt = memchr::memchr(b'>', window)?;
    if window[gt - 1] == b'/' {
        return Some(gt + 1);
    }
    memmem::find(&window[gt..], b"</row>").map(|rel| gt + rel + 6)
}

fn find_quoted<'a>(attrs: &'a [u8], pattern: &[u8]) -> Option<&'a [u8]> {
    let start = memmem::find(attrs, pattern)? + pattern.len();
    let end = memchr::memchr(b'"', &attrs[start..])?;
    Some(&attrs[start..start + end])
}

/// First and last 1-based bounds of a `spans` attribute, 0-based out.
fn parse_spans_bounds(value: &[u8]) -> Option<(u32, u32)> {
    let mut numbers = Vec::new();
    let mut current: Option<u32> = None;
    for &b in value {
        if b.is_ascii_digit() {
            current = Some(current.unwrap_or(0) * 10 + (b - b'0') as u32);
        } else if let Some(n) = current.take() {
            numbers.push(n);
        }
    }
    if let Some(n) = current {
        numbers.push(n);
    }
    match (numbers.first(), numbers.last()) {
        (Some(&a), Some(&b)) if a >= 1 && b >= a => Some((a - 1, b - 1)),
        _ => None,
    }
}
