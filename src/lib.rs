//! Longan - bounded-memory streaming reader core for Office Open XML spreadsheets
//!
//! This library reads large `.xlsx` worksheet and shared-string parts as a
//! forward-only stream instead of materializing the whole workbook. It is the
//! reading core only: container (ZIP) handling, styles, metadata and all
//! writer-side functionality belong to the consuming layer.
//!
//! # Features
//!
//! - **Tiered shared-string cache**: two in-memory page windows, a bounded
//!   hot LRU set and a disk-backed random-access index keep `get(index)`
//!   working under a fixed memory budget even when the string table alone
//!   exceeds it
//! - **Zero-copy row tokenizer**: one `<row>` element is scanned positionally
//!   into a reusable cell buffer, no DOM, no per-row allocations once warm
//! - **Row-boundary stream**: chunked reads with automatic buffer regrowth
//!   when a row straddles a read, used-range recovery, `reset()` for
//!   re-iteration
//! - **Merge bitmap**: O(1) point-in-merged-range queries
//!
//! # Example - streaming a worksheet part
//!
//! ```no_run
//! use std::fs::File;
//! use longan::sheet::{PositionalTokenizer, RowStream};
//!
//! # fn main() -> longan::Result<()> {
//! // `sheet1.xml` as extracted from the package by the container layer
//! let part = File::open("sheet1.xml")?;
//! let mut stream = RowStream::open(part, PositionalTokenizer::new())?;
//!
//! while let Some(row) = stream.next_row()? {
//!     // `row` is a reused buffer: copy values out before advancing
//!     println!("row {} has {} cells", row.row_num, row.cells.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Example - shared strings under a memory budget
//!
//! ```no_run
//! use std::fs::File;
//! use longan::cache::{CacheConfig, SharedStringCache};
//!
//! # fn main() -> longan::Result<()> {
//! let part = File::open("sharedStrings.xml")?;
//! let mut strings = SharedStringCache::open(part, CacheConfig::default())?;
//! let text = strings.get(42)?.to_string();
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod error;
pub mod sheet;

pub use error::{Result, SheetError};
