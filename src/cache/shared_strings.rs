//! Tiered shared-string cache.
//!
//! Worksheet cells reference their text by index into a workbook-wide
//! de-duplicated table that may itself exceed the memory budget. This cache
//! answers `get(index)` for the whole table while keeping only:
//!
//! - a **forward window**: the page around the most recent miss (sequential
//!   access follows the worksheet's own row-major order, so this is the
//!   expected hit tier),
//! - a **backward window**: the previous forward window, retained on
//!   rotation,
//! - a **hot set**: a bounded LRU of individually promoted strings,
//! - the **disk index**: every string ever scanned, append-only with sparse
//!   offsets for page reloads.
//!
//! The source XML is pulled lazily: a page is scanned from the table part
//! the first time it is needed and from the disk index afterwards.
//!
//! Promotion is approximate LRU-2 *by page*: a per-page bitmap records
//! window misses, and a string is pushed into the hot set only when its page
//! misses for the second time. Tracking pages instead of strings keeps the
//! bookkeeping at O(page count) for tables with hundreds of thousands of
//! entries, at the cost of a slight promotion delay.

use std::io::Read;

use fixedbitset::FixedBitSet;

use crate::cache::disk_index::DiskBackedIndex;
use crate::cache::lru::LruCache;
use crate::cache::sst::SstScanner;
use crate::error::{Result, SheetError};

/// Tuning knobs for the cache tiers.
///
/// The defaults (512-string pages, 64-entry hot set) are empirical, not
/// contractual: correctness is independent of them, only the I/O pattern
/// changes. `page_size` must be a power of two and is rounded up if not.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Strings per page, the unit of one sequential (re)load
    pub page_size: usize,
    /// Capacity of the hot LRU set
    pub hot_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            page_size: 512,
            hot_size: 64,
        }
    }
}

impl CacheConfig {
    fn normalized(self) -> Self {
        let page_size = self.page_size.max(2).next_power_of_two();
        if page_size != self.page_size {
            log::warn!(
                "page_size {} is not a power of two, using {}",
                self.page_size,
                page_size
            );
        }
        CacheConfig {
            page_size,
            hot_size: self.hot_size.max(1),
        }
    }
}

/// Tiering mode, fixed at construction from the declared table size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Table fits in two pages: everything resident, no tiering
    Small,
    /// Windows over the disk index, no hot set
    Medium,
    /// Windows, hot set and access tester
    Large,
}

/// One resident page: which ids it covers and their strings.
#[derive(Default)]
struct Window {
    offset: usize,
    strings: Vec<String>,
}

impl Window {
    fn contains(&self, index: usize) -> bool {
        !self.strings.is_empty()
            && index >= self.offset
            && index < self.offset + self.strings.len()
    }

    fn lookup(&self, index: usize) -> Option<&str> {
        if self.contains(index) {
            Some(self.strings[index - self.offset].as_str())
        } else {
            None
        }
    }
}

/// Per-page miss bitmap deciding hot-set promotion.
///
/// O(page count) space; grows on demand while the table size is unknown.
struct AccessTester {
    seen: FixedBitSet,
}

impl AccessTester {
    fn new(pages_hint: usize) -> Self {
        AccessTester {
            seen: FixedBitSet::with_capacity(pages_hint.max(1)),
        }
    }

    /// Record a window miss for `page`; returns whether the page had
    /// already missed before.
    fn record(&mut self, page: usize) -> bool {
        if page >= self.seen.len() {
            self.seen.grow((page + 1).next_power_of_two());
        }
        let again = self.seen.contains(page);
        self.seen.insert(page);
        again
    }
}

/// Bounded-memory random access over a workbook's shared-string table.
///
/// Created once per read session; dropping it releases the window buffers
/// and removes the temp files backing the disk index.
pub struct SharedStringCache<RS: Read> {
    scanner: SstScanner<RS>,
    cfg: CacheConfig,
    mode: Mode,
    /// Declared size, or the discovered size once the scan completes
    size: Option<usize>,
    /// Small mode: the entire table
    resident: Vec<String>,
    forward: Window,
    backward: Window,
    hot: LruCache<u32, String>,
    tester: AccessTester,
    index: DiskBackedIndex,
}

impl<RS: Read> SharedStringCache<RS> {
    /// Open the `xl/sharedStrings.xml` part with default tuning.
    pub fn open_default(source: RS) -> Result<Self> {
        Self::open(source, CacheConfig::default())
    }

    /// Open the `xl/sharedStrings.xml` part.
    ///
    /// The tiering mode is chosen from the declared `uniqueCount`/`count`:
    /// tables up to two pages stay fully resident, tables up to 32 pages
    /// use the windows only, and larger or undeclared tables enable every
    /// tier.
    pub fn open(source: RS, cfg: CacheConfig) -> Result<Self> {
        let cfg = cfg.normalized();
        let scanner = SstScanner::new(source)?;
        let declared = scanner.declared_count();

        let mode = match declared {
            Some(n) if n <= 2 * cfg.page_size => Mode::Small,
            Some(n) if n <= 32 * cfg.page_size => Mode::Medium,
            _ => Mode::Large,
        };

        let pages_hint = declared.map_or(64, |n| n.div_ceil(cfg.page_size));
        let mut cache = SharedStringCache {
            scanner,
            cfg,
            mode,
            size: declared,
            resident: Vec::new(),
            forward: Window::default(),
            backward: Window::default(),
            hot: LruCache::new(cfg.hot_size),
            tester: AccessTester::new(pages_hint),
            index: DiskBackedIndex::new(cfg.page_size)?,
        };

        if mode == Mode::Small {
            cache.load_all()?;
        }
        Ok(cache)
    }

    /// Table size: the declared count, or the discovered count once the
    /// forward scan has completed. `None` while still unknown.
    pub fn size(&self) -> Option<usize> {
        self.size
    }

    /// Fetch the string with id `index`.
    ///
    /// An id at or past the table's (known or eventual) size is an
    /// [`SheetError::StringIndexOutOfRange`], never a default value.
    pub fn get(&mut self, index: usize) -> Result<&str> {
        if let Some(n) = self.size {
            if index >= n {
                return Err(SheetError::StringIndexOutOfRange { index, len: n });
            }
        }

        if self.mode == Mode::Small {
            let len = self.resident.len();
            return match self.resident.get(index) {
                Some(s) => Ok(s.as_str()),
                None => Err(SheetError::StringIndexOutOfRange { index, len }),
            };
        }

        if !self.forward.contains(index) && !self.backward.contains(index) {
            let key = index as u32;
            // `get` refreshes recency; `peek` hands the borrow back out.
            // Both arms return so the `peek` borrow never outlives a later
            // `&mut self` call.
            if self.mode == Mode::Large && self.hot.get(&key).is_some() {
                return match self.hot.peek(&key) {
                    Some(s) => Ok(s.as_str()),
                    None => Err(SheetError::InvalidState(
                        "hot set lost an entry between probes",
                    )),
                };
            }
            self.load_page_for(index)?;
        }

        if let Some(s) = self.forward.lookup(index) {
            return Ok(s);
        }
        if let Some(s) = self.backward.lookup(index) {
            return Ok(s);
        }
        Err(SheetError::InvalidState(
            "shared-string tier bookkeeping lost a loaded page",
        ))
    }

    /// Small mode: drain the scanner into the resident vector.
    fn load_all(&mut self) -> Result<()> {
        while let Some(s) = self.scanner.next_string()? {
            self.resident.push(s);
        }
        if let Some(declared) = self.size {
            if declared != self.resident.len() {
                log::warn!(
                    "shared-string table declares {} entries but contains {}",
                    declared,
                    self.resident.len()
                );
            }
        }
        self.size = Some(self.resident.len());
        Ok(())
    }

    /// Handle a full window miss: advance the source scan as far as the
    /// page containing `index`, rotate the forward window into the backward
    /// slot and fill the forward window with that page.
    fn load_page_for(&mut self, index: usize) -> Result<()> {
        let page_first = index & !(self.cfg.page_size - 1);
        let page_end = page_first + self.cfg.page_size;

        // First time any of this page streams past: capture it directly so
        // the fill does not read back what was just written.
        let fresh_page = self.index.len() <= page_first;
        let mut staged: Vec<String> = Vec::new();

        while !self.scanner.is_finished() && self.index.len() < page_end {
            match self.scanner.next_string()? {
                Some(s) => {
                    let id = self.index.len();
                    self.index.push(&s)?;
                    if fresh_page && id >= page_first {
                        staged.push(s);
                    }
                }
                None => break,
            }
        }
        // A page boundary can coincide with the end of an undeclared table;
        // one extra pull settles whether the size is now known.
        if self.size.is_none() && !self.scanner.is_finished() && self.index.len() == page_end {
            if let Some(s) = self.scanner.next_string()? {
                self.index.push(&s)?;
            }
        }
        if self.scanner.is_finished() {
            let discovered = self.index.len();
            if let Some(declared) = self.size {
                if declared != discovered {
                    log::warn!(
                        "shared-string table declares {} entries but contains {}",
                        declared,
                        discovered
                    );
                }
            }
            self.size = Some(discovered);
            if index >= discovered {
                return Err(SheetError::StringIndexOutOfRange {
                    index,
                    len: discovered,
                });
            }
        }

        let promote = self.mode == Mode::Large && self.tester.record(page_first >> self.cfg.page_size.trailing_zeros());

        std::mem::swap(&mut self.forward, &mut self.backward);
        let expected = self.cfg.page_size.min(self.index.len() - page_first);
        if fresh_page && staged.len() == expected {
            self.forward.strings = staged;
        } else {
            let mut strings = std::mem::take(&mut self.forward.strings);
            self.index.read_page(page_first, self.cfg.page_size, &mut strings)?;
            self.forward.strings = strings;
        }
        self.forward.offset = page_first;

        if promote {
            if let Some(s) = self.forward.lookup(index) {
                self.hot.put(index as u32, s.to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sst_xml(strings: &[String]) -> String {
        let mut xml = format!(
            r#"<?xml version="1.0"?><sst xmlns="x" count="{0}" uniqueCount="{0}">"#,
            strings.len()
        );
        for s in strings {
            xml.push_str("<si><t>");
            xml.push_str(s);
            xml.push_str("</t></si>");
        }
        xml.push_str("</sst>");
        xml
    }

    fn numbered(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("string-{i}")).collect()
    }

    fn open_with(
        strings: &[String],
        cfg: CacheConfig,
    ) -> SharedStringCache<std::io::Cursor<Vec<u8>>> {
        let xml = sst_xml(strings);
        SharedStringCache::open(std::io::Cursor::new(xml.into_bytes()), cfg).unwrap()
    }

    #[test]
    fn test_small_table_fully_resident() {
        let strings: Vec<String> = ["Alpha", "Beta", "Gamma"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut cache = open_with(&strings, CacheConfig::default());
        assert_eq!(cache.size(), Some(3));
        assert_eq!(cache.get(0).unwrap(), "Alpha");
        assert_eq!(cache.get(2).unwrap(), "Gamma");
        assert_eq!(cache.get(0).unwrap(), "Alpha");
    }

    #[test]
    fn test_out_of_range_small() {
        let strings = numbered(3);
        let mut cache = open_with(&strings, CacheConfig::default());
        assert!(matches!(
            cache.get(3),
            Err(SheetError::StringIndexOutOfRange { index: 3, len: 3 })
        ));
    }

    #[test]
    fn test_sequential_access_tiered() {
        let strings = numbered(100);
        let cfg = CacheConfig {
            page_size: 8,
            hot_size: 4,
        };
        let mut cache = open_with(&strings, cfg);
        for (i, expect) in strings.iter().enumerate() {
            assert_eq!(cache.get(i).unwrap(), expect, "id {i}");
        }
    }

    #[test]
    fn test_reverse_and_repeated_access() {
        let strings = numbered(100);
        let cfg = CacheConfig {
            page_size: 8,
            hot_size: 4,
        };
        let mut cache = open_with(&strings, cfg);
        for i in (0..100).rev() {
            assert_eq!(cache.get(i).unwrap(), strings[i]);
        }
        for i in (0..100).rev() {
            assert_eq!(cache.get(i).unwrap(), strings[i]);
        }
    }

    #[test]
    fn test_tier_transparency() {
        // Identical results whatever the tuning: fully resident, windows
        // only, or forced through every tier.
        let strings = numbered(300);
        for cfg in [
            CacheConfig {
                page_size: 256,
                hot_size: 64,
            },
            CacheConfig {
                page_size: 16,
                hot_size: 8,
            },
            CacheConfig {
                page_size: 4,
                hot_size: 2,
            },
        ] {
            let mut cache = open_with(&strings, cfg);
            let trace: Vec<usize> =
                (0..900).map(|i| (i * 7919) % strings.len()).collect();
            for &i in &trace {
                assert_eq!(
                    cache.get(i).unwrap(),
                    strings[i],
                    "id {i} under {cfg:?}"
                );
            }
        }
    }

    #[test]
    fn test_unknown_size_discovers_and_bounds() {
        let mut xml = String::from("<sst>");
        for i in 0..20 {
            xml.push_str(&format!("<si><t>v{i}</t></si>"));
        }
        xml.push_str("</sst>");
        let cfg = CacheConfig {
            page_size: 4,
            hot_size: 2,
        };
        let mut cache =
            SharedStringCache::open(std::io::Cursor::new(xml.into_bytes()), cfg).unwrap();
        assert_eq!(cache.size(), None);
        assert_eq!(cache.get(19).unwrap(), "v19");
        assert_eq!(cache.size(), Some(20));
        assert!(cache.get(20).is_err());
        assert_eq!(cache.get(0).unwrap(), "v0");
    }

    #[test]
    fn test_unknown_size_discovery_on_page_boundary() {
        // Table length a multiple of the page size: the last page fills
        // exactly, and the size must still become known.
        let mut xml = String::from("<sst>");
        for i in 0..10 {
            xml.push_str(&format!("<si><t>v{i}</t></si>"));
        }
        xml.push_str("</sst>");
        let cfg = CacheConfig {
            page_size: 2,
            hot_size: 2,
        };
        let mut cache =
            SharedStringCache::open(std::io::Cursor::new(xml.into_bytes()), cfg).unwrap();
        assert_eq!(cache.get(9).unwrap(), "v9");
        assert_eq!(cache.size(), Some(10));
        assert!(cache.get(10).is_err());
    }

    #[test]
    fn test_hot_promotion_on_second_page_miss() {
        let strings = numbered(64);
        let cfg = CacheConfig {
            page_size: 4,
            hot_size: 8,
        };
        // page_size 4 and 64 entries: Large would need > 128; force Large by
        // leaving the count undeclared.
        let mut xml = String::from("<sst>");
        for s in &strings {
            xml.push_str(&format!("<si><t>{s}</t></si>"));
        }
        xml.push_str("</sst>");
        let mut cache =
            SharedStringCache::open(std::io::Cursor::new(xml.into_bytes()), cfg).unwrap();

        // First miss of page 0, then evict it twice over, then miss again:
        // the second miss promotes id 1 into the hot set.
        assert_eq!(cache.get(1).unwrap(), "string-1");
        assert_eq!(cache.get(20).unwrap(), "string-20");
        assert_eq!(cache.get(40).unwrap(), "string-40");
        assert_eq!(cache.get(1).unwrap(), "string-1");
        assert!(cache.hot.peek(&1).is_some());
        // Still correct from whatever tier answers now.
        assert_eq!(cache.get(20).unwrap(), "string-20");
        assert_eq!(cache.get(60).unwrap(), "string-60");
        assert_eq!(cache.get(1).unwrap(), "string-1");
    }

    #[test]
    fn test_random_trace_matches_reference() {
        // Every lookup must match a reference array, no bounds errors.
        let strings = numbered(2000);
        let cfg = CacheConfig {
            page_size: 32,
            hot_size: 16,
        };
        let mut cache = open_with(&strings, cfg);
        let mut state = 0x2545F491u64;
        for _ in 0..20_000 {
            // xorshift, deterministic
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let i = (state % strings.len() as u64) as usize;
            assert_eq!(cache.get(i).unwrap(), strings[i]);
        }
    }

    #[test]
    #[ignore = "large: 200k strings, 1M lookups"]
    fn test_large_random_trace() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let strings = numbered(200_000);
        let cfg = CacheConfig {
            page_size: 512,
            hot_size: 64,
        };
        let mut cache = open_with(&strings, cfg);
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..1_000_000 {
            let i = rng.gen_range(0..strings.len());
            assert_eq!(cache.get(i).unwrap(), strings[i]);
        }
    }

    #[test]
    fn test_empty_table() {
        let mut cache = SharedStringCache::open(
            std::io::Cursor::new(b"<sst count=\"0\" uniqueCount=\"0\"/>".to_vec()),
            CacheConfig::default(),
        )
        .unwrap();
        assert_eq!(cache.size(), Some(0));
        assert!(cache.get(0).is_err());
    }

    #[test]
    fn test_config_normalization() {
        let cfg = CacheConfig {
            page_size: 100,
            hot_size: 0,
        }
        .normalized();
        assert_eq!(cfg.page_size, 128);
        assert_eq!(cfg.hot_size, 1);
    }
}
