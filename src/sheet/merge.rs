//! Merge-range membership queries.
//!
//! A sheet declares its merged rectangles once in `<mergeCells>`; consumers
//! then ask "is this coordinate inside some merge" for every cell they
//! touch, so the test must be O(1)-ish. Representation is chosen from the
//! bounding box of all rectangles: compact sheets get one 64-bit word per
//! row with bits for columns; sheets whose merges are few but widely
//! scattered get a plain rectangle list sized to the merge count instead of
//! the box area.

use smallvec::SmallVec;

use crate::sheet::cell::Dimension;

/// Dense representation limits: column span of one word, and a row bound
/// so a tall outlier cannot balloon the word vector.
const DENSE_MAX_COLS: u32 = 64;
const DENSE_MAX_ROWS: u32 = 32 * 1024;

enum Repr {
    Empty,
    /// One word per row of the bounding box, bit `c` = column
    /// `first_col + c`
    Dense {
        words: Vec<u64>,
        first_row: u32,
        first_col: u32,
    },
    /// Scanned per query; fine for the handful of merges typical sheets have
    Sparse(SmallVec<[Dimension; 8]>),
}

/// Point-in-merged-range index, built once per sheet pass and then only
/// queried.
pub struct MergeBitmap {
    repr: Repr,
}

impl MergeBitmap {
    /// Build the index from a sheet's declared merge rectangles.
    pub fn from_ranges(ranges: &[Dimension]) -> Self {
        if ranges.is_empty() {
            return MergeBitmap { repr: Repr::Empty };
        }

        let mut bbox = ranges[0];
        for r in &ranges[1..] {
            bbox.first_row = bbox.first_row.min(r.first_row);
            bbox.last_row = bbox.last_row.max(r.last_row);
            bbox.first_col = bbox.first_col.min(r.first_col);
            bbox.last_col = bbox.last_col.max(r.last_col);
        }

        let mut bitmap = if bbox.width() <= DENSE_MAX_COLS && bbox.height() <= DENSE_MAX_ROWS {
            MergeBitmap {
                repr: Repr::Dense {
                    words: vec![0u64; bbox.height() as usize],
                    first_row: bbox.first_row,
                    first_col: bbox.first_col,
                },
            }
        } else {
            MergeBitmap {
                repr: Repr::Sparse(SmallVec::with_capacity(ranges.len())),
            }
        };
        for r in ranges {
            bitmap.mark(r);
        }
        bitmap
    }

    /// Whether 0-based `(row, col)` lies inside at least one merge.
    pub fn test(&self, row: u32, col: u32) -> bool {
        match &self.repr {
            Repr::Empty => false,
            Repr::Dense {
                words,
                first_row,
                first_col,
            } => {
                if row < *first_row || col < *first_col {
                    return false;
                }
                let r = (row - first_row) as usize;
                let c = col - first_col;
                r < words.len() && c < 64 && words[r] & (1u64 << c) != 0
            }
            Repr::Sparse(ranges) => ranges.iter().any(|d| d.contains(row, col)),
        }
    }

    /// Set the bits of one rectangle. Construction only.
    fn mark(&mut self, range: &Dimension) {
        match &mut self.repr {
            Repr::Empty => {}
            Repr::Dense {
                words,
                first_row,
                first_col,
            } => {
                let width = range.last_col - range.first_col + 1;
                let mask = if width >= 64 {
                    u64::MAX
                } else {
                    ((1u64 << width) - 1) << (range.first_col - *first_col)
                };
                let lo = (range.first_row - *first_row) as usize;
                let hi = (range.last_row - *first_row) as usize;
                for word in &mut words[lo..=hi] {
                    *word |= mask;
                }
            }
            Repr::Sparse(ranges) => ranges.push(*range),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn dim(reference: &str) -> Dimension {
        Dimension::parse(reference).unwrap()
    }

    #[test]
    fn test_single_rectangle() {
        let bitmap = MergeBitmap::from_ranges(&[dim("A1:B2")]);
        assert!(bitmap.test(0, 0));
        assert!(bitmap.test(1, 1));
        assert!(!bitmap.test(2, 2));
    }

    #[test]
    fn test_empty() {
        let bitmap = MergeBitmap::from_ranges(&[]);
        assert!(!bitmap.test(0, 0));
        assert!(!bitmap.test(1000, 1000));
    }

    #[test]
    fn test_dense_edges() {
        let bitmap = MergeBitmap::from_ranges(&[dim("B2:C3"), dim("E1:E10")]);
        assert!(matches!(bitmap.repr, Repr::Dense { .. }));
        assert!(bitmap.test(1, 1));
        assert!(bitmap.test(2, 2));
        assert!(!bitmap.test(0, 1));
        assert!(!bitmap.test(3, 1));
        assert!(bitmap.test(0, 4));
        assert!(bitmap.test(9, 4));
        assert!(!bitmap.test(10, 4));
        assert!(!bitmap.test(0, 3));
    }

    #[test]
    fn test_full_width_word() {
        // 64 columns exactly still fits the dense form.
        let bitmap = MergeBitmap::from_ranges(&[dim("A1:BL1")]);
        assert!(matches!(bitmap.repr, Repr::Dense { .. }));
        assert!(bitmap.test(0, 0));
        assert!(bitmap.test(0, 63));
        assert!(!bitmap.test(0, 64));
        assert!(!bitmap.test(1, 0));
    }

    #[test]
    fn test_sparse_fallback_wide() {
        // Bounding box spans far more than 64 columns.
        let bitmap = MergeBitmap::from_ranges(&[dim("A1:B2"), dim("ALL100:ALM101")]);
        assert!(matches!(bitmap.repr, Repr::Sparse(_)));
        assert!(bitmap.test(0, 0));
        assert!(bitmap.test(99, dim("ALL100").first_col));
        assert!(!bitmap.test(50, 500));
    }

    #[test]
    fn test_sparse_fallback_tall() {
        let bitmap = MergeBitmap::from_ranges(&[dim("A1:A2"), dim("B100000:C100001")]);
        assert!(matches!(bitmap.repr, Repr::Sparse(_)));
        assert!(bitmap.test(0, 0));
        assert!(bitmap.test(99_999, 1));
        assert!(!bitmap.test(99_999, 3));
    }

    #[test]
    fn test_overlapping_rectangles() {
        let bitmap = MergeBitmap::from_ranges(&[dim("A1:C3"), dim("B2:D4")]);
        assert!(bitmap.test(1, 1));
        assert!(bitmap.test(3, 3));
        assert!(bitmap.test(0, 0));
        assert!(!bitmap.test(0, 3));
        assert!(!bitmap.test(4, 0));
    }

    proptest! {
        /// test(r, c) is true iff (r, c) lies in at least one rectangle,
        /// whatever representation the bounding box selects.
        #[test]
        fn containment_matches_reference(
            rects in proptest::collection::vec(
                (0u32..300, 0u32..120, 0u32..20, 0u32..20),
                1..12,
            ),
            probes in proptest::collection::vec((0u32..350, 0u32..150), 64),
        ) {
            let ranges: Vec<Dimension> = rects
                .iter()
                .map(|&(r, c, h, w)| Dimension {
                    first_row: r,
                    last_row: r + h,
                    first_col: c,
                    last_col: c + w,
                })
                .collect();
            let bitmap = MergeBitmap::from_ranges(&ranges);
            for &(pr, pc) in &probes {
                let expected = ranges.iter().any(|d| d.contains(pr, pc));
                prop_assert_eq!(bitmap.test(pr, pc), expected, "probe ({}, {})", pr, pc);
            }
        }
    }
}
