//! Cell, row and dimension types.
//!
//! [`Row`] is a **reused buffer**, not a collection: the same allocation is
//! handed back by every `next_row()` call with its entries overwritten in
//! place. A consumer that needs values beyond the next advance must copy
//! them out first.

use crate::error::{Result, SheetError};
use crate::sheet::reference::{cell_reference, parse_cell_reference};

/// Value of one worksheet cell.
///
/// Shared-string cells carry only the table id; resolving the text is
/// deferred to the shared-string cache until the value is actually read.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    /// Empty cell
    #[default]
    Blank,
    /// Numeric value within 32-bit range
    Int(i32),
    /// Numeric value beyond 32-bit range
    Long(i64),
    /// Floating point value
    Float(f64),
    /// Boolean value
    Bool(bool),
    /// Literal text stored inline in the cell (`t="inlineStr"`)
    InlineString(String),
    /// Id into the workbook's shared-string table (`t="s"`)
    SharedString(u32),
    /// Cached string result of a formula (`t="str"`)
    FormulaString(String),
}

impl CellValue {
    /// Whether this is a blank cell.
    pub fn is_blank(&self) -> bool {
        matches!(self, CellValue::Blank)
    }
}

/// One cell slot in a [`Row`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Cell {
    /// 0-based column
    pub column: u32,
    /// Style table index from the `s=` attribute, 0 if absent
    pub style: u32,
    /// Decoded value
    pub value: CellValue,
}

/// One worksheet row, reused across iterations.
///
/// `cells` is indexed by 0-based column and always at least `last_col`
/// entries long; slots outside `[first_col, last_col)` and slots the
/// serialized row skipped are `Blank`. Entries are cleared, not
/// reallocated, when capacity already suffices.
#[derive(Debug, Default)]
pub struct Row {
    /// 1-based row number as serialized in `r=`
    pub row_num: u32,
    /// First populated column (0-based, inclusive)
    pub first_col: u32,
    /// Last populated column (0-based, exclusive); equals `first_col` for
    /// an empty row
    pub last_col: u32,
    /// Cell slots, indexed by 0-based column
    pub cells: Vec<Cell>,
}

impl Row {
    /// Reset the buffer for a new row covering `[first_col, last_col)`.
    ///
    /// Existing slots are cleared in place; the vector only grows.
    pub(crate) fn prepare(&mut self, row_num: u32, first_col: u32, last_col: u32) {
        self.row_num = row_num;
        self.first_col = first_col;
        self.last_col = last_col;
        self.grow_to(last_col);
        for (i, cell) in self.cells.iter_mut().enumerate() {
            cell.column = i as u32;
            cell.style = 0;
            cell.value = CellValue::Blank;
        }
    }

    /// Ensure at least `last_col` slots, extending `last_col` if needed.
    ///
    /// Used when `spans=` is absent and the true width is discovered cell
    /// by cell.
    pub(crate) fn grow_to(&mut self, last_col: u32) {
        if last_col > self.last_col {
            self.last_col = last_col;
        }
        while self.cells.len() < last_col as usize {
            let column = self.cells.len() as u32;
            self.cells.push(Cell {
                column,
                ..Cell::default()
            });
        }
    }

    /// Store a value, bounds-checked against the row's populated span.
    ///
    /// The span, not the (possibly longer, reused) vector, is the bound:
    /// out-of-span cells are reported, never silently clamped.
    pub(crate) fn set(&mut self, col: u32, style: u32, value: CellValue) -> Result<()> {
        if col >= self.last_col {
            return Err(SheetError::ColumnOutOfRange {
                row: self.row_num,
                col,
                first: self.first_col,
                last: self.last_col,
            });
        }
        let slot = self.cells.get_mut(col as usize).ok_or(SheetError::ColumnOutOfRange {
            row: self.row_num,
            col,
            first: self.first_col,
            last: self.last_col,
        })?;
        slot.column = col;
        slot.style = style;
        slot.value = value;
        Ok(())
    }

    /// The cell at 0-based `col`, if within the row's span.
    pub fn cell(&self, col: u32) -> Option<&Cell> {
        if col < self.last_col {
            self.cells.get(col as usize)
        } else {
            None
        }
    }

    /// The populated span `[first_col, last_col)` as a slice.
    pub fn cells_in_span(&self) -> &[Cell] {
        &self.cells[self.first_col as usize..self.last_col as usize]
    }

    /// Whether the row has no populated span.
    pub fn is_empty(&self) -> bool {
        self.first_col == self.last_col
    }
}

/// Rectangular used-range of a worksheet or merge range, 0-based inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimension {
    /// First row
    pub first_row: u32,
    /// Last row (inclusive)
    pub last_row: u32,
    /// First column
    pub first_col: u32,
    /// Last column (inclusive)
    pub last_col: u32,
}

impl Dimension {
    /// Parse an A1-style range reference (`"A1:C10"`) or single cell
    /// (`"B2"`).
    pub fn parse(reference: &str) -> Result<Self> {
        let (start, end) = match reference.split_once(':') {
            Some((s, e)) => (s, e),
            None => (reference, reference),
        };
        let (first_row, first_col) = parse_cell_reference(start)?;
        let (last_row, last_col) = parse_cell_reference(end)?;
        if last_row < first_row || last_col < first_col {
            return Err(SheetError::InvalidCellReference(reference.to_string()));
        }
        Ok(Dimension {
            first_row,
            last_row,
            first_col,
            last_col,
        })
    }

    /// Whether 0-based `(row, col)` lies inside the rectangle.
    pub fn contains(&self, row: u32, col: u32) -> bool {
        row >= self.first_row && row <= self.last_row && col >= self.first_col && col <= self.last_col
    }

    /// Number of rows covered.
    pub fn height(&self) -> u32 {
        self.last_row - self.first_row + 1
    }

    /// Number of columns covered.
    pub fn width(&self) -> u32 {
        self.last_col - self.first_col + 1
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}",
            cell_reference(self.first_row, self.first_col),
            cell_reference(self.last_row, self.last_col)
        )
    }
}
