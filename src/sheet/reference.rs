//! A1-style cell reference utilities.

use crate::error::{Result, SheetError};

/// Convert a column index to its letter name (A, B, ..., Z, AA, AB, ...).
///
/// Input is 0-based (0=A, 25=Z, 26=AA).
pub fn column_index_to_name(col: u32) -> String {
    let mut col = col + 1;
    let mut name = String::new();
    while col > 0 {
        col -= 1;
        let ch = (b'A' + (col % 26) as u8) as char;
        name.insert(0, ch);
        col /= 26;
    }
    name
}

/// Convert column letters to a 0-based index (A=0, Z=25, AA=26).
///
/// Accepts raw bytes so the tokenizer can decode straight out of the read
/// buffer; any non-letter byte disqualifies the whole name.
pub fn column_name_to_index(name: &[u8]) -> Option<u32> {
    let mut result: u32 = 0;
    let mut seen = false;
    for &b in name {
        let b = b.to_ascii_uppercase();
        if !b.is_ascii_uppercase() {
            return None;
        }
        seen = true;
        result = result * 26 + (b - b'A') as u32 + 1;
    }
    if seen { Some(result - 1) } else { None }
}

/// Decode the leading column letters of a cell reference like `B12`.
///
/// Returns the 0-based column and the number of letter bytes consumed.
pub fn column_of_reference(reference: &[u8]) -> Option<(u32, usize)> {
    let mut result: u32 = 0;
    let mut used = 0;
    for &b in reference {
        let upper = b.to_ascii_uppercase();
        if !upper.is_ascii_uppercase() {
            break;
        }
        result = result * 26 + (upper - b'A') as u32 + 1;
        used += 1;
    }
    if used > 0 { Some((result - 1, used)) } else { None }
}

/// Parse a full cell reference (`"B12"`) to 0-based `(row, col)`.
pub fn parse_cell_reference(reference: &str) -> Result<(u32, u32)> {
    let bytes = reference.as_bytes();
    let (col, used) = column_of_reference(bytes)
        .ok_or_else(|| SheetError::InvalidCellReference(reference.to_string()))?;
    let digits = &bytes[used..];
    if digits.is_empty() {
        return Err(SheetError::InvalidCellReference(reference.to_string()));
    }
    let row: u32 = atoi_simd::parse(digits)
        .map_err(|_| SheetError::InvalidCellReference(reference.to_string()))?;
    if row == 0 {
        return Err(SheetError::InvalidCellReference(reference.to_string()));
    }
    Ok((row - 1, col))
}

/// Format 0-based `(row, col)` as an A1-style reference.
pub fn cell_reference(row: u32, col: u32) -> String {
    format!("{}{}", column_index_to_name(col), row + 1)
}
