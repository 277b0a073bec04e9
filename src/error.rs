//! Error types for streaming spreadsheet reading.

use thiserror::Error;

/// Result type for all reader operations.
pub type Result<T> = std::result::Result<T, SheetError>;

/// Errors that can occur while streaming a spreadsheet part.
#[derive(Error, Debug)]
pub enum SheetError {
    /// A shared-string id at or past the end of the table was requested
    #[error("shared string index {index} out of range (table has {len} entries)")]
    StringIndexOutOfRange {
        /// Requested id
        index: usize,
        /// Known table size
        len: usize,
    },

    /// A column outside the row's declared span was addressed
    #[error("column {col} out of range for row {row} (spans {first}..{last})")]
    ColumnOutOfRange {
        /// Row number (1-based, as serialized)
        row: u32,
        /// Offending column (0-based)
        col: u32,
        /// Declared first column (0-based)
        first: u32,
        /// Declared last column (exclusive)
        last: u32,
    },

    /// A `<row>` element never closed even after the read buffer grew to its limit
    #[error("row {row} never closes within {limit} bytes")]
    RowNeverCloses {
        /// Row number of the unterminated element, 0 if unknown
        row: u32,
        /// Buffer size at which growth was abandoned
        limit: usize,
    },

    /// Structurally broken row or cell markup that positional scanning cannot bound
    #[error("malformed row markup: {0}")]
    MalformedRow(String),

    /// Invalid A1-style cell or range reference
    #[error("invalid cell reference: {0}")]
    InvalidCellReference(String),

    /// XML parsing error from the shared-string table
    #[error("XML error: {0}")]
    Xml(String),

    /// The stream is in a state that does not permit the operation
    #[error("invalid stream state: {0}")]
    InvalidState(&'static str),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<quick_xml::Error> for SheetError {
    fn from(err: quick_xml::Error) -> Self {
        SheetError::Xml(err.to_string())
    }
}
