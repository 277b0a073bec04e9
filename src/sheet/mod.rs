//! Worksheet streaming: rows, cells, dimensions and merges.
//!
//! [`RowStream`] pulls bytes from a worksheet part and hands each complete
//! `<row>` span to a [`RowTokenizer`], which fills the stream's reusable
//! [`Row`] buffer with typed [`Cell`]s. Shared-string cells carry only
//! their table id; the text lives behind
//! [`crate::cache::SharedStringCache`]. [`MergeBitmap`] answers merged-range
//! membership per coordinate.

pub mod cell;
pub mod merge;
pub mod reference;
pub mod scanner;
pub mod stream;

pub use cell::{Cell, CellValue, Dimension, Row};
pub use merge::MergeBitmap;
pub use scanner::{PositionalTokenizer, RowTokenizer};
pub use stream::{RowStream, StreamState};
