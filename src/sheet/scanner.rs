//! Positional row/cell tokenizer.
//!
//! Parses one `<row>` element's raw bytes into a reusable [`Row`] without
//! building a tree. Attributes are located by direct substring search
//! (`memchr`) rather than generic XML parsing - legal because OOXML writers
//! emit `r=`, `t=` and `s=` in a small set of stable forms, and the reason
//! this path is fast. The [`RowTokenizer`] trait is the seam: a slower,
//! fully generic implementation can be substituted for malformed inputs
//! without touching the stream or its callers.
//!
//! Entity decoding is inlined into the scan: the five named XML entities,
//! `&nbsp;`, and decimal/hex character references are written straight into
//! the output buffer. Unknown entities are copied through verbatim with a
//! warning - degraded data never fails the row.

use memchr::memmem;

use crate::error::{Result, SheetError};
use crate::sheet::cell::{CellValue, Row};
use crate::sheet::reference::column_of_reference;

/// Longest entity this scanner recognizes (`&#x10FFFF;`).
const MAX_ENTITY_LEN: usize = 10;

/// Turns one serialized `<row>` element into cell slots.
pub trait RowTokenizer {
    /// Populate `row` from `raw`, the complete byte span of one `<row>`
    /// element (opening tag through closing tag or self-close).
    ///
    /// `fallback_row` is the 1-based row number to assume when `r=` is
    /// absent; `sheet_first_col` is the sheet's declared start column used
    /// when `spans=` is absent.
    fn tokenize(
        &mut self,
        raw: &[u8],
        fallback_row: u32,
        sheet_first_col: u32,
        row: &mut Row,
    ) -> Result<()>;
}

/// Production tokenizer: positional attribute scanning, no DOM.
#[derive(Debug, Default)]
pub struct PositionalTokenizer {
    _private: (),
}

impl PositionalTokenizer {
    /// Create a tokenizer.
    pub fn new() -> Self {
        PositionalTokenizer::default()
    }
}

impl RowTokenizer for PositionalTokenizer {
    fn tokenize(
        &mut self,
        raw: &[u8],
        fallback_row: u32,
        sheet_first_col: u32,
        row: &mut Row,
    ) -> Result<()> {
        let tag_end = memchr::memchr(b'>', raw)
            .ok_or_else(|| SheetError::MalformedRow("row opening tag never closes".into()))?;
        let self_closed = tag_end > 0 && raw[tag_end - 1] == b'/';
        let attrs = &raw[..tag_end];

        let row_num = find_attr(attrs, b" r=\"")
            .and_then(|v| atoi_simd::parse::<u32>(v).ok())
            .unwrap_or(fallback_row);

        let spans = find_attr(attrs, b" spans=\"").and_then(parse_spans);

        if self_closed {
            // Empty row: no populated span regardless of declared spans.
            row.prepare(row_num, sheet_first_col, sheet_first_col);
            return Ok(());
        }

        let (first_col, declared_last) = match spans {
            Some((first, last)) => (first, Some(last)),
            None => (sheet_first_col, None),
        };
        row.prepare(row_num, first_col, declared_last.unwrap_or(first_col));

        let body_end = memmem::rfind(raw, b"</row>").unwrap_or(raw.len());
        let body = &raw[tag_end + 1..body_end.max(tag_end + 1)];

        let mut pos = 0;
        let mut next_col = first_col;
        while let Some(rel) = memmem::find(&body[pos..], b"<c") {
            let cstart = pos + rel;
            // Require a real cell element, not <cfRule> or similar.
            match body.get(cstart + 2) {
                Some(b' ') | Some(b'>') | Some(b'/') => {}
                _ => {
                    pos = cstart + 2;
                    continue;
                }
            }
            let rel_end = memchr::memchr(b'>', &body[cstart..]).ok_or_else(|| {
                SheetError::MalformedRow(format!("cell tag never closes in row {row_num}"))
            })?;
            let ctag_end = cstart + rel_end;
            let cell_closed = body[ctag_end - 1] == b'/';
            let cattrs = &body[cstart..ctag_end];

            let col = match find_attr(cattrs, b" r=\"") {
                Some(reference) => {
                    column_of_reference(reference).map(|(c, _)| c).unwrap_or(next_col)
                }
                None => next_col,
            };
            let style = find_attr(cattrs, b" s=\"")
                .and_then(|v| atoi_simd::parse::<u32>(v).ok())
                .unwrap_or(0);
            let type_code = find_attr(cattrs, b" t=\"");

            let (value, after) = if cell_closed {
                (CellValue::Blank, ctag_end + 1)
            } else {
                let rel_close = memmem::find(&body[ctag_end..], b"</c>").ok_or_else(|| {
                    SheetError::MalformedRow(format!(
                        "cell {} in row {row_num} never closes",
                        crate::sheet::reference::cell_reference(row_num.saturating_sub(1), col)
                    ))
                })?;
                let cell_body = &body[ctag_end + 1..ctag_end + rel_close];
                (decode_value(type_code, cell_body), ctag_end + rel_close + 4)
            };

            if declared_last.is_none() {
                row.grow_to(col + 1);
            }
            row.set(col, style, value)?;
            next_col = col + 1;
            pos = after;
        }
        Ok(())
    }
}

/// Locate `pattern` (including its leading space and `="`) in an attribute
/// span and return the bytes up to the closing quote.
fn find_attr<'a>(attrs: &'a [u8], pattern: &[u8]) -> Option<&'a [u8]> {
    let start = memmem::find(attrs, pattern)? + pattern.len();
    let end = memchr::memchr(b'"', &attrs[start..])?;
    Some(&attrs[start..start + end])
}

/// Parse `spans="a:b"` into a 0-based `[first, last)` column range.
///
/// Sparse rows may declare several ranges (`"1:2 7:9"`); the union's first
/// and last numbers bound the populated span.
fn parse_spans(value: &[u8]) -> Option<(u32, u32)> {
    let mut first: Option<u32> = None;
    let mut last: Option<u32> = None;
    let mut current: Option<u32> = None;
    for &b in value {
        if b.is_ascii_digit() {
            current = Some(current.unwrap_or(0) * 10 + (b - b'0') as u32);
        } else if let Some(n) = current.take() {
            if first.is_none() {
                first = Some(n);
            }
            last = Some(n);
        }
    }
    if let Some(n) = current {
        if first.is_none() {
            first = Some(n);
        }
        last = Some(n);
    }
    match (first, last) {
        // Serialized spans are 1-based inclusive.
        (Some(a), Some(b)) if a >= 1 && b >= a => Some((a - 1, b)),
        _ => None,
    }
}

/// Decode one cell body according to its `t=` type code.
fn decode_value(type_code: Option<&[u8]>, cell_body: &[u8]) -> CellValue {
    match type_code {
        Some(b"s") => match value_span(cell_body).and_then(|v| atoi_simd::parse::<u32>(v).ok()) {
            Some(id) => CellValue::SharedString(id),
            None => {
                log::warn!("shared-string cell without a numeric <v>, treating as blank");
                CellValue::Blank
            }
        },
        Some(b"b") => match value_span(cell_body) {
            Some(v) => CellValue::Bool(v.first() == Some(&b'1')),
            None => CellValue::Blank,
        },
        Some(b"str") => match value_span(cell_body) {
            Some(v) => {
                let mut text = String::with_capacity(v.len());
                unescape_into(v, &mut text);
                CellValue::FormulaString(text)
            }
            None => CellValue::Blank,
        },
        Some(b"inlineStr") => CellValue::InlineString(inline_text(cell_body)),
        None | Some(b"n") => match value_span(cell_body) {
            Some(v) => parse_numeric(v),
            None => CellValue::Blank,
        },
        Some(other) => {
            log::warn!(
                "unknown cell type code {:?}, treating as blank",
                String::from_utf8_lossy(other)
            );
            CellValue::Blank
        }
    }
}

/// The raw bytes between `<v>` and `</v>`, if the cell has a value child.
fn value_span(cell_body: &[u8]) -> Option<&[u8]> {
    let start = memmem::find(cell_body, b"<v>")? + 3;
    let end = memmem::find(&cell_body[start..], b"</v>")?;
    Some(&cell_body[start..start + end])
}

/// Concatenated text of every `<t>` run inside an `<is>` inline string.
fn inline_text(cell_body: &[u8]) -> String {
    let mut text = String::new();
    let mut pos = 0;
    while let Some(rel) = memmem::find(&cell_body[pos..], b"<t") {
        let tstart = pos + rel;
        match cell_body.get(tstart + 2) {
            Some(b'>') | Some(b' ') | Some(b'/') => {}
            _ => {
                pos = tstart + 2;
                continue;
            }
        }
        let Some(rel_gt) = memchr::memchr(b'>', &cell_body[tstart..]) else {
            break;
        };
        let open_end = tstart + rel_gt;
        if cell_body[open_end - 1] == b'/' {
            // <t/> contributes nothing
            pos = open_end + 1;
            continue;
        }
        let Some(rel_close) = memmem::find(&cell_body[open_end..], b"</t>") else {
            break;
        };
        unescape_into(&cell_body[open_end + 1..open_end + rel_close], &mut text);
        pos = open_end + rel_close + 4;
    }
    text
}

/// Numeric dispatch: integers within 32-bit range stay `Int`, wider ones
/// widen to `Long`, anything fractional or overflowing falls to `Float`.
fn parse_numeric(bytes: &[u8]) -> CellValue {
    if bytes.is_empty() {
        return CellValue::Blank;
    }
    let fractional = bytes
        .iter()
        .any(|&b| matches!(b, b'.' | b'e' | b'E'));
    if !fractional {
        if let Ok(v) = atoi_simd::parse::<i32>(bytes) {
            return CellValue::Int(v);
        }
        if let Ok(v) = atoi_simd::parse::<i64>(bytes) {
            return CellValue::Long(v);
        }
    }
    match fast_float2::parse::<f64, _>(bytes) {
        Ok(v) => CellValue::Float(v),
        Err(_) => {
            log::warn!(
                "unparseable numeric cell value {:?}, treating as blank",
                String::from_utf8_lossy(bytes)
            );
            CellValue::Blank
        }
    }
}

/// Decode XML character data into `out` in a single pass.
///
/// Handles the named entities `lt gt amp quot apos nbsp` and numeric
/// references in decimal (`&#NN;`) and hex (`&#xHH;`) form. Anything else
/// is copied through verbatim with a warning.
pub(crate) fn unescape_into(input: &[u8], out: &mut String) {
    let mut pos = 0;
    while let Some(rel) = memchr::memchr(b'&', &input[pos..]) {
        let amp = pos + rel;
        push_utf8(out, &input[pos..amp]);

        let window_end = (amp + 2 + MAX_ENTITY_LEN).min(input.len());
        match memchr::memchr(b';', &input[amp + 1..window_end]) {
            Some(len) => {
                let entity = &input[amp + 1..amp + 1 + len];
                match decode_entity(entity) {
                    Some(c) => out.push(c),
                    None => {
                        log::warn!(
                            "unknown entity &{};, copied through verbatim",
                            String::from_utf8_lossy(entity)
                        );
                        push_utf8(out, &input[amp..amp + len + 2]);
                    }
                }
                pos = amp + len + 2;
            }
            None => {
                // A bare ampersand; keep it and move on.
                out.push('&');
                pos = amp + 1;
            }
        }
    }
    push_utf8(out, &input[pos..]);
}

fn decode_entity(entity: &[u8]) -> Option<char> {
    match entity {
        b"lt" => Some('<'),
        b"gt" => Some('>'),
        b"amp" => Some('&'),
        b"quot" => Some('"'),
        b"apos" => Some('\''),
        b"nbsp" => Some('\u{a0}'),
        [b'#', b'x' | b'X', hex @ ..] if !hex.is_empty() => {
            let mut code: u32 = 0;
            for &b in hex {
                code = code.checked_mul(16)?.checked_add((b as char).to_digit(16)?)?;
            }
            char::from_u32(code)
        }
        [b'#', dec @ ..] if !dec.is_empty() => {
            let mut code: u32 = 0;
            for &b in dec {
                if !b.is_ascii_digit() {
                    return None;
                }
                code = code.checked_mul(10)?.checked_add((b - b'0') as u32)?;
            }
            char::from_u32(code)
        }
        _ => None,
    }
}

fn push_utf8(out: &mut String, bytes: &[u8]) {
    match std::str::from_utf8(bytes) {
        Ok(s) => out.push_str(s),
        Err(_) => out.push_str(&String::from_utf8_lossy(bytes)),
    }
}


#[cfg(test)]
mod escape_roundtrip {
    use super::unescape_into;
    use proptest::prelude::*;

    /// Minimal encoder mirroring what OOXML writers produce, used to drive
    /// the decode path with adversarial content.
    fn escape(input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        for c in input.chars() {
            match c {
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '&' => out.push_str("&amp;"),
                '"' => out.push_str("&quot;"),
                '\'' => out.push_str("&apos;"),
                c if (c as u32) < 0x20 && c != '\t' && c != '\n' && c != '\r' => {
                    out.push_str(&format!("&#{};", c as u32));
                }
                c => out.push(c),
            }
        }
        out
    }

    proptest! {
        #[test]
        fn roundtrip(s in "\\PC*") {
            let mut decoded = String::new();
            unescape_into(escape(&s).as_bytes(), &mut decoded);
            prop_assert_eq!(decoded, s);
        }

        #[test]
        fn roundtrip_hostile(s in "[<>&\"'a-z ]{0,64}") {
            let mut decoded = String::new();
            unescape_into(escape(&s).as_bytes(), &mut decoded);
            prop_assert_eq!(decoded, s);
        }
    }
}
