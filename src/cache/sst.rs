//! Streaming parser for `xl/sharedStrings.xml`.
//!
//! The shared-string table can be far larger than the configured memory
//! budget, so it is never materialized: `SstScanner` pulls one `<si>` entry
//! at a time and the cache decides where the string lands (window, hot set,
//! disk index). Rich-text runs (`<r><t>`) are concatenated; phonetic hints
//! (`<rPh>`, `<phoneticPr>`) are skipped.

use std::io::{BufReader, Read};

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::{Result, SheetError};
use crate::sheet::scanner::unescape_into;

/// Pull parser yielding shared strings in table order.
pub struct SstScanner<RS: Read> {
    reader: Reader<BufReader<RS>>,
    buf: Vec<u8>,
    /// Declared `uniqueCount` (preferred) or `count` from the root element
    declared: Option<usize>,
    finished: bool,
}

impl<RS: Read> SstScanner<RS> {
    /// Open the table part and consume its root element.
    ///
    /// Both `uniqueCount` and `count` spellings of the size hint are
    /// accepted; producers disagree on which one they write.
    pub fn new(source: RS) -> Result<Self> {
        let mut reader = Reader::from_reader(BufReader::new(source));
        let mut buf = Vec::with_capacity(1024);
        let mut declared = None;
        let mut finished = false;

        // Locate the sst root. An empty or absent part is a zero-entry
        // table, not an error: many writers omit it entirely.
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                    if e.local_name().as_ref() == b"sst" {
                        let mut count = None;
                        for attr in e.attributes().flatten() {
                            let key = attr.key.local_name();
                            match key.as_ref() {
                                b"uniqueCount" => {
                                    declared = atoi_simd::parse::<usize>(&attr.value).ok();
                                }
                                b"count" => {
                                    count = atoi_simd::parse::<usize>(&attr.value).ok();
                                }
                                _ => {}
                            }
                        }
                        if declared.is_none() {
                            declared = count;
                        }
                    }
                    break;
                }
                Ok(Event::Eof) => {
                    finished = true;
                    break;
                }
                Ok(_) => {}
                Err(e) => return Err(e.into()),
            }
            buf.clear();
        }
        buf.clear();

        Ok(SstScanner {
            reader,
            buf,
            declared,
            finished,
        })
    }

    /// Size hint from the root element, if the producer wrote one.
    pub fn declared_count(&self) -> Option<usize> {
        self.declared
    }

    /// Whether the end of the table has been reached.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Pull the next string, `None` once the table is exhausted.
    pub fn next_string(&mut self) -> Result<Option<String>> {
        if self.finished {
            return Ok(None);
        }
        loop {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf) {
                Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"si" => {
                    let text = self.read_si()?;
                    return Ok(Some(text));
                }
                Ok(Event::Empty(ref e)) if e.local_name().as_ref() == b"si" => {
                    return Ok(Some(String::new()));
                }
                Ok(Event::Eof) | Ok(Event::End(_)) => {
                    // </sst> or a truncated part both terminate the table.
                    self.finished = true;
                    return Ok(None);
                }
                Ok(_) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Consume one `<si>` body: flat `<t>`, or rich runs concatenated.
    fn read_si(&mut self) -> Result<String> {
        let mut text = String::new();
        let mut in_t = false;
        let mut skip_depth = 0usize;

        loop {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf) {
                Ok(Event::Start(ref e)) => {
                    if skip_depth > 0 {
                        skip_depth += 1;
                    } else {
                        match e.local_name().as_ref() {
                            b"t" => in_t = true,
                            // Phonetic hints are presentation-only.
                            b"rPh" | b"phoneticPr" => skip_depth = 1,
                            _ => {}
                        }
                    }
                }
                Ok(Event::Empty(_)) => {}
                Ok(Event::Text(ref t)) => {
                    if in_t && skip_depth == 0 {
                        unescape_into(t.as_ref(), &mut text);
                    }
                }
                Ok(Event::CData(ref t)) => {
                    if in_t && skip_depth == 0 {
                        text.push_str(&String::from_utf8_lossy(t.as_ref()));
                    }
                }
                // Entity and character references arrive as their own
                // events, split out of the surrounding text.
                Ok(Event::GeneralRef(ref r)) => {
                    if in_t && skip_depth == 0 {
                        let mut raw = Vec::with_capacity(r.len() + 2);
                        raw.push(b'&');
                        raw.extend_from_slice(r.as_ref());
                        raw.push(b';');
                        unescape_into(&raw, &mut text);
                    }
                }
                Ok(Event::End(ref e)) => {
                    if skip_depth > 0 {
                        skip_depth -= 1;
                    } else {
                        match e.local_name().as_ref() {
                            b"t" => in_t = false,
                            b"si" => return Ok(text),
                            _ => {}
                        }
                    }
                }
                Ok(Event::Eof) => {
                    return Err(SheetError::Xml("unterminated <si> entry".to_string()));
                }
                Ok(_) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_all(xml: &str) -> (Option<usize>, Vec<String>) {
        let mut scanner = SstScanner::new(xml.as_bytes()).unwrap();
        let declared = scanner.declared_count();
        let mut out = Vec::new();
        while let Some(s) = scanner.next_string().unwrap() {
            out.push(s);
        }
        (declared, out)
    }

    #[test]
    fn test_flat_strings() {
        let xml = r#"<?xml version="1.0"?>
            <sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="3" uniqueCount="3">
            <si><t>Alpha</t></si><si><t>Beta</t></si><si><t>Gamma</t></si></sst>"#;
        let (declared, strings) = scan_all(xml);
        assert_eq!(declared, Some(3));
        assert_eq!(strings, vec!["Alpha", "Beta", "Gamma"]);
    }

    #[test]
    fn test_count_fallback_spelling() {
        let xml = r#"<sst count="2"><si><t>a</t></si><si><t>b</t></si></sst>"#;
        let (declared, strings) = scan_all(xml);
        assert_eq!(declared, Some(2));
        assert_eq!(strings.len(), 2);
    }

    #[test]
    fn test_rich_runs_concatenated() {
        let xml = r#"<sst uniqueCount="1"><si>
            <r><rPr><b/></rPr><t>Hello </t></r>
            <r><t>world</t></r>
        </si></sst>"#;
        let (_, strings) = scan_all(xml);
        assert_eq!(strings, vec!["Hello world"]);
    }

    #[test]
    fn test_phonetic_runs_skipped() {
        let xml = r#"<sst uniqueCount="1"><si>
            <t>東京</t>
            <rPh sb="0" eb="2"><t>トウキョウ</t></rPh>
            <phoneticPr fontId="1"/>
        </si></sst>"#;
        let (_, strings) = scan_all(xml);
        assert_eq!(strings.len(), 1);
        assert_eq!(strings[0].trim(), "東京");
    }

    #[test]
    fn test_entities_and_empty_si() {
        let xml = r#"<sst uniqueCount="3"><si><t>a &amp; b &lt;c&gt;</t></si><si/><si><t/></si></sst>"#;
        let (_, strings) = scan_all(xml);
        assert_eq!(strings, vec!["a & b <c>", "", ""]);
    }

    #[test]
    fn test_character_references() {
        let xml = r#"<sst uniqueCount="2"><si><t>A&#66;&#x43;</t></si><si><t>Lima &amp; Callao</t></si></sst>"#;
        let (_, strings) = scan_all(xml);
        assert_eq!(strings, vec!["ABC", "Lima & Callao"]);
    }

    #[test]
    fn test_preserved_whitespace() {
        let xml = r#"<sst uniqueCount="1"><si><t xml:space="preserve">  padded  </t></si></sst>"#;
        let (_, strings) = scan_all(xml);
        assert_eq!(strings, vec!["  padded  "]);
    }

    #[test]
    fn test_empty_part() {
        let (declared, strings) = scan_all("");
        assert_eq!(declared, None);
        assert!(strings.is_empty());
    }

    #[test]
    fn test_no_declared_count() {
        let xml = r#"<sst><si><t>only</t></si></sst>"#;
        let (declared, strings) = scan_all(xml);
        assert_eq!(declared, None);
        assert_eq!(strings, vec!["only"]);
    }
}
