//! Shared strings table
//!
//! String cells reference a package-wide pool by index. The read side
//! collects the pool in appearance order; the write side interns strings
//! and serialises them in insertion order.

use crate::chunks::ByteChunk;
use crate::error::Result;
use crate::xml::reader::{XmlEvent, XmlTokenizer};
use crate::xml::writer::XmlWriter;
use indexmap::IndexSet;
use std::io::Write;

/// Parse `xl/sharedStrings.xml` into the indexed string pool.
///
/// Each `<si>` contributes one string: the concatenated text of all its
/// `<t>` descendants, which folds rich-text runs into their plain text.
/// Whitespace is kept verbatim.
pub fn parse_shared_strings<I>(chunks: I) -> Result<Vec<String>>
where
    I: Iterator<Item = Result<ByteChunk>>,
{
    let mut tokenizer = XmlTokenizer::new(chunks);
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;

    loop {
        match tokenizer.next_event()? {
            XmlEvent::Start(tag) => match tag.local() {
                "si" => current = Some(String::new()),
                "t" => in_text = current.is_some(),
                _ => {}
            },
            XmlEvent::Text(text) => {
                if in_text {
                    if let Some(s) = current.as_mut() {
                        s.push_str(&text);
                    }
                }
            }
            XmlEvent::End(name) => match crate::xml::local_name(&name) {
                "t" => in_text = false,
                "si" => {
                    if let Some(s) = current.take() {
                        strings.push(s);
                    }
                }
                _ => {}
            },
            XmlEvent::Eof => return Ok(strings),
        }
    }
}

/// Write-side interner with insertion-order emission.
pub struct SharedStringWriter {
    strings: IndexSet<String>,
    total_references: u64,
}

impl SharedStringWriter {
    pub fn new() -> Self {
        SharedStringWriter {
            strings: IndexSet::with_capacity(1024),
            total_references: 0,
        }
    }

    /// Intern a string and return its table index. Duplicates collapse to
    /// the first occurrence's index.
    pub fn intern(&mut self, text: &str) -> u32 {
        self.total_references += 1;
        if let Some(index) = self.strings.get_index_of(text) {
            return index as u32;
        }
        let (index, _) = self.strings.insert_full(text.to_string());
        index as u32
    }

    /// Number of unique strings
    pub fn unique_count(&self) -> usize {
        self.strings.len()
    }

    /// Serialise the table as `xl/sharedStrings.xml`.
    pub fn write_xml<W: Write>(&self, writer: &mut XmlWriter<W>) -> Result<()> {
        writer.declaration()?;
        writer.start_element("sst")?;
        writer.attribute(
            "xmlns",
            "http://schemas.openxmlformats.org/spreadsheetml/2006/main",
        )?;
        writer.attribute_int("count", self.total_references as i64)?;
        writer.attribute_int("uniqueCount", self.strings.len() as i64)?;
        writer.close_start_tag()?;

        for text in &self.strings {
            writer.start_element("si")?;
            writer.close_start_tag()?;
            writer.start_element("t")?;
            if needs_space_preserve(text) {
                writer.attribute("xml:space", "preserve")?;
            }
            writer.close_start_tag()?;
            writer.write_escaped(text)?;
            writer.end_element("t")?;
            writer.end_element("si")?;
        }

        writer.end_element("sst")?;
        writer.flush()?;
        Ok(())
    }
}

impl Default for SharedStringWriter {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn needs_space_preserve(text: &str) -> bool {
    text.starts_with(|c: char| c.is_ascii_whitespace())
        || text.ends_with(|c: char| c.is_ascii_whitespace())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::string_to_chunks;

    #[test]
    fn test_intern_deduplicates() {
        let mut table = SharedStringWriter::new();
        assert_eq!(table.intern("Hello"), 0);
        assert_eq!(table.intern("World"), 1);
        assert_eq!(table.intern("Hello"), 0);
        assert_eq!(table.unique_count(), 2);
    }

    #[test]
    fn test_write_then_parse() {
        let mut table = SharedStringWriter::new();
        table.intern("plain");
        table.intern("  padded  ");
        table.intern("a<b&c");

        let mut out = Vec::new();
        let mut writer = XmlWriter::new(&mut out);
        table.write_xml(&mut writer).unwrap();
        drop(writer);

        let xml = String::from_utf8(out).unwrap();
        assert!(xml.contains("count=\"3\""));
        assert!(xml.contains("uniqueCount=\"3\""));
        assert!(xml.contains("xml:space=\"preserve\""));

        let parsed = parse_shared_strings(string_to_chunks(&xml)).unwrap();
        assert_eq!(parsed, vec!["plain", "  padded  ", "a<b&c"]);
    }

    #[test]
    fn test_rich_text_runs_concatenate() {
        let xml = "<sst><si><r><t>Hello </t></r><r><rPr/><t>World</t></r></si>\
                   <si><t xml:space=\"preserve\"> x </t></si></sst>";
        let parsed = parse_shared_strings(string_to_chunks(xml)).unwrap();
        assert_eq!(parsed, vec!["Hello World", " x "]);
    }

    #[test]
    fn test_empty_si_is_empty_string() {
        let parsed =
            parse_shared_strings(string_to_chunks("<sst><si><t/></si></sst>")).unwrap();
        assert_eq!(parsed, vec![""]);
    }
}
