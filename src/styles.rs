//! Cell style support
//!
//! Styles matter to this codec for one reason: recognising which numeric
//! cells hold dates. The read side keeps each `cellXfs` record's number
//! format id and classifies the date formats; the write side emits a
//! minimal stylesheet with a general style and, when needed, one date
//! style.

use crate::chunks::ByteChunk;
use crate::error::Result;
use crate::xml::reader::{XmlEvent, XmlTokenizer};
use crate::xml::writer::XmlWriter;
use std::collections::HashSet;
use std::io::Write;

/// Number format id the writer uses for date cells (built-in short date).
pub const DATE_NUM_FMT_ID: u32 = 14;

/// Read-side style table: per-style number format ids plus the set of
/// format ids classified as dates.
#[derive(Debug, Default)]
pub struct StyleTable {
    xf_num_fmt: Vec<u32>,
    date_fmts: HashSet<u32>,
}

impl StyleTable {
    /// Number of `cellXfs` records.
    pub fn len(&self) -> usize {
        self.xf_num_fmt.len()
    }

    pub fn is_empty(&self) -> bool {
        self.xf_num_fmt.is_empty()
    }

    /// Whether the style index refers to a date number format.
    pub fn is_date(&self, style_index: usize) -> bool {
        self.xf_num_fmt
            .get(style_index)
            .is_some_and(|id| is_builtin_date_format(*id) || self.date_fmts.contains(id))
    }
}

/// Built-in number format ids that render as dates or times.
fn is_builtin_date_format(id: u32) -> bool {
    matches!(id, 14..=22 | 27..=36 | 45..=47 | 50..=58 | 71..=81)
}

/// Whether a custom format code contains a date token (`y`, `m`, `d`, `h`,
/// `s`) outside quoted literals, bracketed sections and escapes.
fn format_code_is_date(code: &str) -> bool {
    let mut chars = code.chars();
    let mut in_quotes = false;
    let mut in_brackets = false;
    while let Some(c) = chars.next() {
        match c {
            '"' => in_quotes = !in_quotes,
            _ if in_quotes => {}
            '[' => in_brackets = true,
            ']' => in_brackets = false,
            _ if in_brackets => {}
            '\\' => {
                chars.next();
            }
            'y' | 'Y' | 'm' | 'M' | 'd' | 'D' | 'h' | 'H' | 's' | 'S' => return true,
            _ => {}
        }
    }
    false
}

/// Parse `xl/styles.xml` into a [`StyleTable`].
pub fn parse_styles<I>(chunks: I) -> Result<StyleTable>
where
    I: Iterator<Item = Result<ByteChunk>>,
{
    let mut tokenizer = XmlTokenizer::new(chunks);
    let mut table = StyleTable::default();
    let mut in_cell_xfs = false;

    loop {
        match tokenizer.next_event()? {
            XmlEvent::Start(tag) => match tag.local() {
                "numFmt" => {
                    let id = tag.attr("numFmtId").and_then(|v| v.parse::<u32>().ok());
                    let code = tag.attr("formatCode");
                    if let (Some(id), Some(code)) = (id, code) {
                        if format_code_is_date(code) {
                            table.date_fmts.insert(id);
                        }
                    }
                }
                "cellXfs" => in_cell_xfs = true,
                "xf" if in_cell_xfs => {
                    let id = tag
                        .attr("numFmtId")
                        .and_then(|v| v.parse::<u32>().ok())
                        .unwrap_or(0);
                    table.xf_num_fmt.push(id);
                }
                _ => {}
            },
            XmlEvent::End(name) => {
                if crate::xml::local_name(&name) == "cellXfs" {
                    in_cell_xfs = false;
                }
            }
            XmlEvent::Text(_) => {}
            XmlEvent::Eof => return Ok(table),
        }
    }
}

/// Write-side style allocator: style 0 is the general style, the date
/// style is allocated on first use.
pub struct StyleWriter {
    date_style: Option<u32>,
}

impl StyleWriter {
    pub fn new() -> Self {
        StyleWriter { date_style: None }
    }

    /// Style index for date cells, allocating it on first call.
    pub fn date_style(&mut self) -> u32 {
        *self.date_style.get_or_insert(1)
    }

    /// Serialise the minimal stylesheet as `xl/styles.xml`.
    pub fn write_xml<W: Write>(&self, writer: &mut XmlWriter<W>) -> Result<()> {
        let xf_count = if self.date_style.is_some() { 2 } else { 1 };

        writer.declaration()?;
        writer.start_element("styleSheet")?;
        writer.attribute(
            "xmlns",
            "http://schemas.openxmlformats.org/spreadsheetml/2006/main",
        )?;
        writer.close_start_tag()?;

        writer.write_str("<fonts count=\"1\"><font><sz val=\"11\"/><name val=\"Calibri\"/><family val=\"2\"/></font></fonts>")?;
        writer.write_str("<fills count=\"2\"><fill><patternFill patternType=\"none\"/></fill><fill><patternFill patternType=\"gray125\"/></fill></fills>")?;
        writer.write_str("<borders count=\"1\"><border><left/><right/><top/><bottom/><diagonal/></border></borders>")?;
        writer.write_str("<cellStyleXfs count=\"1\"><xf numFmtId=\"0\" fontId=\"0\" fillId=\"0\" borderId=\"0\"/></cellStyleXfs>")?;

        writer.start_element("cellXfs")?;
        writer.attribute_int("count", xf_count)?;
        writer.close_start_tag()?;
        writer.write_str("<xf numFmtId=\"0\" fontId=\"0\" fillId=\"0\" borderId=\"0\" xfId=\"0\"/>")?;
        if self.date_style.is_some() {
            writer.start_element("xf")?;
            writer.attribute_int("numFmtId", DATE_NUM_FMT_ID as i64)?;
            writer.attribute("fontId", "0")?;
            writer.attribute("fillId", "0")?;
            writer.attribute("borderId", "0")?;
            writer.attribute("xfId", "0")?;
            writer.attribute("applyNumberFormat", "1")?;
            writer.close_empty()?;
        }
        writer.end_element("cellXfs")?;

        writer.write_str("<cellStyles count=\"1\"><cellStyle name=\"Normal\" xfId=\"0\" builtinId=\"0\"/></cellStyles>")?;
        writer.end_element("styleSheet")?;
        writer.flush()?;
        Ok(())
    }
}

impl Default for StyleWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::string_to_chunks;

    #[test]
    fn test_builtin_date_ranges() {
        for id in [14, 22, 27, 36, 45, 47, 50, 58, 71, 81] {
            assert!(is_builtin_date_format(id), "{} should be a date", id);
        }
        for id in [0, 1, 2, 9, 13, 23, 26, 37, 44, 48, 49, 59, 70, 82, 164] {
            assert!(!is_builtin_date_format(id), "{} should not be a date", id);
        }
    }

    #[test]
    fn test_custom_format_classification() {
        assert!(format_code_is_date("yyyy-mm-dd"));
        assert!(format_code_is_date("[$-409]d-mmm-yy"));
        assert!(format_code_is_date("hh:mm:ss"));
        assert!(!format_code_is_date("#,##0.00"));
        assert!(!format_code_is_date("0.00%"));
        assert!(!format_code_is_date("\"mode\" 0"));
        assert!(!format_code_is_date("0\\m"));
        assert!(!format_code_is_date("[h]"));
    }

    #[test]
    fn test_parse_styles() {
        let xml = r#"<styleSheet>
            <numFmts count="1"><numFmt numFmtId="164" formatCode="yyyy\-mm"/></numFmts>
            <cellStyleXfs count="1"><xf numFmtId="0"/></cellStyleXfs>
            <cellXfs count="3">
                <xf numFmtId="0"/>
                <xf numFmtId="14"/>
                <xf numFmtId="164"/>
            </cellXfs>
        </styleSheet>"#;
        let table = parse_styles(string_to_chunks(xml)).unwrap();
        assert_eq!(table.len(), 3);
        assert!(!table.is_date(0));
        assert!(table.is_date(1));
        assert!(table.is_date(2));
        assert!(!table.is_date(3));
    }

    #[test]
    fn test_writer_allocates_date_style_once() {
        let mut styles = StyleWriter::new();
        assert_eq!(styles.date_style(), 1);
        assert_eq!(styles.date_style(), 1);

        let mut out = Vec::new();
        let mut writer = XmlWriter::new(&mut out);
        styles.write_xml(&mut writer).unwrap();
        drop(writer);
        let xml = String::from_utf8(out).unwrap();
        assert!(xml.contains("count=\"2\""));
        assert!(xml.contains("numFmtId=\"14\""));

        let table = parse_styles(string_to_chunks(&xml)).unwrap();
        assert!(!table.is_date(0));
        assert!(table.is_date(1));
    }

    #[test]
    fn test_writer_without_dates() {
        let styles = StyleWriter::new();
        let mut out = Vec::new();
        let mut writer = XmlWriter::new(&mut out);
        styles.write_xml(&mut writer).unwrap();
        drop(writer);
        let xml = String::from_utf8(out).unwrap();
        let table = parse_styles(string_to_chunks(&xml)).unwrap();
        assert_eq!(table.len(), 1);
        assert!(!table.is_date(0));
    }
}
