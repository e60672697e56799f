//! Sheet write pipeline
//!
//! Rows stream straight into the deflated worksheet entry as they are
//! written; strings are interned into the shared strings table and date
//! cells allocate the date style on first use. The shared parts and the
//! package metadata are emitted when the workbook is finished.

use crate::cellref::cell_ref;
use crate::dates::{datetime_to_serial, DateEpoch};
use crate::error::{Result, XlsxError};
use crate::shared_strings::{needs_space_preserve, SharedStringWriter};
use crate::styles::StyleWriter;
use crate::types::{CellValue, Row};
use crate::xml::writer::XmlWriter;
use crate::zip::writer::ZipWriter;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Options controlling how a workbook is written
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Date epoch the workbook declares and date cells are serialised with
    pub epoch: DateEpoch,
    /// Deflate level for archive entries (0-9, default 6)
    pub compression_level: u32,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            epoch: DateEpoch::Date1900,
            compression_level: 6,
        }
    }
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epoch(mut self, epoch: DateEpoch) -> Self {
        self.epoch = epoch;
        self
    }

    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }
}

/// Streaming workbook writer
///
/// Rows are written to the current sheet as they arrive; memory usage is
/// bounded by the shared strings table, not the row count.
pub struct WorkbookWriter<W: Write> {
    zip: ZipWriter<W>,
    shared: SharedStringWriter,
    styles: StyleWriter,
    sheet_names: Vec<String>,
    epoch: DateEpoch,
    sheet_open: bool,
    last_row: u32,
    xml_buffer: Vec<u8>,
}

impl WorkbookWriter<BufWriter<File>> {
    /// Create a workbook file with default options.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = BufWriter::with_capacity(64 * 1024, File::create(path)?);
        Ok(Self::new(file))
    }
}

impl<W: Write> WorkbookWriter<W> {
    /// Write a workbook to any sink with default options.
    pub fn new(sink: W) -> Self {
        Self::with_options(sink, WriteOptions::default())
    }

    pub fn with_options(sink: W, options: WriteOptions) -> Self {
        WorkbookWriter {
            zip: ZipWriter::with_compression_level(sink, options.compression_level),
            shared: SharedStringWriter::new(),
            styles: StyleWriter::new(),
            sheet_names: Vec::new(),
            epoch: options.epoch,
            sheet_open: false,
            last_row: 0,
            xml_buffer: Vec::with_capacity(8192),
        }
    }

    /// Start a new sheet and make it current.
    pub fn add_sheet(&mut self, name: &str) -> Result<()> {
        if self.sheet_names.iter().any(|n| n == name) {
            return Err(XlsxError::DuplicateEntry(name.to_string()));
        }
        self.finish_open_sheet()?;

        self.sheet_names.push(name.to_string());
        let part = format!("xl/worksheets/sheet{}.xml", self.sheet_names.len());
        self.zip.start_entry(&part)?;

        let mut xml = XmlWriter::new(&mut self.zip);
        xml.declaration()?;
        xml.start_element("worksheet")?;
        xml.attribute(
            "xmlns",
            "http://schemas.openxmlformats.org/spreadsheetml/2006/main",
        )?;
        xml.attribute(
            "xmlns:r",
            "http://schemas.openxmlformats.org/officeDocument/2006/relationships",
        )?;
        xml.close_start_tag()?;
        xml.write_str("<sheetViews><sheetView")?;
        if self.sheet_names.len() == 1 {
            xml.write_str(" tabSelected=\"1\"")?;
        }
        xml.write_str(" workbookViewId=\"0\"/></sheetViews>")?;
        xml.write_str("<sheetFormatPr defaultRowHeight=\"15\"/>")?;
        xml.write_str("<sheetData>")?;
        xml.flush()?;

        self.sheet_open = true;
        self.last_row = 0;
        Ok(())
    }

    /// Write one row to the current sheet.
    ///
    /// An explicit row index must exceed the previously emitted one;
    /// without one the row lands directly below its predecessor. Cell
    /// values are validated before anything is emitted.
    pub fn write_row(&mut self, row: &Row) -> Result<()> {
        if !self.sheet_open {
            return Err(XlsxError::WriteError(
                "no sheet started; call add_sheet first".to_string(),
            ));
        }

        let row_index = match row.index {
            Some(index) => {
                if index <= self.last_row {
                    return Err(XlsxError::InvalidCellReference(format!(
                        "row index {} does not follow row {}",
                        index, self.last_row
                    )));
                }
                index
            }
            None => self.last_row + 1,
        };
        validate_cells(row)?;
        self.last_row = row_index;

        let mut itoa_buf = itoa::Buffer::new();
        let mut ryu_buf = ryu::Buffer::new();
        self.xml_buffer.clear();
        self.xml_buffer.extend_from_slice(b"<row r=\"");
        self.xml_buffer
            .extend_from_slice(itoa_buf.format(row_index).as_bytes());
        self.xml_buffer.extend_from_slice(b"\">");

        let mut last_column: Option<u32> = None;
        for cell in &row.cells {
            let column = match cell.column {
                Some(column) => column,
                None => last_column.map_or(0, |c| c + 1),
            };
            last_column = Some(column);
            if cell.value.is_empty() {
                continue;
            }
            let reference = cell_ref(row_index, column);

            match &cell.value {
                CellValue::Empty => unreachable!("empty cells are skipped"),
                CellValue::String(text) => {
                    let index = self.shared.intern(text);
                    self.open_cell(&reference, None, Some("s"));
                    self.xml_buffer.extend_from_slice(b"><v>");
                    self.xml_buffer
                        .extend_from_slice(itoa_buf.format(index).as_bytes());
                    self.xml_buffer.extend_from_slice(b"</v></c>");
                }
                CellValue::InlineString(text) => {
                    self.open_cell(&reference, None, Some("inlineStr"));
                    self.xml_buffer.extend_from_slice(b"><is><t");
                    if needs_space_preserve(text) {
                        self.xml_buffer
                            .extend_from_slice(b" xml:space=\"preserve\"");
                    }
                    self.xml_buffer.push(b'>');
                    escape_into(&mut self.xml_buffer, text);
                    self.xml_buffer.extend_from_slice(b"</t></is></c>");
                }
                CellValue::Number(number) => {
                    self.open_cell(&reference, None, None);
                    self.xml_buffer.extend_from_slice(b"><v>");
                    format_number(&mut self.xml_buffer, *number, &mut itoa_buf, &mut ryu_buf);
                    self.xml_buffer.extend_from_slice(b"</v></c>");
                }
                CellValue::DateTime(instant) => {
                    let serial = datetime_to_serial(*instant, self.epoch);
                    let style = self.styles.date_style();
                    self.open_cell(&reference, Some(style), None);
                    self.xml_buffer.extend_from_slice(b"><v>");
                    format_number(&mut self.xml_buffer, serial, &mut itoa_buf, &mut ryu_buf);
                    self.xml_buffer.extend_from_slice(b"</v></c>");
                }
                CellValue::Bool(value) => {
                    self.open_cell(&reference, None, Some("b"));
                    self.xml_buffer.extend_from_slice(b"><v>");
                    self.xml_buffer
                        .extend_from_slice(if *value { b"1" } else { b"0" });
                    self.xml_buffer.extend_from_slice(b"</v></c>");
                }
                CellValue::Error(code) => {
                    self.open_cell(&reference, None, Some("e"));
                    self.xml_buffer.extend_from_slice(b"><v>");
                    escape_into(&mut self.xml_buffer, code);
                    self.xml_buffer.extend_from_slice(b"</v></c>");
                }
            }
        }

        self.xml_buffer.extend_from_slice(b"</row>");
        self.zip.write_data(&self.xml_buffer)?;
        Ok(())
    }

    /// Write a row of plain values below the previous row.
    pub fn write_values<I, V>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = V>,
        V: Into<CellValue>,
    {
        self.write_row(&Row::from_values(values))
    }

    /// Open a `<c>` tag with reference and optional style / type attributes,
    /// leaving the tag unclosed.
    fn open_cell(&mut self, reference: &str, style: Option<u32>, cell_type: Option<&str>) {
        self.xml_buffer.extend_from_slice(b"<c r=\"");
        self.xml_buffer.extend_from_slice(reference.as_bytes());
        self.xml_buffer.push(b'"');
        if let Some(style) = style {
            let mut buf = itoa::Buffer::new();
            self.xml_buffer.extend_from_slice(b" s=\"");
            self.xml_buffer.extend_from_slice(buf.format(style).as_bytes());
            self.xml_buffer.push(b'"');
        }
        if let Some(t) = cell_type {
            self.xml_buffer.extend_from_slice(b" t=\"");
            self.xml_buffer.extend_from_slice(t.as_bytes());
            self.xml_buffer.push(b'"');
        }
    }

    fn finish_open_sheet(&mut self) -> Result<()> {
        if !self.sheet_open {
            return Ok(());
        }
        self.zip.write_data(b"</sheetData></worksheet>")?;
        self.sheet_open = false;
        Ok(())
    }

    /// Finalise the package: shared parts, workbook metadata, central
    /// directory. Returns the sink.
    pub fn finish(mut self) -> Result<W> {
        self.finish_open_sheet()?;

        self.zip.start_entry("xl/sharedStrings.xml")?;
        let mut xml = XmlWriter::new(&mut self.zip);
        self.shared.write_xml(&mut xml)?;

        self.zip.start_entry("xl/styles.xml")?;
        let mut xml = XmlWriter::new(&mut self.zip);
        self.styles.write_xml(&mut xml)?;

        self.zip.start_entry("xl/workbook.xml")?;
        self.write_workbook_part()?;

        self.zip.start_entry("xl/_rels/workbook.xml.rels")?;
        self.write_workbook_rels()?;

        self.zip.start_entry("docProps/core.xml")?;
        self.zip.write_data(CORE_PROPS_XML.as_bytes())?;

        self.zip.start_entry("docProps/app.xml")?;
        self.zip.write_data(APP_PROPS_XML.as_bytes())?;

        self.zip.start_entry("_rels/.rels")?;
        self.zip.write_data(ROOT_RELS_XML.as_bytes())?;

        self.zip.start_entry("[Content_Types].xml")?;
        self.write_content_types()?;

        self.zip.finish()
    }

    fn write_workbook_part(&mut self) -> Result<()> {
        let date1904 = self.epoch == DateEpoch::Date1904;
        let mut xml = XmlWriter::new(&mut self.zip);
        xml.declaration()?;
        xml.start_element("workbook")?;
        xml.attribute(
            "xmlns",
            "http://schemas.openxmlformats.org/spreadsheetml/2006/main",
        )?;
        xml.attribute(
            "xmlns:r",
            "http://schemas.openxmlformats.org/officeDocument/2006/relationships",
        )?;
        xml.close_start_tag()?;
        if date1904 {
            xml.write_str("<workbookPr date1904=\"1\"/>")?;
        } else {
            xml.write_str("<workbookPr/>")?;
        }
        xml.write_str("<sheets>")?;
        for (position, name) in self.sheet_names.iter().enumerate() {
            let sheet_id = position + 1;
            xml.start_element("sheet")?;
            xml.attribute("name", name)?;
            xml.attribute_int("sheetId", sheet_id as i64)?;
            xml.attribute("r:id", &format!("rId{}", sheet_id))?;
            xml.close_empty()?;
        }
        xml.write_str("</sheets>")?;
        xml.end_element("workbook")?;
        xml.flush()?;
        Ok(())
    }

    fn write_workbook_rels(&mut self) -> Result<()> {
        let sheet_count = self.sheet_names.len();
        let mut xml = XmlWriter::new(&mut self.zip);
        xml.declaration()?;
        xml.start_element("Relationships")?;
        xml.attribute(
            "xmlns",
            "http://schemas.openxmlformats.org/package/2006/relationships",
        )?;
        xml.close_start_tag()?;
        for position in 0..sheet_count {
            xml.start_element("Relationship")?;
            xml.attribute("Id", &format!("rId{}", position + 1))?;
            xml.attribute(
                "Type",
                "http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet",
            )?;
            xml.attribute("Target", &format!("worksheets/sheet{}.xml", position + 1))?;
            xml.close_empty()?;
        }
        xml.start_element("Relationship")?;
        xml.attribute("Id", &format!("rId{}", sheet_count + 1))?;
        xml.attribute(
            "Type",
            "http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles",
        )?;
        xml.attribute("Target", "styles.xml")?;
        xml.close_empty()?;
        xml.start_element("Relationship")?;
        xml.attribute("Id", &format!("rId{}", sheet_count + 2))?;
        xml.attribute(
            "Type",
            "http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings",
        )?;
        xml.attribute("Target", "sharedStrings.xml")?;
        xml.close_empty()?;
        xml.end_element("Relationships")?;
        xml.flush()?;
        Ok(())
    }

    fn write_content_types(&mut self) -> Result<()> {
        let sheet_count = self.sheet_names.len();
        let mut xml = XmlWriter::new(&mut self.zip);
        xml.declaration()?;
        xml.start_element("Types")?;
        xml.attribute(
            "xmlns",
            "http://schemas.openxmlformats.org/package/2006/content-types",
        )?;
        xml.close_start_tag()?;

        xml.write_str("<Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/>")?;
        xml.write_str("<Default Extension=\"xml\" ContentType=\"application/xml\"/>")?;
        xml.write_str("<Override PartName=\"/docProps/app.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.extended-properties+xml\"/>")?;
        xml.write_str("<Override PartName=\"/docProps/core.xml\" ContentType=\"application/vnd.openxmlformats-package.core-properties+xml\"/>")?;
        xml.write_str("<Override PartName=\"/xl/styles.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml\"/>")?;
        xml.write_str("<Override PartName=\"/xl/workbook.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml\"/>")?;
        for position in 0..sheet_count {
            xml.start_element("Override")?;
            xml.attribute(
                "PartName",
                &format!("/xl/worksheets/sheet{}.xml", position + 1),
            )?;
            xml.attribute(
                "ContentType",
                "application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml",
            )?;
            xml.close_empty()?;
        }
        xml.write_str("<Override PartName=\"/xl/sharedStrings.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml\"/>")?;
        xml.end_element("Types")?;
        xml.flush()?;
        Ok(())
    }
}

/// Eager validation: reject values the format cannot carry and cells whose
/// explicit columns break the ordering invariant.
fn validate_cells(row: &Row) -> Result<()> {
    let mut last_column: Option<u32> = None;
    for cell in &row.cells {
        let column = match cell.column {
            Some(column) => {
                if last_column.is_some_and(|prev| column <= prev) {
                    return Err(XlsxError::InvalidCellReference(format!(
                        "cell column {} does not follow column {}",
                        column,
                        last_column.unwrap()
                    )));
                }
                column
            }
            None => last_column.map_or(0, |c| c + 1),
        };
        last_column = Some(column);

        match &cell.value {
            CellValue::Number(n) if !n.is_finite() => {
                return Err(XlsxError::WriteError(format!(
                    "non-finite number {} in row",
                    n
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Compact decimal text: integral doubles print without a fraction, the
/// rest go through ryu's shortest round-trip form.
fn format_number(
    out: &mut Vec<u8>,
    number: f64,
    itoa_buf: &mut itoa::Buffer,
    ryu_buf: &mut ryu::Buffer,
) {
    const INTEGRAL_LIMIT: f64 = 9_007_199_254_740_992.0; // 2^53
    if number.fract() == 0.0 && number.abs() < INTEGRAL_LIMIT {
        out.extend_from_slice(itoa_buf.format(number as i64).as_bytes());
    } else {
        out.extend_from_slice(ryu_buf.format(number).as_bytes());
    }
}

fn escape_into(out: &mut Vec<u8>, text: &str) {
    for byte in text.bytes() {
        match byte {
            b'&' => out.extend_from_slice(b"&amp;"),
            b'<' => out.extend_from_slice(b"&lt;"),
            b'>' => out.extend_from_slice(b"&gt;"),
            b'"' => out.extend_from_slice(b"&quot;"),
            b'\t' => out.extend_from_slice(b"&#9;"),
            b'\n' => out.extend_from_slice(b"&#10;"),
            b'\r' => out.extend_from_slice(b"&#13;"),
            0x00..=0x1f => {}
            _ => out.push(byte),
        }
    }
}

const ROOT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/><Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/extended-properties" Target="docProps/app.xml"/></Relationships>"#;

const CORE_PROPS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:dcterms="http://purl.org/dc/terms/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
<dc:creator>xlsxstream</dc:creator>
<cp:lastModifiedBy>xlsxstream</cp:lastModifiedBy>
<dcterms:created xsi:type="dcterms:W3CDTF">2024-01-01T00:00:00Z</dcterms:created>
<dcterms:modified xsi:type="dcterms:W3CDTF">2024-01-01T00:00:00Z</dcterms:modified>
</cp:coreProperties>"#;

const APP_PROPS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Properties xmlns="http://schemas.openxmlformats.org/officeDocument/2006/extended-properties">
<Application>xlsxstream</Application>
<DocSecurity>0</DocSecurity>
<ScaleCrop>false</ScaleCrop>
<LinksUpToDate>false</LinksUpToDate>
<SharedDoc>false</SharedDoc>
<HyperlinksChanged>false</HyperlinksChanged>
<AppVersion>1.0</AppVersion>
</Properties>"#;

/// One sheet of a [`write_xlsx`] call: a name and a lazily pulled row
/// sequence.
pub struct SheetSpec {
    pub name: String,
    pub rows: Box<dyn Iterator<Item = Row>>,
}

impl SheetSpec {
    pub fn new<I>(name: impl Into<String>, rows: I) -> Self
    where
        I: IntoIterator<Item = Row>,
        I::IntoIter: 'static,
    {
        SheetSpec {
            name: name.into(),
            rows: Box::new(rows.into_iter()),
        }
    }
}

/// Everything [`write_xlsx`] needs: the ordered sheets and the date epoch.
#[derive(Default)]
pub struct WorkbookSpec {
    pub sheets: Vec<SheetSpec>,
    pub epoch: DateEpoch,
}

impl WorkbookSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sheet(mut self, sheet: SheetSpec) -> Self {
        self.sheets.push(sheet);
        self
    }

    pub fn epoch(mut self, epoch: DateEpoch) -> Self {
        self.epoch = epoch;
        self
    }
}

/// Write a whole workbook to a sink, pulling each sheet's rows on demand.
pub fn write_xlsx<W: Write>(sink: W, spec: WorkbookSpec) -> Result<W> {
    let options = WriteOptions::default().epoch(spec.epoch);
    let mut writer = WorkbookWriter::with_options(sink, options);
    for sheet in spec.sheets {
        writer.add_sheet(&sheet.name)?;
        for row in sheet.rows {
            writer.write_row(&row)?;
        }
    }
    writer.finish()
}
