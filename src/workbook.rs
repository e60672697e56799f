//! Workbook model and read-side entry points
//!
//! Opening a package parses `[Content_Types].xml`, the package
//! relationships, the workbook part and its relationships into an ordered
//! sheet list, then loads the shared strings and style tables. Sheets are
//! exposed as handles whose row iteration restarts from the archive on
//! every call.

use crate::dates::DateEpoch;
use crate::error::{Result, XlsxError};
use crate::shared_strings::parse_shared_strings;
use crate::sheet_reader::RowIter;
use crate::styles::{parse_styles, StyleTable};
use crate::xml::reader::{XmlEvent, XmlTokenizer};
use crate::zip::reader::ZipReader;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;

const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
const ROOT_RELS_PART: &str = "_rels/.rels";
const WORKBOOK_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml";

/// Options controlling how a workbook is read
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Drop rows whose cells are all empty (default true)
    pub skip_empty_rows: bool,
    /// Force the 1904 date system on or off; `None` follows the workbook's
    /// own `date1904` flag
    pub use_1904_dates: Option<bool>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            skip_empty_rows: true,
            use_1904_dates: None,
        }
    }
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip_empty_rows(mut self, skip: bool) -> Self {
        self.skip_empty_rows = skip;
        self
    }

    pub fn use_1904_dates(mut self, use_1904: bool) -> Self {
        self.use_1904_dates = Some(use_1904);
        self
    }
}

/// Visibility state of a sheet tab
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SheetVisibility {
    #[default]
    Visible,
    Hidden,
    VeryHidden,
}

/// One sheet as declared by the workbook part
#[derive(Debug, Clone)]
pub struct SheetDescriptor {
    /// Sheet name shown on the tab
    pub name: String,
    /// The workbook-assigned sheet id
    pub sheet_id: u32,
    /// Relationship id linking to the worksheet part
    pub rel_id: String,
    /// Archive path of the worksheet part
    pub part_path: String,
    /// Tab visibility
    pub visibility: SheetVisibility,
}

/// An open workbook: the archive plus the parsed sheet list and the shared
/// resources every sheet read joins against.
pub struct Workbook<R: Read + Seek> {
    archive: ZipReader<R>,
    sheets: Vec<SheetDescriptor>,
    strings: Vec<String>,
    styles: StyleTable,
    epoch: DateEpoch,
    options: ReadOptions,
}

/// Open a workbook from any seekable byte source.
pub fn read_xlsx<R: Read + Seek>(source: R, options: ReadOptions) -> Result<Workbook<R>> {
    Workbook::from_source(source, options)
}

impl Workbook<BufReader<File>> {
    /// Open a workbook file with default options.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_options(path, ReadOptions::default())
    }

    pub fn open_with_options<P: AsRef<Path>>(path: P, options: ReadOptions) -> Result<Self> {
        let file = BufReader::new(File::open(path)?);
        Workbook::from_source(file, options)
    }
}

impl Workbook<Cursor<Vec<u8>>> {
    /// Open a workbook held in memory.
    pub fn from_bytes(bytes: Vec<u8>, options: ReadOptions) -> Result<Self> {
        Workbook::from_source(Cursor::new(bytes), options)
    }

    /// Buffer a chunk stream and open it as a workbook.
    pub fn from_chunks<I>(chunks: I, options: ReadOptions) -> Result<Self>
    where
        I: IntoIterator<Item = Result<crate::chunks::ByteChunk>>,
    {
        Self::from_bytes(crate::chunks::chunks_to_buffer(chunks)?, options)
    }
}

impl<R: Read + Seek> Workbook<R> {
    /// Parse the package structure of a seekable source.
    pub fn from_source(source: R, options: ReadOptions) -> Result<Self> {
        let mut archive = ZipReader::new(source)?;

        let content_types = parse_content_types(&mut archive)?;
        let workbook_part = find_workbook_part(&mut archive, &content_types)?;
        let parsed = parse_workbook_part(&mut archive, &workbook_part)?;
        let rels = parse_workbook_rels(&mut archive, &workbook_part)?;
        let base_dir = part_directory(&workbook_part);

        let mut sheets = Vec::with_capacity(parsed.sheets.len());
        for declared in parsed.sheets {
            let target = rels.get(&declared.rel_id).ok_or_else(|| {
                XlsxError::MissingRequiredPart(format!(
                    "worksheet part for relationship '{}'",
                    declared.rel_id
                ))
            })?;
            sheets.push(SheetDescriptor {
                part_path: resolve_target(base_dir, &target.target),
                name: declared.name,
                sheet_id: declared.sheet_id,
                rel_id: declared.rel_id,
                visibility: declared.visibility,
            });
        }

        let strings = match part_by_rel_type(&rels, base_dir, "sharedStrings", "xl/sharedStrings.xml")
        {
            Some(path) if archive.contains(&path) => {
                parse_shared_strings(archive.entry_chunks(&path)?)?
            }
            _ => Vec::new(),
        };
        let styles = match part_by_rel_type(&rels, base_dir, "styles", "xl/styles.xml") {
            Some(path) if archive.contains(&path) => parse_styles(archive.entry_chunks(&path)?)?,
            _ => StyleTable::default(),
        };

        let epoch = match options.use_1904_dates {
            Some(true) => DateEpoch::Date1904,
            Some(false) => DateEpoch::Date1900,
            None if parsed.date1904 => DateEpoch::Date1904,
            None => DateEpoch::Date1900,
        };

        Ok(Workbook {
            archive,
            sheets,
            strings,
            styles,
            epoch,
            options,
        })
    }

    /// Sheet descriptors in workbook order.
    pub fn sheets(&self) -> &[SheetDescriptor] {
        &self.sheets
    }

    /// Names of all sheets in workbook order.
    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    /// The date epoch rows are decoded with.
    pub fn epoch(&self) -> DateEpoch {
        self.epoch
    }

    /// The shared strings table, in table order.
    pub fn shared_strings(&self) -> &[String] {
        &self.strings
    }

    /// Look up a sheet handle by name.
    pub fn sheet(&mut self, name: &str) -> Result<Sheet<'_, R>> {
        let index = self
            .sheets
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| XlsxError::SheetNotFound {
                sheet: name.to_string(),
                available: self.sheet_names().join(", "),
            })?;
        Ok(Sheet {
            workbook: self,
            index,
        })
    }

    /// Sheet handle by position in workbook order.
    pub fn sheet_at(&mut self, index: usize) -> Result<Sheet<'_, R>> {
        if index >= self.sheets.len() {
            return Err(XlsxError::SheetNotFound {
                sheet: format!("index {}", index),
                available: self.sheet_names().join(", "),
            });
        }
        Ok(Sheet {
            workbook: self,
            index,
        })
    }

    /// Iterate the rows of a sheet by name.
    pub fn rows(&mut self, name: &str) -> Result<RowIter<'_, R>> {
        let index = self
            .sheets
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| XlsxError::SheetNotFound {
                sheet: name.to_string(),
                available: self.sheet_names().join(", "),
            })?;
        self.rows_at(index)
    }

    fn rows_at(&mut self, index: usize) -> Result<RowIter<'_, R>> {
        let part = self.sheets[index].part_path.clone();
        if !self.archive.contains(&part) {
            return Err(XlsxError::MissingRequiredPart(part));
        }
        let epoch = self.epoch;
        let skip_empty_rows = self.options.skip_empty_rows;
        let chunks = self.archive.entry_chunks(&part)?;
        Ok(RowIter::new(
            chunks,
            &self.strings,
            &self.styles,
            epoch,
            skip_empty_rows,
        ))
    }
}

/// Handle to one sheet of an open workbook.
///
/// Holds the workbook mutably because row iteration seeks the shared
/// archive source; drop the handle (or the iterator) to move to another
/// sheet.
pub struct Sheet<'wb, R: Read + Seek> {
    workbook: &'wb mut Workbook<R>,
    index: usize,
}

impl<R: Read + Seek> Sheet<'_, R> {
    /// Sheet name
    pub fn name(&self) -> &str {
        &self.workbook.sheets[self.index].name
    }

    /// The descriptor this handle was resolved from
    pub fn descriptor(&self) -> &SheetDescriptor {
        &self.workbook.sheets[self.index]
    }

    /// Iterate the sheet's rows from the top.
    ///
    /// May be called repeatedly; every call restarts parsing of the
    /// worksheet part.
    pub fn rows(&mut self) -> Result<RowIter<'_, R>> {
        self.workbook.rows_at(self.index)
    }
}

struct DeclaredSheet {
    name: String,
    sheet_id: u32,
    rel_id: String,
    visibility: SheetVisibility,
}

struct ParsedWorkbook {
    sheets: Vec<DeclaredSheet>,
    date1904: bool,
}

#[derive(Debug)]
struct Relationship {
    rel_type: String,
    target: String,
}

struct ContentTypes {
    overrides: HashMap<String, String>,
}

fn parse_content_types<R: Read + Seek>(archive: &mut ZipReader<R>) -> Result<ContentTypes> {
    if !archive.contains(CONTENT_TYPES_PART) {
        return Err(XlsxError::MissingRequiredPart(CONTENT_TYPES_PART.into()));
    }
    let mut tokenizer = XmlTokenizer::new(archive.entry_chunks(CONTENT_TYPES_PART)?);
    let mut overrides = HashMap::new();
    loop {
        match tokenizer.next_event()? {
            XmlEvent::Start(tag) if tag.local() == "Override" => {
                if let (Some(part), Some(kind)) = (tag.attr("PartName"), tag.attr("ContentType")) {
                    overrides.insert(part.trim_start_matches('/').to_string(), kind.to_string());
                }
            }
            XmlEvent::Eof => return Ok(ContentTypes { overrides }),
            _ => {}
        }
    }
}

/// Resolve the workbook part: the package-level officeDocument
/// relationship, falling back to the content-types override.
fn find_workbook_part<R: Read + Seek>(
    archive: &mut ZipReader<R>,
    content_types: &ContentTypes,
) -> Result<String> {
    if archive.contains(ROOT_RELS_PART) {
        let rels = parse_relationships(archive, ROOT_RELS_PART)?;
        if let Some(rel) = rels
            .values()
            .find(|r| rel_type_suffix(&r.rel_type) == "officeDocument")
        {
            return Ok(resolve_target("", &rel.target));
        }
    }
    content_types
        .overrides
        .iter()
        .find(|(_, kind)| kind.as_str() == WORKBOOK_CONTENT_TYPE)
        .map(|(part, _)| part.clone())
        .ok_or_else(|| XlsxError::MissingRequiredPart("xl/workbook.xml".into()))
}

fn parse_workbook_part<R: Read + Seek>(
    archive: &mut ZipReader<R>,
    workbook_part: &str,
) -> Result<ParsedWorkbook> {
    if !archive.contains(workbook_part) {
        return Err(XlsxError::MissingRequiredPart(workbook_part.to_string()));
    }
    let mut tokenizer = XmlTokenizer::new(archive.entry_chunks(workbook_part)?);
    let mut sheets = Vec::new();
    let mut date1904 = false;
    loop {
        match tokenizer.next_event()? {
            XmlEvent::Start(tag) => match tag.local() {
                "workbookPr" => {
                    date1904 = matches!(tag.attr("date1904"), Some("1") | Some("true"));
                }
                "sheet" => {
                    let name = tag
                        .attr("name")
                        .ok_or_else(|| XlsxError::MalformedXml("sheet without name".into()))?
                        .to_string();
                    let rel_id = tag
                        .attr_local("id")
                        .ok_or_else(|| XlsxError::MalformedXml("sheet without r:id".into()))?
                        .to_string();
                    let sheet_id = tag
                        .attr("sheetId")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(sheets.len() as u32 + 1);
                    let visibility = match tag.attr("state") {
                        Some("hidden") => SheetVisibility::Hidden,
                        Some("veryHidden") => SheetVisibility::VeryHidden,
                        _ => SheetVisibility::Visible,
                    };
                    sheets.push(DeclaredSheet {
                        name,
                        sheet_id,
                        rel_id,
                        visibility,
                    });
                }
                _ => {}
            },
            XmlEvent::Eof => return Ok(ParsedWorkbook { sheets, date1904 }),
            _ => {}
        }
    }
}

fn parse_workbook_rels<R: Read + Seek>(
    archive: &mut ZipReader<R>,
    workbook_part: &str,
) -> Result<HashMap<String, Relationship>> {
    let dir = part_directory(workbook_part);
    let file = workbook_part.rsplit('/').next().unwrap_or(workbook_part);
    let rels_part = if dir.is_empty() {
        format!("_rels/{}.rels", file)
    } else {
        format!("{}/_rels/{}.rels", dir, file)
    };
    if !archive.contains(&rels_part) {
        return Err(XlsxError::MissingRequiredPart(rels_part));
    }
    parse_relationships(archive, &rels_part)
}

fn parse_relationships<R: Read + Seek>(
    archive: &mut ZipReader<R>,
    part: &str,
) -> Result<HashMap<String, Relationship>> {
    let mut tokenizer = XmlTokenizer::new(archive.entry_chunks(part)?);
    let mut rels = HashMap::new();
    loop {
        match tokenizer.next_event()? {
            XmlEvent::Start(tag) if tag.local() == "Relationship" => {
                if let (Some(id), Some(rel_type), Some(target)) =
                    (tag.attr("Id"), tag.attr("Type"), tag.attr("Target"))
                {
                    rels.insert(
                        id.to_string(),
                        Relationship {
                            rel_type: rel_type.to_string(),
                            target: target.to_string(),
                        },
                    );
                }
            }
            XmlEvent::Eof => return Ok(rels),
            _ => {}
        }
    }
}

fn part_by_rel_type(
    rels: &HashMap<String, Relationship>,
    base_dir: &str,
    type_suffix: &str,
    default: &str,
) -> Option<String> {
    rels.values()
        .find(|r| rel_type_suffix(&r.rel_type) == type_suffix)
        .map(|r| resolve_target(base_dir, &r.target))
        .or_else(|| Some(default.to_string()))
}

fn rel_type_suffix(rel_type: &str) -> &str {
    rel_type.rsplit('/').next().unwrap_or(rel_type)
}

fn part_directory(part: &str) -> &str {
    part.rfind('/').map(|i| &part[..i]).unwrap_or("")
}

/// Resolve a relationship target against the directory of its source part.
fn resolve_target(base_dir: &str, target: &str) -> String {
    let mut segments: Vec<&str> = if let Some(absolute) = target.strip_prefix('/') {
        absolute.split('/').collect()
    } else {
        let mut segments: Vec<&str> = if base_dir.is_empty() {
            Vec::new()
        } else {
            base_dir.split('/').collect()
        };
        segments.extend(target.split('/'));
        segments
    };
    let mut resolved: Vec<&str> = Vec::with_capacity(segments.len());
    for segment in segments.drain(..) {
        match segment {
            "" | "." => {}
            ".." => {
                resolved.pop();
            }
            other => resolved.push(other),
        }
    }
    resolved.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_target() {
        assert_eq!(
            resolve_target("xl", "worksheets/sheet1.xml"),
            "xl/worksheets/sheet1.xml"
        );
        assert_eq!(
            resolve_target("xl", "/xl/worksheets/sheet1.xml"),
            "xl/worksheets/sheet1.xml"
        );
        assert_eq!(
            resolve_target("xl", "../customXml/item1.xml"),
            "customXml/item1.xml"
        );
        assert_eq!(resolve_target("", "xl/workbook.xml"), "xl/workbook.xml");
    }

    #[test]
    fn test_part_directory() {
        assert_eq!(part_directory("xl/workbook.xml"), "xl");
        assert_eq!(part_directory("workbook.xml"), "");
    }
}
