//! Sheet read pipeline
//!
//! Drives the XML tokenizer over a worksheet part and yields typed rows,
//! joining string cells against the shared strings table and date-styled
//! numeric cells against the style table. Rows are produced on demand;
//! nothing beyond the current row is buffered.

use crate::cellref::parse_cell_ref;
use crate::dates::{serial_to_datetime, DateEpoch};
use crate::error::{Result, XlsxError};
use crate::styles::StyleTable;
use crate::types::{Cell, CellValue, Row};
use crate::xml::reader::{StartTag, XmlEvent, XmlTokenizer};
use crate::zip::reader::EntryChunks;
use chrono::{NaiveDate, NaiveDateTime};
use std::io::{Read, Seek};

/// Iterator over the typed rows of one worksheet
///
/// Any malformed row or cell ends the iteration with an error; rows already
/// delivered remain valid.
pub struct RowIter<'a, R: Read + Seek> {
    tokenizer: XmlTokenizer<EntryChunks<'a, R>>,
    strings: &'a [String],
    styles: &'a StyleTable,
    epoch: DateEpoch,
    skip_empty_rows: bool,
    last_row_index: u32,
    finished: bool,
}

impl<'a, R: Read + Seek> RowIter<'a, R> {
    pub(crate) fn new(
        chunks: EntryChunks<'a, R>,
        strings: &'a [String],
        styles: &'a StyleTable,
        epoch: DateEpoch,
        skip_empty_rows: bool,
    ) -> Self {
        RowIter {
            tokenizer: XmlTokenizer::new(chunks),
            strings,
            styles,
            epoch,
            skip_empty_rows,
            last_row_index: 0,
            finished: false,
        }
    }

    fn next_row(&mut self) -> Result<Option<Row>> {
        loop {
            match self.tokenizer.next_event()? {
                XmlEvent::Start(tag) if tag.local() == "row" => {
                    let row = self.read_row(&tag)?;
                    if self.skip_empty_rows && row.cells.iter().all(|c| c.value.is_empty()) {
                        continue;
                    }
                    return Ok(Some(row));
                }
                XmlEvent::Eof => return Ok(None),
                _ => {}
            }
        }
    }

    fn read_row(&mut self, tag: &StartTag) -> Result<Row> {
        let index = match tag.attr("r") {
            Some(text) => text
                .parse::<u32>()
                .map_err(|_| XlsxError::MalformedXml(format!("row index '{}'", text)))?,
            None => self.last_row_index + 1,
        };
        if index <= self.last_row_index {
            return Err(XlsxError::MalformedXml(format!(
                "row {} after row {}",
                index, self.last_row_index
            )));
        }
        self.last_row_index = index;

        let mut cells: Vec<Cell> = Vec::new();
        let mut last_column: Option<u32> = None;
        loop {
            match self.tokenizer.next_event()? {
                XmlEvent::Start(tag) if tag.local() == "c" => {
                    let cell = self.read_cell(&tag, last_column)?;
                    last_column = cell.column;
                    cells.push(cell);
                }
                XmlEvent::Start(tag) => {
                    let name = tag.name.clone();
                    self.tokenizer.skip_element(&name)?;
                }
                XmlEvent::End(name) if crate::xml::local_name(&name) == "row" => {
                    return Ok(Row {
                        index: Some(index),
                        cells,
                    });
                }
                XmlEvent::Eof => return Err(XlsxError::UnexpectedEof("row element")),
                _ => {}
            }
        }
    }

    fn read_cell(&mut self, tag: &StartTag, last_column: Option<u32>) -> Result<Cell> {
        let column = match tag.attr("r") {
            Some(reference) => {
                let (_, column) = parse_cell_ref(reference)
                    .ok_or_else(|| XlsxError::InvalidCellReference(reference.to_string()))?;
                column
            }
            None => last_column.map_or(0, |c| c + 1),
        };
        if let Some(prev) = last_column {
            if column <= prev {
                return Err(XlsxError::MalformedXml(format!(
                    "cell column {} after column {}",
                    column, prev
                )));
            }
        }

        let cell_type = tag.attr("t").map(str::to_string);
        let style = match tag.attr("s") {
            Some(text) => {
                let index = text
                    .parse::<usize>()
                    .map_err(|_| XlsxError::MalformedXml(format!("style index '{}'", text)))?;
                if !self.styles.is_empty() && index >= self.styles.len() {
                    return Err(XlsxError::InvalidStyleIndex(index));
                }
                Some(index)
            }
            None => None,
        };

        let mut value_text = String::new();
        let mut has_value = false;
        let mut inline_text = String::new();
        loop {
            match self.tokenizer.next_event()? {
                XmlEvent::Start(inner) => match inner.local() {
                    "v" => {
                        has_value = true;
                        self.collect_text("v", &mut value_text)?;
                    }
                    "is" => self.collect_inline_string(&mut inline_text)?,
                    _ => {
                        let name = inner.name.clone();
                        self.tokenizer.skip_element(&name)?;
                    }
                },
                XmlEvent::End(name) if crate::xml::local_name(&name) == "c" => break,
                XmlEvent::Eof => return Err(XlsxError::UnexpectedEof("cell element")),
                _ => {}
            }
        }

        let value = self.materialize(
            cell_type.as_deref(),
            style,
            has_value,
            value_text,
            inline_text,
        )?;
        Ok(Cell {
            column: Some(column),
            value,
        })
    }

    /// Accumulate text events until the end tag of `element`.
    fn collect_text(&mut self, element: &str, out: &mut String) -> Result<()> {
        loop {
            match self.tokenizer.next_event()? {
                XmlEvent::Text(text) => out.push_str(&text),
                XmlEvent::End(name) if crate::xml::local_name(&name) == element => return Ok(()),
                XmlEvent::End(_) => {}
                XmlEvent::Start(inner) => {
                    let name = inner.name.clone();
                    self.tokenizer.skip_element(&name)?;
                }
                XmlEvent::Eof => return Err(XlsxError::UnexpectedEof("cell value")),
            }
        }
    }

    /// Concatenate the `<t>` runs of an `<is>` inline string.
    fn collect_inline_string(&mut self, out: &mut String) -> Result<()> {
        let mut in_text = false;
        loop {
            match self.tokenizer.next_event()? {
                XmlEvent::Start(inner) if inner.local() == "t" => in_text = true,
                XmlEvent::Start(_) => {}
                XmlEvent::Text(text) => {
                    if in_text {
                        out.push_str(&text);
                    }
                }
                XmlEvent::End(name) => match crate::xml::local_name(&name) {
                    "t" => in_text = false,
                    "is" => return Ok(()),
                    _ => {}
                },
                XmlEvent::Eof => return Err(XlsxError::UnexpectedEof("inline string")),
            }
        }
    }

    fn materialize(
        &self,
        cell_type: Option<&str>,
        style: Option<usize>,
        has_value: bool,
        value_text: String,
        inline_text: String,
    ) -> Result<CellValue> {
        match cell_type {
            None | Some("n") => {
                let text = value_text.trim();
                if !has_value || text.is_empty() {
                    return Ok(CellValue::Empty);
                }
                let number: f64 = text
                    .parse()
                    .map_err(|_| XlsxError::MalformedXml(format!("numeric value '{}'", text)))?;
                if style.is_some_and(|s| self.styles.is_date(s)) {
                    let instant = serial_to_datetime(number, self.epoch).ok_or_else(|| {
                        XlsxError::MalformedXml(format!("date serial {} out of range", number))
                    })?;
                    Ok(CellValue::DateTime(instant))
                } else {
                    Ok(CellValue::Number(number))
                }
            }
            Some("s") => {
                let index: usize = value_text.trim().parse().map_err(|_| {
                    XlsxError::MalformedXml(format!("shared string index '{}'", value_text))
                })?;
                let text = self
                    .strings
                    .get(index)
                    .ok_or(XlsxError::InvalidSharedStringIndex(index))?;
                Ok(CellValue::String(text.clone()))
            }
            Some("str") => Ok(CellValue::String(value_text)),
            Some("inlineStr") => Ok(CellValue::InlineString(inline_text)),
            Some("b") => match value_text.trim() {
                "1" => Ok(CellValue::Bool(true)),
                "0" => Ok(CellValue::Bool(false)),
                other => Err(XlsxError::MalformedXml(format!(
                    "boolean value '{}'",
                    other
                ))),
            },
            Some("e") => Ok(CellValue::Error(value_text.trim().to_string())),
            Some("d") => parse_iso_instant(value_text.trim())
                .map(CellValue::DateTime)
                .ok_or_else(|| {
                    XlsxError::MalformedXml(format!("ISO date '{}'", value_text.trim()))
                }),
            Some(other) => Err(XlsxError::MalformedXml(format!(
                "cell type '{}'",
                other
            ))),
        }
    }
}

fn parse_iso_instant(text: &str) -> Option<NaiveDateTime> {
    let text = text.strip_suffix('Z').unwrap_or(text);
    if let Ok(instant) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(instant);
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

impl<R: Read + Seek> Iterator for RowIter<'_, R> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
