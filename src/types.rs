//! Type definitions for spreadsheet data

use chrono::NaiveDateTime;
use std::fmt;

/// Represents a single cell value in a worksheet
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CellValue {
    /// Empty cell
    Empty,
    /// String value stored through the shared strings table
    String(String),
    /// String value stored inline in the cell
    InlineString(String),
    /// Numeric value
    Number(f64),
    /// Boolean value
    Bool(bool),
    /// Calendar instant (serialised as a serial day number)
    DateTime(NaiveDateTime),
    /// Error value with its code (e.g. "#DIV/0!")
    Error(String),
}

impl CellValue {
    /// Convert cell value to string
    pub fn as_string(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::String(s) | CellValue::InlineString(s) => s.clone(),
            CellValue::Number(n) => n.to_string(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::DateTime(d) => d.to_string(),
            CellValue::Error(e) => e.clone(),
        }
    }

    /// Check if cell is empty
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    /// Try to convert to float
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::String(s) | CellValue::InlineString(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to convert to boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Bool(b) => Some(*b),
            CellValue::Number(n) => Some(*n != 0.0),
            CellValue::String(s) => match s.to_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Try to convert to a calendar instant
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            CellValue::DateTime(d) => Some(*d),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::String(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::String(s)
    }
}

impl From<i64> for CellValue {
    fn from(i: i64) -> Self {
        CellValue::Number(i as f64)
    }
}

impl From<i32> for CellValue {
    fn from(i: i32) -> Self {
        CellValue::Number(i as f64)
    }
}

impl From<f64> for CellValue {
    fn from(f: f64) -> Self {
        CellValue::Number(f)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Bool(b)
    }
}

impl From<NaiveDateTime> for CellValue {
    fn from(d: NaiveDateTime) -> Self {
        CellValue::DateTime(d)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(CellValue::Empty)
    }
}

/// A cell with an optional explicit column position
///
/// When `column` is `None` the cell takes the position after its
/// predecessor in the row (starting at column 0).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Cell {
    /// Column index (0-based)
    pub column: Option<u32>,
    /// Cell value
    pub value: CellValue,
}

impl Cell {
    /// Create a cell placed after its predecessor
    pub fn new(value: impl Into<CellValue>) -> Self {
        Cell {
            column: None,
            value: value.into(),
        }
    }

    /// Create a cell at an explicit 0-based column
    pub fn at(column: u32, value: impl Into<CellValue>) -> Self {
        Cell {
            column: Some(column),
            value: value.into(),
        }
    }
}

impl<T: Into<CellValue>> From<T> for Cell {
    fn from(value: T) -> Self {
        Cell::new(value)
    }
}

/// A row of cells with an optional explicit row index
///
/// Readers always fill in `index`. On write, `None` continues one past the
/// previously emitted row (starting at 1).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Row {
    /// Row index (1-based)
    pub index: Option<u32>,
    /// Cells in this row, column indices strictly increasing
    pub cells: Vec<Cell>,
}

impl Row {
    /// Create a row placed after its predecessor
    pub fn new(cells: Vec<Cell>) -> Self {
        Row { index: None, cells }
    }

    /// Create a row at an explicit 1-based index
    pub fn with_index(index: u32, cells: Vec<Cell>) -> Self {
        Row {
            index: Some(index),
            cells,
        }
    }

    /// Build a row out of plain values
    pub fn from_values<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<CellValue>,
    {
        Row::new(values.into_iter().map(Cell::new).collect())
    }

    /// Get the value at a 0-based column index
    pub fn get(&self, column: u32) -> Option<&CellValue> {
        self.cells
            .iter()
            .find(|c| c.column == Some(column))
            .map(|c| &c.value)
    }

    /// Get number of cells
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Check if row has no non-empty cells
    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(|c| c.value.is_empty())
    }

    /// Convert row to vector of strings
    pub fn to_strings(&self) -> Vec<String> {
        self.cells.iter().map(|c| c.value.as_string()).collect()
    }
}
