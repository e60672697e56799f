//! # xlsxstream
//!
//! A streaming codec for XLSX workbooks: read and write spreadsheets row
//! by row without materialising whole sheets in memory.
//!
//! ## Features
//!
//! - **Streaming Read**: rows are decoded on demand while the worksheet
//!   part inflates, joined against the shared strings and style tables
//! - **Streaming Write**: rows are deflated into the archive as they are
//!   written; only the shared strings table stays resident
//! - **Typed Cells**: strings, numbers, booleans, dates (1900 and 1904
//!   epochs), error codes and inline strings
//! - **Restartable Sheets**: iterate a sheet as often as needed from one
//!   open workbook
//!
//! ## Quick Start
//!
//! ### Reading
//!
//! ```rust,no_run
//! use xlsxstream::Workbook;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut workbook = Workbook::open("data.xlsx")?;
//! let mut sheet = workbook.sheet("Sheet1")?;
//! for row in sheet.rows()? {
//!     let row = row?;
//!     println!("{:?}: {:?}", row.index, row.to_strings());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Writing
//!
//! ```rust,no_run
//! use xlsxstream::{CellValue, WorkbookWriter};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut writer = WorkbookWriter::create("output.xlsx")?;
//! writer.add_sheet("Data")?;
//! writer.write_values(["Name", "Age"])?;
//! writer.write_values([CellValue::from("Alice"), CellValue::Number(30.0)])?;
//! writer.finish()?;
//! # Ok(())
//! # }
//! ```

pub mod cellref;
pub mod chunks;
pub mod dates;
pub mod error;
pub mod shared_strings;
pub mod sheet_reader;
pub mod styles;
pub mod types;
pub mod workbook;
pub mod writer;
pub mod xml;
pub mod zip;

pub use dates::DateEpoch;
pub use error::{Result, XlsxError};
pub use sheet_reader::RowIter;
pub use types::{Cell, CellValue, Row};
pub use workbook::{
    read_xlsx, ReadOptions, Sheet, SheetDescriptor, SheetVisibility, Workbook,
};
pub use writer::{write_xlsx, SheetSpec, WorkbookSpec, WorkbookWriter, WriteOptions};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_types_accessible() {
        let _ = std::marker::PhantomData::<XlsxError>;
        let _ = std::marker::PhantomData::<WorkbookWriter<Vec<u8>>>;
        let _ = std::marker::PhantomData::<Row>;
    }
}
