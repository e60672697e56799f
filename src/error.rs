//! Error types for the xlsxstream library

use thiserror::Error;

/// Result type alias for xlsxstream operations
pub type Result<T> = std::result::Result<T, XlsxError>;

/// Main error type for all read and write operations
#[derive(Error, Debug)]
pub enum XlsxError {
    /// Input ended in the middle of a structure
    #[error("Unexpected end of input while reading {0}")]
    UnexpectedEof(&'static str),

    /// Archive structure is damaged or inconsistent
    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    /// Entry uses a compression method other than stored or deflate
    #[error("Unsupported compression method: {0}")]
    UnsupportedCompression(u16),

    /// Requested archive entry does not exist
    #[error("Entry not found in archive: {0}")]
    EntryNotFound(String),

    /// Entry (or sheet) name written twice
    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    /// XML part is not well formed
    #[error("Malformed XML: {0}")]
    MalformedXml(String),

    /// Entity reference outside the five predefined ones
    #[error("Unknown entity reference: &{0};")]
    BadEntity(String),

    /// Bytes are not valid UTF-8
    #[error("Invalid UTF-8 in {0}")]
    DecodeError(&'static str),

    /// Invalid sheet name or sheet not found
    #[error("Sheet '{sheet}' not found. Available sheets: {available}")]
    SheetNotFound { sheet: String, available: String },

    /// A part the package format requires is absent
    #[error("Missing required part: {0}")]
    MissingRequiredPart(String),

    /// Cell reference does not match `^[A-Z]+[0-9]+$` or breaks ordering
    #[error("Invalid cell reference: {0}")]
    InvalidCellReference(String),

    /// String cell points past the end of the shared strings table
    #[error("Shared string index {0} out of range")]
    InvalidSharedStringIndex(usize),

    /// Cell style attribute points past the end of the style table
    #[error("Style index {0} out of range")]
    InvalidStyleIndex(usize),

    /// Feature the codec deliberately does not handle
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(&'static str),

    /// Invalid input to a write operation
    #[error("Failed to write workbook: {0}")]
    WriteError(String),

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
