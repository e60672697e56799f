//! Cell reference parsing and conversion
//!
//! Columns use the no-zero base-26 alphabet: `A=0, Z=25, AA=26, AZ=51`.
//! Rows are 1-based decimal. A cell reference is the column letters
//! followed by the row number, e.g. `AA27`.

use crate::error::{Result, XlsxError};

/// Convert a 0-based column index to its letter form (0 -> "A", 26 -> "AA").
pub fn column_to_letters(index: u32) -> String {
    let mut letters = String::new();
    let mut n = index as i64;
    while n >= 0 {
        letters.insert(0, (b'A' + (n % 26) as u8) as char);
        n = n / 26 - 1;
    }
    letters
}

/// Convert column letters to a 0-based index. Uppercase only; any other
/// character fails.
pub fn letters_to_column(letters: &str) -> Result<u32> {
    let invalid = || XlsxError::InvalidCellReference(letters.to_string());
    if letters.is_empty() {
        return Err(invalid());
    }
    let mut index: u32 = 0;
    for &b in letters.as_bytes() {
        if !b.is_ascii_uppercase() {
            return Err(invalid());
        }
        index = index
            .checked_mul(26)
            .and_then(|i| i.checked_add((b - b'A' + 1) as u32))
            .ok_or_else(invalid)?;
    }
    Ok(index - 1)
}

/// Format a cell reference from a 1-based row and a 0-based column.
pub fn cell_ref(row: u32, column: u32) -> String {
    let mut out = column_to_letters(column);
    let mut buf = itoa::Buffer::new();
    out.push_str(buf.format(row));
    out
}

/// Parse a cell reference into `(row, column)` with a 1-based row and a
/// 0-based column.
///
/// Accepts exactly one run of uppercase letters followed by one run of
/// digits; anything else (empty input, lowercase, reversed order, trailing
/// characters, row zero) yields `None`.
pub fn parse_cell_ref(text: &str) -> Option<(u32, u32)> {
    let bytes = text.as_bytes();
    let letters_end = bytes.iter().take_while(|b| b.is_ascii_uppercase()).count();
    if letters_end == 0 || letters_end == bytes.len() {
        return None;
    }
    if !bytes[letters_end..].iter().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let column = letters_to_column(&text[..letters_end]).ok()?;
    let mut row: u32 = 0;
    for &b in &bytes[letters_end..] {
        row = row.checked_mul(10)?.checked_add((b - b'0') as u32)?;
    }
    if row == 0 {
        return None;
    }
    Some((row, column))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_to_letters() {
        assert_eq!(column_to_letters(0), "A");
        assert_eq!(column_to_letters(25), "Z");
        assert_eq!(column_to_letters(26), "AA");
        assert_eq!(column_to_letters(51), "AZ");
        assert_eq!(column_to_letters(52), "BA");
        assert_eq!(column_to_letters(702), "AAA");
    }

    #[test]
    fn test_letters_to_column() {
        assert_eq!(letters_to_column("A").unwrap(), 0);
        assert_eq!(letters_to_column("Z").unwrap(), 25);
        assert_eq!(letters_to_column("AA").unwrap(), 26);
        assert_eq!(letters_to_column("AAA").unwrap(), 702);
        assert!(letters_to_column("").is_err());
        assert!(letters_to_column("a").is_err());
        assert!(letters_to_column("A1").is_err());
    }

    #[test]
    fn test_column_roundtrip() {
        for index in (0..20_000).chain([16_383, 100_000, 1_000_000]) {
            let letters = column_to_letters(index);
            assert_eq!(letters_to_column(&letters).unwrap(), index);
        }
    }

    #[test]
    fn test_cell_ref_roundtrip() {
        for (row, column) in [(1, 0), (1, 25), (27, 26), (1_048_576, 16_383)] {
            let text = cell_ref(row, column);
            assert_eq!(parse_cell_ref(&text), Some((row, column)));
        }
        assert_eq!(cell_ref(27, 26), "AA27");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "1A", "A", "1", "A1B", "a1", "A0", "A-1", " A1", "A1 "] {
            assert_eq!(parse_cell_ref(bad), None, "{:?} should not parse", bad);
        }
    }

    #[test]
    fn test_parse_rejects_overflow() {
        assert_eq!(parse_cell_ref("A99999999999"), None);
        assert_eq!(parse_cell_ref("ZZZZZZZZZ1"), None);
    }
}
