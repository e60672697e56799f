//! Integration tests for xlsxstream

use chrono::NaiveDate;
use tempfile::NamedTempFile;
use xlsxstream::{
    read_xlsx, write_xlsx, Cell, CellValue, DateEpoch, ReadOptions, Row, SheetSpec, Workbook,
    WorkbookSpec, WorkbookWriter, WriteOptions, XlsxError,
};

fn collect_rows(
    workbook: &mut Workbook<std::io::Cursor<Vec<u8>>>,
    sheet_name: &str,
) -> Vec<Row> {
    workbook
        .rows(sheet_name)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

#[test]
fn test_write_and_read_roundtrip() {
    let mut writer = WorkbookWriter::new(Vec::new());
    writer.add_sheet("Data").unwrap();
    writer.write_values(["Name", "Age"]).unwrap();
    writer
        .write_values([CellValue::from("Alice"), CellValue::Number(30.0)])
        .unwrap();
    writer
        .write_values([CellValue::from("Bob"), CellValue::Number(25.0)])
        .unwrap();
    let bytes = writer.finish().unwrap();

    let mut workbook = Workbook::from_bytes(bytes, ReadOptions::default()).unwrap();
    assert_eq!(workbook.sheet_names(), ["Data"]);

    let rows = collect_rows(&mut workbook, "Data");
    assert_eq!(rows.len(), 3);

    assert_eq!(rows[0].index, Some(1));
    assert_eq!(rows[0].get(0), Some(&CellValue::String("Name".into())));
    assert_eq!(rows[0].get(1), Some(&CellValue::String("Age".into())));

    assert_eq!(rows[1].get(0), Some(&CellValue::String("Alice".into())));
    assert_eq!(rows[1].get(1), Some(&CellValue::Number(30.0)));
    assert_eq!(rows[2].get(0), Some(&CellValue::String("Bob".into())));
    assert_eq!(rows[2].get(1), Some(&CellValue::Number(25.0)));
}

#[test]
fn test_explicit_row_indices_and_empty_rows() {
    let mut writer = WorkbookWriter::new(Vec::new());
    writer.add_sheet("Sparse").unwrap();
    // Row 1 declared but entirely empty
    writer.write_row(&Row::with_index(1, vec![])).unwrap();
    writer
        .write_row(&Row::with_index(2, vec![Cell::new("only string")]))
        .unwrap();
    writer
        .write_row(&Row::with_index(3, vec![Cell::new(42.0)]))
        .unwrap();
    writer
        .write_row(&Row::with_index(
            4,
            vec![Cell::new("Mixed"), Cell::new(100.0), Cell::new("End")],
        ))
        .unwrap();
    let bytes = writer.finish().unwrap();

    let options = ReadOptions::new().skip_empty_rows(false);
    let mut workbook = Workbook::from_bytes(bytes.clone(), options).unwrap();
    let rows = collect_rows(&mut workbook, "Sparse");
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0].index, Some(1));
    assert_eq!(rows[0].len(), 0);
    assert_eq!(rows[3].index, Some(4));
    assert_eq!(rows[3].to_strings(), vec!["Mixed", "100", "End"]);

    // The default drops the empty first row
    let mut workbook = Workbook::from_bytes(bytes, ReadOptions::default()).unwrap();
    let rows = collect_rows(&mut workbook, "Sparse");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].index, Some(2));
}

#[test]
fn test_date_roundtrip_1900() {
    let date = NaiveDate::from_ymd_opt(2024, 1, 15)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();

    let mut writer = WorkbookWriter::new(Vec::new());
    writer.add_sheet("Dates").unwrap();
    writer.write_values([CellValue::DateTime(date)]).unwrap();
    let bytes = writer.finish().unwrap();

    let options = ReadOptions::new().use_1904_dates(false);
    let mut workbook = Workbook::from_bytes(bytes, options).unwrap();
    let rows = collect_rows(&mut workbook, "Dates");
    match rows[0].get(0) {
        Some(CellValue::DateTime(instant)) => {
            assert_eq!(instant.date(), NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        }
        other => panic!("expected a date cell, got {:?}", other),
    }
}

#[test]
fn test_date_roundtrip_1904_epoch_flag() {
    let date = NaiveDate::from_ymd_opt(2020, 6, 1)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap();

    let spec = WorkbookSpec::new()
        .epoch(DateEpoch::Date1904)
        .sheet(SheetSpec::new(
            "S",
            vec![Row::from_values([CellValue::DateTime(date)])],
        ));
    let bytes = write_xlsx(Vec::new(), spec).unwrap();

    // Auto epoch detection picks up the date1904 flag
    let mut workbook = Workbook::from_bytes(bytes, ReadOptions::default()).unwrap();
    assert_eq!(workbook.epoch(), DateEpoch::Date1904);
    let rows = collect_rows(&mut workbook, "S");
    assert_eq!(rows[0].get(0), Some(&CellValue::DateTime(date)));
}

#[test]
fn test_streaming_write_pulls_producer_lazily() {
    let polled = std::rc::Rc::new(std::cell::Cell::new(0u32));
    let counter = polled.clone();
    let rows = (0u32..100).map(move |i| {
        counter.set(counter.get() + 1);
        Row::with_index(
            i + 1,
            vec![Cell::new(format!("Row{}", i)), Cell::new(f64::from(i))],
        )
    });

    let spec = WorkbookSpec::new().sheet(SheetSpec::new("Stream", rows));
    let bytes = write_xlsx(Vec::new(), spec).unwrap();
    assert_eq!(polled.get(), 100);

    let mut workbook = Workbook::from_bytes(bytes, ReadOptions::default()).unwrap();
    let rows = collect_rows(&mut workbook, "Stream");
    assert_eq!(rows.len(), 100);
    assert_eq!(rows[0].get(0), Some(&CellValue::String("Row0".into())));
    assert_eq!(rows[99].get(0), Some(&CellValue::String("Row99".into())));
    assert_eq!(rows[99].get(1), Some(&CellValue::Number(99.0)));
}

#[test]
fn test_multi_sheet_repeat_reads_identical() {
    let mut writer = WorkbookWriter::new(Vec::new());
    for (sheet, offset) in [("One", 0.0), ("Two", 10.0), ("Three", 20.0)] {
        writer.add_sheet(sheet).unwrap();
        writer
            .write_row(&Row::new(vec![
                Cell::new(sheet),
                Cell::at(2, offset + 1.5),
                Cell::at(4, true),
            ]))
            .unwrap();
        writer.write_row(&Row::with_index(3, vec![])).unwrap();
    }
    let bytes = writer.finish().unwrap();

    let options = ReadOptions::new().skip_empty_rows(false);
    let mut workbook = Workbook::from_bytes(bytes, options).unwrap();
    assert_eq!(workbook.sheet_names(), ["One", "Two", "Three"]);

    let names = workbook.sheet_names();
    let mut passes: Vec<Vec<(String, Vec<Row>)>> = Vec::new();
    for _ in 0..2 {
        let mut pass = Vec::new();
        for name in &names {
            let rows = workbook
                .rows(name)
                .unwrap()
                .collect::<Result<Vec<_>, _>>()
                .unwrap();
            pass.push((name.clone(), rows));
        }
        passes.push(pass);
    }
    assert_eq!(passes[0], passes[1]);
    assert_eq!(passes[0][1].1[0].get(2), Some(&CellValue::Number(11.5)));
    assert_eq!(passes[0][1].1[0].get(4), Some(&CellValue::Bool(true)));
}

#[test]
fn test_sheet_handle_restartable_rows() {
    let mut writer = WorkbookWriter::new(Vec::new());
    writer.add_sheet("R").unwrap();
    writer.write_values(["a", "b"]).unwrap();
    writer.write_values(["c", "d"]).unwrap();
    let bytes = writer.finish().unwrap();

    let mut workbook = Workbook::from_bytes(bytes, ReadOptions::default()).unwrap();
    let mut sheet = workbook.sheet("R").unwrap();
    assert_eq!(sheet.name(), "R");

    let first: Vec<_> = sheet.rows().unwrap().collect::<Result<Vec<_>, _>>().unwrap();
    let second: Vec<_> = sheet.rows().unwrap().collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
}

#[test]
fn test_special_characters_roundtrip() {
    let values = [
        "Text with <xml> tags",
        "Quote: \"Hello\"",
        "Ampersand: &",
        "Emoji: 😀🎉",
        "  leading and trailing  ",
        "tab\tand\nnewline",
    ];

    let mut writer = WorkbookWriter::new(Vec::new());
    writer.add_sheet("Chars").unwrap();
    writer.write_values(values).unwrap();
    let bytes = writer.finish().unwrap();

    let mut workbook = Workbook::from_bytes(bytes, ReadOptions::default()).unwrap();
    let rows = collect_rows(&mut workbook, "Chars");
    assert_eq!(
        rows[0].to_strings(),
        values.iter().map(|s| s.to_string()).collect::<Vec<_>>()
    );
}

#[test]
fn test_inline_string_and_error_roundtrip() {
    let mut writer = WorkbookWriter::new(Vec::new());
    writer.add_sheet("Odd").unwrap();
    writer
        .write_row(&Row::new(vec![
            Cell::new(CellValue::InlineString("inline <text>".into())),
            Cell::new(CellValue::Error("#DIV/0!".into())),
        ]))
        .unwrap();
    let bytes = writer.finish().unwrap();

    let mut workbook = Workbook::from_bytes(bytes, ReadOptions::default()).unwrap();
    let rows = collect_rows(&mut workbook, "Odd");
    assert_eq!(
        rows[0].get(0),
        Some(&CellValue::InlineString("inline <text>".into()))
    );
    assert_eq!(rows[0].get(1), Some(&CellValue::Error("#DIV/0!".into())));
}

#[test]
fn test_shared_strings_deduplicate_but_cells_keep_identity() {
    let mut writer = WorkbookWriter::new(Vec::new());
    writer.add_sheet("Dup").unwrap();
    writer.write_values(["same", "same", "other"]).unwrap();
    writer.write_values(["same"]).unwrap();
    let bytes = writer.finish().unwrap();

    let mut workbook = Workbook::from_bytes(bytes, ReadOptions::default()).unwrap();
    assert_eq!(workbook.shared_strings(), ["same", "other"]);
    let rows = collect_rows(&mut workbook, "Dup");
    assert_eq!(rows[0].to_strings(), vec!["same", "same", "other"]);
    assert_eq!(rows[1].to_strings(), vec!["same"]);
}

#[test]
fn test_sheet_not_found() {
    let mut writer = WorkbookWriter::new(Vec::new());
    writer.add_sheet("Sheet1").unwrap();
    let bytes = writer.finish().unwrap();

    let mut workbook = Workbook::from_bytes(bytes, ReadOptions::default()).unwrap();
    match workbook.sheet("Nope") {
        Err(XlsxError::SheetNotFound { sheet, available }) => {
            assert_eq!(sheet, "Nope");
            assert!(available.contains("Sheet1"));
        }
        other => panic!("expected SheetNotFound, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_unicode_sheet_names() {
    let mut writer = WorkbookWriter::new(Vec::new());
    for name in ["Данные", "数据", "Données"] {
        writer.add_sheet(name).unwrap();
        writer.write_values([name]).unwrap();
    }
    let bytes = writer.finish().unwrap();

    let mut workbook = Workbook::from_bytes(bytes, ReadOptions::default()).unwrap();
    assert_eq!(workbook.sheet_names(), ["Данные", "数据", "Données"]);
    let rows = collect_rows(&mut workbook, "数据");
    assert_eq!(rows[0].to_strings(), vec!["数据"]);
}

#[test]
fn test_garbage_input_is_corrupt_archive() {
    let result = Workbook::from_bytes(b"this is not a zip".to_vec(), ReadOptions::default());
    assert!(matches!(result, Err(XlsxError::CorruptArchive(_))));
}

#[test]
fn test_file_roundtrip_via_path_api() {
    let temp = NamedTempFile::new().unwrap();

    let mut writer = WorkbookWriter::create(temp.path()).unwrap();
    writer.add_sheet("Disk").unwrap();
    writer.write_values(["on", "disk"]).unwrap();
    writer.finish().unwrap();

    let mut workbook = Workbook::open(temp.path()).unwrap();
    let mut sheet = workbook.sheet("Disk").unwrap();
    let rows: Vec<_> = sheet.rows().unwrap().collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(rows[0].to_strings(), vec!["on", "disk"]);
}

#[test]
fn test_read_xlsx_over_generic_source() {
    let spec = WorkbookSpec::new().sheet(SheetSpec::new(
        "G",
        vec![Row::from_values([1.0, 2.0, 3.0])],
    ));
    let bytes = write_xlsx(Vec::new(), spec).unwrap();

    let mut workbook = read_xlsx(std::io::Cursor::new(bytes), ReadOptions::default()).unwrap();
    let rows: Vec<_> = workbook
        .rows("G")
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(rows[0].to_strings(), vec!["1", "2", "3"]);
}

#[test]
fn test_write_options_compression_level() {
    let rows = vec![Row::from_values(["compress me"; 8]); 50];
    let spec_rows = rows.clone();

    let mut fast = WorkbookWriter::with_options(
        Vec::new(),
        WriteOptions::new().compression_level(1),
    );
    fast.add_sheet("S").unwrap();
    for row in &rows {
        fast.write_row(row).unwrap();
    }
    let bytes = fast.finish().unwrap();

    let mut workbook = Workbook::from_bytes(bytes, ReadOptions::default()).unwrap();
    let read_back = collect_rows(&mut workbook, "S");
    assert_eq!(read_back.len(), spec_rows.len());
}

#[test]
fn test_number_precision_roundtrip() {
    let values = [0.1, 1.0 / 3.0, 1e-300, 12345.6789, 9007199254740991.0];
    let mut writer = WorkbookWriter::new(Vec::new());
    writer.add_sheet("N").unwrap();
    writer
        .write_row(&Row::from_values(values.iter().copied()))
        .unwrap();
    let bytes = writer.finish().unwrap();

    let mut workbook = Workbook::from_bytes(bytes, ReadOptions::default()).unwrap();
    let rows = collect_rows(&mut workbook, "N");
    for (position, expected) in values.iter().enumerate() {
        assert_eq!(
            rows[0].get(position as u32),
            Some(&CellValue::Number(*expected)),
            "value at column {}",
            position
        );
    }
}
