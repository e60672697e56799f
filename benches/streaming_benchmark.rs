use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use xlsxstream::{CellValue, ReadOptions, Row, Workbook, WorkbookWriter};

fn sample_workbook(rows: usize) -> Vec<u8> {
    let mut writer = WorkbookWriter::new(Vec::new());
    writer.add_sheet("Bench").unwrap();
    writer.write_values(["ID", "Name", "Value"]).unwrap();
    for i in 0..rows {
        writer
            .write_row(&Row::from_values([
                CellValue::Number(i as f64),
                CellValue::from(format!("Name_{}", i)),
                CellValue::Number((i * 100) as f64),
            ]))
            .unwrap();
    }
    writer.finish().unwrap()
}

fn benchmark_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("write");
    group.sample_size(10);

    for size in [1000, 10_000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| black_box(sample_workbook(size)));
        });
    }

    group.finish();
}

fn benchmark_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("read");
    group.sample_size(10);

    for size in [1000, 10_000].iter() {
        let bytes = sample_workbook(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let mut workbook =
                    Workbook::from_bytes(bytes.clone(), ReadOptions::default()).unwrap();
                for row in workbook.rows("Bench").unwrap() {
                    black_box(row.unwrap());
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_write, benchmark_read);
criterion_main!(benches);
