//! Benchmarks for table-export
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn sample_page(rows: usize) -> String {
    let entities: Vec<String> = (0..rows)
        .map(|i| {
            format!(
                r#"{{"PartitionKey":"PK_001","RowKey":"{i}","Timestamp":"2024-03-01T12:00:00.1234567Z","Name":"entity {i}","Count":{i},"Ratio":{r},"Active":true,"Field{m}":"x"}}"#,
                i = i,
                r = i as f64 / 3.0,
                m = i % 13,
            )
        })
        .collect();
    format!(r#"{{"value":[{}]}}"#, entities.join(","))
}

fn benchmark_page_parse(c: &mut Criterion) {
    use table_export::table::{Page, PartitionKey};

    let key = PartitionKey::new("PK_001");
    let body = sample_page(1000);

    c.bench_function("page_parse_1000", |b| {
        b.iter(|| {
            let page = Page::parse(&key, black_box(&body), None).unwrap();
            black_box(page);
        })
    });
}

fn benchmark_column_union(c: &mut Criterion) {
    use table_export::output::ColumnSet;
    use table_export::table::{Page, PartitionKey};

    let key = PartitionKey::new("PK_001");
    let page = Page::parse(&key, &sample_page(1000), None).unwrap();

    c.bench_function("column_union_1000", |b| {
        b.iter(|| {
            let mut columns = ColumnSet::new();
            for entity in &page.entities {
                columns.observe(entity);
            }
            black_box(columns.freeze());
        })
    });
}

fn benchmark_render_rows(c: &mut Criterion) {
    use table_export::output::csv_writer::write_rows;
    use table_export::output::ColumnSet;
    use table_export::table::{Page, PartitionKey};

    let key = PartitionKey::new("PK_001");
    let page = Page::parse(&key, &sample_page(1000), None).unwrap();
    let mut columns = ColumnSet::new();
    for entity in &page.entities {
        columns.observe(entity);
    }
    let header = columns.freeze();

    c.bench_function("render_csv_1000", |b| {
        b.iter(|| {
            let mut out = Vec::with_capacity(256 * 1024);
            write_rows(&mut out, &header, &page.entities).unwrap();
            black_box(out);
        })
    });
}

criterion_group!(
    benches,
    benchmark_page_parse,
    benchmark_column_union,
    benchmark_render_rows
);
criterion_main!(benches);
