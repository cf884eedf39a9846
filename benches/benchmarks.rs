//! Benchmarks for tabserve performance tracking.

use std::io::Write;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use tabserve::cursor::{self, CursorPayload};
use tabserve::ingest::SourceFormat;
use tabserve::page::PageRequest;
use tabserve::types::SortDirection;
use tabserve::Engine;

fn engine_with_rows(n: usize) -> (Engine, String) {
    let engine = Engine::new().unwrap();
    let mut csv = String::from("id,grp,amount\n");
    for i in 0..n {
        csv.push_str(&format!("{i},g{},{}\n", i % 10, i * 3 % 1000));
    }
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    file.write_all(csv.as_bytes()).unwrap();
    file.flush().unwrap();
    let id = engine
        .load_file(file.path(), "bench.csv", SourceFormat::Csv, None)
        .unwrap();
    (engine, id)
}

fn cursor_round_trip(c: &mut Criterion) {
    let payload = CursorPayload {
        v: 1,
        s: Some("grp".to_string()),
        d: "ASC".to_string(),
        r: 123_456,
        n: None,
        k: Some(serde_json::json!("g7")),
    };
    c.bench_function("cursor_round_trip", |b| {
        b.iter(|| {
            let token = cursor::encode(black_box(&payload)).unwrap();
            cursor::decode(black_box(&token)).unwrap();
        });
    });
}

fn page_read_sorted(c: &mut Criterion) {
    let (engine, id) = engine_with_rows(10_000);
    let request = PageRequest {
        page_size: 100,
        sort_column: Some("grp".to_string()),
        sort_direction: SortDirection::Asc,
        ..PageRequest::default()
    };
    c.bench_function("page_read_sorted", |b| {
        b.iter(|| {
            engine.get_page(black_box(&id), black_box(&request)).unwrap();
        });
    });
}

fn table_query_group_by(c: &mut Criterion) {
    let (engine, id) = engine_with_rows(10_000);
    let spec = serde_json::from_value(serde_json::json!({
        "groupBy": ["grp"],
        "aggregations": [{"op": "sum", "column": "amount", "as": "amount_total"}],
        "sort": [{"column": "amount_total", "direction": "desc"}],
    }))
    .unwrap();
    c.bench_function("table_query_group_by", |b| {
        b.iter(|| {
            engine
                .run_table_query(black_box(&id), black_box(&spec))
                .unwrap();
        });
    });
}

fn profile_numeric(c: &mut Criterion) {
    let (engine, id) = engine_with_rows(10_000);
    c.bench_function("profile_numeric", |b| {
        b.iter(|| {
            engine
                .profile_column(black_box(&id), black_box("amount"))
                .unwrap();
        });
    });
}

criterion_group!(
    benches,
    cursor_round_trip,
    page_read_sorted,
    table_query_group_by,
    profile_numeric
);
criterion_main!(benches);
