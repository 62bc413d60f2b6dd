use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cg_core::domain::wildcard_to_regex;
use cg_core::tracker_db::TrackerTable;

fn synthetic_db(domains: usize) -> String {
    let mut out = String::from(r#"{"apps":{"A0":{"cat":"advertising"},"A1":{"cat":"site_analytics"}},"domains":{"#);
    for i in 0..domains {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&format!(r#""tracker{}.com":"A{}""#, i, i % 2));
    }
    out.push_str("}}");
    out
}

fn bench_load(c: &mut Criterion) {
    let json = synthetic_db(20_000);
    c.bench_function("tracker_table_load_20k", |b| {
        b.iter(|| TrackerTable::from_json(black_box(&json)).unwrap())
    });
}

fn bench_lookup(c: &mut Criterion) {
    let table = TrackerTable::from_json(&synthetic_db(20_000)).unwrap();
    let allow: Vec<String> = (0..50)
        .map(|i| wildcard_to_regex(&format!("*allowed{}.org", i)))
        .collect();

    c.bench_function("lookup_hit_with_allow_list", |b| {
        b.iter(|| table.lookup(black_box("https://cdn.tracker42.com/pixel.gif"), &allow))
    });
    c.bench_function("lookup_miss", |b| {
        b.iter(|| table.lookup(black_box("https://www.firefox.com/"), &allow))
    });
}

criterion_group!(benches, bench_load, bench_lookup);
criterion_main!(benches);
