use criterion::{black_box, criterion_group, criterion_main, Criterion};
use quill_sync::document::{encode_snapshot, probe_snapshot, replace_content};
use quill_sync::sanitize::sanitize;
use yrs::Doc;

fn clean_document(lines: usize) -> String {
    let mut out = String::from("# Benchmark Document\n\n");
    for i in 0..lines {
        out.push_str(&format!(
            "Paragraph {i} with a realistic amount of prose, links and *emphasis*.\n\n"
        ));
    }
    out
}

fn bench_sanitize_clean(c: &mut Criterion) {
    let small = clean_document(20); // ~1.5 KiB
    let large = clean_document(2000); // ~150 KiB

    c.bench_function("sanitize_clean_small", |b| {
        b.iter(|| black_box(sanitize(black_box(&small))))
    });
    c.bench_function("sanitize_clean_large", |b| {
        b.iter(|| black_box(sanitize(black_box(&large))))
    });
}

fn bench_sanitize_repeated(c: &mut Criterion) {
    let block = clean_document(40);
    let corrupted = block.repeat(16); // whole-body repetition

    c.bench_function("sanitize_repeated_16x", |b| {
        b.iter(|| black_box(sanitize(black_box(&corrupted))))
    });
}

fn bench_sanitize_heading_repeat(c: &mut Criterion) {
    // Sections share the leading heading but differ in length, so the
    // whole-body periodicity check misses and the heading scan does the work
    let mut corrupted = clean_document(40);
    for round in 0..7 {
        corrupted.push_str(&clean_document(40 + round));
    }

    c.bench_function("sanitize_heading_repeat_8x", |b| {
        b.iter(|| black_box(sanitize(black_box(&corrupted))))
    });
}

fn bench_sanitize_trailing_padding(c: &mut Criterion) {
    let mut padded = clean_document(200);
    padded.push_str(&"\n".repeat(64));

    c.bench_function("sanitize_trailing_padding", |b| {
        b.iter(|| black_box(sanitize(black_box(&padded))))
    });
}

fn bench_snapshot_probe(c: &mut Criterion) {
    let doc = Doc::new();
    replace_content(&doc, &clean_document(200));
    let snapshot = encode_snapshot(&doc);

    c.bench_function("snapshot_probe_200p", |b| {
        b.iter(|| black_box(probe_snapshot(black_box(&snapshot)).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_sanitize_clean,
    bench_sanitize_repeated,
    bench_sanitize_heading_repeat,
    bench_sanitize_trailing_padding,
    bench_snapshot_probe,
);
criterion_main!(benches);
