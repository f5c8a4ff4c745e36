//! Deduction Performance Benchmarks
//!
//! Type and shape deduction over nested host sequences.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndpy_bridge::{deduce, deduce_shape, deduce_shape_using_dtype, PyDict, PyValue};
use ndpy_types::parse_type;

fn nested(depth: usize, width: usize) -> PyValue {
    if depth == 0 {
        return PyValue::from(7i64);
    }
    PyValue::list((0..width).map(|_| nested(depth - 1, width)))
}

fn bench_deduce(c: &mut Criterion) {
    let mut group = c.benchmark_group("deduce");

    for depth in [2usize, 4, 6] {
        let value = nested(depth, 6);
        group.bench_with_input(BenchmarkId::new("nested", depth), &value, |b, value| {
            b.iter(|| black_box(deduce(black_box(value))))
        });
    }

    // Promotion across int, float and missing leaves
    let mixed = PyValue::list((0..1024i64).map(|i| match i % 3 {
        0 => PyValue::from(i),
        1 => PyValue::from(i as f64),
        _ => PyValue::None,
    }));
    group.bench_function("mixed_leaves", |b| b.iter(|| black_box(deduce(black_box(&mixed)))));

    group.finish();
}

fn bench_shape(c: &mut Criterion) {
    let mut group = c.benchmark_group("deduce_shape");

    let value = nested(4, 8);
    group.bench_function("nested", |b| b.iter(|| black_box(deduce_shape(black_box(&value)))));

    let point = |x: i64, y: i64| -> PyValue {
        let dict: PyDict = [("x", PyValue::from(x)), ("y", PyValue::from(y))].into_iter().collect();
        PyValue::Dict(dict)
    };
    let records = PyValue::list((0..512).map(|i| point(i, -i)));
    let dtype = parse_type("{x: int32, y: int32}").unwrap();
    group.bench_function("using_struct_dtype", |b| {
        b.iter(|| black_box(deduce_shape_using_dtype(black_box(&records), &dtype)))
    });

    group.finish();
}

criterion_group!(benches, bench_deduce, bench_shape);
criterion_main!(benches);
