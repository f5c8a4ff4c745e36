//! Conversion Performance Benchmarks
//!
//! Measures host value to array conversion, with and without an explicit
//! target type, and the reverse direction.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndpy_bridge::{array_from_py, array_from_py_typed, as_py, CompiledConversion, ConvertOptions, PyValue};
use ndpy_types::{parse_type, ArrMeta, DataPtr, MemoryBlock};

fn int_matrix(rows: usize, cols: usize) -> PyValue {
    PyValue::list((0..rows).map(|r| PyValue::list((0..cols).map(|c| PyValue::from((r * cols + c) as i64)))))
}

fn float_row(len: usize) -> PyValue {
    PyValue::list((0..len).map(|i| PyValue::from(i as f64 * 0.5)))
}

// ============================================================================
// Deduced conversions
// ============================================================================

fn bench_deduced(c: &mut Criterion) {
    let mut group = c.benchmark_group("array_from_py");
    let opts = ConvertOptions::default();

    for size in [8usize, 64, 256] {
        let value = int_matrix(size, size);
        group.throughput(Throughput::Elements((size * size) as u64));
        group.bench_with_input(BenchmarkId::new("int_matrix", size), &value, |b, value| {
            b.iter(|| black_box(array_from_py(black_box(value), &opts)))
        });
    }

    let ragged = PyValue::list((0..256).map(|n| PyValue::list((0..n % 17).map(|i| PyValue::from(i as i64)))));
    group.bench_function("ragged", |b| b.iter(|| black_box(array_from_py(black_box(&ragged), &opts))));

    group.finish();
}

// ============================================================================
// Typed conversions
// ============================================================================

fn bench_typed(c: &mut Criterion) {
    let mut group = c.benchmark_group("array_from_py_typed");
    let opts = ConvertOptions::default();

    let value = float_row(4096);
    for tp in ["4096 * float64", "4096 * float32", "4096 * ?float64"] {
        let tp_parsed = parse_type(tp).unwrap();
        group.throughput(Throughput::Elements(4096));
        group.bench_with_input(BenchmarkId::from_parameter(tp), &tp_parsed, |b, tp| {
            b.iter(|| black_box(array_from_py_typed(black_box(&value), tp, true, &opts)))
        });
    }

    let scalar = PyValue::from(1.5);
    let tp = parse_type("64 * 64 * float64").unwrap();
    group.bench_function("broadcast_scalar", |b| {
        b.iter(|| black_box(array_from_py_typed(black_box(&scalar), &tp, true, &opts)))
    });

    group.finish();
}

// ============================================================================
// Compiled kernel reuse
// ============================================================================

fn bench_compiled(c: &mut Criterion) {
    let tp = parse_type("16 * int64").unwrap();
    let meta = ArrMeta::for_type(&tp);
    let compiled = CompiledConversion::compile(&tp, &meta, &ConvertOptions::default()).unwrap();
    let rows: Vec<PyValue> = (0..256i64)
        .map(|r| PyValue::list((0..16i64).map(|c| PyValue::from(r * 16 + c))))
        .collect();
    let dst = DataPtr::new(MemoryBlock::zeroed(tp.data_size() * rows.len()), 0);

    let mut group = c.benchmark_group("compiled");
    group.throughput(Throughput::Elements((16 * rows.len()) as u64));
    group.bench_function("apply_strided", |b| {
        b.iter(|| black_box(compiled.apply_strided(&dst, tp.data_size() as isize, black_box(&rows))))
    });
    group.finish();
}

// ============================================================================
// Arrays back to host values
// ============================================================================

fn bench_to_py(c: &mut Criterion) {
    let arr = array_from_py(&int_matrix(128, 128), &ConvertOptions::default()).unwrap();
    c.bench_function("as_py/int_matrix_128", |b| b.iter(|| black_box(as_py(black_box(&arr)))));
}

criterion_group!(benches, bench_deduced, bench_typed, bench_compiled, bench_to_py);
criterion_main!(benches);
