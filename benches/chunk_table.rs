use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fdprec::ecr::NativeChunkTable;

#[derive(Clone, Copy, Default)]
struct Row {
    x: f32,
    y: f32,
    z: f32,
}

fn bench_has_changes(c: &mut Criterion) {
    let table: NativeChunkTable<Row> = NativeChunkTable::new(1_000_000, 65_536);
    table.get_rw(0, 1).unwrap();
    c.bench_function("chunk_table_has_changes", |b| {
        b.iter(|| black_box(table.has_changes(0, 0)))
    });
}

fn bench_write_row(c: &mut Criterion) {
    let table: NativeChunkTable<Row> = NativeChunkTable::new(1_000_000, 65_536);
    let mut tick = 0u64;
    c.bench_function("chunk_table_write_row", |b| {
        b.iter(|| {
            tick += 1;
            let mut guard = table.get_rw(0, tick).unwrap();
            guard.rows_mut()[0] = black_box(Row { x: 1.0, y: 2.0, z: 3.0 });
        })
    });
}

fn bench_copy_chunk_to_buffer(c: &mut Criterion) {
    let table: NativeChunkTable<Row> = NativeChunkTable::new(1_000_000, 65_536);
    table.get_rw(0, 1).unwrap();
    let mut buf = Vec::new();
    c.bench_function("chunk_table_copy_to_buffer", |b| {
        b.iter(|| {
            buf.clear();
            table.copy_chunk_to_buffer(0, &mut buf).unwrap();
            black_box(&buf);
        })
    });
}

criterion_group!(benches, bench_has_changes, bench_write_row, bench_copy_chunk_to_buffer);
criterion_main!(benches);
