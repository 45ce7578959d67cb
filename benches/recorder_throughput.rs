use criterion::{criterion_group, criterion_main, Criterion};
use fdprec::ecr::EntityRepository;
use fdprec::recorder::{AsyncRecorder, FrameKind};
use tempfile::NamedTempFile;

#[derive(Clone, Copy, Default)]
struct Row {
    x: f32,
    y: f32,
}

fn bench_keyframe_capture(c: &mut Criterion) {
    let repo = EntityRepository::new(16_384, 65_536, false);
    let cid = repo.register_plain::<Row>("BenchRow");
    for i in 0..4096 {
        let e = repo.create_entity().unwrap();
        repo.add_component(e, cid, Row { x: i as f32, y: 0.0 }).unwrap();
    }

    let tmp = NamedTempFile::new().unwrap();
    let recorder = AsyncRecorder::create(tmp.path(), 0).unwrap();
    c.bench_function("recorder_keyframe_capture_4096_entities", |b| {
        b.iter(|| {
            recorder
                .capture_frame(&repo, &[cid], FrameKind::Keyframe, 0, &[], true)
                .unwrap();
        })
    });
    recorder.dispose().unwrap();
}

fn bench_delta_capture_sparse_writes(c: &mut Criterion) {
    let repo = EntityRepository::new(16_384, 65_536, false);
    let cid = repo.register_plain::<Row>("BenchRowDelta");
    let handles: Vec<_> = (0..4096)
        .map(|i| {
            let e = repo.create_entity().unwrap();
            repo.add_component(e, cid, Row { x: i as f32, y: 0.0 }).unwrap();
            e
        })
        .collect();

    let tmp = NamedTempFile::new().unwrap();
    let recorder = AsyncRecorder::create(tmp.path(), 0).unwrap();
    recorder.capture_frame(&repo, &[cid], FrameKind::Keyframe, 0, &[], true).unwrap();

    c.bench_function("recorder_delta_capture_1_of_4096_changed", |b| {
        b.iter(|| {
            let since = repo.global_version();
            repo.tick();
            repo.set_component(handles[0], cid, Row { x: 0.0, y: 1.0 }).unwrap();
            recorder
                .capture_frame(&repo, &[cid], FrameKind::Delta, since, &[], true)
                .unwrap();
        })
    });
    recorder.dispose().unwrap();
}

criterion_group!(benches, bench_keyframe_capture, bench_delta_capture_sparse_writes);
criterion_main!(benches);
