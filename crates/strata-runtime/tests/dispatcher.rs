mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use common::{Failure, ProbeMesher, RecordingGpu, TestWorld, dispatcher, drain_until, wait_until};
use strata_mesh::{BuildKind, CubeMesher, RenderLayer};
use strata_runtime::{
    BuildError, Dispatcher, PipelineConfig, PipelineContext, PipelineError, SubmitOutcome,
    TaskStatus,
};
use strata_world::ChunkCoord;

fn queued(outcome: SubmitOutcome) -> Arc<strata_runtime::BuildTask> {
    match outcome {
        SubmitOutcome::Queued(t) => t,
        other => panic!("expected a queued task, got {:?}", other),
    }
}

#[test]
fn single_threaded_builds_lowest_priority_first() {
    let d = dispatcher(TestWorld::floor(), Arc::new(CubeMesher), 1, 1);
    assert!(d.is_single_threaded());
    let a = ChunkCoord::new(0, 0, 0);
    let b = ChunkCoord::new(1, 0, 0);
    let c = ChunkCoord::new(-1, 0, 0);
    d.submit(a, BuildKind::FullRebuild, 100.0);
    d.submit(b, BuildKind::FullRebuild, 25.0);
    d.submit(c, BuildKind::FullRebuild, 400.0);
    assert_eq!(d.debug_info(), "pC: 003, single-threaded");

    let mut gpu = RecordingGpu::default();
    assert!(d.drain_uploads(&mut gpu, None).unwrap());
    assert_eq!(gpu.chunks(), vec![b, a, c]);
    for coord in [a, b, c] {
        assert_eq!(d.task(coord).unwrap().status(), TaskStatus::Done);
        assert!(d.compiled(coord).unwrap().is_layer_started(RenderLayer::Solid));
    }
    assert!(d.is_idle());
    assert!(!d.drain_uploads(&mut gpu, None).unwrap());
}

#[test]
fn resubmission_supersedes_the_pending_task() {
    let d = dispatcher(TestWorld::floor(), Arc::new(CubeMesher), 1, 1);
    let coord = ChunkCoord::new(0, 0, 0);
    let first = queued(d.submit(coord, BuildKind::FullRebuild, 10.0));
    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();
    first.add_finish_callback(Box::new(move |status| {
        assert_eq!(status, TaskStatus::Finished);
        h.fetch_add(1, Ordering::SeqCst);
    }));

    let second = queued(d.submit(coord, BuildKind::FullRebuild, 10.0));
    assert_eq!(first.status(), TaskStatus::Finished);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(d.stats().pending_tasks, 1);

    let mut gpu = RecordingGpu::default();
    d.drain_uploads(&mut gpu, None).unwrap();
    assert_eq!(second.status(), TaskStatus::Done);
    assert_eq!(gpu.layers_for(coord), vec![RenderLayer::Solid]);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn builder_capacity_bounds_chunks_in_flight() {
    let probe = ProbeMesher::plain();
    let d = dispatcher(TestWorld::floor(), probe.mesher.clone(), 2, 1);
    let a = ChunkCoord::new(0, 0, 0);
    let b = ChunkCoord::new(0, 0, 1);
    d.submit(a, BuildKind::FullRebuild, 1.0);
    assert_eq!(probe.started.recv_timeout(Duration::from_secs(5)), Ok(a));
    d.submit(b, BuildKind::FullRebuild, 2.0);
    // The only builder is parked on a's upload until the graphics thread drains it.
    assert!(probe.started.recv_timeout(Duration::from_millis(150)).is_err());
    assert!(wait_until(|| d.builders_exhausted() && d.stats().pending_uploads == 1));

    let mut gpu = RecordingGpu::default();
    d.drain_uploads(&mut gpu, None).unwrap();
    assert_eq!(probe.started.recv_timeout(Duration::from_secs(5)), Ok(b));
    assert!(drain_until(&d, &mut gpu, |d| {
        d.task(b).is_some_and(|t| t.status() == TaskStatus::Done)
    }));
    assert_eq!(gpu.chunks(), vec![a, b]);
    assert_eq!(d.stats().peak_borrowed_builders, 1);
}

#[test]
fn uploads_respect_the_deadline() {
    let d = dispatcher(TestWorld::floor(), Arc::new(CubeMesher), 1, 1);
    for x in 0..4 {
        d.submit(ChunkCoord::new(x, 0, 0), BuildKind::FullRebuild, x as f64);
    }
    let mut gpu = RecordingGpu::default();
    // An already-passed deadline still allows one iteration.
    assert!(d.drain_uploads(&mut gpu, Some(std::time::Instant::now())).unwrap());
    assert_eq!(gpu.chunks().len(), 1);
    assert_eq!(d.stats().pending_tasks, 3);
}

#[test]
fn graphics_calls_from_another_thread_are_refused() {
    let d = dispatcher(TestWorld::floor(), Arc::new(CubeMesher), 2, 2);
    let graphics = d.graphics_thread();
    thread::scope(|s| {
        s.spawn(|| {
            let mut gpu = RecordingGpu::default();
            match d.drain_uploads(&mut gpu, None) {
                Err(PipelineError::WrongThread { expected, actual }) => {
                    assert_eq!(expected, graphics);
                    assert_ne!(actual, graphics);
                }
                other => panic!("expected WrongThread, got {:?}", other),
            }
            assert!(matches!(
                d.submit_now(ChunkCoord::new(0, 0, 0), BuildKind::FullRebuild, 0.0, &mut gpu),
                Err(PipelineError::WrongThread { .. })
            ));
            // Background submission is fine from anywhere.
            assert!(d.submit(ChunkCoord::new(0, 0, 0), BuildKind::FullRebuild, 0.0).task().is_some());
        });
    });
    let coord = ChunkCoord::new(0, 0, 0);
    let mut gpu = RecordingGpu::default();
    assert!(drain_until(&d, &mut gpu, |d| {
        d.task(coord).is_some_and(|t| t.status() == TaskStatus::Done)
    }));
}

#[test]
fn submit_now_builds_and_uploads_before_returning() {
    let d = dispatcher(TestWorld::pond(), Arc::new(CubeMesher), 2, 2);
    let coord = ChunkCoord::new(0, 0, 0);
    let mut gpu = RecordingGpu::default();
    assert!(d.submit_now(coord, BuildKind::FullRebuild, 0.0, &mut gpu).unwrap());
    assert_eq!(
        gpu.layers_for(coord),
        vec![RenderLayer::Solid, RenderLayer::Translucent]
    );
    let compiled = d.compiled(coord).unwrap();
    assert!(compiled.has_translucent());
    assert_eq!(d.task(coord).unwrap().status(), TaskStatus::Done);
}

#[test]
fn resort_replaces_only_the_translucent_layer() {
    let d = dispatcher(TestWorld::pond(), Arc::new(CubeMesher), 1, 1);
    let coord = ChunkCoord::new(0, 0, 0);
    let mut gpu = RecordingGpu::default();

    // Nothing built yet, so nothing to resort.
    assert!(matches!(
        d.submit(coord, BuildKind::TransparencyResort, 0.0),
        SubmitOutcome::Coalesced
    ));

    d.submit(coord, BuildKind::FullRebuild, 0.0);
    d.drain_uploads(&mut gpu, None).unwrap();
    let before = d.compiled(coord).unwrap().sorted_from();

    d.set_observer([40.0, 30.0, -12.0]);
    let resort = queued(d.submit(coord, BuildKind::TransparencyResort, 0.0));
    assert!(matches!(
        d.submit(coord, BuildKind::TransparencyResort, 0.0),
        SubmitOutcome::Coalesced
    ));
    gpu.uploads.clear();
    d.drain_uploads(&mut gpu, None).unwrap();
    assert_eq!(resort.status(), TaskStatus::Done);
    assert_eq!(gpu.layers_for(coord), vec![RenderLayer::Translucent]);

    let after = d.compiled(coord).unwrap();
    assert_ne!(after.sorted_from(), before);
    assert_eq!(after.sorted_from(), Some([40.0, 30.0, -12.0]));
    assert!(after.is_layer_started(RenderLayer::Solid));
}

#[test]
fn resort_does_not_cancel_a_full_rebuild() {
    let d = dispatcher(TestWorld::pond(), Arc::new(CubeMesher), 1, 1);
    let coord = ChunkCoord::new(0, 0, 0);
    let mut gpu = RecordingGpu::default();
    d.submit(coord, BuildKind::FullRebuild, 0.0);
    d.drain_uploads(&mut gpu, None).unwrap();

    let rebuild = queued(d.submit(coord, BuildKind::FullRebuild, 0.0));
    assert!(matches!(
        d.submit(coord, BuildKind::TransparencyResort, 0.0),
        SubmitOutcome::Coalesced
    ));
    assert_eq!(rebuild.status(), TaskStatus::Pending);
}

#[test]
fn far_chunk_waits_for_its_neighbors() {
    let world = TestWorld::floor();
    let d = dispatcher(world.clone(), Arc::new(CubeMesher), 1, 1);
    let coord = ChunkCoord::new(5, 0, 0);
    world.unload(6, 0);
    let task = queued(d.submit(coord, BuildKind::FullRebuild, 0.0));

    let mut gpu = RecordingGpu::default();
    d.drain_uploads(&mut gpu, None).unwrap();
    assert!(gpu.uploads.is_empty());
    assert_eq!(task.status(), TaskStatus::Pending);
    assert_eq!(d.stats().parked_tasks, 1);

    world.load(6, 0);
    assert_eq!(d.notify_chunk_loaded(6, 0), 1);
    d.drain_uploads(&mut gpu, None).unwrap();
    assert_eq!(task.status(), TaskStatus::Done);
    assert_eq!(gpu.chunks(), vec![coord]);
    assert_eq!(d.stats().parked_tasks, 0);
}

#[test]
fn near_chunk_ignores_missing_neighbors() {
    let world = TestWorld::floor();
    let d = dispatcher(world.clone(), Arc::new(CubeMesher), 1, 1);
    world.unload(1, 0);
    let task = queued(d.submit(ChunkCoord::new(0, 0, 0), BuildKind::FullRebuild, 0.0));
    let mut gpu = RecordingGpu::default();
    d.drain_uploads(&mut gpu, None).unwrap();
    assert_eq!(task.status(), TaskStatus::Done);
}

#[test]
fn edge_guarded_task_is_dropped_without_requeue() {
    let world = TestWorld::floor();
    let cfg = PipelineConfig {
        requeue_on_neighbor_load: false,
        ..common::config(1, 1)
    };
    let d = Dispatcher::new(
        PipelineContext {
            world: world.clone(),
            mesher: Arc::new(CubeMesher),
        },
        &cfg,
    )
    .unwrap();
    world.unload(6, 0);
    let task = queued(d.submit(ChunkCoord::new(5, 0, 0), BuildKind::FullRebuild, 0.0));
    let mut gpu = RecordingGpu::default();
    d.drain_uploads(&mut gpu, None).unwrap();
    world.load(6, 0);
    assert_eq!(d.notify_chunk_loaded(6, 0), 0);
    d.drain_uploads(&mut gpu, None).unwrap();
    assert_eq!(task.status(), TaskStatus::Pending);
    assert!(gpu.uploads.is_empty());
}

#[test]
fn debug_info_in_threaded_mode() {
    let d = dispatcher(TestWorld::floor(), Arc::new(CubeMesher), 2, 5);
    assert!(!d.is_single_threaded());
    assert_eq!(d.debug_info(), "pC: 000, pU: 0, aB: 5");
    let stats = d.stats();
    assert_eq!(stats.worker_threads, 2);
    assert_eq!(stats.builder_capacity, 5);
    assert_eq!(stats.free_builders, 5);
}

#[test]
fn mesher_error_crashes_the_pipeline_once() {
    let probe = ProbeMesher::failing(Failure::Error);
    let d = dispatcher(TestWorld::floor(), probe.mesher.clone(), 1, 1);
    let coord = ChunkCoord::new(0, 0, 0);
    d.submit(coord, BuildKind::FullRebuild, 0.0);
    d.submit(ChunkCoord::new(1, 0, 0), BuildKind::FullRebuild, 1.0);

    let mut gpu = RecordingGpu::default();
    let report = match d.drain_uploads(&mut gpu, None) {
        Err(PipelineError::Crashed(r)) => r,
        other => panic!("expected a crash, got {:?}", other),
    };
    assert_eq!(report.coord, Some(coord));
    assert!(matches!(report.error, BuildError::Mesh(_)));
    assert!(d.crash_report().is_some());
    assert!(matches!(
        d.submit(coord, BuildKind::FullRebuild, 0.0),
        SubmitOutcome::Rejected
    ));
    assert!(matches!(
        d.drain_uploads(&mut gpu, None),
        Err(PipelineError::Crashed(_))
    ));
    // The crash closed the queue; the second task never built.
    assert_eq!(probe.started.try_iter().count(), 1);
}

#[test]
fn worker_panic_becomes_a_crash_report() {
    let probe = ProbeMesher::failing(Failure::Panic);
    let d = dispatcher(TestWorld::floor(), probe.mesher.clone(), 2, 2);
    d.submit(ChunkCoord::new(0, 0, 0), BuildKind::FullRebuild, 0.0);
    assert!(wait_until(|| d.crash_report().is_some()));

    let mut gpu = RecordingGpu::default();
    match d.drain_uploads(&mut gpu, None) {
        Err(PipelineError::Crashed(report)) => {
            assert!(report.thread.starts_with("chunk-batcher-"));
            match report.error {
                BuildError::Panicked(msg) => assert!(msg.contains("mesher exploded")),
                other => panic!("expected a panic report, got {:?}", other),
            }
        }
        other => panic!("expected a crash, got {:?}", other),
    }
    assert_eq!(d.stats().borrowed_builders, 0);
}
