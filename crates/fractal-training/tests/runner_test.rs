//! Integration tests for the checkpointed training loop.

use fractal_training::{
    CheckpointState, CheckpointStore, ClientEvent, ControlSignal, CycleContext, ImageDataset,
    ManualClock, MemoryEventSink, RunOutcome, SoftmaxEngine, Task, TaskId, TaskLayout, TrainingEngine,
    TrainingError, TrainingResult, TrainingRunner,
};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tempfile::TempDir;

/// Wraps the softmax engine to count calls and inject failures.
struct ScriptedEngine {
    inner: SoftmaxEngine,
    steps: Arc<AtomicU64>,
    saves: Arc<AtomicU64>,
    fail_at_step: Option<u64>,
    cancel_after: Option<(u64, ControlSignal)>,
}

impl ScriptedEngine {
    fn new() -> Self {
        Self {
            inner: SoftmaxEngine::new(4, 2, 0.05),
            steps: Arc::new(AtomicU64::new(0)),
            saves: Arc::new(AtomicU64::new(0)),
            fail_at_step: None,
            cancel_after: None,
        }
    }
}

impl TrainingEngine for ScriptedEngine {
    fn train_step(&mut self, input: &[f32], label: &[f32]) -> TrainingResult<f32> {
        let step = self.steps.fetch_add(1, Ordering::SeqCst);
        if self.fail_at_step == Some(step) {
            return Err(TrainingError::Engine("injected failure".to_string()));
        }
        if let Some((after, control)) = &self.cancel_after {
            if step + 1 == *after {
                control.cancel();
            }
        }
        self.inner.train_step(input, label)
    }

    fn infer(&self, input: &[f32]) -> TrainingResult<Vec<f32>> {
        self.inner.infer(input)
    }

    fn save_checkpoint(&self, path: &Path) -> TrainingResult<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save_checkpoint(path)
    }

    fn restore_checkpoint(&mut self, path: &Path) -> TrainingResult<()> {
        self.inner.restore_checkpoint(path)
    }
}

struct Harness {
    _temp: TempDir,
    store: CheckpointStore,
    clock: Arc<ManualClock>,
    events: Arc<MemoryEventSink>,
    control: ControlSignal,
    task: Task,
    dataset: ImageDataset,
}

impl Harness {
    fn new(epochs: u32) -> Self {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::new(TaskLayout::for_data_dir(temp.path()));
        let mut task = Task::new(TaskId(5));
        task.epochs = epochs;
        task.input_shape = vec![2, 2];
        task.num_classes = 2;
        task.num_trainings = 100;
        task.batch_size = 100;

        let inputs: Vec<f32> = (0..100).flat_map(|i| [(i % 2) as f32, 0.5, 1.0, (i % 3) as f32]).collect();
        let labels: Vec<f32> = (0..100).flat_map(|i| if i % 2 == 0 { [1.0, 0.0] } else { [0.0, 1.0] }).collect();
        let dataset = ImageDataset::new(inputs, labels, 4, 2).unwrap();

        Self {
            _temp: temp,
            store,
            clock: Arc::new(ManualClock::new()),
            events: Arc::new(MemoryEventSink::new()),
            control: ControlSignal::new(),
            task,
            dataset,
        }
    }

    fn runner_with(&self, conditions: Arc<dyn fractal_training::LiveConditions>) -> TrainingRunner {
        let ctx = CycleContext::new(self.control.clone(), self.clock.clone(), self.events.clone(), conditions);
        TrainingRunner::new(self.store.clone(), ctx)
    }

    fn runner(&self) -> TrainingRunner {
        self.runner_with(Arc::new(fractal_training::control::Unconstrained))
    }

    fn epoch_events(&self) -> Vec<u32> {
        self.events
            .events()
            .into_iter()
            .filter_map(|e| match e {
                ClientEvent::Epoch { completed, .. } => Some(completed),
                _ => None,
            })
            .collect()
    }
}

#[test]
fn test_three_epoch_run_checkpoints_every_epoch() {
    let h = Harness::new(3);
    let mut engine = ScriptedEngine::new();
    let saves = Arc::clone(&engine.saves);

    let outcome = h.runner().run(&h.task, &mut engine, &h.dataset).unwrap();

    assert!(matches!(outcome, RunOutcome::Completed { steps: 300, .. }));
    assert_eq!(saves.load(Ordering::SeqCst), 3);
    assert_eq!(h.epoch_events(), vec![1, 2, 3]);
    assert_eq!(h.events.progress(), vec![0, 33, 66, 100]);
    match h.store.inspect(h.task.task_id) {
        CheckpointState::Resumable(record) => assert_eq!(record.last_epoch, 3),
        other => panic!("expected resumable checkpoint, got {other:?}"),
    }
}

#[test]
fn test_finished_task_runs_zero_steps() {
    let h = Harness::new(3);
    h.store.commit(&h.task, &SoftmaxEngine::new(4, 2, 0.05), 3).unwrap();

    let mut engine = ScriptedEngine::new();
    let steps = Arc::clone(&engine.steps);
    let saves = Arc::clone(&engine.saves);
    let outcome = h.runner().run(&h.task, &mut engine, &h.dataset).unwrap();

    assert_eq!(outcome, RunOutcome::Completed { steps: 0, last_loss: None });
    assert_eq!(steps.load(Ordering::SeqCst), 0);
    assert_eq!(saves.load(Ordering::SeqCst), 0);
    assert_eq!(h.events.progress(), vec![100]);
}

#[test]
fn test_resume_reports_absolute_baseline_first() {
    let h = Harness::new(3);
    h.store.commit(&h.task, &SoftmaxEngine::new(4, 2, 0.05), 1).unwrap();

    let mut engine = ScriptedEngine::new();
    let steps = Arc::clone(&engine.steps);
    h.runner().run(&h.task, &mut engine, &h.dataset).unwrap();

    let progress = h.events.progress();
    assert_eq!(progress.first(), Some(&33));
    assert_eq!(progress.last(), Some(&100));
    assert_eq!(steps.load(Ordering::SeqCst), 200);
    assert_eq!(h.epoch_events(), vec![2, 3]);
}

#[test]
fn test_crash_between_weights_and_record_resumes_previous_epoch() {
    let h = Harness::new(3);
    let mut trained = SoftmaxEngine::new(4, 2, 0.05);
    h.store.commit(&h.task, &trained, 1).unwrap();

    // Epoch 2 weights hit the disk, then the process dies before the record is replaced.
    trained.train_step(&[1.0, 0.5, 1.0, 0.0], &[0.0, 1.0]).unwrap();
    trained.save_checkpoint(&h.store.layout().weights_path(&h.task, 2)).unwrap();

    let mut engine = ScriptedEngine::new();
    let steps = Arc::clone(&engine.steps);
    h.runner().run(&h.task, &mut engine, &h.dataset).unwrap();

    assert_eq!(h.events.progress().first(), Some(&33));
    assert_eq!(steps.load(Ordering::SeqCst), 200);
}

#[test]
fn test_corrupted_record_restarts_with_status() {
    let h = Harness::new(2);
    h.store.layout().ensure_root().unwrap();
    std::fs::write(h.store.layout().sidecar_path(h.task.task_id), b"not json").unwrap();

    let mut engine = ScriptedEngine::new();
    let steps = Arc::clone(&engine.steps);
    h.runner().run(&h.task, &mut engine, &h.dataset).unwrap();

    assert_eq!(steps.load(Ordering::SeqCst), 200);
    assert!(h.events.statuses().iter().any(|s| s.starts_with("Checkpoint unusable")));
}

#[test]
fn test_step_failure_carries_coordinates_and_keeps_last_checkpoint() {
    let h = Harness::new(3);
    let mut engine = ScriptedEngine::new();
    engine.fail_at_step = Some(142);

    let err = h.runner().run(&h.task, &mut engine, &h.dataset).unwrap_err();
    match err {
        TrainingError::Step { epoch, sample, .. } => {
            assert_eq!(epoch, 1);
            assert_eq!(sample, 42);
        }
        other => panic!("expected step error, got {other}"),
    }
    assert_eq!(h.store.inspect(h.task.task_id).resume_epoch(), 1);
}

#[test]
fn test_cancel_mid_epoch_stops_without_checkpoint() {
    let h = Harness::new(3);
    let mut engine = ScriptedEngine::new();
    engine.cancel_after = Some((150, h.control.clone()));
    let saves = Arc::clone(&engine.saves);

    let outcome = h.runner().run(&h.task, &mut engine, &h.dataset).unwrap();

    assert_eq!(outcome, RunOutcome::Cancelled);
    assert_eq!(saves.load(Ordering::SeqCst), 1);
    assert_eq!(h.store.inspect(h.task.task_id).resume_epoch(), 1);
}

#[test]
fn test_live_condition_violation_blocks_in_slow_trap() {
    let h = Harness::new(1);
    let blocked = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&blocked);
    let runner = h.runner_with(Arc::new(move || {
        flag.load(Ordering::SeqCst).then(|| "Standby: Battery too low (Need 34%)".to_string())
    }));

    let release = Arc::clone(&blocked);
    h.clock.set_hook(move |elapsed| {
        if elapsed >= Duration::from_secs(6) {
            release.store(false, Ordering::SeqCst);
        }
    });

    let mut engine = ScriptedEngine::new();
    let outcome = runner.run(&h.task, &mut engine, &h.dataset).unwrap();

    assert!(matches!(outcome, RunOutcome::Completed { steps: 100, .. }));
    assert_eq!(h.clock.elapsed(), Duration::from_secs(6));
    assert!(h.events.statuses().contains(&"Standby: Battery too low (Need 34%)".to_string()));
}

#[test]
fn test_cancel_while_paused_in_training_unwinds_within_a_tick() {
    let h = Harness::new(3);
    h.control.set_paused(true);
    let remote = h.control.clone();
    h.clock.set_hook(move |elapsed| {
        if elapsed >= Duration::from_secs(30) {
            remote.cancel();
        }
    });

    let mut engine = ScriptedEngine::new();
    let steps = Arc::clone(&engine.steps);
    let outcome = h.runner().run(&h.task, &mut engine, &h.dataset).unwrap();

    assert_eq!(outcome, RunOutcome::Cancelled);
    assert_eq!(steps.load(Ordering::SeqCst), 0);
    assert!(h.clock.elapsed() <= Duration::from_secs(33));
}
