//! Contract tests for the batched coordinator across execution strategies:
//! index ordering, subset addressing, seeding, and crash isolation.

use std::time::Duration;

use rand::Rng;
use rust_vecenv::{
    Env, Info, RenderFrame, RngStream, Seeds, Step, VecEnvError, VectorEnv, WorkerState,
    rng_from_seed,
};

/// Sleeps on every step so that higher indices finish first; the observation
/// carries the worker index in its first slot.
struct DelayEnv {
    index: usize,
    steps: usize,
    delay: Duration,
}

impl DelayEnv {
    fn new(index: usize, delay: Duration) -> Self {
        Self { index, steps: 0, delay }
    }
}

impl Env for DelayEnv {
    type Obs = Vec<f32>;
    type Act = f32;

    fn reset(&mut self, _seed: Option<u64>) -> (Self::Obs, Info) {
        self.steps = 0;
        (vec![self.index as f32, 0.0], Info::new())
    }

    fn step(&mut self, action: Self::Act) -> Step<Self::Obs> {
        std::thread::sleep(self.delay);
        self.steps += 1;
        let obs = vec![self.index as f32, self.steps as f32];
        Step::new(obs, action, false, false, Info::new())
    }
}

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn assert_index_ordered(venv: &mut VectorEnv<Vec<f32>, f32>) {
    let reset = venv.reset(None, None).unwrap();
    for (i, obs) in reset.observations.iter().enumerate() {
        assert_eq!(obs[0], i as f32);
    }
    let batch = venv.step(vec![0.0; venv.env_num()], None).unwrap();
    for (i, obs) in batch.observations.iter().enumerate() {
        assert_eq!(obs[0], i as f32, "results must follow input order, not completion order");
        assert_eq!(obs[1], 1.0);
    }
    venv.close().unwrap();
}

// Worker 0 gets the longest delay, so completion order is the reverse of
// index order in every parallel strategy.
fn inverted_delays(n: usize) -> Vec<impl Fn() -> DelayEnv + Send + Sync + 'static> {
    (0..n)
        .map(|i| move || DelayEnv::new(i, Duration::from_millis(((n - i) * 15) as u64)))
        .collect()
}

#[test]
fn dummy_results_follow_index_order() {
    assert_index_ordered(&mut VectorEnv::dummy(inverted_delays(4)));
}

#[test]
fn threaded_results_follow_index_order() {
    assert_index_ordered(&mut VectorEnv::threaded(inverted_delays(4)));
}

#[test]
fn shared_memory_results_follow_index_order() {
    assert_index_ordered(&mut VectorEnv::shared_memory(inverted_delays(4), None));
}

#[test]
fn task_pool_results_follow_index_order() {
    assert_index_ordered(&mut VectorEnv::task_pool(inverted_delays(4)).unwrap());
}

#[derive(Default)]
struct CounterEnv {
    total: i64,
}

impl Env for CounterEnv {
    type Obs = i64;
    type Act = i64;

    fn reset(&mut self, _seed: Option<u64>) -> (Self::Obs, Info) {
        self.total = 0;
        (self.total, Info::new())
    }

    fn step(&mut self, action: Self::Act) -> Step<Self::Obs> {
        self.total += action;
        Step::new(self.total, 1.0, false, false, Info::new())
    }
}

#[test]
fn subset_step_leaves_unselected_envs_untouched() {
    let mut venv = VectorEnv::threaded(vec![CounterEnv::default; 4]);
    venv.reset(None, None).unwrap();
    let batch = venv.step(vec![5, 5], Some(&[2, 0])).unwrap();
    assert_eq!(batch.observations, vec![5, 5]);
    // A zero step over the whole pool exposes who moved.
    let batch = venv.step(vec![0; 4], None).unwrap();
    assert_eq!(batch.observations, vec![5, 0, 5, 0]);
    // Same for a subset reset.
    venv.reset(Some(&[2]), None).unwrap();
    let batch = venv.step(vec![0; 4], None).unwrap();
    assert_eq!(batch.observations, vec![5, 0, 0, 0]);
    venv.close().unwrap();
}

#[test]
fn argument_mismatch_has_no_side_effect() {
    let mut venv = VectorEnv::threaded(vec![CounterEnv::default; 2]);
    venv.reset(None, None).unwrap();
    match venv.step(vec![1], None) {
        Err(VecEnvError::ArgumentMismatch { expected: 2, got: 1 }) => {}
        other => panic!("expected argument mismatch, got {other:?}"),
    }
    let batch = venv.step(vec![0, 0], None).unwrap();
    assert_eq!(batch.observations, vec![0, 0]);
    venv.close().unwrap();
}

/// Panics on step when told to at construction.
struct CrashyEnv {
    boom: bool,
    steps: i64,
}

impl Env for CrashyEnv {
    type Obs = i64;
    type Act = i64;

    fn reset(&mut self, _seed: Option<u64>) -> (Self::Obs, Info) {
        self.steps = 0;
        (self.steps, Info::new())
    }

    fn step(&mut self, _action: Self::Act) -> Step<Self::Obs> {
        if self.boom {
            panic!("simulated environment crash");
        }
        self.steps += 1;
        Step::new(self.steps, 1.0, false, false, Info::new())
    }

    fn render(&self) -> Option<RenderFrame> {
        Some(RenderFrame::Text(format!("steps={}", self.steps)))
    }
}

#[test]
fn one_crash_does_not_take_down_the_pool() {
    init_logs();
    let fns: Vec<_> = (0..4)
        .map(|i| move || CrashyEnv { boom: i == 1, steps: 0 })
        .collect();
    let mut venv = VectorEnv::threaded(fns);
    venv.reset(None, None).unwrap();

    // The failing batch names the crashed index; healthy results are
    // discarded but the healthy envs did step.
    match venv.step(vec![0; 4], None) {
        Err(VecEnvError::WorkerFailure { index: 1, .. }) => {}
        other => panic!("expected worker 1 failure, got {other:?}"),
    }
    assert_eq!(venv.worker_states()[1], WorkerState::Crashed);
    for i in [0, 2, 3] {
        assert_eq!(venv.worker_states()[i], WorkerState::Idle);
    }

    // The healthy subset keeps working.
    let batch = venv.step(vec![0, 0, 0], Some(&[0, 2, 3])).unwrap();
    assert_eq!(batch.observations, vec![2, 2, 2]);

    // Addressing the crashed index fails fast, before any dispatch.
    match venv.step(vec![0], Some(&[1])) {
        Err(VecEnvError::WorkerFailure { index: 1, .. }) => {}
        other => panic!("expected fail-fast on crashed index, got {other:?}"),
    }

    // Render skips the crashed worker instead of failing.
    let frames = venv.render().unwrap();
    assert!(frames[1].is_none());
    for i in [0, 2, 3] {
        assert!(matches!(frames[i], Some(RenderFrame::Text(_))));
    }

    venv.close().unwrap();
}

/// Draws its observation from a seedable RNG stream.
struct NoiseEnv {
    rng: RngStream,
}

impl NoiseEnv {
    fn new() -> Self {
        Self { rng: rng_from_seed(0) }
    }
}

impl Env for NoiseEnv {
    type Obs = Vec<f32>;
    type Act = f32;

    fn reset(&mut self, seed: Option<u64>) -> (Self::Obs, Info) {
        self.seed(seed);
        (vec![self.rng.r#gen::<f32>()], Info::new())
    }

    fn step(&mut self, _action: Self::Act) -> Step<Self::Obs> {
        Step::new(vec![self.rng.r#gen::<f32>()], 0.0, false, false, Info::new())
    }

    fn seed(&mut self, seed: Option<u64>) {
        if let Some(s) = seed {
            self.rng = rng_from_seed(s);
        }
    }
}

#[test]
fn base_seed_is_deterministic_and_distinct_per_env() {
    let run = || {
        let mut venv = VectorEnv::dummy(vec![NoiseEnv::new, NoiseEnv::new, NoiseEnv::new]);
        let obs = venv.reset(None, Some(42)).unwrap().observations;
        venv.close().unwrap();
        obs
    };
    let a = run();
    let b = run();
    assert_eq!(a, b, "same base seed must reproduce the same batch");
    assert_ne!(a[0], a[1]);
    assert_ne!(a[1], a[2]);
}

#[test]
fn seed_broadcast_validates_per_env_length() {
    let mut venv = VectorEnv::dummy(vec![NoiseEnv::new, NoiseEnv::new]);
    match venv.seed(Some(Seeds::PerEnv(vec![1, 2, 3]))) {
        Err(VecEnvError::ArgumentMismatch { expected: 2, got: 3 }) => {}
        other => panic!("expected argument mismatch, got {other:?}"),
    }
    venv.seed(Some(Seeds::Base(7))).unwrap();
    venv.seed(Some(Seeds::PerEnv(vec![1, 2]))).unwrap();
    venv.close().unwrap();
}
