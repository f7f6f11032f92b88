// Vectorized environments: one batched coordinator over N single-env workers.
//
// Four execution strategies share the `EnvWorker` capability interface:
// - `VectorEnv::dummy`         - in-process sequential calls
// - `VectorEnv::threaded`      - one isolated worker thread per env, channel protocol
// - `VectorEnv::shared_memory` - threaded plus a fixed binary buffer per worker
// - `VectorEnv::task_pool`     - each operation submitted to a task scheduler
//
// Whatever the strategy, a batch call fans out to the selected workers, blocks
// on the batch barrier until all of them respond, and returns results in the
// input index order.

mod coordinator;
mod pool;
mod shmem;
mod thread;
mod worker;
mod wrappers;

pub use coordinator::VectorEnv;
pub use pool::{TaskPoolWorker, TaskScheduler};
pub use shmem::{ObsCodec, ShmemBuffer, ShmemWorker};
pub use thread::ThreadWorker;
pub use worker::{Command, DummyWorker, EnvWorker, Response, WorkerError, WorkerState};
pub use wrappers::{NormObs, NormObsConfig, RunningStats};

use crate::core::{Info, RenderFrame, Result};

/// Seeds accepted by [`BatchEnv::seed`]: a single base seed expanded into one
/// deterministic sub-seed per worker, or an explicit per-worker list.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Seeds {
    Base(u64),
    PerEnv(Vec<u64>),
}

impl From<u64> for Seeds {
    fn from(seed: u64) -> Self { Seeds::Base(seed) }
}

impl From<Vec<u64>> for Seeds {
    fn from(seeds: Vec<u64>) -> Self { Seeds::PerEnv(seeds) }
}

/// Batched result of a `reset` call, ordered by the input index order.
#[derive(Clone, Debug)]
pub struct ResetBatch<O> {
    pub observations: Vec<O>,
    pub infos: Vec<Info>,
}

/// Batched result of a `step` call, ordered by the input index order.
#[derive(Clone, Debug)]
pub struct StepBatch<O> {
    pub observations: Vec<O>,
    pub rewards: Vec<f32>,
    pub terminated: Vec<bool>,
    pub truncated: Vec<bool>,
    pub infos: Vec<Info>,
}

impl<O> StepBatch<O> {
    /// Number of transitions in the batch.
    pub fn len(&self) -> usize { self.observations.len() }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool { self.observations.is_empty() }

    /// Episode-over flags, terminated OR truncated per transition.
    pub fn dones(&self) -> Vec<bool> {
        self.terminated
            .iter()
            .zip(self.truncated.iter())
            .map(|(&t, &tr)| t || tr)
            .collect()
    }
}

/// The batched environment contract: implemented by [`VectorEnv`] and by
/// transparent wrappers such as [`NormObs`], so wrappers stack freely.
pub trait BatchEnv<O, A> {
    /// Number of environments in the pool, fixed at construction.
    fn env_num(&self) -> usize;

    /// Reset the selected workers (default: all). Blocks until every selected
    /// worker confirms; observations come back in the input index order. A
    /// base `seed` is expanded into per-worker sub-seeds.
    fn reset(&mut self, ids: Option<&[usize]>, seed: Option<u64>) -> Result<ResetBatch<O>>;

    /// Step the selected workers (default: all) with one action each.
    /// `actions.len()` must equal the selection length, otherwise the call
    /// fails with `ArgumentMismatch` before any dispatch.
    fn step(&mut self, actions: Vec<A>, ids: Option<&[usize]>) -> Result<StepBatch<O>>;

    /// Broadcast seeds to all live workers.
    fn seed(&mut self, seeds: Option<Seeds>) -> Result<()>;

    /// Render one frame per worker; crashed workers yield `None`.
    fn render(&mut self) -> Result<Vec<Option<RenderFrame>>>;

    /// Shut the pool down. Idempotent: closing an already-closed pool is a
    /// no-op, not an error.
    fn close(&mut self) -> Result<()>;
}
