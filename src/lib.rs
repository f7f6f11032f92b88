//! Batched reinforcement-learning environments behind a single interface.
//!
//! A [`VectorEnv`] presents N environments as one: actions go out as a batch,
//! observations come back as a batch, always in the caller's index order. The
//! same coordinator drives four execution strategies:
//!
//! - [`VectorEnv::dummy`]: sequential, in the caller's thread
//! - [`VectorEnv::threaded`]: one worker thread per environment
//! - [`VectorEnv::shared_memory`]: worker threads with observations passed
//!   through preallocated binary buffers
//! - [`VectorEnv::task_pool`]: operations submitted to an external
//!   [`TaskScheduler`]
//!
//! Batch-level wrappers ([`NormObs`]) and per-environment adapters
//! ([`wrappers`]) compose on top.
//!
//! ```
//! use rust_vecenv::{Env, Info, Step, VectorEnv};
//!
//! struct Counter(i64);
//!
//! impl Env for Counter {
//!     type Obs = i64;
//!     type Act = i64;
//!     fn reset(&mut self, _seed: Option<u64>) -> (i64, Info) {
//!         self.0 = 0;
//!         (0, Info::new())
//!     }
//!     fn step(&mut self, action: i64) -> Step<i64> {
//!         self.0 += action;
//!         Step::new(self.0, 1.0, false, false, Info::new())
//!     }
//! }
//!
//! let mut venv = VectorEnv::threaded((0..4).map(|_| || Counter(0)).collect::<Vec<_>>());
//! venv.reset(None, Some(0)).unwrap();
//! let batch = venv.step(vec![1, 2, 3, 4], None).unwrap();
//! assert_eq!(batch.observations, vec![1, 2, 3, 4]);
//! venv.close().unwrap();
//! ```

pub mod core;
pub mod utils;
pub mod vector;
pub mod wrappers;

pub use crate::core::{Env, Info, InfoValue, RenderFrame, Result, Step, VecEnvError};
pub use crate::utils::{RngStream, SeedSequence, rng_from_seed};
pub use crate::vector::{
    BatchEnv, EnvWorker, NormObs, NormObsConfig, ObsCodec, ResetBatch, RunningStats, Seeds,
    StepBatch, TaskScheduler, VectorEnv, WorkerState,
};
pub use crate::wrappers::{ContinuousToDiscrete, MultiDiscreteToDiscrete, TruncatedAsTerminated};
