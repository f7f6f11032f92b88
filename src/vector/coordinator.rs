// The coordinator: N workers behind one batched environment.

use std::sync::Arc;

use crate::core::{Env, RenderFrame, Result, VecEnvError};
use crate::utils::split_n;

use super::pool::{TaskPoolWorker, TaskScheduler};
use super::shmem::{ObsCodec, ShmemBuffer, ShmemWorker};
use super::thread::ThreadWorker;
use super::worker::{Command, DummyWorker, EnvWorker, Response, WorkerError, WorkerState};
use super::{BatchEnv, ResetBatch, Seeds, StepBatch};

/// A fixed-size pool of identical environments presented as one batched
/// environment. The execution strategy is chosen at construction and hidden
/// behind the shared worker interface.
///
/// Failure policy (strict-discard, pool survives): when a worker fails inside
/// a batch call, every other outstanding response is still drained so healthy
/// workers return to `Idle`, the healthy results of that call are discarded,
/// and the error names the first failing index in input order. Only the
/// failing workers are marked `Crashed`; later calls addressing a crashed
/// index fail fast before any dispatch.
pub struct VectorEnv<O, A> {
    workers: Vec<Box<dyn EnvWorker<O, A> + Send>>,
    states: Vec<WorkerState>,
    closed: bool,
}

impl<O, A> VectorEnv<O, A> {
    fn from_workers(workers: Vec<Box<dyn EnvWorker<O, A> + Send>>) -> Self {
        assert!(!workers.is_empty(), "pool needs at least one environment");
        let states = vec![WorkerState::Idle; workers.len()];
        Self { workers, states, closed: false }
    }

    /// In-process strategy: workers run sequentially on the calling thread.
    pub fn dummy<E, F>(env_fns: Vec<F>) -> Self
    where
        E: Env<Obs = O, Act = A> + Send + 'static,
        F: Fn() -> E,
        O: Send + 'static,
        A: 'static,
    {
        let workers = env_fns
            .iter()
            .map(|f| Box::new(DummyWorker::new(f())) as Box<dyn EnvWorker<O, A> + Send>)
            .collect();
        Self::from_workers(workers)
    }

    /// Threaded strategy: one isolated worker thread per environment,
    /// communicating over a duplex channel.
    pub fn threaded<E, F>(env_fns: Vec<F>) -> Self
    where
        E: Env<Obs = O, Act = A>,
        F: FnOnce() -> E + Send + 'static,
        O: Send + 'static,
        A: Send + 'static,
    {
        let n = env_fns.len();
        let workers = env_fns
            .into_iter()
            .map(|f| Box::new(ThreadWorker::spawn(f)) as Box<dyn EnvWorker<O, A> + Send>)
            .collect();
        log::debug!("spawned {n} channel workers");
        Self::from_workers(workers)
    }

    /// Shared-memory strategy: threaded workers whose observations travel
    /// through one preallocated binary buffer per worker.
    ///
    /// When `capacity` is `None`, the buffer size comes from a probe reset of
    /// one freshly built environment. Pass an explicit capacity for
    /// environments whose later observations outgrow the first one.
    pub fn shared_memory<E, F>(env_fns: Vec<F>, capacity: Option<usize>) -> Self
    where
        E: Env<Obs = O, Act = A>,
        F: Fn() -> E + Send + 'static,
        O: ObsCodec + Send + 'static,
        A: Send + 'static,
    {
        assert!(!env_fns.is_empty(), "pool needs at least one environment");
        let capacity = capacity.unwrap_or_else(|| {
            let mut probe = env_fns[0]();
            let (obs, _info) = probe.reset(None);
            probe.close();
            obs.encoded_len()
        });
        log::debug!("sized {} shared buffers to {capacity} bytes", env_fns.len());
        let workers = env_fns
            .into_iter()
            .map(|f| {
                let buffer = Arc::new(ShmemBuffer::new(capacity));
                Box::new(ShmemWorker::spawn(f, buffer)) as Box<dyn EnvWorker<O, A> + Send>
            })
            .collect();
        Self::from_workers(workers)
    }

    /// Task-pool ("remote") strategy on a stock rayon pool sized to the
    /// number of environments.
    pub fn task_pool<E, F>(env_fns: Vec<F>) -> Result<Self>
    where
        E: Env<Obs = O, Act = A> + Send + 'static,
        F: Fn() -> E,
        O: Send + 'static,
        A: Send + 'static,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(env_fns.len())
            .build()
            .map_err(|e| VecEnvError::Scheduler(e.to_string()))?;
        Ok(Self::task_pool_with(env_fns, Arc::new(pool)))
    }

    /// Task-pool strategy on a caller-provided scheduler. Retries, if any,
    /// belong to the scheduler, never to the coordinator.
    pub fn task_pool_with<E, F>(env_fns: Vec<F>, scheduler: Arc<dyn TaskScheduler>) -> Self
    where
        E: Env<Obs = O, Act = A> + Send + 'static,
        F: Fn() -> E,
        O: Send + 'static,
        A: Send + 'static,
    {
        let workers = env_fns
            .iter()
            .map(|f| {
                Box::new(TaskPoolWorker::new(f(), Arc::clone(&scheduler)))
                    as Box<dyn EnvWorker<O, A> + Send>
            })
            .collect();
        Self::from_workers(workers)
    }

    /// Number of environments in the pool, fixed at construction.
    pub fn env_num(&self) -> usize { self.workers.len() }

    /// Per-worker lifecycle states, index-aligned with the pool.
    pub fn worker_states(&self) -> &[WorkerState] { &self.states }

    fn ensure_open(&self) -> Result<()> {
        if self.closed { Err(VecEnvError::AlreadyClosed) } else { Ok(()) }
    }

    /// Resolve and validate a selection. Everything here happens before any
    /// dispatch, so a rejected call has no side effect on any worker.
    fn select(&self, ids: Option<&[usize]>) -> Result<Vec<usize>> {
        let ids: Vec<usize> = match ids {
            None => (0..self.env_num()).collect(),
            Some(ids) => ids.to_vec(),
        };
        let mut seen = vec![false; self.env_num()];
        for &id in &ids {
            if id >= self.env_num() {
                return Err(VecEnvError::InvalidIndex { index: id, envs: self.env_num() });
            }
            if seen[id] {
                return Err(VecEnvError::DuplicateIndex { index: id });
            }
            seen[id] = true;
        }
        Ok(ids)
    }

    fn ensure_ready(&self, ids: &[usize]) -> Result<()> {
        for &id in ids {
            if self.states[id] == WorkerState::Crashed {
                return Err(VecEnvError::WorkerFailure {
                    index: id,
                    detail: "worker previously crashed".into(),
                });
            }
        }
        Ok(())
    }

    fn lift(index: usize, err: WorkerError) -> VecEnvError {
        match err {
            WorkerError::BufferOverflow { required, capacity } => {
                VecEnvError::BufferOverflow { index, required, capacity }
            }
            other => VecEnvError::WorkerFailure { index, detail: other.to_string() },
        }
    }

    /// Fan the commands out, then block on the batch barrier until every
    /// dispatched worker has responded. Responses come back in request order.
    /// When several workers fail in one batch, whichever failure sits
    /// earliest in the input order wins, whether it surfaced on send or at
    /// the barrier.
    fn dispatch(&mut self, requests: Vec<(usize, Command<A>)>) -> Result<Vec<(usize, Response<O>)>> {
        // (input position, error) of the earliest failure seen so far.
        let mut failure: Option<(usize, VecEnvError)> = None;
        let mut record = |failure: &mut Option<(usize, VecEnvError)>, pos: usize, e: VecEnvError| {
            if failure.as_ref().is_none_or(|(p, _)| pos < *p) {
                *failure = Some((pos, e));
            }
        };
        let mut sent = Vec::with_capacity(requests.len());
        for (pos, (id, cmd)) in requests.into_iter().enumerate() {
            match self.workers[id].send(cmd) {
                Ok(()) => {
                    self.states[id] = WorkerState::Busy;
                    sent.push((pos, id));
                }
                Err(e) => {
                    log::warn!("worker {id} failed on dispatch: {e}");
                    self.states[id] = WorkerState::Crashed;
                    self.workers[id].join();
                    record(&mut failure, pos, Self::lift(id, e));
                }
            }
        }
        // The barrier: drain every outstanding response even after a failure,
        // so healthy workers return to Idle and stay reusable.
        let mut responses = Vec::with_capacity(sent.len());
        for &(pos, id) in &sent {
            match self.workers[id].recv() {
                Ok(resp) => {
                    self.states[id] = WorkerState::Idle;
                    responses.push((id, resp));
                }
                Err(e) => {
                    log::warn!("worker {id} failed at the batch barrier: {e}");
                    self.states[id] = WorkerState::Crashed;
                    self.workers[id].join();
                    record(&mut failure, pos, Self::lift(id, e));
                }
            }
        }
        match failure {
            Some((_, e)) => Err(e),
            None => Ok(responses),
        }
    }

    /// Reset the selected workers; see [`BatchEnv::reset`].
    pub fn reset(&mut self, ids: Option<&[usize]>, seed: Option<u64>) -> Result<ResetBatch<O>> {
        self.ensure_open()?;
        let ids = self.select(ids)?;
        self.ensure_ready(&ids)?;
        let seeds: Option<Vec<u64>> = seed.map(|s| split_n(s, self.env_num()));
        let requests = ids
            .iter()
            .map(|&id| (id, Command::Reset { seed: seeds.as_ref().map(|v| v[id]) }))
            .collect();
        let responses = self.dispatch(requests)?;
        let mut observations = Vec::with_capacity(responses.len());
        let mut infos = Vec::with_capacity(responses.len());
        for (id, resp) in responses {
            match resp {
                Response::Reset { observation, info } => {
                    observations.push(observation);
                    infos.push(info);
                }
                _ => return Err(self.protocol_violation(id)),
            }
        }
        Ok(ResetBatch { observations, infos })
    }

    /// Step the selected workers; see [`BatchEnv::step`].
    pub fn step(&mut self, actions: Vec<A>, ids: Option<&[usize]>) -> Result<StepBatch<O>> {
        self.ensure_open()?;
        let ids = self.select(ids)?;
        if actions.len() != ids.len() {
            return Err(VecEnvError::ArgumentMismatch { expected: ids.len(), got: actions.len() });
        }
        self.ensure_ready(&ids)?;
        let requests = ids
            .iter()
            .copied()
            .zip(actions)
            .map(|(id, action)| (id, Command::Step { action }))
            .collect();
        let responses = self.dispatch(requests)?;
        let n = responses.len();
        let mut batch = StepBatch {
            observations: Vec::with_capacity(n),
            rewards: Vec::with_capacity(n),
            terminated: Vec::with_capacity(n),
            truncated: Vec::with_capacity(n),
            infos: Vec::with_capacity(n),
        };
        for (id, resp) in responses {
            match resp {
                Response::Step(s) => {
                    batch.observations.push(s.observation);
                    batch.rewards.push(s.reward);
                    batch.terminated.push(s.terminated);
                    batch.truncated.push(s.truncated);
                    batch.infos.push(s.info);
                }
                _ => return Err(self.protocol_violation(id)),
            }
        }
        Ok(batch)
    }

    /// Broadcast seeds to all live workers. Crashed workers are skipped.
    pub fn seed(&mut self, seeds: Option<Seeds>) -> Result<()> {
        self.ensure_open()?;
        let n = self.env_num();
        let per_env: Vec<Option<u64>> = match seeds {
            None => vec![None; n],
            Some(Seeds::Base(s)) => split_n(s, n).into_iter().map(Some).collect(),
            Some(Seeds::PerEnv(v)) => {
                if v.len() != n {
                    return Err(VecEnvError::ArgumentMismatch { expected: n, got: v.len() });
                }
                v.into_iter().map(Some).collect()
            }
        };
        let requests = (0..n)
            .filter(|&id| self.states[id] == WorkerState::Idle)
            .map(|id| (id, Command::Seed { seed: per_env[id] }))
            .collect();
        let responses = self.dispatch(requests)?;
        for (id, resp) in responses {
            if !matches!(resp, Response::Seeded) {
                return Err(self.protocol_violation(id));
            }
        }
        Ok(())
    }

    /// Render one frame per worker; crashed workers yield `None`.
    pub fn render(&mut self) -> Result<Vec<Option<RenderFrame>>> {
        self.ensure_open()?;
        let n = self.env_num();
        let requests = (0..n)
            .filter(|&id| self.states[id] == WorkerState::Idle)
            .map(|id| (id, Command::Render))
            .collect();
        let responses = self.dispatch(requests)?;
        let mut frames: Vec<Option<RenderFrame>> = (0..n).map(|_| None).collect();
        for (id, resp) in responses {
            match resp {
                Response::Frame(frame) => frames[id] = frame,
                _ => return Err(self.protocol_violation(id)),
            }
        }
        Ok(frames)
    }

    /// Shut every worker down and reap its execution context. Idempotent:
    /// calling `close` on an already-closed pool is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        for id in 0..self.env_num() {
            if self.states[id] == WorkerState::Idle {
                if self.workers[id].send(Command::Close).is_ok() {
                    match self.workers[id].recv() {
                        Ok(Response::Closed) => {}
                        Ok(_) | Err(_) => log::warn!("worker {id} did not close cleanly"),
                    }
                }
                self.states[id] = WorkerState::Closed;
            }
            self.workers[id].join();
        }
        self.closed = true;
        log::debug!("closed pool of {} workers", self.env_num());
        Ok(())
    }

    fn protocol_violation(&mut self, id: usize) -> VecEnvError {
        self.states[id] = WorkerState::Crashed;
        VecEnvError::WorkerFailure { index: id, detail: "unexpected response variant".into() }
    }
}

impl<O, A> BatchEnv<O, A> for VectorEnv<O, A> {
    fn env_num(&self) -> usize {
        VectorEnv::env_num(self)
    }

    fn reset(&mut self, ids: Option<&[usize]>, seed: Option<u64>) -> Result<ResetBatch<O>> {
        VectorEnv::reset(self, ids, seed)
    }

    fn step(&mut self, actions: Vec<A>, ids: Option<&[usize]>) -> Result<StepBatch<O>> {
        VectorEnv::step(self, actions, ids)
    }

    fn seed(&mut self, seeds: Option<Seeds>) -> Result<()> {
        VectorEnv::seed(self, seeds)
    }

    fn render(&mut self) -> Result<Vec<Option<RenderFrame>>> {
        VectorEnv::render(self)
    }

    fn close(&mut self) -> Result<()> {
        VectorEnv::close(self)
    }
}

impl<O, A> Drop for VectorEnv<O, A> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
