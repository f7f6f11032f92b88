// Worker capability interface shared by every execution strategy.
//
// The request/response split (`send` then `recv`) is what lets the
// coordinator fan a batch out to all selected workers before blocking on any
// of them. Each worker serves exactly one outstanding request at a time.

use crate::core::{Env, Info, RenderFrame, Step};

/// Lifecycle state of a worker, tracked by the coordinator.
///
/// A worker is `Busy` between dispatch and result delivery, `Crashed` once
/// its channel fails or it reports an unrecoverable error, and `Closed` after
/// pool shutdown. Only `Idle` workers accept new requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Busy,
    Closed,
    Crashed,
}

/// Tagged command sent from the coordinator to a worker.
#[derive(Debug)]
pub enum Command<A> {
    Reset { seed: Option<u64> },
    Step { action: A },
    Seed { seed: Option<u64> },
    Render,
    Close,
}

/// Tagged response returned by a worker.
#[derive(Debug)]
pub enum Response<O> {
    Reset { observation: O, info: Info },
    Step(Step<O>),
    Seeded,
    Frame(Option<RenderFrame>),
    Closed,
    Error(WorkerError),
}

/// Failure local to one worker. The coordinator attaches the worker index
/// when converting this into a `VecEnvError`.
#[derive(thiserror::Error, Clone, Debug)]
pub enum WorkerError {
    #[error("worker channel disconnected")]
    Disconnected,
    #[error("environment failed: {0}")]
    Env(String),
    #[error("observation of {required} bytes exceeds shared buffer capacity {capacity}")]
    BufferOverflow { required: usize, capacity: usize },
    #[error("protocol violation: {0}")]
    Protocol(String),
}

pub type WorkerResult<T> = std::result::Result<T, WorkerError>;

/// One worker owning exactly one environment instance.
///
/// `send` dispatches a command without blocking on its completion; `recv`
/// blocks until the matching response arrives. Implementations must preserve
/// request/response pairing: no pipelining, one outstanding command at most.
pub trait EnvWorker<O, A> {
    /// Dispatch a command to the environment.
    fn send(&mut self, cmd: Command<A>) -> WorkerResult<()>;

    /// Block until the response for the last dispatched command arrives.
    /// A worker-reported error comes back as `Err`, never as a response
    /// variant.
    fn recv(&mut self) -> WorkerResult<Response<O>>;

    /// Reap any execution context after `Close` or a crash. Default: no-op.
    fn join(&mut self) {}
}

/// Run one command against a local environment. Shared by the worker loops of
/// every strategy that holds the environment directly.
pub(crate) fn execute<E: Env>(env: &mut E, cmd: Command<E::Act>) -> Response<E::Obs> {
    match cmd {
        Command::Reset { seed } => {
            let (observation, info) = env.reset(seed);
            Response::Reset { observation, info }
        }
        Command::Step { action } => Response::Step(env.step(action)),
        Command::Seed { seed } => {
            env.seed(seed);
            Response::Seeded
        }
        Command::Render => Response::Frame(env.render()),
        Command::Close => {
            env.close();
            Response::Closed
        }
    }
}

/// In-process worker: executes the command eagerly on `send` and hands the
/// stored result back on `recv`. No isolation; an environment panic unwinds
/// into the caller.
pub struct DummyWorker<E: Env> {
    env: E,
    pending: Option<Response<E::Obs>>,
}

impl<E: Env> DummyWorker<E> {
    pub fn new(env: E) -> Self {
        Self { env, pending: None }
    }
}

impl<E: Env> EnvWorker<E::Obs, E::Act> for DummyWorker<E> {
    fn send(&mut self, cmd: Command<E::Act>) -> WorkerResult<()> {
        if self.pending.is_some() {
            return Err(WorkerError::Protocol("request already outstanding".into()));
        }
        self.pending = Some(execute(&mut self.env, cmd));
        Ok(())
    }

    fn recv(&mut self) -> WorkerResult<Response<E::Obs>> {
        match self.pending.take() {
            Some(Response::Error(e)) => Err(e),
            Some(resp) => Ok(resp),
            None => Err(WorkerError::Protocol("no outstanding request".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Env, Info, Step};

    #[derive(Default)]
    struct CounterEnv {
        count: i64,
    }

    impl Env for CounterEnv {
        type Obs = i64;
        type Act = i64;

        fn reset(&mut self, _seed: Option<u64>) -> (Self::Obs, Info) {
            self.count = 0;
            (self.count, Info::new())
        }

        fn step(&mut self, action: Self::Act) -> Step<Self::Obs> {
            self.count += action;
            Step::new(self.count, 1.0, false, false, Info::new())
        }
    }

    #[test]
    fn dummy_worker_pairs_requests_and_responses() {
        let mut w = DummyWorker::new(CounterEnv::default());
        w.send(Command::Reset { seed: None }).unwrap();
        assert!(matches!(w.recv().unwrap(), Response::Reset { observation: 0, .. }));
        w.send(Command::Step { action: 2 }).unwrap();
        match w.recv().unwrap() {
            Response::Step(s) => assert_eq!(s.observation, 2),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn dummy_worker_rejects_pipelining() {
        let mut w = DummyWorker::new(CounterEnv::default());
        w.send(Command::Reset { seed: None }).unwrap();
        assert!(w.send(Command::Render).is_err());
        let _ = w.recv().unwrap();
        assert!(w.recv().is_err());
    }
}
