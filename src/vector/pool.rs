// Task-pool worker: every operation is submitted to an external scheduler.

use crossbeam_channel::{Receiver, bounded};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use crate::core::Env;

use super::worker::{Command, EnvWorker, Response, WorkerError, WorkerResult, execute};

/// An external task scheduler: anything that can run a boxed job eventually.
///
/// Retries, placement, and back-pressure are the scheduler's business; the
/// coordinator only waits for completion at the batch barrier and a task that
/// never reports back surfaces as a worker failure.
pub trait TaskScheduler: Send + Sync {
    fn submit(&self, task: Box<dyn FnOnce() + Send>);
}

impl TaskScheduler for rayon::ThreadPool {
    fn submit(&self, task: Box<dyn FnOnce() + Send>) {
        self.spawn(move || task());
    }
}

/// Worker whose operations run as scheduler tasks.
///
/// The environment lives behind an `Arc<Mutex<_>>` so the task closure can
/// reach it from whichever scheduler thread picks the job up; the mutex is
/// never contended because the coordinator keeps at most one operation
/// outstanding per worker. Panics inside a task are caught and reported as
/// `WorkerError::Env`, so a crashing environment cannot take the scheduler
/// down with it.
pub struct TaskPoolWorker<E: Env> {
    env: Arc<Mutex<E>>,
    scheduler: Arc<dyn TaskScheduler>,
    pending: Option<Receiver<Response<E::Obs>>>,
}

impl<E> TaskPoolWorker<E>
where
    E: Env + Send + 'static,
    E::Obs: Send + 'static,
    E::Act: Send + 'static,
{
    pub fn new(env: E, scheduler: Arc<dyn TaskScheduler>) -> Self {
        Self { env: Arc::new(Mutex::new(env)), scheduler, pending: None }
    }
}

fn panic_detail(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker task panicked".to_string()
    }
}

impl<E> EnvWorker<E::Obs, E::Act> for TaskPoolWorker<E>
where
    E: Env + Send + 'static,
    E::Obs: Send + 'static,
    E::Act: Send + 'static,
{
    fn send(&mut self, cmd: Command<E::Act>) -> WorkerResult<()> {
        if self.pending.is_some() {
            return Err(WorkerError::Protocol("request already outstanding".into()));
        }
        let (tx, rx) = bounded(1);
        let env = Arc::clone(&self.env);
        self.scheduler.submit(Box::new(move || {
            let resp = match catch_unwind(AssertUnwindSafe(|| match env.lock() {
                Ok(mut guard) => execute(&mut *guard, cmd),
                Err(_) => Response::Error(WorkerError::Protocol("environment lock poisoned".into())),
            })) {
                Ok(resp) => resp,
                Err(payload) => Response::Error(WorkerError::Env(panic_detail(payload))),
            };
            let _ = tx.send(resp);
        }));
        self.pending = Some(rx);
        Ok(())
    }

    fn recv(&mut self) -> WorkerResult<Response<E::Obs>> {
        let rx = self
            .pending
            .take()
            .ok_or_else(|| WorkerError::Protocol("no outstanding request".into()))?;
        match rx.recv() {
            Ok(Response::Error(e)) => Err(e),
            Ok(resp) => Ok(resp),
            Err(_) => Err(WorkerError::Disconnected),
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

    fn test_scheduler() -> Arc<dyn TaskScheduler> {
        Arc::new(
            rayon::ThreadPoolBuilder::new()
                .num_threads(2)
                .build()
                .expect("test scheduler"),
        )
    }

    #[test]
    fn task_pool_worker_round_trip() {
        let mut w = TaskPoolWorker::new(CounterEnv::default(), test_scheduler());
        w.send(Command::Reset { seed: None }).unwrap();
        assert!(matches!(w.recv().unwrap(), Response::Reset { observation: 0, .. }));
        w.send(Command::Step { action: 5 }).unwrap();
        match w.recv().unwrap() {
            Response::Step(s) => assert_eq!(s.observation, 5),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn task_panic_is_reported_not_propagated() {
        struct PanicEnv;
        impl Env for PanicEnv {
            type Obs = i64;
            type Act = i64;
            fn reset(&mut self, _seed: Option<u64>) -> (Self::Obs, Info) {
                (0, Info::new())
            }
            fn step(&mut self, _action: Self::Act) -> Step<Self::Obs> {
                panic!("sim exploded");
            }
        }

        let mut w = TaskPoolWorker::new(PanicEnv, test_scheduler());
        w.send(Command::Step { action: 0 }).unwrap();
        match w.recv() {
            Err(WorkerError::Env(detail)) => assert!(detail.contains("sim exploded")),
            other => panic!("expected env failure, got {other:?}"),
        }
    }
}
