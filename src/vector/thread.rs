// Channel-isolated worker: one dedicated thread per environment.

use crossbeam_channel::{Receiver, Sender, bounded};
use std::thread::JoinHandle;

use crate::core::Env;

use super::worker::{Command, EnvWorker, Response, WorkerError, WorkerResult, execute};

/// Worker running its environment on a dedicated thread, connected to the
/// coordinator by a bounded duplex channel pair.
///
/// The environment is built inside the worker thread from the moved factory,
/// so it never has to cross a thread boundary itself. If the environment
/// panics, the thread unwinds, both channels disconnect, and the next
/// `send`/`recv` reports `WorkerError::Disconnected` - that is the crash
/// detection path.
pub struct ThreadWorker<O, A> {
    cmd_tx: Sender<Command<A>>,
    res_rx: Receiver<Response<O>>,
    handle: Option<JoinHandle<()>>,
}

impl<O: Send + 'static, A: Send + 'static> ThreadWorker<O, A> {
    /// Spawn the worker thread and build the environment inside it.
    pub fn spawn<E, F>(env_fn: F) -> Self
    where
        E: Env<Obs = O, Act = A>,
        F: FnOnce() -> E + Send + 'static,
    {
        // One outstanding request per worker, so capacity 1 is exact.
        let (cmd_tx, cmd_rx) = bounded::<Command<A>>(1);
        let (res_tx, res_rx) = bounded::<Response<O>>(1);
        let handle = std::thread::spawn(move || {
            let mut env = env_fn();
            while let Ok(cmd) = cmd_rx.recv() {
                let closing = matches!(cmd, Command::Close);
                let resp = execute(&mut env, cmd);
                if res_tx.send(resp).is_err() || closing {
                    break;
                }
            }
        });
        Self { cmd_tx, res_rx, handle: Some(handle) }
    }
}

impl<O: Send + 'static, A: Send + 'static> EnvWorker<O, A> for ThreadWorker<O, A> {
    fn send(&mut self, cmd: Command<A>) -> WorkerResult<()> {
        self.cmd_tx.send(cmd).map_err(|_| WorkerError::Disconnected)
    }

    fn recv(&mut self) -> WorkerResult<Response<O>> {
        match self.res_rx.recv() {
            Ok(Response::Error(e)) => Err(e),
            Ok(resp) => Ok(resp),
            Err(_) => Err(WorkerError::Disconnected),
        }
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            // A panicked worker thread yields Err here; already surfaced as
            // Disconnected on the channel side.
            let _ = handle.join();
        }
    }
}
