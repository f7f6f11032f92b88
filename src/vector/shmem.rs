// Shared-memory transport: observations bypass the message channel.
//
// Each worker owns one fixed-capacity binary buffer. The worker serializes
// the observation straight into the buffer and sends only a light message
// (reward, flags, info) over the channel; the coordinator reads the buffer
// after that message arrives. Write/read access alternates under an explicit
// two-state owner, toggled only by write and read themselves - the
// one-outstanding-request barrier guarantees the two sides never race.

use crossbeam_channel::{Receiver, Sender, bounded};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::core::{Env, Info, RenderFrame, Step};

use super::worker::{Command, EnvWorker, Response, WorkerError, WorkerResult};

/// Fixed binary layout of an observation, required by the shared-memory
/// strategy. `encode` must write exactly `encoded_len` bytes.
pub trait ObsCodec: Sized {
    /// Serialized size of this value in bytes.
    fn encoded_len(&self) -> usize;

    /// Write the value into `buf`, which is exactly `encoded_len()` long.
    fn encode(&self, buf: &mut [u8]);

    /// Reconstruct a value from the bytes written by `encode`.
    fn decode(buf: &[u8]) -> Self;
}

impl ObsCodec for Vec<f32> {
    fn encoded_len(&self) -> usize {
        self.len() * 4
    }

    fn encode(&self, buf: &mut [u8]) {
        for (chunk, v) in buf.chunks_exact_mut(4).zip(self.iter()) {
            chunk.copy_from_slice(&v.to_le_bytes());
        }
    }

    fn decode(buf: &[u8]) -> Self {
        buf.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }
}

impl ObsCodec for Vec<u8> {
    fn encoded_len(&self) -> usize {
        self.len()
    }

    fn encode(&self, buf: &mut [u8]) {
        buf.copy_from_slice(self);
    }

    fn decode(buf: &[u8]) -> Self {
        buf.to_vec()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Owner {
    Worker,
    Coordinator,
}

struct Slot {
    owner: Owner,
    len: usize,
    data: Box<[u8]>,
}

/// One fixed-size observation buffer, exclusively writable by its worker and
/// readable by the coordinator, in strict alternation.
///
/// A write larger than the capacity fails with `BufferOverflow` and leaves
/// the slot writable; nothing is ever silently truncated.
pub struct ShmemBuffer {
    capacity: usize,
    slot: Mutex<Slot>,
}

impl ShmemBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slot: Mutex::new(Slot {
                owner: Owner::Worker,
                len: 0,
                data: vec![0u8; capacity].into_boxed_slice(),
            }),
        }
    }

    /// Fixed capacity in bytes.
    pub fn capacity(&self) -> usize { self.capacity }

    /// Worker side: serialize an observation and hand the slot to the
    /// coordinator.
    pub(crate) fn write<O: ObsCodec>(&self, obs: &O) -> WorkerResult<()> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| WorkerError::Protocol("shared buffer lock poisoned".into()))?;
        if slot.owner != Owner::Worker {
            return Err(WorkerError::Protocol("shared buffer not writable".into()));
        }
        let required = obs.encoded_len();
        if required > self.capacity {
            return Err(WorkerError::BufferOverflow { required, capacity: self.capacity });
        }
        obs.encode(&mut slot.data[..required]);
        slot.len = required;
        slot.owner = Owner::Coordinator;
        Ok(())
    }

    /// Coordinator side: deserialize the observation and hand the slot back
    /// to the worker.
    pub(crate) fn read<O: ObsCodec>(&self) -> WorkerResult<O> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| WorkerError::Protocol("shared buffer lock poisoned".into()))?;
        if slot.owner != Owner::Coordinator {
            return Err(WorkerError::Protocol("shared buffer not readable".into()));
        }
        let obs = O::decode(&slot.data[..slot.len]);
        slot.owner = Owner::Worker;
        Ok(obs)
    }
}

/// Light response carrying everything except the observation, which travels
/// through the shared buffer.
#[derive(Debug)]
enum ShmemResponse {
    Reset { info: Info },
    Step { reward: f32, terminated: bool, truncated: bool, info: Info },
    Seeded,
    Frame(Option<RenderFrame>),
    Closed,
    Error(WorkerError),
}

/// Threaded worker whose observations travel through a [`ShmemBuffer`]
/// instead of the response channel.
pub struct ShmemWorker<O, A> {
    cmd_tx: Sender<Command<A>>,
    res_rx: Receiver<ShmemResponse>,
    buffer: Arc<ShmemBuffer>,
    handle: Option<JoinHandle<()>>,
    _obs: PhantomData<fn() -> O>,
}

impl<O, A> ShmemWorker<O, A>
where
    O: ObsCodec + Send + 'static,
    A: Send + 'static,
{
    /// Spawn the worker thread; `buffer` is the worker's preallocated
    /// observation slot, shared with the coordinator side of this handle.
    pub fn spawn<E, F>(env_fn: F, buffer: Arc<ShmemBuffer>) -> Self
    where
        E: Env<Obs = O, Act = A>,
        F: FnOnce() -> E + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = bounded::<Command<A>>(1);
        let (res_tx, res_rx) = bounded::<ShmemResponse>(1);
        let writer = Arc::clone(&buffer);
        let handle = std::thread::spawn(move || {
            let mut env = env_fn();
            while let Ok(cmd) = cmd_rx.recv() {
                let closing = matches!(cmd, Command::Close);
                let resp = match cmd {
                    Command::Reset { seed } => {
                        let (obs, info) = env.reset(seed);
                        match writer.write(&obs) {
                            Ok(()) => ShmemResponse::Reset { info },
                            Err(e) => ShmemResponse::Error(e),
                        }
                    }
                    Command::Step { action } => {
                        let s = env.step(action);
                        match writer.write(&s.observation) {
                            Ok(()) => ShmemResponse::Step {
                                reward: s.reward,
                                terminated: s.terminated,
                                truncated: s.truncated,
                                info: s.info,
                            },
                            Err(e) => ShmemResponse::Error(e),
                        }
                    }
                    Command::Seed { seed } => {
                        env.seed(seed);
                        ShmemResponse::Seeded
                    }
                    Command::Render => ShmemResponse::Frame(env.render()),
                    Command::Close => {
                        env.close();
                        ShmemResponse::Closed
                    }
                };
                // A transport error is fatal for this worker; exiting here
                // keeps `join` from waiting on a thread nobody will talk to
                // again.
                let fatal = matches!(resp, ShmemResponse::Error(_));
                if res_tx.send(resp).is_err() || closing || fatal {
                    break;
                }
            }
        });
        Self { cmd_tx, res_rx, buffer, handle: Some(handle), _obs: PhantomData }
    }
}

impl<O, A> EnvWorker<O, A> for ShmemWorker<O, A>
where
    O: ObsCodec + Send + 'static,
    A: Send + 'static,
{
    fn send(&mut self, cmd: Command<A>) -> WorkerResult<()> {
        self.cmd_tx.send(cmd).map_err(|_| WorkerError::Disconnected)
    }

    fn recv(&mut self) -> WorkerResult<Response<O>> {
        match self.res_rx.recv() {
            Ok(ShmemResponse::Reset { info }) => {
                let observation = self.buffer.read::<O>()?;
                Ok(Response::Reset { observation, info })
            }
            Ok(ShmemResponse::Step { reward, terminated, truncated, info }) => {
                let observation = self.buffer.read::<O>()?;
                Ok(Response::Step(Step::new(observation, reward, terminated, truncated, info)))
            }
            Ok(ShmemResponse::Seeded) => Ok(Response::Seeded),
            Ok(ShmemResponse::Frame(frame)) => Ok(Response::Frame(frame)),
            Ok(ShmemResponse::Closed) => Ok(Response::Closed),
            Ok(ShmemResponse::Error(e)) => Err(e),
            Err(_) => Err(WorkerError::Disconnected),
        }
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_round_trips_f32() {
        let obs = vec![1.0f32, -2.5, 3.25, f32::MIN_POSITIVE];
        let mut buf = vec![0u8; obs.encoded_len()];
        obs.encode(&mut buf);
        assert_eq!(Vec::<f32>::decode(&buf), obs);
    }

    #[test]
    fn buffer_alternates_ownership() {
        let buf = ShmemBuffer::new(16);
        let obs = vec![1.0f32, 2.0];
        buf.write(&obs).unwrap();
        // Second write without a read violates the alternation.
        assert!(matches!(buf.write(&obs), Err(WorkerError::Protocol(_))));
        let back: Vec<f32> = buf.read().unwrap();
        assert_eq!(back, obs);
        // And a second read without a write does too.
        assert!(matches!(buf.read::<Vec<f32>>(), Err(WorkerError::Protocol(_))));
        buf.write(&obs).unwrap();
    }

    #[test]
    fn oversized_write_fails_without_truncating() {
        let buf = ShmemBuffer::new(8);
        let obs = vec![0.0f32; 4];
        match buf.write(&obs) {
            Err(WorkerError::BufferOverflow { required, capacity }) => {
                assert_eq!(required, 16);
                assert_eq!(capacity, 8);
            }
            other => panic!("expected overflow, got {other:?}"),
        }
        // The slot stays writable for a fitting observation.
        buf.write(&vec![1.0f32]).unwrap();
        assert_eq!(buf.read::<Vec<f32>>().unwrap(), vec![1.0f32]);
    }
}
