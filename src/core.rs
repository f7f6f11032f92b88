// Core traits and types shared by every execution strategy.

/// A minimal, serde-friendly info map (without pulling serde in by default).
/// It stores small numbers of key-value pairs, which is all environments and
/// workers ever attach to a single transition.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Info {
    entries: Vec<(String, InfoValue)>,
}

impl Info {
    /// Create an empty Info map.
    pub fn new() -> Self { Self { entries: Vec::new() } }

    /// Insert or replace a key with the given value.
    pub fn insert<K: Into<String>>(&mut self, key: K, value: InfoValue) {
        let k = key.into();
        if let Some((_, v)) = self.entries.iter_mut().find(|(kk, _)| kk == &k) {
            *v = value;
        } else {
            self.entries.push((k, value));
        }
    }

    /// Get a reference to a value by key.
    pub fn get(&self, key: &str) -> Option<&InfoValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Iterate over entries.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &InfoValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Number of entries.
    pub fn len(&self) -> usize { self.entries.len() }
}

/// A small set of value types commonly used in info maps.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InfoValue {
    Bool(bool),
    I64(i64),
    F64(f64),
    Str(String),
}

impl From<bool> for InfoValue { fn from(v: bool) -> Self { InfoValue::Bool(v) } }
impl From<i64> for InfoValue { fn from(v: i64) -> Self { InfoValue::I64(v) } }
impl From<i32> for InfoValue { fn from(v: i32) -> Self { InfoValue::I64(v as i64) } }
impl From<usize> for InfoValue { fn from(v: usize) -> Self { InfoValue::I64(v as i64) } }
impl From<f64> for InfoValue { fn from(v: f64) -> Self { InfoValue::F64(v) } }
impl From<f32> for InfoValue { fn from(v: f32) -> Self { InfoValue::F64(v as f64) } }
impl From<&str> for InfoValue { fn from(v: &str) -> Self { InfoValue::Str(v.to_string()) } }
impl From<String> for InfoValue { fn from(v: String) -> Self { InfoValue::Str(v) } }

/// A frame returned by `Env::render`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RenderFrame {
    /// Textual representation of a frame (e.g., ASCII art or debug string).
    Text(String),
    /// Raw pixel buffer in row-major RGB or RGBA format.
    Pixels {
        width: u32,
        height: u32,
        /// Pixel data. Convention: RGB uses 3 bytes per pixel, RGBA uses 4.
        data: Vec<u8>,
    },
}

/// A step result from a single environment.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Step<Obs> {
    pub observation: Obs,
    pub reward: f32,
    pub terminated: bool,
    pub truncated: bool,
    pub info: Info,
}

impl<Obs> Step<Obs> {
    pub fn new(observation: Obs, reward: f32, terminated: bool, truncated: bool, info: Info) -> Self {
        Self { observation, reward, terminated, truncated, info }
    }
}

/// Errors surfaced by the batched coordinator and its wrappers.
///
/// `ArgumentMismatch`, `InvalidIndex` and `DuplicateIndex` are detected
/// before any dispatch, so a call that fails with one of them has had no
/// side effect on any worker.
#[derive(thiserror::Error, Debug)]
pub enum VecEnvError {
    #[error("argument mismatch: got {got} per-env arguments for {expected} selected envs")]
    ArgumentMismatch { expected: usize, got: usize },
    #[error("worker {index} failed: {detail}")]
    WorkerFailure { index: usize, detail: String },
    #[error("worker {index}: observation of {required} bytes exceeds shared buffer capacity {capacity}")]
    BufferOverflow { index: usize, required: usize, capacity: usize },
    #[error("vector env is already closed")]
    AlreadyClosed,
    #[error("invalid env index {index} for a pool of {envs}")]
    InvalidIndex { index: usize, envs: usize },
    #[error("duplicate env index {index} in selection")]
    DuplicateIndex { index: usize },
    #[error("observation length {got} does not match normalization dimension {expected}")]
    ShapeMismatch { expected: usize, got: usize },
    #[error("task scheduler error: {0}")]
    Scheduler(String),
}

/// Convenience alias for results using VecEnvError.
pub type Result<T> = std::result::Result<T, VecEnvError>;

/// Core environment trait following the Gymnasium contract.
///
/// This is the only interface the crate requires of a simulation; the
/// coordinator never depends on a concrete environment type.
pub trait Env {
    type Obs;
    type Act;

    /// Reset the environment to an initial state.
    /// Implementations should re-seed internal RNGs when `seed` is provided.
    fn reset(&mut self, seed: Option<u64>) -> (Self::Obs, Info);

    /// Apply an action and advance the environment by one step.
    fn step(&mut self, action: Self::Act) -> Step<Self::Obs>;

    /// Re-seed internal RNGs without resetting, if supported.
    fn seed(&mut self, _seed: Option<u64>) {}

    /// Render a frame of the current state, if supported.
    fn render(&self) -> Option<RenderFrame> { None }

    /// Close and release any external resources.
    fn close(&mut self) {}
}
