// Per-environment compatibility adapters.
//
// These are stateless transforms applied to a single environment before it
// reaches any worker; they know nothing about parallelism:
// - ContinuousToDiscrete
// - MultiDiscreteToDiscrete
// - TruncatedAsTerminated

use crate::core::{Env, Info, RenderFrame, Step};

/// Adapts a continuous-action environment to accept one discrete bucket index
/// per action dimension. Bucket `k` of dimension `i` maps onto the evenly
/// spaced grid `low[i] + k * (high[i] - low[i]) / (buckets - 1)`, so bucket 0
/// is `low[i]` and bucket `buckets - 1` is `high[i]`.
pub struct ContinuousToDiscrete<E: Env<Act = Vec<f32>>> {
    inner: E,
    low: Vec<f32>,
    high: Vec<f32>,
    buckets: usize,
}

impl<E: Env<Act = Vec<f32>>> ContinuousToDiscrete<E> {
    /// `low`/`high` are the per-dimension action bounds; `buckets` is the
    /// number of discrete values per dimension (at least 2).
    pub fn new(inner: E, low: Vec<f32>, high: Vec<f32>, buckets: usize) -> Self {
        assert!(buckets >= 2, "need at least two buckets per dimension");
        assert_eq!(low.len(), high.len(), "low/high bounds must have the same length");
        Self { inner, low, high, buckets }
    }

    pub fn inner(&self) -> &E { &self.inner }
    pub fn inner_mut(&mut self) -> &mut E { &mut self.inner }
    pub fn into_inner(self) -> E { self.inner }

    /// Number of discrete values per dimension.
    pub fn buckets(&self) -> usize { self.buckets }

    /// Map one bucket index per dimension onto the continuous grid.
    /// Indices beyond the last bucket clamp to it.
    pub fn to_continuous(&self, action: &[usize]) -> Vec<f32> {
        action
            .iter()
            .enumerate()
            .map(|(i, &a)| {
                let t = a.min(self.buckets - 1) as f32 / (self.buckets - 1) as f32;
                self.low[i] + (self.high[i] - self.low[i]) * t
            })
            .collect()
    }
}

impl<E: Env<Act = Vec<f32>>> Env for ContinuousToDiscrete<E> {
    type Obs = E::Obs;
    type Act = Vec<usize>;

    fn reset(&mut self, seed: Option<u64>) -> (Self::Obs, Info) { self.inner.reset(seed) }

    fn step(&mut self, action: Self::Act) -> Step<Self::Obs> {
        debug_assert_eq!(action.len(), self.low.len());
        self.inner.step(self.to_continuous(&action))
    }

    fn seed(&mut self, seed: Option<u64>) { self.inner.seed(seed) }
    fn render(&self) -> Option<RenderFrame> { self.inner.render() }
    fn close(&mut self) { self.inner.close() }
}

/// Adapts a multi-discrete-action environment to accept one flat discrete
/// index, using mixed-radix encoding over the per-dimension cardinalities.
pub struct MultiDiscreteToDiscrete<E: Env<Act = Vec<usize>>> {
    inner: E,
    nvec: Vec<usize>,
    bases: Vec<usize>,
}

impl<E: Env<Act = Vec<usize>>> MultiDiscreteToDiscrete<E> {
    /// `nvec` holds the number of choices per dimension.
    pub fn new(inner: E, nvec: Vec<usize>) -> Self {
        assert!(!nvec.is_empty(), "nvec must not be empty");
        assert!(nvec.iter().all(|&n| n >= 1), "every dimension needs at least one choice");
        // bases[i] = product of nvec[i+1..], so the last dimension varies fastest.
        let mut bases = vec![1usize; nvec.len()];
        for i in (0..nvec.len().saturating_sub(1)).rev() {
            bases[i] = bases[i + 1] * nvec[i + 1];
        }
        Self { inner, nvec, bases }
    }

    pub fn inner(&self) -> &E { &self.inner }
    pub fn inner_mut(&mut self) -> &mut E { &mut self.inner }
    pub fn into_inner(self) -> E { self.inner }

    /// Size of the flattened action space.
    pub fn n_actions(&self) -> usize { self.nvec.iter().product() }

    /// Decode a flat index into one choice per dimension.
    pub fn split(&self, action: usize) -> Vec<usize> {
        self.bases
            .iter()
            .zip(self.nvec.iter())
            .map(|(&base, &n)| action / base % n)
            .collect()
    }

    /// Inverse of [`split`](Self::split).
    pub fn flatten(&self, multi: &[usize]) -> usize {
        multi
            .iter()
            .zip(self.bases.iter())
            .map(|(&a, &base)| a * base)
            .sum()
    }
}

impl<E: Env<Act = Vec<usize>>> Env for MultiDiscreteToDiscrete<E> {
    type Obs = E::Obs;
    type Act = usize;

    fn reset(&mut self, seed: Option<u64>) -> (Self::Obs, Info) { self.inner.reset(seed) }

    fn step(&mut self, action: Self::Act) -> Step<Self::Obs> {
        debug_assert!(action < self.n_actions());
        self.inner.step(self.split(action))
    }

    fn seed(&mut self, seed: Option<u64>) { self.inner.seed(seed) }
    fn render(&self) -> Option<RenderFrame> { self.inner.render() }
    fn close(&mut self) { self.inner.close() }
}

/// Merges the truncation signal into termination for callers that lack the
/// distinction: whenever the inner environment reports `truncated`, the step
/// also reports `terminated`. The truncated flag itself is left as reported.
pub struct TruncatedAsTerminated<E: Env> {
    inner: E,
}

impl<E: Env> TruncatedAsTerminated<E> {
    pub fn new(inner: E) -> Self { Self { inner } }

    pub fn inner(&self) -> &E { &self.inner }
    pub fn inner_mut(&mut self) -> &mut E { &mut self.inner }
    pub fn into_inner(self) -> E { self.inner }
}

impl<E: Env> Env for TruncatedAsTerminated<E> {
    type Obs = E::Obs;
    type Act = E::Act;

    fn reset(&mut self, seed: Option<u64>) -> (Self::Obs, Info) { self.inner.reset(seed) }

    fn step(&mut self, action: Self::Act) -> Step<Self::Obs> {
        let mut s = self.inner.step(action);
        s.terminated = s.terminated || s.truncated;
        s
    }

    fn seed(&mut self, seed: Option<u64>) { self.inner.seed(seed) }
    fn render(&self) -> Option<RenderFrame> { self.inner.render() }
    fn close(&mut self) { self.inner.close() }
}
