// Batch-level wrappers around anything implementing `BatchEnv`.

use crate::core::{RenderFrame, Result, VecEnvError};

use super::{BatchEnv, ResetBatch, Seeds, StepBatch};

/// Incrementally updated per-dimension mean/variance over a stream of
/// observation batches.
///
/// Batches are merged with the parallel-variance formula, so the statistics
/// are identical no matter how the stream is partitioned into batches. The
/// dimension is fixed by the first update; later batches with a different
/// width fail with `ShapeMismatch`.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RunningStats {
    mean: Vec<f64>,
    var: Vec<f64>,
    count: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-dimension running mean. Empty until the first update.
    pub fn mean(&self) -> &[f64] { &self.mean }

    /// Per-dimension running (population) variance. Empty until the first update.
    pub fn var(&self) -> &[f64] { &self.var }

    /// Total number of observations folded in so far.
    pub fn count(&self) -> f64 { self.count }

    /// Observation dimension, 0 before the first update.
    pub fn dim(&self) -> usize { self.mean.len() }

    /// Fold one batch of observations into the statistics.
    pub fn update<'a, I>(&mut self, rows: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a [f32]>,
    {
        let rows: Vec<&[f32]> = rows.into_iter().collect();
        if rows.is_empty() {
            return Ok(());
        }
        let dim = rows[0].len();
        if self.mean.is_empty() {
            self.mean = vec![0.0; dim];
            self.var = vec![1.0; dim];
        }
        if dim != self.mean.len() {
            return Err(VecEnvError::ShapeMismatch { expected: self.mean.len(), got: dim });
        }
        for row in &rows {
            if row.len() != dim {
                return Err(VecEnvError::ShapeMismatch { expected: dim, got: row.len() });
            }
        }

        let b = rows.len() as f64;
        let mut batch_mean = vec![0.0f64; dim];
        for row in &rows {
            for (m, &x) in batch_mean.iter_mut().zip(row.iter()) {
                *m += f64::from(x);
            }
        }
        for m in &mut batch_mean {
            *m /= b;
        }
        let mut batch_var = vec![0.0f64; dim];
        for row in &rows {
            for (j, &x) in row.iter().enumerate() {
                let d = f64::from(x) - batch_mean[j];
                batch_var[j] += d * d;
            }
        }
        for v in &mut batch_var {
            *v /= b;
        }

        // Chan et al. parallel merge of (count, mean, var) pairs.
        let total = self.count + b;
        for j in 0..dim {
            let delta = batch_mean[j] - self.mean[j];
            let m_a = self.var[j] * self.count;
            let m_b = batch_var[j] * b;
            let m2 = m_a + m_b + delta * delta * self.count * b / total;
            self.mean[j] += delta * b / total;
            self.var[j] = m2 / total;
        }
        self.count = total;
        Ok(())
    }

    /// Normalize one observation as `(x - mean) / sqrt(var + epsilon)`,
    /// clipped to `[-clip, clip]`. Before the first update this is the
    /// identity.
    pub fn normalize(&self, obs: &[f32], clip: f32, epsilon: f64) -> Result<Vec<f32>> {
        if self.mean.is_empty() {
            return Ok(obs.to_vec());
        }
        if obs.len() != self.mean.len() {
            return Err(VecEnvError::ShapeMismatch { expected: self.mean.len(), got: obs.len() });
        }
        Ok(obs
            .iter()
            .enumerate()
            .map(|(j, &x)| {
                let z = (f64::from(x) - self.mean[j]) / (self.var[j] + epsilon).sqrt();
                (z as f32).clamp(-clip, clip)
            })
            .collect())
    }
}

/// Configuration for [`NormObs`].
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NormObsConfig {
    /// Normalized observations are clipped to `[-clip_obs, clip_obs]`.
    pub clip_obs: f32,
    /// Variance floor inside the square root.
    pub epsilon: f64,
    /// Whether observed batches keep updating the statistics.
    pub update_stats: bool,
}

impl Default for NormObsConfig {
    fn default() -> Self {
        Self { clip_obs: 10.0, epsilon: 1e-8, update_stats: true }
    }
}

impl NormObsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clip_obs(mut self, clip_obs: f32) -> Self {
        self.clip_obs = clip_obs;
        self
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_update_stats(mut self, update_stats: bool) -> Self {
        self.update_stats = update_stats;
        self
    }
}

/// Observation-normalization wrapper: intercepts every `reset`/`step` batch,
/// folds it into [`RunningStats`] (unless frozen), and rewrites outgoing
/// observations as `(obs - mean) / sqrt(var + epsilon)` within the clip
/// range. Everything else forwards to the inner batched environment, so
/// wrappers stack transparently.
pub struct NormObs<V> {
    inner: V,
    stats: RunningStats,
    config: NormObsConfig,
}

impl<V> NormObs<V> {
    pub fn new(inner: V) -> Self {
        Self::with_config(inner, NormObsConfig::default())
    }

    pub fn with_config(inner: V, config: NormObsConfig) -> Self {
        Self { inner, stats: RunningStats::new(), config }
    }

    pub fn inner(&self) -> &V { &self.inner }
    pub fn inner_mut(&mut self) -> &mut V { &mut self.inner }
    pub fn into_inner(self) -> V { self.inner }

    /// Current running statistics.
    pub fn stats(&self) -> &RunningStats { &self.stats }

    /// Replace the statistics, e.g. to share them between a training pool
    /// and a frozen evaluation pool.
    pub fn set_stats(&mut self, stats: RunningStats) { self.stats = stats; }

    /// Freeze or unfreeze statistic updates after construction.
    pub fn set_update_stats(&mut self, update: bool) { self.config.update_stats = update; }

    fn observe(&mut self, observations: &mut [Vec<f32>]) -> Result<()> {
        if self.config.update_stats {
            self.stats.update(observations.iter().map(|o| o.as_slice()))?;
        }
        for obs in observations.iter_mut() {
            *obs = self.stats.normalize(obs, self.config.clip_obs, self.config.epsilon)?;
        }
        Ok(())
    }
}

impl<V, A> BatchEnv<Vec<f32>, A> for NormObs<V>
where
    V: BatchEnv<Vec<f32>, A>,
{
    fn env_num(&self) -> usize {
        self.inner.env_num()
    }

    fn reset(&mut self, ids: Option<&[usize]>, seed: Option<u64>) -> Result<ResetBatch<Vec<f32>>> {
        let mut batch = self.inner.reset(ids, seed)?;
        self.observe(&mut batch.observations)?;
        Ok(batch)
    }

    fn step(&mut self, actions: Vec<A>, ids: Option<&[usize]>) -> Result<StepBatch<Vec<f32>>> {
        let mut batch = self.inner.step(actions, ids)?;
        self.observe(&mut batch.observations)?;
        Ok(batch)
    }

    fn seed(&mut self, seeds: Option<Seeds>) -> Result<()> {
        self.inner.seed(seeds)
    }

    fn render(&mut self) -> Result<Vec<Option<RenderFrame>>> {
        self.inner.render()
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_stats_match_direct_computation() {
        let rows: Vec<Vec<f32>> = vec![
            vec![1.0, 10.0],
            vec![2.0, 20.0],
            vec![3.0, 30.0],
            vec![4.0, 40.0],
        ];
        let mut stats = RunningStats::new();
        // Two uneven batches to exercise the merge.
        stats.update(rows[..1].iter().map(|r| r.as_slice())).unwrap();
        stats.update(rows[1..].iter().map(|r| r.as_slice())).unwrap();
        assert!((stats.mean()[0] - 2.5).abs() < 1e-9);
        assert!((stats.mean()[1] - 25.0).abs() < 1e-9);
        // Population variance of 1..4 is 1.25.
        assert!((stats.var()[0] - 1.25).abs() < 1e-9);
        assert!((stats.var()[1] - 125.0).abs() < 1e-9);
        assert_eq!(stats.count(), 4.0);
    }

    #[test]
    fn normalize_applies_formula_and_clip() {
        let mut stats = RunningStats::new();
        stats
            .update([vec![0.0f32].as_slice(), vec![2.0f32].as_slice()])
            .unwrap();
        // mean 1, var 1
        let out = stats.normalize(&[3.0], 10.0, 0.0).unwrap();
        assert!((out[0] - 2.0).abs() < 1e-6);
        let clipped = stats.normalize(&[1e9], 10.0, 0.0).unwrap();
        assert_eq!(clipped[0], 10.0);
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let mut stats = RunningStats::new();
        stats.update([vec![0.0f32, 1.0].as_slice()]).unwrap();
        assert!(matches!(
            stats.update([vec![0.0f32].as_slice()]),
            Err(VecEnvError::ShapeMismatch { expected: 2, got: 1 })
        ));
        assert!(stats.normalize(&[0.0], 10.0, 1e-8).is_err());
    }
}
