use rayon::prelude::*;

use crate::ctc::sample::compute_sample_cost;
use crate::error::CtcError;
use crate::pipeline::batch::PreparedBatch;
use crate::pipeline::reduction::{reduce, LossOutput, Reduction};
use crate::pipeline::traits::CtcKernel;
use crate::types::{CtcBatch, CtcOutput};

/// Batch coordinator: validates a minibatch, runs it through the selected
/// kernel and hands back costs and gradients.
///
/// Holds no per-call state, so one instance can serve concurrent callers.
pub struct CtcLoss {
    kernel: Box<dyn CtcKernel>,
    blank: usize,
    average_frames: bool,
    reduction: Reduction,
}

pub(crate) struct CtcLossParts {
    pub kernel: Box<dyn CtcKernel>,
    pub blank: usize,
    pub average_frames: bool,
    pub reduction: Reduction,
}

impl CtcLoss {
    pub(crate) fn from_parts(parts: CtcLossParts) -> Self {
        Self {
            kernel: parts.kernel,
            blank: parts.blank,
            average_frames: parts.average_frames,
            reduction: parts.reduction,
        }
    }

    pub fn blank(&self) -> usize {
        self.blank
    }

    pub fn device_label(&self) -> String {
        self.kernel.device_label()
    }

    /// Per-sample costs and the gradient of each cost, unscaled.
    ///
    /// Shape or label errors abort the call before any table is allocated;
    /// samples that cannot be aligned get an infinite cost and zero gradient.
    pub fn compute(&self, batch: &CtcBatch<'_>) -> Result<CtcOutput, CtcError> {
        let prepared = PreparedBatch::prepare(*batch, self.blank)?;
        let out = self.kernel.compute(&prepared)?;

        let infeasible = out.costs.iter().filter(|c| c.is_infinite()).count();
        tracing::debug!(
            batch_size = batch.batch_size,
            max_frames = batch.max_frames,
            alphabet_size = batch.alphabet_size,
            infeasible,
            device = self.kernel.device_label(),
            "ctc: batch computed"
        );
        Ok(out)
    }

    /// Costs only; runs a two-row forward pass per sample on the CPU.
    pub fn costs(&self, batch: &CtcBatch<'_>) -> Result<Vec<f32>, CtcError> {
        let prepared = PreparedBatch::prepare(*batch, self.blank)?;
        Ok((0..prepared.batch_size())
            .into_par_iter()
            .map(|n| compute_sample_cost(&prepared.log_probs(n), prepared.labels(n)))
            .collect())
    }

    /// [`compute`](Self::compute) followed by the configured frame averaging
    /// and reduction.
    pub fn loss(&self, batch: &CtcBatch<'_>) -> Result<LossOutput, CtcError> {
        let out = self.compute(batch)?;
        Ok(reduce(out, batch.frames, self.average_frames, self.reduction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CtcConfig;
    use crate::pipeline::builder::CtcLossBuilder;

    fn engine() -> CtcLoss {
        CtcLossBuilder::new(CtcConfig::default())
            .build()
            .expect("cpu engine")
    }

    #[test]
    fn compute_rejects_bad_shapes_before_running() {
        let acts = vec![0.0; 6];
        let batch = CtcBatch::new(&acts, (2, 1, 3), &[1], &[2, 2], &[1]);
        assert!(matches!(
            engine().compute(&batch),
            Err(CtcError::BatchShape { .. })
        ));
    }

    #[test]
    fn overflowing_label_lengths_return_shape_error() {
        let acts = vec![0.0; 3 * 2 * 3];
        let batch = CtcBatch::new(&acts, (3, 2, 3), &[], &[3, 3], &[usize::MAX, 1]);
        assert!(matches!(
            engine().compute(&batch),
            Err(CtcError::BatchShape { .. })
        ));
        assert!(engine().costs(&batch).is_err());
    }

    #[test]
    fn infeasible_sample_does_not_abort_batch() {
        let acts = vec![0.0; 2 * 2 * 3];
        let batch = CtcBatch::new(&acts, (2, 2, 3), &[1, 1, 2], &[2, 2], &[2, 1]);
        let out = engine().compute(&batch).unwrap();
        assert_eq!(out.costs[0], f32::INFINITY);
        assert!(out.costs[1].is_finite());
        assert!(out.sample_grads(0).iter().all(|&g| g == 0.0));
        assert!(out.sample_grads(1).iter().any(|&g| g != 0.0));
    }

    #[test]
    fn costs_agree_with_compute() {
        let acts: Vec<f32> = (0..4 * 2 * 3).map(|i| (i % 5) as f32 * 0.3).collect();
        let batch = CtcBatch::new(&acts, (4, 2, 3), &[1, 2, 2], &[4, 3], &[1, 2]);
        let engine = engine();
        let full = engine.compute(&batch).unwrap();
        let costs = engine.costs(&batch).unwrap();
        for (a, b) in full.costs.iter().zip(&costs) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn loss_applies_configured_reduction() {
        let acts = vec![0.0; 3 * 2 * 3];
        let batch = CtcBatch::new(&acts, (3, 2, 3), &[1, 2], &[3, 3], &[1, 1]);
        let engine = CtcLossBuilder::new(CtcConfig {
            reduction: Reduction::Mean,
            ..CtcConfig::default()
        })
        .build()
        .unwrap();
        let loss = engine.loss(&batch).unwrap();
        let costs = engine.compute(&batch).unwrap().costs;
        let mean = (costs[0] + costs[1]) / 2.0;
        assert!((loss.loss.unwrap() - mean).abs() < 1e-6);
    }
}
