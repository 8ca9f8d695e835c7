use crate::ctc::backward::backward;
use crate::ctc::forward::{forward, forward_log_likelihood};
use crate::ctc::gradient::assemble_gradient;
use crate::ctc::labels::ExtendedLabels;
use crate::ctc::math::{LogProbs, NEG_INF};

/// Cost and `(frames, classes)` gradient rows of one sample.
#[derive(Debug, Clone)]
pub struct SampleResult {
    pub cost: f32,
    pub grads: Vec<f32>,
}

impl SampleResult {
    fn infeasible(frames: usize, classes: usize) -> Self {
        Self {
            cost: f32::INFINITY,
            grads: vec![0.0; frames * classes],
        }
    }

    pub fn is_feasible(&self) -> bool {
        self.cost.is_finite()
    }
}

/// Runs forward, backward and gradient assembly for one sample.
///
/// An alignment that cannot exist (too few frames, or every path carrying
/// zero probability) yields an infinite cost and an all-zero gradient.
pub fn compute_sample(log_probs: &LogProbs, labels: &ExtendedLabels, sample: usize) -> SampleResult {
    let frames = log_probs.frames();
    let classes = log_probs.classes();
    if let Err(err) = labels.ensure_feasible(frames) {
        tracing::debug!(sample, error = %err, "ctc: infeasible sample, zero gradient");
        return SampleResult::infeasible(frames, classes);
    }

    let fwd = forward(log_probs, labels);
    if fwd.log_likelihood == NEG_INF {
        tracing::debug!(sample, frames, "ctc: alignment carries no probability mass");
        return SampleResult::infeasible(frames, classes);
    }

    let beta = backward(log_probs, labels);
    let mut grads = vec![0.0; frames * classes];
    assemble_gradient(
        log_probs,
        labels,
        &fwd.alpha,
        &beta,
        fwd.log_likelihood,
        &mut grads,
    );
    SampleResult {
        cost: -fwd.log_likelihood,
        grads,
    }
}

/// Cost only, without retaining the tables.
pub fn compute_sample_cost(log_probs: &LogProbs, labels: &ExtendedLabels) -> f32 {
    if labels.ensure_feasible(log_probs.frames()).is_err() {
        return f32::INFINITY;
    }
    let ll = forward_log_likelihood(log_probs, labels);
    if ll == NEG_INF {
        f32::INFINITY
    } else {
        -ll
    }
}
