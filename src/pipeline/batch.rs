use crate::ctc::labels::ExtendedLabels;
use crate::ctc::math::LogProbs;
use crate::error::CtcError;
use crate::types::{CtcBatch, CtcOutput};

/// A batch whose shapes and labels have been checked, with every sample's
/// extended label sequence built. Kernels only ever see prepared batches.
#[derive(Debug, Clone)]
pub struct PreparedBatch<'a> {
    batch: CtcBatch<'a>,
    labels: Vec<ExtendedLabels>,
    blank: usize,
}

impl<'a> PreparedBatch<'a> {
    pub fn prepare(batch: CtcBatch<'a>, blank: usize) -> Result<Self, CtcError> {
        validate_shapes(&batch, blank)?;

        let mut labels = Vec::with_capacity(batch.batch_size);
        let mut offset = 0usize;
        for (n, &len) in batch.label_lengths.iter().enumerate() {
            let sample_labels = &batch.labels[offset..offset + len];
            labels.push(ExtendedLabels::new(
                sample_labels,
                blank,
                batch.alphabet_size,
                n,
            )?);
            offset += len;
        }

        Ok(Self {
            batch,
            labels,
            blank,
        })
    }

    pub fn batch(&self) -> &CtcBatch<'a> {
        &self.batch
    }

    pub fn blank(&self) -> usize {
        self.blank
    }

    pub fn batch_size(&self) -> usize {
        self.batch.batch_size
    }

    pub fn frames(&self, n: usize) -> usize {
        self.batch.frames[n]
    }

    pub fn labels(&self, n: usize) -> &ExtendedLabels {
        &self.labels[n]
    }

    /// Log-softmaxed rows of sample `n`, padding frames excluded.
    pub fn log_probs(&self, n: usize) -> LogProbs {
        LogProbs::from_activations(
            self.batch.activations,
            self.batch.batch_size,
            self.batch.alphabet_size,
            n,
            self.batch.frames[n],
        )
    }

    pub fn is_feasible(&self, n: usize) -> bool {
        self.labels[n].ensure_feasible(self.batch.frames[n]).is_ok()
    }

    /// Longest extended label sequence in the batch.
    pub fn max_states(&self) -> usize {
        self.labels.iter().map(ExtendedLabels::len).max().unwrap_or(1)
    }

    /// Size of the DP state space across the batch, `T_max × S_max × N`.
    pub fn state_product(&self) -> usize {
        self.batch.max_frames * self.max_states() * self.batch.batch_size
    }

    pub fn empty_output(&self) -> CtcOutput {
        CtcOutput::zeros(
            self.batch.max_frames,
            self.batch.batch_size,
            self.batch.alphabet_size,
        )
    }
}

fn validate_shapes(batch: &CtcBatch<'_>, blank: usize) -> Result<(), CtcError> {
    let (t_max, n, c) = (batch.max_frames, batch.batch_size, batch.alphabet_size);
    if c == 0 {
        return Err(CtcError::batch_shape("alphabet size must be at least 1"));
    }
    if blank >= c {
        return Err(CtcError::batch_shape(format!(
            "blank index {blank} outside alphabet of size {c}"
        )));
    }
    let expected = t_max * n * c;
    if batch.activations.len() != expected {
        return Err(CtcError::batch_shape(format!(
            "activations hold {} values, shape ({t_max}, {n}, {c}) needs {expected}",
            batch.activations.len()
        )));
    }
    if batch.frames.len() != n {
        return Err(CtcError::batch_shape(format!(
            "{} frame counts for a batch of {n}",
            batch.frames.len()
        )));
    }
    if batch.label_lengths.len() != n {
        return Err(CtcError::batch_shape(format!(
            "{} label lengths for a batch of {n}",
            batch.label_lengths.len()
        )));
    }
    // A checked total equal to labels.len() keeps every per-sample slice in range.
    let total_labels = batch
        .label_lengths
        .iter()
        .try_fold(0usize, |acc, &len| acc.checked_add(len))
        .ok_or_else(|| CtcError::batch_shape("label lengths overflow when summed"))?;
    if total_labels != batch.labels.len() {
        return Err(CtcError::batch_shape(format!(
            "label lengths sum to {total_labels} but {} labels were given",
            batch.labels.len()
        )));
    }
    if let Some((sample, &frames)) = batch.frames.iter().enumerate().find(|&(_, &f)| f > t_max) {
        return Err(CtcError::batch_shape(format!(
            "sample {sample} has {frames} frames, tensor holds {t_max}"
        )));
    }
    Ok(())
}

/// Flat per-sample layout shared by the accelerator kernels.
#[cfg(any(feature = "gpu-dp", feature = "cuda-dp"))]
pub(crate) struct DeviceLayout {
    /// `N × S_max` extended labels, padded with the blank.
    pub ext_labels: Vec<u32>,
    /// `N × 4`: frames, extended length, active flag, padding.
    pub sample_info: Vec<u32>,
    pub s_max: usize,
}

#[cfg(any(feature = "gpu-dp", feature = "cuda-dp"))]
impl PreparedBatch<'_> {
    pub(crate) fn device_layout(&self) -> DeviceLayout {
        let s_max = self.max_states();
        let n = self.batch.batch_size;
        let mut ext_labels = vec![self.blank as u32; n * s_max];
        let mut sample_info = vec![0u32; n * 4];
        for (i, labels) in self.labels.iter().enumerate() {
            for (s, &symbol) in labels.symbols().iter().enumerate() {
                ext_labels[i * s_max + s] = symbol as u32;
            }
            let frames = self.batch.frames[i];
            let active = frames > 0 && self.is_feasible(i);
            sample_info[i * 4] = frames as u32;
            sample_info[i * 4 + 1] = labels.len() as u32;
            sample_info[i * 4 + 2] = u32::from(active);
        }
        DeviceLayout {
            ext_labels,
            sample_info,
            s_max,
        }
    }

    /// Turns device log-likelihoods into costs and clears rows of samples
    /// that produced no usable signal.
    pub(crate) fn finish_device_output(&self, log_likelihoods: &[f32], grads: Vec<f32>) -> CtcOutput {
        // Device kernels use a finite sentinel for log(0).
        const DEVICE_NEG_INF: f32 = -1.0e30;
        let mut out = self.empty_output();
        out.grads = grads;
        for n in 0..self.batch.batch_size {
            let frames = self.batch.frames[n];
            let cost = if !self.is_feasible(n) {
                f32::INFINITY
            } else if frames == 0 {
                0.0
            } else {
                let ll = log_likelihoods[n];
                if ll.is_finite() && ll > DEVICE_NEG_INF {
                    -ll
                } else {
                    f32::INFINITY
                }
            };
            if cost == f32::INFINITY {
                tracing::debug!(sample = n, frames, "ctc: infeasible sample, zero gradient");
                out.scale_sample(n, 0.0);
            }
            out.costs[n] = cost;
        }
        out
    }
}
