use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CtcError;

/// Borrowed view of one minibatch.
///
/// `activations` is `(max_frames, batch_size, alphabet_size)` row-major raw
/// scores; `labels` concatenates every sample's target in batch order.
#[derive(Debug, Clone, Copy)]
pub struct CtcBatch<'a> {
    pub activations: &'a [f32],
    pub labels: &'a [usize],
    pub frames: &'a [usize],
    pub label_lengths: &'a [usize],
    pub max_frames: usize,
    pub batch_size: usize,
    pub alphabet_size: usize,
}

impl<'a> CtcBatch<'a> {
    pub fn new(
        activations: &'a [f32],
        (max_frames, batch_size, alphabet_size): (usize, usize, usize),
        labels: &'a [usize],
        frames: &'a [usize],
        label_lengths: &'a [usize],
    ) -> Self {
        Self {
            activations,
            labels,
            frames,
            label_lengths,
            max_frames,
            batch_size,
            alphabet_size,
        }
    }

    #[inline(always)]
    pub fn index(&self, t: usize, n: usize, c: usize) -> usize {
        (t * self.batch_size + n) * self.alphabet_size + c
    }
}

/// Per-sample costs and the gradient tensor, laid out like the activations.
#[derive(Debug, Clone, PartialEq)]
pub struct CtcOutput {
    pub costs: Vec<f32>,
    pub grads: Vec<f32>,
    pub max_frames: usize,
    pub batch_size: usize,
    pub alphabet_size: usize,
}

impl CtcOutput {
    pub fn zeros(max_frames: usize, batch_size: usize, alphabet_size: usize) -> Self {
        Self {
            costs: vec![0.0; batch_size],
            grads: vec![0.0; max_frames * batch_size * alphabet_size],
            max_frames,
            batch_size,
            alphabet_size,
        }
    }

    #[inline(always)]
    pub fn grad(&self, t: usize, n: usize, c: usize) -> f32 {
        self.grads[(t * self.batch_size + n) * self.alphabet_size + c]
    }

    /// Copies sample `n`'s `(frames, classes)` rows into the strided tensor.
    pub(crate) fn scatter_sample(&mut self, n: usize, cost: f32, rows: &[f32]) {
        self.costs[n] = cost;
        let classes = self.alphabet_size;
        for (t, row) in rows.chunks_exact(classes).enumerate() {
            let start = (t * self.batch_size + n) * classes;
            self.grads[start..start + classes].copy_from_slice(row);
        }
    }

    /// Gradient rows of sample `n`, every frame up to `max_frames`.
    pub fn sample_grads(&self, n: usize) -> Vec<f32> {
        let classes = self.alphabet_size;
        let mut rows = Vec::with_capacity(self.max_frames * classes);
        for t in 0..self.max_frames {
            let start = (t * self.batch_size + n) * classes;
            rows.extend_from_slice(&self.grads[start..start + classes]);
        }
        rows
    }

    /// Multiplies sample `n`'s cost and gradient by `factor`.
    pub fn scale_sample(&mut self, n: usize, factor: f32) {
        self.costs[n] *= factor;
        self.scale_sample_grads(n, factor);
    }

    fn scale_sample_grads(&mut self, n: usize, factor: f32) {
        let classes = self.alphabet_size;
        for t in 0..self.max_frames {
            let start = (t * self.batch_size + n) * classes;
            for g in &mut self.grads[start..start + classes] {
                *g *= factor;
            }
        }
    }

    /// Chains an upstream gradient `d loss / d cost[n]` into the activation
    /// gradient, broadcasting over frames and classes. Costs are untouched.
    pub fn scale_by_upstream(&mut self, grad_costs: &[f32]) -> Result<(), CtcError> {
        if grad_costs.len() != self.batch_size {
            return Err(CtcError::batch_shape(format!(
                "upstream gradient has {} entries for a batch of {}",
                grad_costs.len(),
                self.batch_size
            )));
        }
        for (n, &factor) in grad_costs.iter().enumerate() {
            self.scale_sample_grads(n, factor);
        }
        Ok(())
    }
}

/// Owned batch as stored on disk: `activations[t][n][c]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchInput {
    pub activations: Vec<Vec<Vec<f32>>>,
    pub labels: Vec<usize>,
    pub frames: Vec<usize>,
    pub label_lengths: Vec<usize>,
}

/// Flattened form of [`BatchInput`], ready to be borrowed as a [`CtcBatch`].
#[derive(Debug, Clone)]
pub struct OwnedBatch {
    pub activations: Vec<f32>,
    pub labels: Vec<usize>,
    pub frames: Vec<usize>,
    pub label_lengths: Vec<usize>,
    pub shape: (usize, usize, usize),
}

impl OwnedBatch {
    pub fn as_batch(&self) -> CtcBatch<'_> {
        CtcBatch::new(
            &self.activations,
            self.shape,
            &self.labels,
            &self.frames,
            &self.label_lengths,
        )
    }
}

impl BatchInput {
    pub fn load(path: &Path) -> Result<Self, CtcError> {
        let data =
            std::fs::read_to_string(path).map_err(|e| CtcError::io("read batch file", e))?;
        serde_json::from_str(&data).map_err(|e| CtcError::json("parse batch file", e))
    }

    /// Flattens the nested activations, rejecting ragged dimensions.
    pub fn flatten(self) -> Result<OwnedBatch, CtcError> {
        let max_frames = self.activations.len();
        let batch_size = self.activations.first().map_or(0, |f| f.len());
        let alphabet_size = self
            .activations
            .first()
            .and_then(|f| f.first())
            .map_or(0, |row| row.len());

        let mut activations = Vec::with_capacity(max_frames * batch_size * alphabet_size);
        for (t, frame) in self.activations.into_iter().enumerate() {
            if frame.len() != batch_size {
                return Err(CtcError::batch_shape(format!(
                    "frame {t} holds {} samples, expected {batch_size}",
                    frame.len()
                )));
            }
            for (n, row) in frame.into_iter().enumerate() {
                if row.len() != alphabet_size {
                    return Err(CtcError::batch_shape(format!(
                        "activation row ({t}, {n}) has {} classes, expected {alphabet_size}",
                        row.len()
                    )));
                }
                activations.extend(row);
            }
        }

        Ok(OwnedBatch {
            activations,
            labels: self.labels,
            frames: self.frames,
            label_lengths: self.label_lengths,
            shape: (max_frames, batch_size, alphabet_size),
        })
    }
}
