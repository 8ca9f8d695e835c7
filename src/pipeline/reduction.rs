//! Loss post-processing: per-frame averaging and minibatch reduction.
//!
//! Neither step changes what the engine computes per sample; they only scale
//! costs and the matching gradient rows.

use serde::{Deserialize, Serialize};

use crate::config::CtcConfig;
use crate::error::CtcError;
use crate::pipeline::builder::CtcLossBuilder;
use crate::types::{CtcBatch, CtcOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    /// Keep the N per-sample costs.
    None,
    Mean,
    #[default]
    Sum,
}

impl Reduction {
    pub fn parse(value: &str) -> Result<Self, CtcError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "mean" => Ok(Self::Mean),
            "sum" => Ok(Self::Sum),
            other => Err(CtcError::runtime(
                "parse reduction",
                format!("unsupported reduction '{other}', expected none, mean or sum"),
            )),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Mean => "mean",
            Self::Sum => "sum",
        }
    }
}

/// Costs and gradient after the wrapper's post-processing.
#[derive(Debug, Clone, PartialEq)]
pub struct LossOutput {
    /// Per-sample costs (frame-averaged if requested), gradient of the
    /// reduced loss in `output.grads`.
    pub output: CtcOutput,
    /// Reduced loss; `None` when `reduction` is [`Reduction::None`].
    pub loss: Option<f32>,
    pub reduction: Reduction,
    pub average_frames: bool,
}

impl LossOutput {
    pub fn costs(&self) -> &[f32] {
        &self.output.costs
    }

    pub fn grads(&self) -> &[f32] {
        &self.output.grads
    }
}

/// Applies frame averaging then reduction to an engine result.
///
/// Samples with zero frames are left unscaled by averaging.
pub fn reduce(
    mut output: CtcOutput,
    frames: &[usize],
    average_frames: bool,
    reduction: Reduction,
) -> LossOutput {
    if average_frames {
        for (n, &f) in frames.iter().enumerate() {
            if f > 0 {
                output.scale_sample(n, 1.0 / f as f32);
            }
        }
    }

    let loss = match reduction {
        Reduction::None => None,
        Reduction::Sum => Some(output.costs.iter().sum()),
        Reduction::Mean => {
            let n = output.batch_size.max(1) as f32;
            let mean = output.costs.iter().sum::<f32>() / n;
            for g in &mut output.grads {
                *g /= n;
            }
            Some(mean)
        }
    };

    LossOutput {
        output,
        loss,
        reduction,
        average_frames,
    }
}

/// One-shot CTC loss on the CPU backend.
pub fn ctc_loss(
    batch: &CtcBatch<'_>,
    average_frames: bool,
    reduction: Reduction,
    blank: usize,
) -> Result<LossOutput, CtcError> {
    let engine = CtcLossBuilder::new(CtcConfig {
        blank,
        average_frames,
        reduction,
        ..CtcConfig::default()
    })
    .build()?;
    engine.loss(batch)
}
