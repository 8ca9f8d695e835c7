pub mod config;
pub mod ctc;
pub mod error;
pub mod pipeline;
pub mod types;

pub use config::CtcConfig;
pub use error::CtcError;
pub use pipeline::batch::PreparedBatch;
pub use pipeline::builder::CtcLossBuilder;
pub use pipeline::defaults::{AutoKernel, ParallelCpuKernel, SequentialCpuKernel};
pub use pipeline::reduction::{ctc_loss, reduce, LossOutput, Reduction};
pub use pipeline::runtime::CtcLoss;
pub use pipeline::traits::{Backend, CtcKernel};
pub use types::{BatchInput, CtcBatch, CtcOutput, OwnedBatch};
