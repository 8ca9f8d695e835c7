pub mod backward;
pub mod forward;
pub mod gradient;
pub mod labels;
pub mod math;
pub mod sample;

#[cfg(feature = "cuda-dp")]
#[path = "cuda/ctc_cuda.rs"]
pub mod cuda;

#[cfg(feature = "gpu-dp")]
#[path = "gpu/ctc_gpu.rs"]
pub mod gpu;

pub use labels::ExtendedLabels;
pub use math::LogProbs;
pub use sample::{compute_sample, compute_sample_cost, SampleResult};
