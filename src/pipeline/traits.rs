use crate::error::CtcError;
use crate::pipeline::batch::PreparedBatch;
use crate::types::CtcOutput;

/// One execution strategy for the per-sample CTC pipeline.
///
/// Implementations receive a validated batch and must produce the same costs
/// and gradients as [`SequentialCpuKernel`](crate::pipeline::defaults::SequentialCpuKernel)
/// within floating-point tolerance.
pub trait CtcKernel: Send + Sync {
    fn compute(&self, batch: &PreparedBatch<'_>) -> Result<CtcOutput, CtcError>;

    fn device_label(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Cpu,
    /// wgpu compute shader (Vulkan/DX12/Metal), `gpu-dp` feature.
    Gpu,
    /// cudarc kernel, `cuda-dp` feature.
    Cuda,
    /// Best available accelerator for large batches, CPU otherwise.
    Auto,
}

impl Backend {
    pub fn parse(device: &str) -> Result<Self, CtcError> {
        match device.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "gpu" | "wgpu" => Ok(Self::Gpu),
            "cuda" => Ok(Self::Cuda),
            "auto" => Ok(Self::Auto),
            other => Err(CtcError::runtime(
                "parse device",
                format!("unknown device '{other}', expected cpu, gpu, cuda or auto"),
            )),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Gpu => "gpu",
            Self::Cuda => "cuda",
            Self::Auto => "auto",
        }
    }
}
