use crate::config::CtcConfig;
use crate::error::CtcError;
use crate::pipeline::defaults::{AutoKernel, ParallelCpuKernel};
use crate::pipeline::runtime::{CtcLoss, CtcLossParts};
use crate::pipeline::traits::{Backend, CtcKernel};

pub struct CtcLossBuilder {
    config: CtcConfig,
    backend: Option<Backend>,
    kernel: Option<Box<dyn CtcKernel>>,
}

impl CtcLossBuilder {
    pub fn new(config: CtcConfig) -> Self {
        Self {
            config,
            backend: None,
            kernel: None,
        }
    }

    /// Overrides the backend named by `config.device`.
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Uses a caller-supplied kernel; backend selection is skipped.
    pub fn with_kernel(mut self, kernel: Box<dyn CtcKernel>) -> Self {
        self.kernel = Some(kernel);
        self
    }

    pub fn build(self) -> Result<CtcLoss, CtcError> {
        let kernel = match self.kernel {
            Some(kernel) => kernel,
            None => {
                let backend = match self.backend {
                    Some(backend) => backend,
                    None => Backend::parse(&self.config.device)?,
                };
                build_kernel(backend, &self.config)?
            }
        };

        tracing::info!(
            device = kernel.device_label(),
            blank = self.config.blank,
            reduction = self.config.reduction.as_str(),
            average_frames = self.config.average_frames,
            "CTC loss engine ready"
        );

        Ok(CtcLoss::from_parts(CtcLossParts {
            kernel,
            blank: self.config.blank,
            average_frames: self.config.average_frames,
            reduction: self.config.reduction,
        }))
    }
}

fn build_cpu_kernel(config: &CtcConfig) -> Result<ParallelCpuKernel, CtcError> {
    match config.num_threads {
        Some(0) => Err(CtcError::runtime(
            "build cpu backend",
            "num_threads must be at least 1",
        )),
        Some(n) => ParallelCpuKernel::with_threads(n),
        None => Ok(ParallelCpuKernel::new()),
    }
}

fn build_kernel(backend: Backend, config: &CtcConfig) -> Result<Box<dyn CtcKernel>, CtcError> {
    match backend {
        Backend::Cpu => Ok(Box::new(build_cpu_kernel(config)?)),
        Backend::Auto => Ok(Box::new(AutoKernel::new(build_cpu_kernel(config)?))),
        Backend::Gpu => build_gpu_kernel(),
        Backend::Cuda => build_cuda_kernel(),
    }
}

fn build_gpu_kernel() -> Result<Box<dyn CtcKernel>, CtcError> {
    #[cfg(feature = "gpu-dp")]
    {
        use crate::pipeline::defaults::WgpuKernel;
        if WgpuKernel::is_available() {
            Ok(Box::new(WgpuKernel))
        } else {
            Err(CtcError::runtime(
                "build gpu backend",
                "no wgpu adapter could be initialized",
            ))
        }
    }

    #[cfg(not(feature = "gpu-dp"))]
    {
        Err(CtcError::runtime(
            "build gpu backend",
            "wgpu support is disabled; enable the `gpu-dp` cargo feature",
        ))
    }
}

fn build_cuda_kernel() -> Result<Box<dyn CtcKernel>, CtcError> {
    #[cfg(feature = "cuda-dp")]
    {
        use crate::pipeline::defaults::CudaKernel;
        if CudaKernel::is_available() {
            Ok(Box::new(CudaKernel))
        } else {
            Err(CtcError::runtime(
                "build cuda backend",
                "CUDA device 0 or NVRTC is unavailable",
            ))
        }
    }

    #[cfg(not(feature = "cuda-dp"))]
    {
        Err(CtcError::runtime(
            "build cuda backend",
            "CUDA support is disabled; enable the `cuda-dp` cargo feature",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::batch::PreparedBatch;
    use crate::pipeline::defaults::SequentialCpuKernel;
    use crate::types::{CtcBatch, CtcOutput};

    struct FixedKernel;

    impl CtcKernel for FixedKernel {
        fn compute(&self, batch: &PreparedBatch<'_>) -> Result<CtcOutput, CtcError> {
            let mut out = batch.empty_output();
            out.costs.fill(1.5);
            Ok(out)
        }

        fn device_label(&self) -> String {
            "fixed".to_string()
        }
    }

    #[test]
    fn builder_defaults_to_cpu() {
        let engine = CtcLossBuilder::new(CtcConfig::default()).build().unwrap();
        assert!(engine.device_label().starts_with("cpu-parallel"));
        assert_eq!(engine.blank(), 0);
    }

    #[test]
    fn builder_honours_thread_count() {
        let engine = CtcLossBuilder::new(CtcConfig {
            num_threads: Some(2),
            ..CtcConfig::default()
        })
        .build()
        .unwrap();
        assert_eq!(engine.device_label(), "cpu-parallel(2 threads)");
    }

    #[test]
    fn zero_threads_is_rejected() {
        let result = CtcLossBuilder::new(CtcConfig {
            num_threads: Some(0),
            ..CtcConfig::default()
        })
        .build();
        assert!(result.is_err());
    }

    #[test]
    fn unknown_device_is_rejected() {
        let result = CtcLossBuilder::new(CtcConfig {
            device: "fpga".to_string(),
            ..CtcConfig::default()
        })
        .build();
        assert!(result.is_err());
    }

    #[test]
    fn custom_kernel_is_used() {
        let engine = CtcLossBuilder::new(CtcConfig::default())
            .with_kernel(Box::new(FixedKernel))
            .build()
            .unwrap();
        let acts = vec![0.0; 3];
        let batch = CtcBatch::new(&acts, (1, 1, 3), &[], &[1], &[0]);
        assert_eq!(engine.compute(&batch).unwrap().costs, vec![1.5]);
        assert_eq!(engine.device_label(), "fixed");
    }

    #[test]
    fn backend_override_wins_over_config() {
        let engine = CtcLossBuilder::new(CtcConfig {
            device: "fpga".to_string(),
            ..CtcConfig::default()
        })
        .with_backend(Backend::Auto)
        .build()
        .unwrap();
        assert!(engine.device_label().starts_with("auto("));
    }

    #[cfg(not(feature = "gpu-dp"))]
    #[test]
    fn gpu_backend_requires_feature() {
        let err = CtcLossBuilder::new(CtcConfig::default())
            .with_backend(Backend::Gpu)
            .build()
            .err()
            .expect("gpu backend must fail without the feature");
        assert!(err.to_string().contains("gpu-dp"));
    }

    #[test]
    fn sequential_reference_can_be_injected() {
        let engine = CtcLossBuilder::new(CtcConfig::default())
            .with_kernel(Box::new(SequentialCpuKernel))
            .build()
            .unwrap();
        assert_eq!(engine.device_label(), "cpu-sequential");
    }
}
