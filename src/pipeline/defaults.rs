use std::sync::Arc;

use rayon::prelude::*;

use crate::ctc::sample::{compute_sample, SampleResult};
use crate::error::CtcError;
use crate::pipeline::batch::PreparedBatch;
use crate::pipeline::traits::CtcKernel;
use crate::types::CtcOutput;

/// Accelerator threshold: below this T×S×N, CPU is faster than launch overhead.
const ACCELERATOR_DP_THRESHOLD: usize = 40_000;

fn run_sample(batch: &PreparedBatch<'_>, n: usize) -> SampleResult {
    let log_probs = batch.log_probs(n);
    compute_sample(&log_probs, batch.labels(n), n)
}

fn assemble(batch: &PreparedBatch<'_>, results: Vec<SampleResult>) -> CtcOutput {
    let mut out = batch.empty_output();
    for (n, result) in results.into_iter().enumerate() {
        out.scatter_sample(n, result.cost, &result.grads);
    }
    out
}

/// One sample after another on the calling thread. Reference for every
/// other kernel.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialCpuKernel;

impl CtcKernel for SequentialCpuKernel {
    fn compute(&self, batch: &PreparedBatch<'_>) -> Result<CtcOutput, CtcError> {
        let results = (0..batch.batch_size())
            .map(|n| run_sample(batch, n))
            .collect();
        Ok(assemble(batch, results))
    }

    fn device_label(&self) -> String {
        "cpu-sequential".to_string()
    }
}

/// One rayon task per sample.
#[derive(Debug, Default, Clone)]
pub struct ParallelCpuKernel {
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl ParallelCpuKernel {
    /// Runs on rayon's global pool.
    pub fn new() -> Self {
        Self { pool: None }
    }

    /// Runs on a dedicated pool of `num_threads` workers.
    pub fn with_threads(num_threads: usize) -> Result<Self, CtcError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("ctc-worker-{i}"))
            .build()
            .map_err(|e| CtcError::runtime("build ctc thread pool", e))?;
        Ok(Self {
            pool: Some(Arc::new(pool)),
        })
    }

    pub fn num_threads(&self) -> usize {
        self.pool
            .as_ref()
            .map_or_else(rayon::current_num_threads, |pool| pool.current_num_threads())
    }
}

impl CtcKernel for ParallelCpuKernel {
    fn compute(&self, batch: &PreparedBatch<'_>) -> Result<CtcOutput, CtcError> {
        let work = || {
            (0..batch.batch_size())
                .into_par_iter()
                .map(|n| run_sample(batch, n))
                .collect::<Vec<_>>()
        };
        let results = match &self.pool {
            Some(pool) => pool.install(work),
            None => work(),
        };
        Ok(assemble(batch, results))
    }

    fn device_label(&self) -> String {
        format!("cpu-parallel({} threads)", self.num_threads())
    }
}

#[cfg(feature = "gpu-dp")]
#[derive(Debug, Default, Clone, Copy)]
pub struct WgpuKernel;

#[cfg(feature = "gpu-dp")]
impl WgpuKernel {
    pub fn is_available() -> bool {
        crate::ctc::gpu::is_available()
    }
}

#[cfg(feature = "gpu-dp")]
impl CtcKernel for WgpuKernel {
    fn compute(&self, batch: &PreparedBatch<'_>) -> Result<CtcOutput, CtcError> {
        crate::ctc::gpu::compute_ctc_gpu(batch)
    }

    fn device_label(&self) -> String {
        crate::ctc::gpu::adapter_label().unwrap_or_else(|| "wgpu".to_string())
    }
}

#[cfg(feature = "cuda-dp")]
#[derive(Debug, Default, Clone, Copy)]
pub struct CudaKernel;

#[cfg(feature = "cuda-dp")]
impl CudaKernel {
    pub fn is_available() -> bool {
        crate::ctc::cuda::is_available()
    }
}

#[cfg(feature = "cuda-dp")]
impl CtcKernel for CudaKernel {
    fn compute(&self, batch: &PreparedBatch<'_>) -> Result<CtcOutput, CtcError> {
        crate::ctc::cuda::compute_ctc_cuda(batch)
    }

    fn device_label(&self) -> String {
        "cuda:0".to_string()
    }
}

/// Probes accelerators once, in priority order: CUDA, then wgpu.
pub(crate) fn detect_accelerator() -> Option<Box<dyn CtcKernel>> {
    #[cfg(feature = "cuda-dp")]
    {
        if CudaKernel::is_available() {
            return Some(Box::new(CudaKernel));
        }
        tracing::debug!("cuda CTC kernel unavailable");
    }
    #[cfg(feature = "gpu-dp")]
    {
        if WgpuKernel::is_available() {
            return Some(Box::new(WgpuKernel));
        }
        tracing::debug!("wgpu CTC kernel unavailable");
    }
    None
}

/// Sends large batches to an accelerator when one exists, everything else
/// (and any accelerator failure) to the parallel CPU kernel.
pub struct AutoKernel {
    accelerator: Option<Box<dyn CtcKernel>>,
    cpu: ParallelCpuKernel,
}

impl AutoKernel {
    pub fn new(cpu: ParallelCpuKernel) -> Self {
        let accelerator = detect_accelerator();
        if accelerator.is_none() {
            tracing::debug!("no CTC accelerator available, auto backend stays on CPU");
        }
        Self { accelerator, cpu }
    }

    pub fn has_accelerator(&self) -> bool {
        self.accelerator.is_some()
    }
}

impl CtcKernel for AutoKernel {
    fn compute(&self, batch: &PreparedBatch<'_>) -> Result<CtcOutput, CtcError> {
        if let Some(accelerator) = &self.accelerator {
            if batch.state_product() >= ACCELERATOR_DP_THRESHOLD {
                match accelerator.compute(batch) {
                    Ok(out) => return Ok(out),
                    Err(err) => tracing::warn!(
                        device = accelerator.device_label(),
                        error = %err,
                        "CTC accelerator failed, falling back to CPU"
                    ),
                }
            }
        }
        self.cpu.compute(batch)
    }

    fn device_label(&self) -> String {
        match &self.accelerator {
            Some(accelerator) => format!(
                "auto({}, {})",
                accelerator.device_label(),
                self.cpu.device_label()
            ),
            None => format!("auto({})", self.cpu.device_label()),
        }
    }
}
