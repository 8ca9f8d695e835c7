//! CUDA-native CTC kernel via cudarc.
//!
//! One block per sample; the DP tables live in device memory and only the
//! gradient and the N log-likelihoods are copied back.
//!
//! Feature-gated: `cuda-dp`

use cudarc::driver::{CudaDevice, CudaFunction, CudaSlice, DevicePtr, LaunchAsync, LaunchConfig};
use cudarc::nvrtc::compile_ptx;
use std::sync::{Arc, OnceLock};

use crate::error::CtcError;
use crate::pipeline::batch::PreparedBatch;
use crate::types::CtcOutput;

const KERNEL_SRC: &str = include_str!("ctc.cu");
const MODULE: &str = "ctc";
const KERNEL: &str = "ctc_loss_kernel";
const BLOCK_SIZE: u32 = 256;

struct CudaCtcCtx {
    dev: Arc<CudaDevice>,
}

static CTX: OnceLock<Option<CudaCtcCtx>> = OnceLock::new();

fn get_ctx() -> Option<&'static CudaCtcCtx> {
    CTX.get_or_init(|| match init_ctx() {
        Ok(ctx) => {
            tracing::info!("CUDA CTC kernel compiled for device 0");
            Some(ctx)
        }
        Err(err) => {
            tracing::debug!(error = %err, "CUDA CTC kernel unavailable");
            None
        }
    })
    .as_ref()
}

fn init_ctx() -> Result<CudaCtcCtx, CtcError> {
    let dev = CudaDevice::new(0).map_err(|e| CtcError::runtime("open CUDA device 0", e))?;
    let ptx = compile_ptx(KERNEL_SRC).map_err(|e| CtcError::runtime("compile CTC kernel", e))?;
    dev.load_ptx(ptx, MODULE, &[KERNEL])
        .map_err(|e| CtcError::runtime("load CTC kernel", e))?;
    Ok(CudaCtcCtx { dev })
}

pub fn is_available() -> bool {
    get_ctx().is_some()
}

/// Run a prepared batch whose activations already live on the device.
///
/// The host activations held by `batch` are only used for shape validation
/// during preparation; the kernel reads `acts_dev_ptr`.
///
/// # Safety
/// `acts_dev_ptr` must be a valid CUDA device pointer to at least
/// `T_max * N * C` f32 values laid out like `batch`, on device 0, and must
/// remain valid until this function returns.
pub unsafe fn compute_device(
    acts_dev_ptr: *const f32,
    batch: &PreparedBatch<'_>,
) -> Result<CtcOutput, CtcError> {
    let ctx = get_ctx().ok_or_else(|| CtcError::runtime("CUDA CTC", "CUDA is unavailable"))?;
    let dev = &ctx.dev;

    let view = batch.batch();
    let (t_max, n, c) = (view.max_frames, view.batch_size, view.alphabet_size);
    if t_max == 0 || n == 0 {
        return Ok(batch.finish_device_output(&vec![f32::NEG_INFINITY; n], vec![0.0; t_max * n * c]));
    }

    let func: CudaFunction = dev
        .get_func(MODULE, KERNEL)
        .ok_or_else(|| CtcError::runtime("CUDA CTC", "kernel function not loaded"))?;

    let layout = batch.device_layout();
    let launch_err = |e| CtcError::runtime("CUDA CTC launch", e);

    // Labels and per-sample info are small: N × S_max and N × 4 u32s.
    let labels_dev: CudaSlice<u32> = dev.htod_copy(layout.ext_labels).map_err(launch_err)?;
    let info_dev: CudaSlice<u32> = dev.htod_copy(layout.sample_info).map_err(launch_err)?;

    let act_len = t_max * n * c;
    let table_len = n * t_max * layout.s_max;
    let mut log_probs_dev: CudaSlice<f32> = dev.alloc_zeros(act_len).map_err(launch_err)?;
    let mut alpha_dev: CudaSlice<f32> = dev.alloc_zeros(table_len).map_err(launch_err)?;
    let mut beta_dev: CudaSlice<f32> = dev.alloc_zeros(table_len).map_err(launch_err)?;
    let mut grads_dev: CudaSlice<f32> = dev.alloc_zeros(act_len).map_err(launch_err)?;
    let mut ll_dev: CudaSlice<f32> = dev.alloc_zeros(n).map_err(launch_err)?;

    let cfg = LaunchConfig {
        block_dim: (BLOCK_SIZE, 1, 1),
        grid_dim: (n as u32, 1, 1),
        shared_mem_bytes: 0,
    };

    unsafe {
        func.launch(
            cfg,
            (
                acts_dev_ptr,
                &labels_dev,
                &info_dev,
                &mut log_probs_dev,
                &mut alpha_dev,
                &mut beta_dev,
                &mut grads_dev,
                &mut ll_dev,
                t_max as i32,
                n as i32,
                c as i32,
                layout.s_max as i32,
            ),
        )
    }
    .map_err(launch_err)?;

    let grads: Vec<f32> = dev
        .dtoh_sync_copy(&grads_dev)
        .map_err(|e| CtcError::runtime("CUDA CTC readback", e))?;
    let log_likelihoods: Vec<f32> = dev
        .dtoh_sync_copy(&ll_dev)
        .map_err(|e| CtcError::runtime("CUDA CTC readback", e))?;

    tracing::debug!(
        batch_size = n,
        max_frames = t_max,
        s_max = layout.s_max,
        "CUDA CTC launch complete"
    );

    Ok(batch.finish_device_output(&log_likelihoods, grads))
}

/// Host-side variant: uploads the batch activations, then runs
/// [`compute_device`].
pub fn compute_ctc_cuda(batch: &PreparedBatch<'_>) -> Result<CtcOutput, CtcError> {
    let ctx = get_ctx().ok_or_else(|| CtcError::runtime("CUDA CTC", "CUDA is unavailable"))?;
    let acts = batch.batch().activations;
    if acts.is_empty() {
        return Ok(batch.finish_device_output(
            &vec![f32::NEG_INFINITY; batch.batch_size()],
            Vec::new(),
        ));
    }
    let acts_dev: CudaSlice<f32> = ctx
        .dev
        .htod_copy(acts.to_vec())
        .map_err(|e| CtcError::runtime("CUDA CTC upload", e))?;

    // Safety: we own acts_dev, it's valid for the duration of this call
    unsafe { compute_device(*acts_dev.device_ptr() as *const f32, batch) }
}
