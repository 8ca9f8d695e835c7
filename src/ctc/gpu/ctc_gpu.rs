//! GPU-accelerated CTC loss via wgpu compute shaders.
//!
//! Enabled with the `gpu-dp` feature flag. The whole forward-backward pass
//! and the gradient run in one dispatch: one workgroup per sample, barrier
//! synchronization between time steps.

use std::sync::OnceLock;

use crate::error::CtcError;
use crate::pipeline::batch::PreparedBatch;
use crate::types::CtcOutput;

const WORKGROUP_LANES: u32 = 256;

/// Shared GPU context, initialized once on first use.
struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    adapter_name: String,
}

static GPU_CTX: OnceLock<Option<GpuContext>> = OnceLock::new();

fn get_gpu_context() -> Option<&'static GpuContext> {
    GPU_CTX
        .get_or_init(|| {
            let ctx = pollster::block_on(init_gpu_context());
            match &ctx {
                Some(ctx) => tracing::info!(adapter = ctx.adapter_name.as_str(), "wgpu CTC kernel ready"),
                None => tracing::debug!("wgpu CTC kernel could not be initialized"),
            }
            ctx
        })
        .as_ref()
}

async fn init_gpu_context() -> Option<GpuContext> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::VULKAN | wgpu::Backends::DX12 | wgpu::Backends::METAL,
        ..Default::default()
    });

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await?;
    let adapter_limits = adapter.limits();

    let (device, queue) = adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("ctc-gpu"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits {
                    max_storage_buffer_binding_size: adapter_limits
                        .max_storage_buffer_binding_size,
                    max_buffer_size: adapter_limits.max_buffer_size,
                    ..wgpu::Limits::default()
                },
                ..Default::default()
            },
            None,
        )
        .await
        .ok()?;

    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("ctc-shader"),
        source: wgpu::ShaderSource::Wgsl(include_str!("ctc.wgsl").into()),
    });

    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("ctc-bgl"),
        entries: &[
            // 0: activations, 1: extended labels, 2: sample info
            bgl_entry(0, true),
            bgl_entry(1, true),
            bgl_entry(2, true),
            // 3: params (uniform)
            wgpu::BindGroupLayoutEntry {
                binding: 3,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            // 4: log_probs, 5: alpha, 6: beta (scratch)
            bgl_entry(4, false),
            bgl_entry(5, false),
            bgl_entry(6, false),
            // 7: grads, 8: log_likelihood (outputs)
            bgl_entry(7, false),
            bgl_entry(8, false),
        ],
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("ctc-pl"),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });

    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some("ctc-pipeline"),
        layout: Some(&pipeline_layout),
        module: &shader,
        entry_point: Some("ctc_main"),
        compilation_options: Default::default(),
        cache: None,
    });

    Some(GpuContext {
        device,
        queue,
        pipeline,
        bind_group_layout,
        adapter_name: adapter.get_info().name,
    })
}

fn bgl_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Params struct matching the WGSL layout (32 bytes, uniform-aligned).
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct GpuParams {
    t_max: u32,
    batch: u32,
    classes: u32,
    s_max: u32,
    blank: u32,
    _pad: [u32; 3],
}

/// Runtime capability check; initializes the shared context on first call.
pub fn is_available() -> bool {
    get_gpu_context().is_some()
}

pub fn adapter_label() -> Option<String> {
    get_gpu_context().map(|ctx| format!("wgpu({})", ctx.adapter_name))
}

/// Runs the prepared batch on the GPU. Same costs and gradients as the CPU
/// reference within f32 tolerance.
pub fn compute_ctc_gpu(batch: &PreparedBatch<'_>) -> Result<CtcOutput, CtcError> {
    let ctx = get_gpu_context()
        .ok_or_else(|| CtcError::runtime("wgpu CTC", "no GPU adapter available"))?;

    let view = batch.batch();
    let (t_max, n, c) = (view.max_frames, view.batch_size, view.alphabet_size);
    if t_max == 0 || n == 0 {
        return Ok(batch.finish_device_output(&vec![f32::NEG_INFINITY; n], vec![0.0; t_max * n * c]));
    }

    let max_groups = ctx.device.limits().max_compute_workgroups_per_dimension as usize;
    if n > max_groups {
        return Err(CtcError::runtime(
            "wgpu CTC",
            format!("batch of {n} exceeds {max_groups} workgroups per dispatch"),
        ));
    }

    let layout = batch.device_layout();
    let act_bytes = (t_max * n * c * 4) as u64;
    let table_bytes = (n * t_max * layout.s_max * 4) as u64;
    let ll_bytes = (n * 4) as u64;
    let max_binding = ctx.device.limits().max_storage_buffer_binding_size as u64;
    if table_bytes > max_binding || act_bytes > max_binding {
        return Err(CtcError::runtime(
            "wgpu CTC",
            format!("DP tables need {table_bytes} bytes, device binding limit is {max_binding}"),
        ));
    }

    let params = GpuParams {
        t_max: t_max as u32,
        batch: n as u32,
        classes: c as u32,
        s_max: layout.s_max as u32,
        blank: batch.blank() as u32,
        _pad: [0; 3],
    };

    let device = &ctx.device;
    let queue = &ctx.queue;

    // --- Create GPU buffers ---
    let buf_acts = create_buffer_init(
        device,
        "activations",
        bytemuck::cast_slice(view.activations),
        wgpu::BufferUsages::STORAGE,
    );
    let buf_labels = create_buffer_init(
        device,
        "ext-labels",
        bytemuck::cast_slice(&layout.ext_labels),
        wgpu::BufferUsages::STORAGE,
    );
    let buf_info = create_buffer_init(
        device,
        "sample-info",
        bytemuck::cast_slice(&layout.sample_info),
        wgpu::BufferUsages::STORAGE,
    );
    let buf_params = create_buffer_init(
        device,
        "params",
        bytemuck::bytes_of(&params),
        wgpu::BufferUsages::UNIFORM,
    );
    let buf_log_probs = create_storage(device, "log-probs", act_bytes, false);
    let buf_alpha = create_storage(device, "alpha", table_bytes, false);
    let buf_beta = create_storage(device, "beta", table_bytes, false);
    let buf_grads = create_storage(device, "grads", act_bytes, true);
    let buf_ll = create_storage(device, "log-likelihood", ll_bytes, true);

    // --- Staging buffers for readback ---
    let staging_grads = create_staging(device, "staging-grads", act_bytes);
    let staging_ll = create_staging(device, "staging-ll", ll_bytes);

    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("ctc-bg"),
        layout: &ctx.bind_group_layout,
        entries: &[
            bind_entry(0, &buf_acts),
            bind_entry(1, &buf_labels),
            bind_entry(2, &buf_info),
            bind_entry(3, &buf_params),
            bind_entry(4, &buf_log_probs),
            bind_entry(5, &buf_alpha),
            bind_entry(6, &buf_beta),
            bind_entry(7, &buf_grads),
            bind_entry(8, &buf_ll),
        ],
    });

    // --- Dispatch ---
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("ctc-enc"),
    });
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("ctc-pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&ctx.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(n as u32, 1, 1); // one workgroup per sample
    }
    encoder.copy_buffer_to_buffer(&buf_grads, 0, &staging_grads, 0, act_bytes);
    encoder.copy_buffer_to_buffer(&buf_ll, 0, &staging_ll, 0, ll_bytes);
    queue.submit(std::iter::once(encoder.finish()));

    // --- Readback ---
    let grads_data = read_buffer(device, &staging_grads, act_bytes)?;
    let ll_data = read_buffer(device, &staging_ll, ll_bytes)?;
    let grads: Vec<f32> = bytemuck::cast_slice(&grads_data).to_vec();
    let log_likelihoods: &[f32] = bytemuck::cast_slice(&ll_data);

    tracing::debug!(
        batch_size = n,
        max_frames = t_max,
        s_max = layout.s_max,
        lanes = WORKGROUP_LANES,
        "wgpu CTC dispatch complete"
    );

    Ok(batch.finish_device_output(log_likelihoods, grads))
}

fn bind_entry(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}

/// Create a buffer initialized with data.
fn create_buffer_init(
    device: &wgpu::Device,
    label: &str,
    data: &[u8],
    usage: wgpu::BufferUsages,
) -> wgpu::Buffer {
    use wgpu::util::DeviceExt;
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: data,
        usage,
    })
}

fn create_storage(device: &wgpu::Device, label: &str, size: u64, readback: bool) -> wgpu::Buffer {
    let mut usage = wgpu::BufferUsages::STORAGE;
    if readback {
        usage |= wgpu::BufferUsages::COPY_SRC;
    }
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage,
        mapped_at_creation: false,
    })
}

fn create_staging(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Blocking readback from a mappable buffer.
fn read_buffer(device: &wgpu::Device, buffer: &wgpu::Buffer, size: u64) -> Result<Vec<u8>, CtcError> {
    let slice = buffer.slice(..size);
    let (sender, receiver) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    receiver
        .recv()
        .map_err(|e| CtcError::runtime("wgpu readback channel", e))?
        .map_err(|e| CtcError::runtime("wgpu readback", e))?;
    let data = slice.get_mapped_range().to_vec();
    buffer.unmap();
    Ok(data)
}
