use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fisheye_core::{
    FilterParameters, FisheyeError, FisheyeResult, FrameBuffer, ParameterStore, PixelFormat,
    Timestamp,
};

use crate::gpu::GpuContext;

/// Compute tile edge. 16×16 is the conventional balance of occupancy and
/// memory locality on typical mobile and desktop GPUs; the kernel's
/// `@workgroup_size` must match.
pub const WORKGROUP_SIZE: u32 = 16;

/// Per-dispatch uniform block. Layout must match the WGSL `FrameUniforms`
/// struct field for field.
///
/// Derived fresh from one parameter snapshot for every frame and owned by
/// the dispatch that created it; never shared across frames. `time` is
/// carried for future animated effects — the projection itself does not
/// read it.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameUniforms {
    pub fov_radians: f32,
    pub pan_radians: f32,
    pub tilt_radians: f32,
    pub yaw_radians: f32,
    pub alpha_level: f32,
    pub aspect_ratio: f32,
    pub center: [f32; 2],
    pub time: f32,
    _pad: [f32; 3],
}

impl FrameUniforms {
    /// Derive the uniforms for one frame. `width` and `height` must be
    /// non-zero (the transformer passes through before getting here).
    pub fn new(params: &FilterParameters, width: u32, height: u32, timestamp: Timestamp) -> Self {
        Self {
            fov_radians: params.fov_degrees.to_radians(),
            pan_radians: params.pan_degrees.to_radians(),
            tilt_radians: params.tilt_degrees.to_radians(),
            yaw_radians: params.yaw_degrees.to_radians(),
            alpha_level: params.alpha_level,
            aspect_ratio: width as f32 / height as f32,
            center: [0.5, 0.5],
            time: timestamp.as_seconds() as f32,
            _pad: [0.0; 3],
        }
    }
}

/// Handle to a transformed frame. The texture has the input's dimensions
/// and becomes valid for downstream consumption once the GPU signals
/// completion of the dispatch that produced it.
pub struct OutputFrame {
    texture: Arc<wgpu::Texture>,
    width: u32,
    height: u32,
    complete: Arc<AtomicBool>,
}

impl OutputFrame {
    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Whether the GPU has signaled completion of the producing dispatch.
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }
}

/// What one frame's processing handed back to the host.
pub enum FilterOutput {
    /// Show the input frame unmodified. Served whenever the pipeline is
    /// not ready, the frame has a zero dimension, or a dispatch failed —
    /// the render contract always returns a frame within budget.
    PassThrough,
    /// A transformed frame was dispatched.
    Transformed(OutputFrame),
}

impl FilterOutput {
    pub fn is_pass_through(&self) -> bool {
        matches!(self, FilterOutput::PassThrough)
    }
}

/// Orchestrates one frame: parameter snapshot, uniform derivation, slot
/// selection, kernel dispatch, and the pass-through fallback.
pub struct FrameTransformer {
    gpu: GpuContext,
    params: Arc<ParameterStore>,
}

impl FrameTransformer {
    pub fn new(gpu: GpuContext, params: Arc<ParameterStore>) -> Self {
        Self { gpu, params }
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    pub fn gpu_mut(&mut self) -> &mut GpuContext {
        &mut self.gpu
    }

    /// Process one frame. Never blocks beyond command enqueue and the
    /// bounded uniform-slot wait; never fails across this boundary.
    pub fn transform(&mut self, frame: &FrameBuffer, timestamp: Timestamp) -> FilterOutput {
        if frame.width == 0 || frame.height == 0 {
            return FilterOutput::PassThrough;
        }

        self.gpu.ensure_ready();
        if !self.gpu.is_ready() {
            return FilterOutput::PassThrough;
        }

        let snapshot = self.params.snapshot();
        let uniforms = FrameUniforms::new(&snapshot, frame.width, frame.height, timestamp);

        match self.dispatch(frame, &uniforms) {
            Ok(output) => {
                self.gpu.record_dispatch_success();
                FilterOutput::Transformed(output)
            }
            Err(err) => {
                tracing::warn!(error = %err, "dispatch failed, serving pass-through");
                self.gpu.record_dispatch_failure();
                FilterOutput::PassThrough
            }
        }
    }

    fn dispatch(&mut self, frame: &FrameBuffer, uniforms: &FrameUniforms) -> FisheyeResult<OutputFrame> {
        let budget = self.gpu.config().frame_budget;
        let res = self
            .gpu
            .resources_mut()
            .ok_or_else(|| FisheyeError::DispatchSubmission("pipeline is not ready".into()))?;

        let slot_index = res.ring.acquire_index(&res.device, budget).ok_or_else(|| {
            FisheyeError::DispatchSubmission("no uniform slot freed within the frame budget".into())
        })?;
        res.ring
            .slot(slot_index)
            .in_flight
            .store(true, Ordering::Release);
        res.queue.write_buffer(
            &res.ring.slot(slot_index).buffer,
            0,
            bytemuck::bytes_of(uniforms),
        );

        let extent = wgpu::Extent3d {
            width: frame.width,
            height: frame.height,
            depth_or_array_layers: 1,
        };

        let input = res.input_pool.acquire(&res.device, frame.width, frame.height);
        res.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &input,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &frame.data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(frame.width * 4),
                rows_per_image: Some(frame.height),
            },
            extent,
        );

        let output = res.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("fisheye_output"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        let input_view = input.create_view(&wgpu::TextureViewDescriptor::default());
        let output_view = output.create_view(&wgpu::TextureViewDescriptor::default());

        let bind_group = res.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("fisheye_bind_group"),
            layout: &res.bind_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&input_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&res.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&output_view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: res.ring.slot(slot_index).buffer.as_entire_binding(),
                },
            ],
        });

        res.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let mut encoder = res
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor::default());
            cpass.set_pipeline(&res.pipeline);
            cpass.set_bind_group(0, &bind_group, &[]);
            cpass.dispatch_workgroups(
                (frame.width + WORKGROUP_SIZE - 1) / WORKGROUP_SIZE,
                (frame.height + WORKGROUP_SIZE - 1) / WORKGROUP_SIZE,
                1,
            );
        }
        res.queue.submit(Some(encoder.finish()));

        // Completion signal for the slot and the output handle; the calling
        // thread is not blocked past this enqueue.
        let in_flight = res.ring.slot(slot_index).in_flight.clone();
        let complete = Arc::new(AtomicBool::new(false));
        let signal = complete.clone();
        res.queue.on_submitted_work_done(move || {
            in_flight.store(false, Ordering::Release);
            signal.store(true, Ordering::Release);
        });

        if let Some(err) = pollster::block_on(res.device.pop_error_scope()) {
            // The submission was rejected; the slot holds no live work.
            res.ring
                .slot(slot_index)
                .in_flight
                .store(false, Ordering::Release);
            return Err(FisheyeError::DispatchSubmission(err.to_string()));
        }

        res.input_pool.release(input, frame.width, frame.height);

        Ok(OutputFrame {
            texture: Arc::new(output),
            width: frame.width,
            height: frame.height,
            complete,
        })
    }

    /// Resolve an output frame to CPU pixels. Waits for the producing
    /// dispatch; meant for still-frame export and tests, not the per-frame
    /// path.
    pub fn read_back(&self, output: &OutputFrame) -> FisheyeResult<FrameBuffer> {
        let res = self
            .gpu
            .resources()
            .ok_or_else(|| FisheyeError::DispatchSubmission("pipeline is not ready".into()))?;

        // Copy rows padded to the required alignment, then repack.
        let row_bytes = output.width * 4;
        let padded_row = (row_bytes + wgpu::COPY_BYTES_PER_ROW_ALIGNMENT - 1)
            & !(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT - 1);

        let readback = res.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("fisheye_readback"),
            size: (padded_row * output.height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = res
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: output.texture(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(output.height),
                },
            },
            wgpu::Extent3d {
                width: output.width,
                height: output.height,
                depth_or_array_layers: 1,
            },
        );
        res.queue.submit(Some(encoder.finish()));

        let slice = readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = res.device.poll(wgpu::Maintain::Wait);

        match rx.recv() {
            Ok(Ok(())) => {}
            _ => {
                return Err(FisheyeError::DispatchSubmission(
                    "failed to map readback buffer".into(),
                ))
            }
        }

        let data = slice.get_mapped_range();
        let mut fb = FrameBuffer::new(output.width, output.height, PixelFormat::Rgba8);
        for y in 0..output.height as usize {
            let src = y * padded_row as usize;
            let dst = y * row_bytes as usize;
            fb.data[dst..dst + row_bytes as usize]
                .copy_from_slice(&data[src..src + row_bytes as usize]);
        }
        drop(data);
        readback.unmap();

        Ok(fb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::GpuConfig;

    fn transformer_with_uninitialized_gpu() -> FrameTransformer {
        FrameTransformer::new(
            GpuContext::new(GpuConfig::default()),
            Arc::new(ParameterStore::new()),
        )
    }

    #[test]
    fn test_uniforms_layout_matches_kernel_block() {
        // 12 f32 fields: the WGSL block is 40 bytes, the buffer padded
        // to 48; a size change here breaks the kernel contract.
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 48);
        assert_eq!(std::mem::align_of::<FrameUniforms>(), 4);
    }

    #[test]
    fn test_uniforms_derivation() {
        let params = FilterParameters {
            fov_degrees: 180.0,
            pan_degrees: 90.0,
            tilt_degrees: -45.0,
            yaw_degrees: 30.0,
            alpha_level: 0.25,
        };
        let u = FrameUniforms::new(&params, 1920, 1080, Timestamp::from_seconds(2.0));
        assert!((u.fov_radians - std::f32::consts::PI).abs() < 1e-6);
        assert!((u.pan_radians - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
        assert!((u.tilt_radians + std::f32::consts::FRAC_PI_4).abs() < 1e-6);
        assert!((u.aspect_ratio - 1920.0 / 1080.0).abs() < 1e-6);
        assert_eq!(u.alpha_level, 0.25);
        assert_eq!(u.center, [0.5, 0.5]);
        assert!((u.time - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_width_passes_through_without_dispatch() {
        let mut t = transformer_with_uninitialized_gpu();
        let frame = FrameBuffer::new(0, 1080, PixelFormat::Rgba8);
        assert!(t.transform(&frame, Timestamp::zero()).is_pass_through());
    }

    #[test]
    fn test_zero_height_passes_through_without_dispatch() {
        let mut t = transformer_with_uninitialized_gpu();
        let frame = FrameBuffer::new(1920, 0, PixelFormat::Rgba8);
        assert!(t.transform(&frame, Timestamp::zero()).is_pass_through());
    }

    #[test]
    fn test_uninitialized_context_passes_through() {
        let mut t = transformer_with_uninitialized_gpu();
        let frame = FrameBuffer::new(64, 64, PixelFormat::Rgba8);
        assert!(t.transform(&frame, Timestamp::zero()).is_pass_through());
    }

    #[test]
    fn test_failed_context_passes_through_every_frame() {
        let mut t = transformer_with_uninitialized_gpu();
        // Failed with the single reinitialization attempt already spent:
        // the transformer must serve pass-through indefinitely.
        t.gpu_mut().force_failed(true);
        let frame = FrameBuffer::new(640, 360, PixelFormat::Rgba8);
        for i in 0..5 {
            let out = t.transform(&frame, Timestamp::from_seconds(i as f64 / 30.0));
            assert!(out.is_pass_through(), "frame {i} was not pass-through");
        }
        assert_eq!(t.gpu().status(), crate::gpu::PipelineStatus::Failed);
    }
}
