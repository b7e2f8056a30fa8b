use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use fisheye_core::{FisheyeError, FisheyeResult};

use crate::transformer::FrameUniforms;

/// The compute entry point. Must match the function name in the kernel
/// source/binary exactly — it is the lookup key of the resource contract.
pub const KERNEL_ENTRY_POINT: &str = "equirectToFisheye";

/// Precompiled kernel artifact, looked up first.
const KERNEL_BINARY_FILE: &str = "equirect_to_fisheye.spv";
/// Kernel source, compiled at runtime when the artifact is absent.
const KERNEL_SOURCE_FILE: &str = "equirect_to_fisheye.wgsl";

/// Lower bound on uniform ring slots: one being written while one is read.
pub const MIN_UNIFORM_SLOTS: usize = 2;

/// Configuration for the GPU pipeline lifecycle.
#[derive(Debug, Clone)]
pub struct GpuConfig {
    /// Directory holding the kernel artifact and/or source.
    pub resource_dir: PathBuf,
    /// Number of uniform buffer slots; clamped up to [`MIN_UNIFORM_SLOTS`].
    pub uniform_slots: usize,
    /// Consecutive dispatch failures tolerated before the pipeline is
    /// marked failed and one reinitialization is attempted.
    pub max_consecutive_failures: u32,
    /// Upper bound on how long the render thread may wait for a free
    /// uniform slot — at most one frame period.
    pub frame_budget: Duration,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            resource_dir: Path::new(env!("CARGO_MANIFEST_DIR")).join("resources"),
            uniform_slots: MIN_UNIFORM_SLOTS,
            max_consecutive_failures: 1,
            frame_budget: Duration::from_millis(16),
        }
    }
}

/// Where the kernel came from.
enum KernelSource {
    /// SPIR-V artifact, loaded as-is.
    Precompiled(Vec<u8>),
    /// WGSL text, compiled at module creation.
    Text(String),
}

impl KernelSource {
    /// Resolve the kernel per the resource contract: the precompiled
    /// artifact at its fixed path first, the source file at the sibling
    /// fixed path as fallback.
    fn load(dir: &Path) -> FisheyeResult<Self> {
        let binary_path = dir.join(KERNEL_BINARY_FILE);
        match std::fs::read(&binary_path) {
            Ok(bytes) => {
                tracing::info!(path = %binary_path.display(), "loaded precompiled kernel");
                return Ok(KernelSource::Precompiled(bytes));
            }
            Err(err) => {
                tracing::warn!(
                    path = %binary_path.display(),
                    error = %err,
                    "precompiled kernel unavailable, falling back to source compilation"
                );
            }
        }

        let source_path = dir.join(KERNEL_SOURCE_FILE);
        match std::fs::read_to_string(&source_path) {
            Ok(text) => Ok(KernelSource::Text(text)),
            Err(err) => Err(FisheyeError::LibraryLoad(format!(
                "no kernel artifact or source in {}: {err}",
                dir.display()
            ))),
        }
    }

    /// Whether the kernel declares the fixed entry point. SPIR-V binaries
    /// are not introspected here; a missing entry point in one surfaces at
    /// pipeline creation instead.
    fn declares_entry_point(&self) -> bool {
        match self {
            KernelSource::Precompiled(_) => true,
            KernelSource::Text(text) => declares_entry_point(text),
        }
    }

    fn shader_source(&self) -> wgpu::ShaderSource<'_> {
        match self {
            KernelSource::Precompiled(bytes) => wgpu::util::make_spirv(bytes),
            KernelSource::Text(text) => wgpu::ShaderSource::Wgsl(text.as_str().into()),
        }
    }
}

fn declares_entry_point(source: &str) -> bool {
    source.split("fn ").skip(1).any(|rest| {
        let rest = rest.trim_start();
        rest.starts_with(KERNEL_ENTRY_POINT)
            && !rest[KERNEL_ENTRY_POINT.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric() || c == '_')
    })
}

/// One uniform buffer slot plus its in-flight flag. The flag is set when a
/// dispatch referencing the slot is submitted and cleared by the queue's
/// completion callback; the CPU never rewrites a slot while it is set.
pub(crate) struct UniformSlot {
    pub buffer: wgpu::Buffer,
    pub in_flight: Arc<AtomicBool>,
}

/// Round-robin ring of uniform slots bounding the number of in-flight
/// frames.
pub(crate) struct UniformRing {
    slots: Vec<UniformSlot>,
    cursor: usize,
}

impl UniformRing {
    fn new(device: &wgpu::Device, count: usize) -> Self {
        let slots = (0..count)
            .map(|i| UniformSlot {
                buffer: device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("fisheye_uniforms_{i}")),
                    size: std::mem::size_of::<FrameUniforms>() as wgpu::BufferAddress,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                }),
                in_flight: Arc::new(AtomicBool::new(false)),
            })
            .collect();
        Self { slots, cursor: 0 }
    }

    pub fn slot(&self, index: usize) -> &UniformSlot {
        &self.slots[index]
    }

    /// Pick the next free slot round-robin, skipping slots whose prior GPU
    /// work has not signaled completion. Waits at most `budget`, polling
    /// the device so completion callbacks can run; `None` after the budget
    /// elapses.
    pub fn acquire_index(&mut self, device: &wgpu::Device, budget: Duration) -> Option<usize> {
        let deadline = Instant::now() + budget;
        loop {
            let busy: Vec<bool> = self
                .slots
                .iter()
                .map(|s| s.in_flight.load(Ordering::Acquire))
                .collect();
            if let Some(index) = next_free(self.cursor, &busy) {
                self.cursor = (index + 1) % self.slots.len();
                return Some(index);
            }
            if Instant::now() >= deadline {
                return None;
            }
            let _ = device.poll(wgpu::Maintain::Poll);
            std::thread::yield_now();
        }
    }
}

/// First non-busy index at or after `start`, wrapping around.
fn next_free(start: usize, busy: &[bool]) -> Option<usize> {
    let n = busy.len();
    (0..n).map(|i| (start + i) % n).find(|&i| !busy[i])
}

/// Pool of input upload textures keyed by dimensions, so a steady stream of
/// equal-sized frames reuses one allocation. Reuse across frames is safe:
/// queue writes are ordered after previously submitted dispatches.
pub(crate) struct TexturePool {
    free: Mutex<HashMap<(u32, u32), Vec<wgpu::Texture>>>,
}

impl TexturePool {
    fn new() -> Self {
        Self {
            free: Mutex::new(HashMap::new()),
        }
    }

    pub fn acquire(&self, device: &wgpu::Device, width: u32, height: u32) -> wgpu::Texture {
        if let Some(texture) = self
            .free
            .lock()
            .unwrap()
            .get_mut(&(width, height))
            .and_then(Vec::pop)
        {
            return texture;
        }

        device.create_texture(&wgpu::TextureDescriptor {
            label: Some("fisheye_input"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        })
    }

    pub fn release(&self, texture: wgpu::Texture, width: u32, height: u32) {
        self.free
            .lock()
            .unwrap()
            .entry((width, height))
            .or_default()
            .push(texture);
    }
}

/// The GPU object graph, owned and torn down as one unit. No sub-object is
/// shared outside the aggregate.
pub(crate) struct GpuResources {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub pipeline: wgpu::ComputePipeline,
    pub bind_layout: wgpu::BindGroupLayout,
    pub sampler: wgpu::Sampler,
    pub ring: UniformRing,
    pub input_pool: TexturePool,
    /// Declared last so the instance outlives the device and queue when the
    /// aggregate drops.
    _instance: wgpu::Instance,
}

/// Externally visible pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

enum PipelineState {
    Uninitialized,
    Initializing,
    Ready(Box<GpuResources>),
    Failed,
}

/// Owns the device, compiled kernel, compute pipeline, command queue and
/// uniform buffers, and manages their lifecycle:
/// `Uninitialized → Initializing → Ready | Failed`, with a single
/// reinitialization attempt out of `Failed` once the dispatch-failure
/// threshold is reached.
pub struct GpuContext {
    state: PipelineState,
    config: GpuConfig,
    consecutive_failures: u32,
    reinit_attempted: bool,
}

impl GpuContext {
    /// Create a context in the `Uninitialized` state. No GPU work happens
    /// until [`initialize`](GpuContext::initialize).
    pub fn new(mut config: GpuConfig) -> Self {
        config.uniform_slots = config.uniform_slots.max(MIN_UNIFORM_SLOTS);
        Self {
            state: PipelineState::Uninitialized,
            config,
            consecutive_failures: 0,
            reinit_attempted: false,
        }
    }

    pub fn status(&self) -> PipelineStatus {
        match self.state {
            PipelineState::Uninitialized => PipelineStatus::Uninitialized,
            PipelineState::Initializing => PipelineStatus::Initializing,
            PipelineState::Ready(_) => PipelineStatus::Ready,
            PipelineState::Failed => PipelineStatus::Failed,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, PipelineState::Ready(_))
    }

    pub(crate) fn config(&self) -> &GpuConfig {
        &self.config
    }

    pub(crate) fn resources(&self) -> Option<&GpuResources> {
        match &self.state {
            PipelineState::Ready(res) => Some(res),
            _ => None,
        }
    }

    pub(crate) fn resources_mut(&mut self) -> Option<&mut GpuResources> {
        match &mut self.state {
            PipelineState::Ready(res) => Some(res),
            _ => None,
        }
    }

    /// Acquire the device, resolve and compile the kernel, build the
    /// compute pipeline and uniform ring. On success the context is
    /// `Ready`; on failure it is `Failed` and the error is returned.
    pub fn initialize(&mut self) -> FisheyeResult<()> {
        self.teardown();
        self.state = PipelineState::Initializing;
        match Self::build_resources(&self.config) {
            Ok(resources) => {
                tracing::info!("compute pipeline ready");
                self.state = PipelineState::Ready(Box::new(resources));
                self.consecutive_failures = 0;
                self.reinit_attempted = false;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "pipeline initialization failed");
                self.state = PipelineState::Failed;
                Err(err)
            }
        }
    }

    fn build_resources(config: &GpuConfig) -> FisheyeResult<GpuResources> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| FisheyeError::DeviceUnavailable("no suitable adapter found".into()))?;
        tracing::info!(adapter = %adapter.get_info().name, "acquired compute adapter");

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("fisheye_filter_device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
            },
            None,
        ))
        .map_err(|err| FisheyeError::DeviceUnavailable(err.to_string()))?;

        let kernel = KernelSource::load(&config.resource_dir)?;
        if !kernel.declares_entry_point() {
            return Err(FisheyeError::FunctionNotFound(KERNEL_ENTRY_POINT.into()));
        }

        // Module and pipeline creation report problems through validation
        // error scopes, not return values.
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("equirect_to_fisheye_kernel"),
            source: kernel.shader_source(),
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(FisheyeError::LibraryLoad(err.to_string()));
        }

        let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("fisheye_bind_group_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: wgpu::TextureFormat::Rgba8Unorm,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
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
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("fisheye_pipeline_layout"),
            bind_group_layouts: &[&bind_layout],
            push_constant_ranges: &[],
        });

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("fisheye_compute_pipeline"),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: KERNEL_ENTRY_POINT,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(FisheyeError::PipelineCreation(err.to_string()));
        }

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("fisheye_linear_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let ring = UniformRing::new(&device, config.uniform_slots);

        Ok(GpuResources {
            device,
            queue,
            pipeline,
            bind_layout,
            sampler,
            ring,
            input_pool: TexturePool::new(),
            _instance: instance,
        })
    }

    /// Release the queue, pipeline, library, buffers and device reference
    /// as one unit, draining in-flight GPU work first. Idempotent.
    pub fn teardown(&mut self) {
        if let PipelineState::Ready(resources) =
            std::mem::replace(&mut self.state, PipelineState::Uninitialized)
        {
            // Nothing may be freed while GPU work still references it.
            let _ = resources.device.poll(wgpu::Maintain::Wait);
            drop(resources);
            tracing::info!("gpu context torn down");
        }
    }

    /// One reinitialization attempt out of `Failed`, invoked by the render
    /// path before the next frame. If it fails the context stays `Failed`
    /// and keeps serving pass-through.
    pub(crate) fn ensure_ready(&mut self) {
        if matches!(self.state, PipelineState::Failed) && !self.reinit_attempted {
            self.reinit_attempted = true;
            tracing::info!("attempting pipeline reinitialization");
            if let Err(err) = self.initialize() {
                tracing::warn!(error = %err, "reinitialization failed, staying in pass-through");
            }
        }
    }

    pub(crate) fn record_dispatch_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub(crate) fn record_dispatch_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.config.max_consecutive_failures && self.is_ready() {
            tracing::warn!(
                failures = self.consecutive_failures,
                "dispatch failure threshold reached, marking pipeline failed"
            );
            if let PipelineState::Ready(resources) =
                std::mem::replace(&mut self.state, PipelineState::Failed)
            {
                let _ = resources.device.poll(wgpu::Maintain::Wait);
            }
        }
    }

    /// Test seam: park the context in `Failed`, optionally with its one
    /// reinitialization attempt already spent.
    #[cfg(test)]
    pub(crate) fn force_failed(&mut self, reinit_spent: bool) {
        self.teardown();
        self.state = PipelineState::Failed;
        self.reinit_attempted = reinit_spent;
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_free_round_robin() {
        assert_eq!(next_free(0, &[false, false]), Some(0));
        assert_eq!(next_free(1, &[false, false]), Some(1));
        // Wraps past the end.
        assert_eq!(next_free(2, &[false, false, false]), Some(2));
        assert_eq!(next_free(2, &[false, true, true]), Some(0));
    }

    #[test]
    fn test_next_free_skips_in_flight() {
        assert_eq!(next_free(0, &[true, false, true]), Some(1));
        assert_eq!(next_free(0, &[true, true, true]), None);
    }

    #[test]
    fn test_declares_entry_point() {
        assert!(declares_entry_point("@compute fn equirectToFisheye() {}"));
        assert!(declares_entry_point("fn   equirectToFisheye(@builtin x: u32) {}"));
        assert!(!declares_entry_point("fn equirect_to_fisheye() {}"));
        assert!(!declares_entry_point("fn main() {}"));
        // The lookup is exact: a prefixed name is a different function.
        assert!(!declares_entry_point("fn equirectToFisheye2() {}"));
    }

    #[test]
    fn test_shipped_kernel_declares_entry_point() {
        let source = KernelSource::Text(include_str!("../resources/equirect_to_fisheye.wgsl").into());
        assert!(source.declares_entry_point());
    }

    #[test]
    fn test_kernel_load_falls_back_to_source() {
        let dir = std::env::temp_dir().join("fisheye_kernel_load_test");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(KERNEL_SOURCE_FILE),
            "@compute fn equirectToFisheye() {}",
        )
        .unwrap();
        // No .spv present: the loader must fall back to the source file.
        match KernelSource::load(&dir).unwrap() {
            KernelSource::Text(text) => assert!(text.contains(KERNEL_ENTRY_POINT)),
            KernelSource::Precompiled(_) => panic!("expected source fallback"),
        }
    }

    #[test]
    fn test_kernel_load_missing_everything() {
        let dir = std::env::temp_dir().join("fisheye_kernel_missing_test");
        let _ = std::fs::remove_dir_all(&dir);
        let err = KernelSource::load(&dir).err().expect("load must fail");
        assert!(matches!(err, FisheyeError::LibraryLoad(_)));
    }

    #[test]
    fn test_new_context_is_uninitialized() {
        let ctx = GpuContext::new(GpuConfig::default());
        assert_eq!(ctx.status(), PipelineStatus::Uninitialized);
        assert!(!ctx.is_ready());
    }

    #[test]
    fn test_slot_count_clamped_to_minimum() {
        let ctx = GpuContext::new(GpuConfig {
            uniform_slots: 0,
            ..GpuConfig::default()
        });
        assert_eq!(ctx.config().uniform_slots, MIN_UNIFORM_SLOTS);
    }

    #[test]
    fn test_teardown_is_idempotent_without_resources() {
        let mut ctx = GpuContext::new(GpuConfig::default());
        ctx.teardown();
        ctx.teardown();
        assert_eq!(ctx.status(), PipelineStatus::Uninitialized);
    }
}
