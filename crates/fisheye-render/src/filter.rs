use std::collections::HashMap;
use std::sync::Arc;

use fisheye_core::params::{
    SETTING_ALPHA, SETTING_FOV, SETTING_PAN, SETTING_TILT, SETTING_YAW,
};
use fisheye_core::{
    FilterManifest, FisheyeResult, FrameBuffer, ParameterStore, SettingDescriptor, Timestamp,
    VideoFilter,
};

use crate::gpu::{GpuConfig, GpuContext, PipelineStatus};
use crate::transformer::{FilterOutput, FrameTransformer, OutputFrame};

/// The equirectangular→fisheye filter instance: the concrete
/// [`VideoFilter`] a host drives.
///
/// One-shot lifecycle: [`create`](FisheyeFilter::create) acquires the GPU
/// pipeline (construction fails on any fatal initialization error and the
/// filter is then disabled for the session); dropping the instance drains
/// in-flight GPU work and releases the pipeline.
pub struct FisheyeFilter {
    params: Arc<ParameterStore>,
    transformer: FrameTransformer,
}

impl FisheyeFilter {
    /// Create a filter instance, initializing the GPU pipeline eagerly.
    pub fn create(config: GpuConfig) -> FisheyeResult<Self> {
        let mut gpu = GpuContext::new(config);
        gpu.initialize()?;
        let params = Arc::new(ParameterStore::new());
        Ok(Self {
            transformer: FrameTransformer::new(gpu, params.clone()),
            params,
        })
    }

    /// Registration metadata for the host.
    pub fn manifest() -> FilterManifest {
        FilterManifest {
            id: "fisheye_filter".into(),
            name: "Fisheye Projection".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            description: "Equirectangular to fisheye projection".into(),
        }
    }

    /// The five settings this filter understands, with their ranges, for
    /// hosts that build their settings UI dynamically.
    pub fn properties() -> [SettingDescriptor; 5] {
        [
            SettingDescriptor {
                key: SETTING_FOV,
                label: "FOV",
                min: 0.0,
                max: 360.0,
                step: 1.0,
            },
            SettingDescriptor {
                key: SETTING_PAN,
                label: "Pan",
                min: -180.0,
                max: 180.0,
                step: 1.0,
            },
            SettingDescriptor {
                key: SETTING_TILT,
                label: "Tilt",
                min: -180.0,
                max: 180.0,
                step: 1.0,
            },
            SettingDescriptor {
                key: SETTING_YAW,
                label: "Yaw",
                min: -180.0,
                max: 180.0,
                step: 1.0,
            },
            SettingDescriptor {
                key: SETTING_ALPHA,
                label: "Alpha",
                min: 0.0,
                max: 1.0,
                step: 0.01,
            },
        ]
    }

    /// Shared handle to the parameter store, for control paths that want to
    /// write snapshots directly instead of going through named settings.
    pub fn parameters(&self) -> Arc<ParameterStore> {
        self.params.clone()
    }

    /// Current pipeline state, for host diagnostics.
    pub fn status(&self) -> PipelineStatus {
        self.transformer.gpu().status()
    }

    /// Resolve a transformed frame to CPU pixels (still export, tests).
    pub fn read_back(&self, output: &OutputFrame) -> FisheyeResult<FrameBuffer> {
        self.transformer.read_back(output)
    }
}

impl VideoFilter for FisheyeFilter {
    type Output = FilterOutput;

    fn update_settings(&self, settings: &HashMap<String, f64>) {
        self.params.update_named(settings);
    }

    fn render_frame(&mut self, frame: &FrameBuffer, timestamp: Timestamp) -> FilterOutput {
        self.transformer.transform(frame, timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest() {
        let m = FisheyeFilter::manifest();
        assert_eq!(m.id, "fisheye_filter");
        assert_eq!(m.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_properties_cover_all_settings() {
        let props = FisheyeFilter::properties();
        let keys: Vec<&str> = props.iter().map(|p| p.key).collect();
        assert_eq!(
            keys,
            [SETTING_FOV, SETTING_PAN, SETTING_TILT, SETTING_YAW, SETTING_ALPHA]
        );
        for p in &props {
            assert!(p.min < p.max, "{} has an empty range", p.key);
            assert!(p.step > 0.0);
        }
    }

    #[test]
    fn test_fov_property_matches_clamp_range() {
        let fov = FisheyeFilter::properties()[0];
        assert_eq!((fov.min, fov.max), (0.0, 360.0));
    }
}
