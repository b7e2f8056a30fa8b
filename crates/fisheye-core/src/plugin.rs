use std::collections::HashMap;
use std::fmt;

use crate::frame::FrameBuffer;
use crate::time::Timestamp;

/// Metadata describing a filter, for hosts that list what they loaded.
#[derive(Debug, Clone)]
pub struct FilterManifest {
    /// Unique filter identifier (e.g. "fisheye_filter").
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Semantic version.
    pub version: String,
    /// Short description.
    pub description: String,
}

impl fmt::Display for FilterManifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{} ({})", self.name, self.version, self.id)
    }
}

/// Describes one named setting so a host can build its UI without
/// hardcoding ranges.
#[derive(Debug, Clone, Copy)]
pub struct SettingDescriptor {
    /// The key the host uses in the settings map.
    pub key: &'static str,
    /// Display label.
    pub label: &'static str,
    /// Minimum accepted value; lower inputs are clamped here.
    pub min: f64,
    /// Maximum accepted value; higher inputs are clamped here.
    pub max: f64,
    /// Suggested slider step.
    pub step: f64,
}

/// The host-facing render interface: the C-style callback table a video
/// host dispatches through, expressed as an explicit trait.
///
/// Lifecycle contract (one-shot): a filter instance is obtained from a
/// single fallible constructor (the `create` callback — construction
/// failure means the filter is disabled for the session, not degraded) and
/// owns its resources exclusively until dropped (the `destroy` callback).
/// The handle is never aliased across the host boundary.
///
/// Threading contract: `update_settings` is called from the host's control
/// thread whenever the user changes a value; `render_frame` is called from
/// the render thread exactly once per video frame. Implementations must
/// keep `render_frame` non-blocking beyond command enqueue and must always
/// return an output — errors on the render path are expressed as
/// pass-through, never surfaced to the host.
pub trait VideoFilter: Send {
    /// What `render_frame` hands back to the host.
    type Output;

    /// Ingest named floating-point settings. Out-of-range values are
    /// clamped, unknown keys ignored; this call never fails.
    fn update_settings(&self, settings: &HashMap<String, f64>);

    /// Process one frame. `frame` is the host's source frame, `timestamp`
    /// its monotonically increasing presentation time.
    fn render_frame(&mut self, frame: &FrameBuffer, timestamp: Timestamp) -> Self::Output;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_display() {
        let m = FilterManifest {
            id: "fisheye_filter".into(),
            name: "Fisheye Projection".into(),
            version: "0.1.0".into(),
            description: "Equirectangular to fisheye".into(),
        };
        assert_eq!(m.to_string(), "Fisheye Projection v0.1.0 (fisheye_filter)");
    }
}
