use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Setting key for the field of view in degrees.
pub const SETTING_FOV: &str = "fov_degrees";
/// Setting key for rotation about the vertical axis, in degrees.
pub const SETTING_PAN: &str = "pan_degrees";
/// Setting key for rotation about the horizontal axis, in degrees.
pub const SETTING_TILT: &str = "tilt_degrees";
/// Setting key for rotation about the depth axis, in degrees.
pub const SETTING_YAW: &str = "yaw_degrees";
/// Setting key for the alpha applied outside the fisheye circle.
pub const SETTING_ALPHA: &str = "alpha_level";

/// The five user-facing filter parameters.
///
/// Every value is always within its documented range: out-of-range inputs
/// are clamped on write, never rejected. That clamping is policy, not an
/// error, and is not logged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterParameters {
    /// Field of view in degrees, within [0, 360].
    pub fov_degrees: f32,
    /// Rotation about the vertical axis in degrees, within [-180, 180].
    pub pan_degrees: f32,
    /// Rotation about the horizontal axis in degrees, within [-180, 180].
    pub tilt_degrees: f32,
    /// Rotation about the depth axis in degrees, within [-180, 180].
    pub yaw_degrees: f32,
    /// Alpha for the area outside the fisheye circle, within [0, 1].
    pub alpha_level: f32,
}

impl Default for FilterParameters {
    fn default() -> Self {
        Self {
            fov_degrees: 180.0,
            pan_degrees: 0.0,
            tilt_degrees: 0.0,
            yaw_degrees: 0.0,
            alpha_level: 0.0,
        }
    }
}

impl FilterParameters {
    /// Return a copy with every field clamped to its range.
    pub fn clamped(self) -> Self {
        Self {
            fov_degrees: self.fov_degrees.clamp(0.0, 360.0),
            pan_degrees: self.pan_degrees.clamp(-180.0, 180.0),
            tilt_degrees: self.tilt_degrees.clamp(-180.0, 180.0),
            yaw_degrees: self.yaw_degrees.clamp(-180.0, 180.0),
            alpha_level: self.alpha_level.clamp(0.0, 1.0),
        }
    }

    /// Overlay named settings onto this value. Unknown keys are ignored.
    pub fn with_named(mut self, settings: &HashMap<String, f64>) -> Self {
        for (key, value) in settings {
            let value = *value as f32;
            match key.as_str() {
                SETTING_FOV => self.fov_degrees = value,
                SETTING_PAN => self.pan_degrees = value,
                SETTING_TILT => self.tilt_degrees = value,
                SETTING_YAW => self.yaw_degrees = value,
                SETTING_ALPHA => self.alpha_level = value,
                _ => {}
            }
        }
        self
    }
}

/// Thread-safe holder of the current filter parameters.
///
/// The control thread writes through [`set`](ParameterStore::set) or
/// [`update_named`](ParameterStore::update_named) whenever the user moves a
/// slider; the render thread reads one
/// [`snapshot`](ParameterStore::snapshot) per frame. The internal mutex is
/// held only for the copy in or out, never across any computation, so the
/// render thread cannot stall on the control thread. Readers always see a
/// whole value from a single write, never a mix of two.
#[derive(Debug)]
pub struct ParameterStore {
    current: Mutex<FilterParameters>,
}

impl ParameterStore {
    /// Create a store holding the default parameters.
    pub fn new() -> Self {
        Self {
            current: Mutex::new(FilterParameters::default()),
        }
    }

    /// Clamp each field of `candidate` to its range, then atomically replace
    /// the stored value.
    pub fn set(&self, candidate: FilterParameters) {
        *self.current.lock().unwrap() = candidate.clamped();
    }

    /// Return a copy of the current parameters.
    pub fn snapshot(&self) -> FilterParameters {
        *self.current.lock().unwrap()
    }

    /// Overlay the provided named settings onto the current value and store
    /// the clamped result as one atomic replacement.
    pub fn update_named(&self, settings: &HashMap<String, f64>) {
        let next = self.snapshot().with_named(settings);
        self.set(next);
    }
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_defaults() {
        let p = FilterParameters::default();
        assert_eq!(p.fov_degrees, 180.0);
        assert_eq!(p.pan_degrees, 0.0);
        assert_eq!(p.tilt_degrees, 0.0);
        assert_eq!(p.yaw_degrees, 0.0);
        assert_eq!(p.alpha_level, 0.0);
    }

    #[test]
    fn test_set_clamps_out_of_range() {
        let store = ParameterStore::new();
        store.set(FilterParameters {
            fov_degrees: 500.0,
            pan_degrees: -700.0,
            tilt_degrees: 200.0,
            yaw_degrees: -200.0,
            alpha_level: 1.5,
        });
        let s = store.snapshot();
        assert_eq!(s.fov_degrees, 360.0);
        assert_eq!(s.pan_degrees, -180.0);
        assert_eq!(s.tilt_degrees, 180.0);
        assert_eq!(s.yaw_degrees, -180.0);
        assert_eq!(s.alpha_level, 1.0);
    }

    #[test]
    fn test_set_out_of_range_idempotent() {
        let out_of_range = FilterParameters {
            fov_degrees: 400.0,
            pan_degrees: 300.0,
            tilt_degrees: -300.0,
            yaw_degrees: 300.0,
            alpha_level: -0.5,
        };
        let store = ParameterStore::new();
        store.set(out_of_range);
        let first = store.snapshot();
        store.set(out_of_range);
        let second = store.snapshot();
        assert_eq!(first, second);
        // Re-storing the clamped snapshot is also stable.
        store.set(first);
        assert_eq!(store.snapshot(), first);
    }

    #[test]
    fn test_update_named_overlays_known_keys() {
        let store = ParameterStore::new();
        let mut settings = HashMap::new();
        settings.insert(SETTING_FOV.to_string(), 90.0);
        settings.insert(SETTING_PAN.to_string(), 45.0);
        store.update_named(&settings);
        let s = store.snapshot();
        assert_eq!(s.fov_degrees, 90.0);
        assert_eq!(s.pan_degrees, 45.0);
        // Untouched fields keep their previous values.
        assert_eq!(s.tilt_degrees, 0.0);
        assert_eq!(s.alpha_level, 0.0);
    }

    #[test]
    fn test_update_named_ignores_unknown_keys() {
        let store = ParameterStore::new();
        let before = store.snapshot();
        let mut settings = HashMap::new();
        settings.insert("exposure".to_string(), 2.0);
        store.update_named(&settings);
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_no_torn_reads_under_concurrency() {
        // Writers store coherent parameter sets where every field encodes
        // the same value; a reader observing a mix of two writes would see
        // unequal fields.
        let store = Arc::new(ParameterStore::new());
        let mut handles = Vec::new();

        for w in 0..4 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..1000 {
                    let v = ((w * 1000 + i) % 90) as f32;
                    store.set(FilterParameters {
                        fov_degrees: v,
                        pan_degrees: v,
                        tilt_degrees: v,
                        yaw_degrees: v,
                        alpha_level: v / 90.0,
                    });
                }
            }));
        }

        for _ in 0..4 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    let s = store.snapshot();
                    // Skip the initial default value (fov 180, rest 0).
                    if s == FilterParameters::default() {
                        continue;
                    }
                    assert_eq!(s.fov_degrees, s.pan_degrees);
                    assert_eq!(s.pan_degrees, s.tilt_degrees);
                    assert_eq!(s.tilt_degrees, s.yaw_degrees);
                    assert!((s.alpha_level - s.fov_degrees / 90.0).abs() < 1e-6);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }
    }
}
