use crate::params::FilterParameters;

/// Smallest effective field of view, in radians. A zero FOV collapses every
/// ray onto the view axis; clamping here keeps the angle-to-direction step
/// free of NaN/Inf for any parameter set.
pub const MIN_FOV_RADIANS: f32 = 1e-3;

const PI: f32 = std::f32::consts::PI;
const TAU: f32 = std::f32::consts::TAU;

/// Where a destination pixel samples from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MapOutcome {
    /// Sample the equirectangular source at (u, v) in the unit square;
    /// the result is fully opaque.
    Inside { u: f32, v: f32 },
    /// The pixel lies outside the fisheye circle: unsampled, carrying the
    /// configured alpha.
    Outside { alpha: f32 },
}

/// The per-frame destination→source coordinate mapping, precomputed from one
/// parameter snapshot.
///
/// This is the scalar form of the compute kernel: the WGSL in
/// `fisheye-render` evaluates exactly this function per pixel. Keeping the
/// math here makes the projection testable as a deterministic function
/// without a GPU.
///
/// Model: equidistant fisheye — radial distance from the destination center
/// is linearly proportional to the angle from the viewing axis.
#[derive(Debug, Clone, Copy)]
pub struct FisheyeMapping {
    half_fov: f32,
    pan: f32,
    tilt: f32,
    yaw: f32,
    alpha: f32,
    aspect: f32,
    center: (f32, f32),
    width: u32,
    height: u32,
}

impl FisheyeMapping {
    /// Build the mapping for one output frame from a parameter snapshot.
    pub fn new(params: &FilterParameters, width: u32, height: u32) -> Self {
        let fov = (params.fov_degrees.to_radians()).max(MIN_FOV_RADIANS);
        let aspect = if height == 0 {
            1.0
        } else {
            width as f32 / height as f32
        };
        Self {
            half_fov: fov * 0.5,
            pan: params.pan_degrees.to_radians(),
            tilt: params.tilt_degrees.to_radians(),
            yaw: params.yaw_degrees.to_radians(),
            alpha: params.alpha_level,
            aspect,
            center: (0.5, 0.5),
            width,
            height,
        }
    }

    /// Map a destination pixel (x, y) to its source coordinate.
    ///
    /// The pixel center is normalized to (dx, dy) relative to the projection
    /// center, with dx scaled by the aspect ratio so the fisheye circle
    /// stays round on non-square frames.
    pub fn map_pixel(&self, x: u32, y: u32) -> MapOutcome {
        let px = (x as f32 + 0.5) / self.width as f32;
        let py = (y as f32 + 0.5) / self.height as f32;
        let dx = (px - self.center.0) * 2.0 * self.aspect;
        let dy = (py - self.center.1) * 2.0;
        self.map(dx, dy)
    }

    /// Map a destination point already normalized to [-1, 1]² (relative to
    /// the projection center, aspect applied) to its source coordinate.
    pub fn map(&self, dx: f32, dy: f32) -> MapOutcome {
        let r = (dx * dx + dy * dy).sqrt();
        if r > 1.0 {
            return MapOutcome::Outside { alpha: self.alpha };
        }

        // Equidistant model: radius is linear in the angle off the view axis.
        let theta = r * self.half_fov;
        let azimuth = dy.atan2(dx);

        // Unit direction on the destination sphere, polar axis along +z
        // (the viewing direction).
        let dir = [
            theta.sin() * azimuth.cos(),
            theta.sin() * azimuth.sin(),
            theta.cos(),
        ];

        let dir = self.rotate(dir);

        // Equirectangular lookup: longitude from atan2, latitude from asin.
        let u = 0.5 + dir[0].atan2(dir[2]) / TAU;
        let v = 0.5 - dir[1].clamp(-1.0, 1.0).asin() / PI;
        MapOutcome::Inside { u, v }
    }

    /// Apply the intrinsic rotations in their fixed order: pan about the
    /// vertical axis, then tilt about the horizontal axis, then yaw about
    /// the depth axis. The order is significant for visual parity and the
    /// kernel reproduces it exactly.
    fn rotate(&self, v: [f32; 3]) -> [f32; 3] {
        let [x, y, z] = v;

        // Pan: vertical (y) axis.
        let (sp, cp) = self.pan.sin_cos();
        let (x, z) = (x * cp + z * sp, -x * sp + z * cp);

        // Tilt: horizontal (x) axis.
        let (st, ct) = self.tilt.sin_cos();
        let (y, z) = (y * ct - z * st, y * st + z * ct);

        // Yaw: depth (z) axis.
        let (sy, cy) = self.yaw.sin_cos();
        let (x, y) = (x * cy - y * sy, x * sy + y * cy);

        [x, y, z]
    }
}
