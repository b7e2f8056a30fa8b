//! # fisheye-core
//!
//! Core types and primitives for the equirectangular-to-fisheye video filter.
//! This crate contains everything that is independent of the GPU backend:
//! frames, timestamps, filter parameters and their thread-safe store, the
//! scalar coordinate mapper, error types, and the host-boundary interface.

pub mod error;
pub mod frame;
pub mod params;
pub mod plugin;
pub mod projection;
pub mod time;

pub use error::{FisheyeError, FisheyeResult};
pub use frame::{FrameBuffer, PixelFormat};
pub use params::{FilterParameters, ParameterStore};
pub use plugin::{FilterManifest, SettingDescriptor, VideoFilter};
pub use projection::{FisheyeMapping, MapOutcome};
pub use time::Timestamp;
