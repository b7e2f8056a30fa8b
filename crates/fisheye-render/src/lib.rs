//! # fisheye-render
//!
//! The GPU side of the fisheye filter: device and pipeline lifecycle,
//! per-frame compute dispatch of the equirectangular→fisheye kernel, and
//! the concrete filter type a video host drives.
//!
//! The render path is built around two guarantees: a frame is always
//! returned (transformed or pass-through) and the calling thread never
//! blocks beyond command enqueue plus a bounded wait for a uniform slot.

pub mod filter;
pub mod gpu;
pub mod transformer;

pub use filter::FisheyeFilter;
pub use gpu::{GpuConfig, GpuContext, PipelineStatus, KERNEL_ENTRY_POINT};
pub use transformer::{FilterOutput, FrameTransformer, FrameUniforms, OutputFrame};
