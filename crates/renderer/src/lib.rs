//! GPU renderer for PixelQuilt.
//!
//! One [`GpuContext`] compiles the quilt shader; a [`DisplayTarget`] draws it
//! into a window surface and an [`ExportTarget`] renders stills off-screen.
//! Both implement the `quilt` crate's renderer traits so the session core can
//! drive them without knowing about wgpu.

mod compile;
mod gpu;
mod shutter;
mod types;

pub use gpu::{DisplayTarget, ExportTarget, GpuContext};
pub use shutter::ShutterButton;
pub use types::{AdapterProfile, GpuPowerPreference};
