//! wgpu side of the quilt renderer.
//!
//! - `context` owns the instance/adapter/device and the compiled program.
//! - `pipeline` builds the quilt render pipeline once per target format.
//! - `uniforms` mirrors the shader's std140 parameter block.
//! - `texture` uploads input frames (placeholder when there is none).
//! - `pass` is the per-target uniforms + texture + draw.
//! - `display` presents to a window surface; `export` renders off-screen and
//!   reads the pixels back.

mod context;
mod display;
mod export;
mod pass;
mod pipeline;
mod texture;
mod uniforms;

pub use context::GpuContext;
pub use display::DisplayTarget;
pub use export::ExportTarget;
