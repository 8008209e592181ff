//! Session core for PixelQuilt.
//!
//! The crate owns everything that sits between raw input events and the GPU:
//!
//! ```text
//!   keys / touches / drops
//!          │ InputEvent
//!          ▼
//!   GestureRouter ──▶ Action ──▶ Session ──▶ ParameterState
//!                                  │
//!                                  ├─▶ display renderer (every change, every frame)
//!                                  └─▶ ExportOrchestrator ──▶ export renderer (on demand)
//! ```
//!
//! Nothing in here talks to wgpu or an OS camera directly. Renderers sit
//! behind [`session::QuiltRenderer`] / [`session::ExportRenderer`] and cameras
//! behind [`input::CameraBackend`], so the whole control flow can be driven
//! from tests.

pub mod export;
pub mod frame;
pub mod input;
pub mod params;
pub mod router;
pub mod session;
pub mod touch;

pub use export::{ExportJob, ExportOrchestrator, ExportSettings, ExportState, SaveError};
pub use frame::Frame;
pub use input::{
    CameraAccessError, CameraBackend, CameraStream, FacingMode, InputSourceManager,
    StreamRequest, VisualInput, REQUESTED_CAMERA_WIDTH,
};
pub use params::{Parameter, ParameterState};
pub use router::{Action, GestureRouter, InputEvent, KeyInput};
pub use session::{
    ExportRenderer, QuiltRenderer, QuiltUniforms, RenderError, RenderLoop, Session,
};
pub use touch::{Axis, TouchGesture, TouchTracker};
