use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use image::RgbaImage;
use thiserror::Error;
use tracing::{debug, info};

use crate::export::{ExportJob, ExportOrchestrator, ExportSettings, SaveError};
use crate::frame::Frame;
use crate::input::{FacingMode, InputSourceManager};
use crate::params::{Parameter, ParameterState};
use crate::router::{Action, GestureRouter, InputEvent};

/// Values the quilt shader reads each pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuiltUniforms {
    pub strips: f32,
    /// Shuffle depth truncated towards zero.
    pub shuffles: i32,
    /// Flip the source horizontally (front camera preview).
    pub mirror: bool,
}

impl QuiltUniforms {
    pub fn from_params(params: &ParameterState, mirror: bool) -> Self {
        Self {
            strips: params.strip_count() as f32,
            shuffles: params.shuffle_depth().trunc() as i32,
            mirror,
        }
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render target lost")]
    Lost,
    #[error("out of GPU memory")]
    OutOfMemory,
    #[error("frame skipped: {0}")]
    Skipped(String),
    #[error("render failed: {0}")]
    Failed(String),
}

/// A target that can run the quilt shader.
pub trait QuiltRenderer {
    fn set_uniforms(&mut self, uniforms: &QuiltUniforms);
    /// `None` binds a 1×1 placeholder.
    fn set_texture(&mut self, frame: Option<&Frame>);
    /// Runs one render pass at shader time `time` (seconds).
    fn step(&mut self, time: f32) -> Result<(), RenderError>;
}

/// Off-screen target used for stills.
pub trait ExportRenderer: QuiltRenderer {
    /// Reallocates the target at the new size. Previous contents are gone,
    /// so this must precede any render that is going to be read back.
    fn resize(&mut self, width: u32, height: u32);
    /// Reads back the pixels of the last `step`.
    fn capture(&mut self) -> Result<RgbaImage, RenderError>;
    /// Drops the target texture until the next `resize`.
    fn release(&mut self);
    fn is_attached(&self) -> bool;
}

/// Explicit play/pause state of the display loop.
///
/// Shader time only advances while playing.
#[derive(Debug, Clone)]
pub struct RenderLoop {
    playing: bool,
    elapsed: Duration,
    resumed_at: Instant,
}

impl RenderLoop {
    pub fn new(now: Instant) -> Self {
        Self {
            playing: true,
            elapsed: Duration::ZERO,
            resumed_at: now,
        }
    }

    pub fn play(&mut self, now: Instant) {
        if !self.playing {
            self.playing = true;
            self.resumed_at = now;
        }
    }

    pub fn pause(&mut self, now: Instant) {
        if self.playing {
            self.elapsed += now.saturating_duration_since(self.resumed_at);
            self.playing = false;
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn time(&self, now: Instant) -> f32 {
        let running = if self.playing {
            now.saturating_duration_since(self.resumed_at)
        } else {
            Duration::ZERO
        };
        (self.elapsed + running).as_secs_f32()
    }
}

/// Everything one window needs: parameters, inputs, both render targets
/// and the export state machine.
pub struct Session<D, E> {
    params: ParameterState,
    inputs: InputSourceManager,
    router: GestureRouter,
    display: D,
    export: E,
    orchestrator: ExportOrchestrator,
    render_loop: RenderLoop,
    uploaded: Option<u64>,
}

impl<D, E> Session<D, E>
where
    D: QuiltRenderer,
    E: ExportRenderer,
{
    /// Pushes identical parameters and the current input to both targets.
    pub fn new(
        inputs: InputSourceManager,
        display: D,
        export: E,
        params: ParameterState,
        settings: ExportSettings,
        now: Instant,
    ) -> Self {
        let mut session = Self {
            params,
            inputs,
            router: GestureRouter::default(),
            display,
            export,
            orchestrator: ExportOrchestrator::new(settings),
            render_loop: RenderLoop::new(now),
            uploaded: None,
        };

        let frame = session.inputs.current_frame();
        session
            .export
            .set_uniforms(&QuiltUniforms::from_params(&session.params, false));
        session.export.set_texture(frame.as_ref());
        session.display.set_texture(frame.as_ref());
        session.uploaded = frame.as_ref().map(Frame::sequence);
        session.sync_display_uniforms();
        session
    }

    pub fn with_router(mut self, router: GestureRouter) -> Self {
        self.router = router;
        self
    }

    pub fn handle(&mut self, event: InputEvent, now: Instant) {
        if let Some(action) = self.router.route(event, now) {
            self.apply(action, now);
        }
    }

    pub fn apply(&mut self, action: Action, now: Instant) {
        match action {
            Action::Adjust { parameter, delta } => self.adjust(parameter, delta),
            Action::Export => {
                self.request_export(now);
            }
            Action::ToggleFacing => self.toggle_facing(),
        }
    }

    fn adjust(&mut self, parameter: Parameter, delta: f32) {
        if self.params.adjust(parameter, delta) {
            debug!(
                strips = self.params.strip_count(),
                shuffles = self.params.shuffle_depth(),
                "{parameter} changed"
            );
            self.sync_display_uniforms();
        }
    }

    fn toggle_facing(&mut self) {
        match self.inputs.switch_camera() {
            Ok(true) => {
                self.upload_current_frame();
                self.sync_display_uniforms();
            }
            Ok(false) => debug!("facing toggle ignored for still image"),
            // Already logged by the input manager; the frozen stream stays up.
            Err(_) => {}
        }
    }

    /// Starts decoding a dropped file. Returns whether it looked like an image.
    pub fn drop_file(&mut self, path: &Path) -> bool {
        self.inputs.set_still_image(path)
    }

    /// Replaces the input with an already decoded image.
    pub fn show_still_image(&mut self, image: RgbaImage, now: Instant) {
        let frame = self.inputs.adopt_still_image(image);
        self.adopt_frame(&frame, now);
    }

    /// Drives everything asynchronous: finished image decodes and the export
    /// state machine. Returns the outcome of an export that just completed.
    pub fn poll(&mut self, now: Instant) -> Option<Result<PathBuf, SaveError>> {
        if let Some(frame) = self.inputs.poll_still_image() {
            self.adopt_frame(&frame, now);
        }
        self.orchestrator
            .poll(now, &mut self.export, &mut self.render_loop)
    }

    fn adopt_frame(&mut self, frame: &Frame, now: Instant) {
        self.display.set_texture(Some(frame));
        self.uploaded = Some(frame.sequence());
        self.sync_display_uniforms();
        // An export in flight resumes the loop itself when it finishes.
        if self.orchestrator.is_idle() {
            self.render_loop.play(now);
        }
    }

    /// Renders one display frame if the loop is playing.
    pub fn draw_frame(&mut self, now: Instant) -> Result<(), RenderError> {
        if !self.render_loop.is_playing() {
            return Ok(());
        }
        self.upload_current_frame();
        self.display.step(self.render_loop.time(now))
    }

    /// Kicks off an export of the current input. Returns whether one started.
    pub fn request_export(&mut self, now: Instant) -> bool {
        let frame = self.inputs.current_frame();
        let native = self
            .inputs
            .resolution()
            .or_else(|| frame.as_ref().map(Frame::dimensions));
        self.orchestrator.request(
            now,
            frame,
            native,
            &self.params,
            &mut self.export,
            &mut self.render_loop,
        )
    }

    /// When the event loop must wake up next even without input.
    pub fn next_deadline(&self, now: Instant) -> Option<Instant> {
        self.orchestrator.next_deadline(now)
    }

    fn upload_current_frame(&mut self) {
        let frame = self.inputs.current_frame();
        let sequence = frame.as_ref().map(Frame::sequence);
        if sequence != self.uploaded {
            self.display.set_texture(frame.as_ref());
            self.uploaded = sequence;
        }
    }

    fn sync_display_uniforms(&mut self) {
        let mirror = self.inputs.facing() == Some(FacingMode::User);
        self.display
            .set_uniforms(&QuiltUniforms::from_params(&self.params, mirror));
    }

    pub fn params(&self) -> &ParameterState {
        &self.params
    }

    pub fn inputs(&self) -> &InputSourceManager {
        &self.inputs
    }

    pub fn is_playing(&self) -> bool {
        self.render_loop.is_playing()
    }

    pub fn is_exporting(&self) -> bool {
        !self.orchestrator.is_idle()
    }

    /// Size of the export in flight, if any.
    pub fn export_job(&self) -> Option<ExportJob> {
        self.orchestrator.state().job()
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut D {
        &mut self.display
    }

    pub fn export_renderer(&self) -> &E {
        &self.export
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::input::tests::FakeBackend;
    use crate::input::CameraBackend;
    use crate::router::KeyInput;
    use crate::touch::Axis;
    use std::sync::atomic::Ordering;

    /// Records what the session pushes to a target.
    #[derive(Debug, Default)]
    pub(crate) struct FakeRenderer {
        pub uniforms: Option<QuiltUniforms>,
        pub uniform_pushes: usize,
        pub texture: Option<u64>,
        pub texture_uploads: usize,
        pub steps: Vec<f32>,
        pub size: Option<(u32, u32)>,
        pub attached: bool,
        pub fail_capture: bool,
    }

    impl QuiltRenderer for FakeRenderer {
        fn set_uniforms(&mut self, uniforms: &QuiltUniforms) {
            self.uniforms = Some(*uniforms);
            self.uniform_pushes += 1;
        }

        fn set_texture(&mut self, frame: Option<&Frame>) {
            self.texture = frame.map(Frame::sequence);
            self.texture_uploads += 1;
        }

        fn step(&mut self, time: f32) -> Result<(), RenderError> {
            self.steps.push(time);
            Ok(())
        }
    }

    impl ExportRenderer for FakeRenderer {
        fn resize(&mut self, width: u32, height: u32) {
            self.size = Some((width, height));
            self.attached = true;
        }

        fn capture(&mut self) -> Result<RgbaImage, RenderError> {
            if self.fail_capture {
                return Err(RenderError::Failed("readback refused".into()));
            }
            let (width, height) = self.size.unwrap_or((1, 1));
            Ok(RgbaImage::new(width, height))
        }

        fn release(&mut self) {
            self.attached = false;
        }

        fn is_attached(&self) -> bool {
            self.attached
        }
    }

    fn live_session(backend: &FakeBackend, settings: ExportSettings) -> Session<FakeRenderer, FakeRenderer> {
        let mut inputs = InputSourceManager::new(Box::new(backend.clone()) as Box<dyn CameraBackend>);
        inputs.acquire_camera(FacingMode::User).unwrap();
        Session::new(
            inputs,
            FakeRenderer::default(),
            FakeRenderer::default(),
            ParameterState::default(),
            settings,
            Instant::now(),
        )
    }

    fn finish_export(session: &mut Session<FakeRenderer, FakeRenderer>) -> Result<PathBuf, SaveError> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let now = Instant::now() + Duration::from_millis(50);
            if let Some(result) = session.poll(now) {
                return result;
            }
            assert!(Instant::now() < deadline, "export never finished");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn both_targets_start_with_the_same_parameters() {
        let backend = FakeBackend::default();
        let session = live_session(&backend, ExportSettings::default());
        let display = session.display().uniforms.unwrap();
        let export = session.export_renderer().uniforms.unwrap();
        assert_eq!(display.strips, 32.0);
        assert_eq!((display.strips, display.shuffles), (export.strips, export.shuffles));
        assert!(display.mirror);
        assert!(!export.mirror);
        assert_eq!(session.display().texture, session.export_renderer().texture);
        assert!(session.is_playing());
    }

    #[test]
    fn parameter_changes_reach_the_display_immediately() {
        let backend = FakeBackend::default();
        let mut session = live_session(&backend, ExportSettings::default());
        let pushes = session.display().uniform_pushes;
        let now = Instant::now();

        session.handle(InputEvent::Key(KeyInput::ArrowUp), now);
        assert_eq!(session.display().uniforms.unwrap().strips, 33.0);
        session.handle(InputEvent::Key(KeyInput::ArrowRight), now);
        assert_eq!(session.display().uniforms.unwrap().shuffles, 2);
        assert_eq!(session.display().uniform_pushes, pushes + 2);

        // Export target is only synced when an export runs.
        assert_eq!(session.export_renderer().uniforms.unwrap().strips, 32.0);
    }

    #[test]
    fn clamped_adjustments_do_not_push() {
        let backend = FakeBackend::default();
        let mut session = live_session(&backend, ExportSettings::default());
        let pushes = session.display().uniform_pushes;
        session.handle(InputEvent::Key(KeyInput::ArrowLeft), Instant::now());
        assert_eq!(session.params().shuffle_depth(), 1.0);
        assert_eq!(session.display().uniform_pushes, pushes);
    }

    #[test]
    fn fractional_shuffle_depth_is_truncated_for_the_shader() {
        let backend = FakeBackend::default();
        let mut session = live_session(&backend, ExportSettings::default());
        let now = Instant::now();
        for _ in 0..7 {
            session.handle(InputEvent::Swipe { axis: Axis::X, delta: 4.0 }, now);
        }
        assert!((session.params().shuffle_depth() - 1.875).abs() < 1e-6);
        assert_eq!(session.display().uniforms.unwrap().shuffles, 1);
    }

    #[test]
    fn double_tap_switches_camera_and_drops_mirroring() {
        let backend = FakeBackend::default();
        let mut session = live_session(&backend, ExportSettings::default());
        let start = Instant::now();
        session.handle(InputEvent::TouchEnd, start);
        session.handle(InputEvent::TouchEnd, start + Duration::from_millis(120));

        assert_eq!(session.inputs().facing(), Some(FacingMode::Environment));
        assert!(!session.display().uniforms.unwrap().mirror);
        let streams = backend.streams();
        assert!(!streams[0].1.load(Ordering::SeqCst));
    }

    #[test]
    fn still_image_ignores_facing_toggle() {
        let backend = FakeBackend::default();
        let mut session = live_session(&backend, ExportSettings::default());
        let now = Instant::now();
        session.show_still_image(RgbaImage::new(10, 10), now);

        session.apply(Action::ToggleFacing, now);
        assert!(session.inputs().is_still_image());
        assert_eq!(backend.streams().len(), 1);
        assert!(!session.display().uniforms.unwrap().mirror);
    }

    #[test]
    fn draw_uploads_only_new_frames() {
        let backend = FakeBackend::default();
        let mut session = live_session(&backend, ExportSettings::default());
        let uploads = session.display().texture_uploads;
        let now = Instant::now();

        session.draw_frame(now).unwrap();
        session.draw_frame(now).unwrap();
        assert_eq!(session.display().texture_uploads, uploads);
        assert_eq!(session.display().steps.len(), 2);

        session.show_still_image(RgbaImage::new(5, 5), now);
        assert_eq!(session.display().texture_uploads, uploads + 1);
    }

    #[test]
    fn export_pauses_the_display_and_resumes_after_saving() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ExportSettings {
            output_dir: dir.path().to_path_buf(),
            ..ExportSettings::default()
        };
        let backend = FakeBackend::default();
        let mut session = live_session(&backend, settings);
        let now = Instant::now();

        session.handle(InputEvent::Key(KeyInput::Character('s')), now);
        assert!(!session.is_playing());
        assert!(session.is_exporting());
        assert_eq!(session.export_renderer().size, Some((4096, 2304)));
        assert_eq!(
            session.export_job().map(|job| (job.width, job.height)),
            Some((4096, 2304))
        );

        let steps = session.display().steps.len();
        session.draw_frame(now).unwrap();
        assert_eq!(session.display().steps.len(), steps);

        let path = finish_export(&mut session).unwrap();
        assert!(path.exists());
        assert!(session.is_playing());
        assert!(session.export_job().is_none());
        assert!(!session.export_renderer().attached);
        assert_eq!(session.export_renderer().steps, vec![0.0]);
    }

    #[test]
    fn failed_export_still_resumes() {
        let backend = FakeBackend::default();
        let mut session = live_session(&backend, ExportSettings::default());
        session.export.fail_capture = true;

        assert!(session.request_export(Instant::now()));
        let err = finish_export(&mut session).unwrap_err();
        assert!(matches!(err, SaveError::Render(_)));
        assert!(session.is_playing());
        assert!(!session.export_renderer().attached);
    }

    #[test]
    fn export_without_input_is_ignored() {
        let inputs = InputSourceManager::new(Box::new(FakeBackend::default()));
        let mut session = Session::new(
            inputs,
            FakeRenderer::default(),
            FakeRenderer::default(),
            ParameterState::default(),
            ExportSettings::default(),
            Instant::now(),
        );
        assert!(!session.request_export(Instant::now()));
        assert!(session.is_playing());
        assert_eq!(session.display().texture, None);
    }

    #[test]
    fn render_loop_time_freezes_while_paused() {
        let start = Instant::now();
        let mut render_loop = RenderLoop::new(start);
        render_loop.pause(start + Duration::from_secs(2));
        assert!((render_loop.time(start + Duration::from_secs(10)) - 2.0).abs() < 1e-3);
        render_loop.play(start + Duration::from_secs(10));
        assert!((render_loop.time(start + Duration::from_secs(11)) - 3.0).abs() < 1e-3);
    }
}
