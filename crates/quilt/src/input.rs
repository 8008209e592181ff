use std::fmt;
use std::path::{Path, PathBuf};
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use image::RgbaImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::frame::Frame;

/// Width cap asked of every camera; the device picks the closest mode it has.
pub const REQUESTED_CAMERA_WIDTH: u32 = 4096;

/// Which physical camera a live stream comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FacingMode {
    /// Front camera, facing the user.
    #[default]
    User,
    /// Back camera, facing away from the user.
    Environment,
}

impl FacingMode {
    pub fn toggled(self) -> Self {
        match self {
            FacingMode::User => FacingMode::Environment,
            FacingMode::Environment => FacingMode::User,
        }
    }
}

impl fmt::Display for FacingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FacingMode::User => f.write_str("user"),
            FacingMode::Environment => f.write_str("environment"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CameraAccessError {
    #[error("permission denied opening camera {device}")]
    PermissionDenied { device: String },
    #[error("no {facing}-facing camera available")]
    NoDevice { facing: FacingMode },
    #[error("camera backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
#[error("failed to decode image {path}: {source}")]
pub struct DecodeError {
    pub path: PathBuf,
    #[source]
    pub source: image::ImageError,
}

/// Parameters for opening a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRequest {
    pub facing: FacingMode,
    pub width: u32,
}

impl StreamRequest {
    pub fn new(facing: FacingMode) -> Self {
        Self {
            facing,
            width: REQUESTED_CAMERA_WIDTH,
        }
    }
}

/// A running (or stopped) camera stream.
///
/// `latest_frame` keeps returning the last delivered frame after `stop`, so a
/// stopped stream still shows its final image.
pub trait CameraStream: Send {
    /// Negotiated width and height.
    fn resolution(&self) -> (u32, u32);
    fn latest_frame(&self) -> Option<Frame>;
    /// Stops every hardware track. Must be idempotent.
    fn stop(&mut self);
    fn is_active(&self) -> bool;
}

/// Opens camera streams. Implementations block until the stream's
/// resolution is known.
pub trait CameraBackend {
    fn open(&mut self, request: StreamRequest) -> Result<Box<dyn CameraStream>, CameraAccessError>;
}

/// The active visual source.
pub enum VisualInput {
    LiveStream {
        stream: Box<dyn CameraStream>,
        facing: FacingMode,
    },
    StillImage(Frame),
}

impl VisualInput {
    pub fn resolution(&self) -> (u32, u32) {
        match self {
            VisualInput::LiveStream { stream, .. } => stream.resolution(),
            VisualInput::StillImage(frame) => frame.dimensions(),
        }
    }

    pub fn current_frame(&self) -> Option<Frame> {
        match self {
            VisualInput::LiveStream { stream, .. } => stream.latest_frame(),
            VisualInput::StillImage(frame) => Some(frame.clone()),
        }
    }
}

impl fmt::Debug for VisualInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VisualInput::LiveStream { stream, facing } => f
                .debug_struct("LiveStream")
                .field("facing", facing)
                .field("resolution", &stream.resolution())
                .field("active", &stream.is_active())
                .finish(),
            VisualInput::StillImage(frame) => f
                .debug_tuple("StillImage")
                .field(&frame.dimensions())
                .finish(),
        }
    }
}

/// MIME type implied by the file extension, if it names a known image format.
pub fn declared_mime_type(path: &Path) -> Option<&'static str> {
    image::ImageFormat::from_path(path)
        .ok()
        .map(|format| format.to_mime_type())
}

/// Whether this build has a decoder for the format the extension names.
pub fn has_decoder(path: &Path) -> bool {
    image::ImageFormat::from_path(path).is_ok_and(|format| format.reading_enabled())
}

type DecodeResult = Result<RgbaImage, DecodeError>;

/// Decodes dropped files off the event-loop thread.
struct StillImageLoader {
    tx: Sender<DecodeResult>,
    rx: Receiver<DecodeResult>,
}

impl StillImageLoader {
    fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    fn request(&self, path: PathBuf) {
        let tx = self.tx.clone();
        let spawned = thread::Builder::new()
            .name("pixelquilt-decode".into())
            .spawn(move || {
                let result = image::open(&path)
                    .map(|decoded| decoded.to_rgba8())
                    .map_err(|source| DecodeError { path, source });
                let _ = tx.send(result);
            });
        if let Err(err) = spawned {
            warn!(error = %err, "failed to spawn image decode worker");
        }
    }

    fn try_recv(&self) -> Option<DecodeResult> {
        self.rx.try_recv().ok()
    }
}

/// Owns the active [`VisualInput`] and the camera backend.
pub struct InputSourceManager {
    backend: Box<dyn CameraBackend>,
    input: Option<VisualInput>,
    loader: StillImageLoader,
}

impl InputSourceManager {
    pub fn new(backend: Box<dyn CameraBackend>) -> Self {
        Self {
            backend,
            input: None,
            loader: StillImageLoader::new(),
        }
    }

    /// Opens the camera for `facing` and makes it the active input.
    ///
    /// On failure the error is logged and returned; the current input is
    /// left as it was.
    pub fn acquire_camera(&mut self, facing: FacingMode) -> Result<(u32, u32), CameraAccessError> {
        let stream = self.open_stream(facing)?;
        let resolution = stream.resolution();
        self.release_camera();
        self.input = Some(VisualInput::LiveStream { stream, facing });
        Ok(resolution)
    }

    /// Stops every track of the live stream, if any. The stopped stream's
    /// last frame stays visible until another input replaces it.
    pub fn release_camera(&mut self) {
        if let Some(VisualInput::LiveStream { stream, facing }) = self.input.as_mut() {
            if stream.is_active() {
                info!(%facing, "releasing camera");
            }
            stream.stop();
        }
    }

    /// Queues `path` for decoding if its declared type is an image.
    ///
    /// Returns whether a decode was started. Non-image files are ignored.
    pub fn set_still_image(&mut self, path: &Path) -> bool {
        match declared_mime_type(path) {
            Some(mime) if mime.starts_with("image/") && !has_decoder(path) => {
                debug!(path = %path.display(), mime, "no decoder for dropped image type");
                false
            }
            Some(mime) if mime.starts_with("image/") => {
                debug!(path = %path.display(), mime, "decoding dropped image");
                self.loader.request(path.to_path_buf());
                true
            }
            _ => {
                debug!(path = %path.display(), "ignoring dropped non-image file");
                false
            }
        }
    }

    /// Adopts any images the decode worker has finished since the last call.
    ///
    /// Returns the newest adopted frame. Decode failures are logged and leave
    /// the current input untouched.
    pub fn poll_still_image(&mut self) -> Option<Frame> {
        let mut adopted = None;
        while let Some(result) = self.loader.try_recv() {
            match result {
                Ok(image) => adopted = Some(self.adopt_still_image(image)),
                Err(err) => warn!(error = %err, "dropped image could not be decoded"),
            }
        }
        adopted
    }

    /// Releases the camera and makes `image` the active input.
    pub fn adopt_still_image(&mut self, image: RgbaImage) -> Frame {
        self.release_camera();
        let frame = Frame::new(image);
        info!(
            width = frame.width(),
            height = frame.height(),
            "switched to still image"
        );
        self.input = Some(VisualInput::StillImage(frame.clone()));
        frame
    }

    /// Swaps to the opposite-facing camera.
    ///
    /// Returns `Ok(false)` without touching anything while a still image is
    /// active. The current stream is stopped before the other one is opened;
    /// if that fails the stopped stream stays as the input.
    pub fn switch_camera(&mut self) -> Result<bool, CameraAccessError> {
        let next = match &self.input {
            Some(VisualInput::StillImage(_)) => return Ok(false),
            Some(VisualInput::LiveStream { facing, .. }) => facing.toggled(),
            None => FacingMode::default().toggled(),
        };

        self.release_camera();
        let stream = self.open_stream(next)?;
        self.input = Some(VisualInput::LiveStream {
            stream,
            facing: next,
        });
        Ok(true)
    }

    pub fn current_frame(&self) -> Option<Frame> {
        self.input.as_ref().and_then(VisualInput::current_frame)
    }

    pub fn resolution(&self) -> Option<(u32, u32)> {
        self.input.as_ref().map(VisualInput::resolution)
    }

    /// Facing mode of the live stream, `None` for still images or no input.
    pub fn facing(&self) -> Option<FacingMode> {
        match &self.input {
            Some(VisualInput::LiveStream { facing, .. }) => Some(*facing),
            _ => None,
        }
    }

    pub fn is_still_image(&self) -> bool {
        matches!(self.input, Some(VisualInput::StillImage(_)))
    }

    pub fn input(&self) -> Option<&VisualInput> {
        self.input.as_ref()
    }

    fn open_stream(&mut self, facing: FacingMode) -> Result<Box<dyn CameraStream>, CameraAccessError> {
        match self.backend.open(StreamRequest::new(facing)) {
            Ok(stream) => {
                let (width, height) = stream.resolution();
                info!(%facing, width, height, "camera acquired");
                Ok(stream)
            }
            Err(err) => {
                error!(%facing, error = %err, "camera acquisition failed");
                Err(err)
            }
        }
    }
}

impl Drop for InputSourceManager {
    fn drop(&mut self) {
        self.release_camera();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    pub(crate) struct FakeStream {
        pub active: Arc<AtomicBool>,
        pub resolution: (u32, u32),
        pub frame: Frame,
    }

    impl CameraStream for FakeStream {
        fn resolution(&self) -> (u32, u32) {
            self.resolution
        }

        fn latest_frame(&self) -> Option<Frame> {
            Some(self.frame.clone())
        }

        fn stop(&mut self) {
            self.active.store(false, Ordering::SeqCst);
        }

        fn is_active(&self) -> bool {
            self.active.load(Ordering::SeqCst)
        }
    }

    /// Records every stream it hands out so tests can check they were stopped.
    #[derive(Clone, Default)]
    pub(crate) struct FakeBackend {
        pub opened: Arc<Mutex<Vec<(FacingMode, Arc<AtomicBool>)>>>,
        pub fail_for: Arc<Mutex<Option<FacingMode>>>,
    }

    impl FakeBackend {
        pub fn streams(&self) -> Vec<(FacingMode, Arc<AtomicBool>)> {
            self.opened.lock().unwrap().clone()
        }

        pub fn fail_for(&self, facing: Option<FacingMode>) {
            *self.fail_for.lock().unwrap() = facing;
        }
    }

    impl CameraBackend for FakeBackend {
        fn open(&mut self, request: StreamRequest) -> Result<Box<dyn CameraStream>, CameraAccessError> {
            assert_eq!(request.width, REQUESTED_CAMERA_WIDTH);
            if *self.fail_for.lock().unwrap() == Some(request.facing) {
                return Err(CameraAccessError::NoDevice {
                    facing: request.facing,
                });
            }
            let active = Arc::new(AtomicBool::new(true));
            self.opened
                .lock()
                .unwrap()
                .push((request.facing, Arc::clone(&active)));
            Ok(Box::new(FakeStream {
                active,
                resolution: (1920, 1080),
                frame: Frame::new(RgbaImage::new(4, 4)),
            }))
        }
    }

    fn wait_for_still(manager: &mut InputSourceManager) -> Option<Frame> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Some(frame) = manager.poll_still_image() {
                return Some(frame);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        None
    }

    #[test]
    fn acquire_reports_negotiated_resolution() {
        let backend = FakeBackend::default();
        let mut manager = InputSourceManager::new(Box::new(backend.clone()));
        assert_eq!(manager.acquire_camera(FacingMode::User).unwrap(), (1920, 1080));
        assert_eq!(manager.facing(), Some(FacingMode::User));
        assert!(manager.current_frame().is_some());
    }

    #[test]
    fn acquire_failure_is_returned_and_leaves_no_input() {
        let backend = FakeBackend::default();
        backend.fail_for(Some(FacingMode::User));
        let mut manager = InputSourceManager::new(Box::new(backend));
        let err = manager.acquire_camera(FacingMode::User).unwrap_err();
        assert!(matches!(err, CameraAccessError::NoDevice { .. }));
        assert!(manager.input().is_none());
        assert!(manager.current_frame().is_none());
    }

    #[test]
    fn release_is_idempotent() {
        let backend = FakeBackend::default();
        let mut manager = InputSourceManager::new(Box::new(backend.clone()));
        manager.acquire_camera(FacingMode::User).unwrap();
        manager.release_camera();
        manager.release_camera();
        assert!(!backend.streams()[0].1.load(Ordering::SeqCst));
    }

    #[test]
    fn non_image_drops_are_ignored() {
        let mut manager = InputSourceManager::new(Box::new(FakeBackend::default()));
        assert!(!manager.set_still_image(Path::new("notes.txt")));
        assert!(!manager.set_still_image(Path::new("no-extension")));
        assert_eq!(declared_mime_type(Path::new("photo.JPG")), Some("image/jpeg"));
    }

    #[test]
    fn images_without_a_decoder_are_ignored() {
        let mut manager = InputSourceManager::new(Box::new(FakeBackend::default()));
        assert_eq!(declared_mime_type(Path::new("scan.tiff")), Some("image/tiff"));
        assert!(!has_decoder(Path::new("scan.tiff")));
        assert!(!manager.set_still_image(Path::new("scan.tiff")));
        assert!(!manager.set_still_image(Path::new("photo.webp")));
        assert!(has_decoder(Path::new("photo.png")));
        assert!(has_decoder(Path::new("photo.gif")));
    }

    #[test]
    fn dropping_an_image_stops_the_live_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drop.png");
        RgbaImage::from_pixel(8, 6, image::Rgba([10, 20, 30, 255]))
            .save(&path)
            .unwrap();

        let backend = FakeBackend::default();
        let mut manager = InputSourceManager::new(Box::new(backend.clone()));
        manager.acquire_camera(FacingMode::User).unwrap();

        assert!(manager.set_still_image(&path));
        let frame = wait_for_still(&mut manager).expect("decoded frame");
        assert_eq!(frame.dimensions(), (8, 6));
        assert!(manager.is_still_image());
        assert_eq!(manager.resolution(), Some((8, 6)));
        assert!(backend
            .streams()
            .iter()
            .all(|(_, active)| !active.load(Ordering::SeqCst)));
    }

    #[test]
    fn corrupt_image_keeps_current_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"definitely not a png").unwrap();

        let backend = FakeBackend::default();
        let mut manager = InputSourceManager::new(Box::new(backend.clone()));
        manager.acquire_camera(FacingMode::User).unwrap();
        assert!(manager.set_still_image(&path));

        let deadline = Instant::now() + Duration::from_millis(500);
        while Instant::now() < deadline {
            assert!(manager.poll_still_image().is_none());
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(manager.facing(), Some(FacingMode::User));
        assert!(backend.streams()[0].1.load(Ordering::SeqCst));
    }

    #[test]
    fn switch_toggles_facing_and_stops_previous_stream() {
        let backend = FakeBackend::default();
        let mut manager = InputSourceManager::new(Box::new(backend.clone()));
        manager.acquire_camera(FacingMode::User).unwrap();

        assert!(manager.switch_camera().unwrap());
        assert_eq!(manager.facing(), Some(FacingMode::Environment));
        let streams = backend.streams();
        assert_eq!(streams.len(), 2);
        assert!(!streams[0].1.load(Ordering::SeqCst));
        assert!(streams[1].1.load(Ordering::SeqCst));
    }

    #[test]
    fn failed_switch_keeps_stopped_stream() {
        let backend = FakeBackend::default();
        let mut manager = InputSourceManager::new(Box::new(backend.clone()));
        manager.acquire_camera(FacingMode::User).unwrap();
        backend.fail_for(Some(FacingMode::Environment));

        assert!(manager.switch_camera().is_err());
        assert_eq!(manager.facing(), Some(FacingMode::User));
        assert!(manager.current_frame().is_some());
        assert!(!backend.streams()[0].1.load(Ordering::SeqCst));
    }

    #[test]
    fn switch_is_a_no_op_for_still_images() {
        let backend = FakeBackend::default();
        let mut manager = InputSourceManager::new(Box::new(backend.clone()));
        manager.adopt_still_image(RgbaImage::new(3, 3));
        assert!(!manager.switch_camera().unwrap());
        assert!(manager.is_still_image());
        assert!(backend.streams().is_empty());
    }

    #[test]
    fn dropping_the_manager_releases_the_camera() {
        let backend = FakeBackend::default();
        {
            let mut manager = InputSourceManager::new(Box::new(backend.clone()));
            manager.acquire_camera(FacingMode::Environment).unwrap();
        }
        assert!(!backend.streams()[0].1.load(Ordering::SeqCst));
    }
}
