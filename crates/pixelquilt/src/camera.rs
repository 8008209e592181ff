//! Camera backends for the interactive window.
//!
//! On Linux streams come from V4L2 devices, one capture thread per open
//! stream. Facing modes map to configured device nodes since V4L2 has no
//! notion of which way a camera points.

use std::path::{Path, PathBuf};

use image::RgbaImage;
use quilt::{CameraAccessError, CameraBackend, CameraStream, FacingMode, StreamRequest};

/// Device nodes for each facing mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDevices {
    pub front: PathBuf,
    pub back: PathBuf,
    /// Requested capture width; the driver picks the closest it supports.
    pub width: u32,
}

impl CameraDevices {
    pub fn path_for(&self, facing: FacingMode) -> &Path {
        match facing {
            FacingMode::User => &self.front,
            FacingMode::Environment => &self.back,
        }
    }
}

/// Backend for the given devices; `None` means cameras are switched off.
pub fn backend(devices: Option<CameraDevices>) -> Box<dyn CameraBackend> {
    match devices {
        Some(devices) => platform_backend(devices),
        None => Box::new(DisabledBackend),
    }
}

#[cfg(target_os = "linux")]
fn platform_backend(devices: CameraDevices) -> Box<dyn CameraBackend> {
    Box::new(v4l2::V4l2Backend::new(devices))
}

#[cfg(not(target_os = "linux"))]
fn platform_backend(_devices: CameraDevices) -> Box<dyn CameraBackend> {
    Box::new(UnsupportedBackend)
}

struct DisabledBackend;

impl CameraBackend for DisabledBackend {
    fn open(&mut self, request: StreamRequest) -> Result<Box<dyn CameraStream>, CameraAccessError> {
        Err(CameraAccessError::NoDevice {
            facing: request.facing,
        })
    }
}

#[cfg(not(target_os = "linux"))]
struct UnsupportedBackend;

#[cfg(not(target_os = "linux"))]
impl CameraBackend for UnsupportedBackend {
    fn open(&mut self, _request: StreamRequest) -> Result<Box<dyn CameraStream>, CameraAccessError> {
        Err(CameraAccessError::Backend(
            "camera capture is only supported on Linux".into(),
        ))
    }
}

/// Pixel layouts the capture thread knows how to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Mjpeg,
    Yuyv,
}

impl PixelLayout {
    pub fn from_fourcc(code: [u8; 4]) -> Option<Self> {
        match &code {
            b"MJPG" => Some(Self::Mjpeg),
            b"YUYV" => Some(Self::Yuyv),
            _ => None,
        }
    }

    pub fn fourcc(self) -> [u8; 4] {
        match self {
            Self::Mjpeg => *b"MJPG",
            Self::Yuyv => *b"YUYV",
        }
    }

    /// `stride` is the byte distance between rows for uncompressed layouts.
    pub fn decode(self, data: &[u8], width: u32, height: u32, stride: u32) -> Option<RgbaImage> {
        match self {
            Self::Mjpeg => image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
                .ok()
                .map(|decoded| decoded.to_rgba8()),
            Self::Yuyv => RgbaImage::from_raw(
                width,
                height,
                yuyv_to_rgba(data, width, height, stride),
            ),
        }
    }
}

/// YUYV (YUV 4:2:2, `Y0 U Y1 V`) to RGBA using BT.601.
///
/// Rows start every `stride` bytes; a stride shorter than the packed row
/// (including zero) means tightly packed rows. Short input leaves the
/// remaining pixels black.
pub fn yuyv_to_rgba(data: &[u8], width: u32, height: u32, stride: u32) -> Vec<u8> {
    let (width, height) = (width as usize, height as usize);
    if width == 0 || height == 0 {
        return Vec::new();
    }
    let row_bytes = width * 2;
    let stride = (stride as usize).max(row_bytes);
    let mut rgba = vec![0; width * height * 4];

    for (row, out) in rgba.chunks_exact_mut(width * 4).enumerate() {
        let src = data.get(row * stride..).unwrap_or_default();
        let src = &src[..src.len().min(row_bytes)];
        for (pair, chunk) in src.chunks_exact(4).enumerate() {
            let u = chunk[1] as f32 - 128.0;
            let v = chunk[3] as f32 - 128.0;
            for (offset, y) in [chunk[0] as f32, chunk[2] as f32].into_iter().enumerate() {
                let px = (pair * 2 + offset) * 4;
                out[px] = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
                out[px + 1] = (y - 0.344_136 * u - 0.714_136 * v).clamp(0.0, 255.0) as u8;
                out[px + 2] = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
            }
        }
    }

    for alpha in rgba.iter_mut().skip(3).step_by(4) {
        *alpha = 255;
    }
    rgba
}

/// Height to ask for alongside `width`; drivers snap to a supported mode.
pub fn requested_height(width: u32) -> u32 {
    (width * 9 / 16).max(1)
}

#[cfg(target_os = "linux")]
mod v4l2 {
    use std::io;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread::{self, JoinHandle};

    use crossbeam_channel::{bounded, Sender};
    use quilt::{CameraAccessError, CameraBackend, CameraStream, FacingMode, Frame, StreamRequest};
    use tracing::{debug, error, info, warn};
    use v4l::buffer::Type;
    use v4l::io::mmap::Stream;
    use v4l::io::traits::CaptureStream;
    use v4l::prelude::*;
    use v4l::video::Capture;
    use v4l::{Format, FourCC};

    use super::{requested_height, CameraDevices, PixelLayout};

    const BUFFER_COUNT: u32 = 4;
    const MAX_CONSECUTIVE_ERRORS: u32 = 30;

    pub struct V4l2Backend {
        devices: CameraDevices,
    }

    impl V4l2Backend {
        pub fn new(devices: CameraDevices) -> Self {
            Self { devices }
        }
    }

    impl CameraBackend for V4l2Backend {
        fn open(&mut self, request: StreamRequest) -> Result<Box<dyn CameraStream>, CameraAccessError> {
            let path = self.devices.path_for(request.facing).to_path_buf();
            let width = self.devices.width.min(request.width);
            let stop = Arc::new(AtomicBool::new(false));
            let latest = Arc::new(Mutex::new(None));
            let (ready_tx, ready_rx) = bounded(1);

            let worker = {
                let stop = Arc::clone(&stop);
                let latest = Arc::clone(&latest);
                let facing = request.facing;
                thread::Builder::new()
                    .name("pixelquilt-camera".into())
                    .spawn(move || capture_loop(path, facing, width, stop, latest, ready_tx))
                    .map_err(|err| {
                        CameraAccessError::Backend(format!("failed to spawn capture thread: {err}"))
                    })?
            };

            let resolution = match ready_rx.recv() {
                Ok(Ok(resolution)) => resolution,
                Ok(Err(err)) => {
                    let _ = worker.join();
                    return Err(err);
                }
                Err(_) => {
                    let _ = worker.join();
                    return Err(CameraAccessError::Backend(
                        "capture thread exited before reporting".into(),
                    ));
                }
            };

            Ok(Box::new(V4l2Stream {
                resolution,
                latest,
                stop,
                worker: Some(worker),
            }))
        }
    }

    struct V4l2Stream {
        resolution: (u32, u32),
        latest: Arc<Mutex<Option<Frame>>>,
        stop: Arc<AtomicBool>,
        worker: Option<JoinHandle<()>>,
    }

    impl CameraStream for V4l2Stream {
        fn resolution(&self) -> (u32, u32) {
            self.resolution
        }

        fn latest_frame(&self) -> Option<Frame> {
            self.latest.lock().ok().and_then(|guard| guard.clone())
        }

        fn stop(&mut self) {
            self.stop.store(true, Ordering::SeqCst);
            if let Some(handle) = self.worker.take() {
                if handle.join().is_err() {
                    warn!("camera capture thread panicked");
                }
            }
        }

        fn is_active(&self) -> bool {
            self.worker
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
        }
    }

    impl Drop for V4l2Stream {
        fn drop(&mut self) {
            self.stop();
        }
    }

    fn access_error(err: io::Error, path: &Path, facing: FacingMode) -> CameraAccessError {
        match err.kind() {
            io::ErrorKind::NotFound => CameraAccessError::NoDevice { facing },
            io::ErrorKind::PermissionDenied => CameraAccessError::PermissionDenied {
                device: path.display().to_string(),
            },
            _ => CameraAccessError::Backend(format!("{}: {err}", path.display())),
        }
    }

    fn capture_loop(
        path: PathBuf,
        facing: FacingMode,
        width: u32,
        stop: Arc<AtomicBool>,
        latest: Arc<Mutex<Option<Frame>>>,
        ready: Sender<Result<(u32, u32), CameraAccessError>>,
    ) {
        let dev = match Device::with_path(&path) {
            Ok(dev) => dev,
            Err(err) => {
                let _ = ready.send(Err(access_error(err, &path, facing)));
                return;
            }
        };

        let height = requested_height(width);
        let mut negotiated = None;
        for layout in [PixelLayout::Mjpeg, PixelLayout::Yuyv] {
            let wanted = Format::new(width, height, FourCC::new(&layout.fourcc()));
            match dev.set_format(&wanted) {
                Ok(actual) if PixelLayout::from_fourcc(actual.fourcc.repr) == Some(layout) => {
                    negotiated = Some((actual, layout));
                    break;
                }
                Ok(actual) => debug!(fourcc = %actual.fourcc, "driver substituted pixel format"),
                Err(err) => debug!(?layout, error = %err, "pixel format rejected"),
            }
        }
        let Some((format, layout)) = negotiated else {
            let _ = ready.send(Err(CameraAccessError::Backend(format!(
                "{} supports neither MJPG nor YUYV",
                path.display()
            ))));
            return;
        };

        let mut stream = match Stream::with_buffers(&dev, Type::VideoCapture, BUFFER_COUNT) {
            Ok(stream) => stream,
            Err(err) => {
                let _ = ready.send(Err(access_error(err, &path, facing)));
                return;
            }
        };

        info!(
            device = %path.display(),
            width = format.width,
            height = format.height,
            ?layout,
            "camera stream configured"
        );
        if ready.send(Ok((format.width, format.height))).is_err() {
            return;
        }

        let mut failures = 0;
        while !stop.load(Ordering::SeqCst) {
            let (buf, meta) = match stream.next() {
                Ok(frame) => frame,
                Err(err) => {
                    failures += 1;
                    if failures >= MAX_CONSECUTIVE_ERRORS {
                        error!(device = %path.display(), error = %err, "camera stopped delivering frames");
                        break;
                    }
                    warn!(error = %err, "failed to capture frame");
                    continue;
                }
            };
            failures = 0;

            let used = (meta.bytesused as usize).min(buf.len());
            let data = if used == 0 { buf } else { &buf[..used] };
            let Some(image) = layout.decode(data, format.width, format.height, format.stride) else {
                debug!("dropping undecodable frame");
                continue;
            };
            if let Ok(mut guard) = latest.lock() {
                *guard = Some(Frame::from(image));
            }
        }

        debug!(device = %path.display(), "capture loop stopped");
    }

    #[cfg(test)]
    mod tests {
        use std::time::{Duration, Instant};

        use super::*;

        fn stream_with(worker: JoinHandle<()>) -> V4l2Stream {
            V4l2Stream {
                resolution: (4, 4),
                latest: Arc::new(Mutex::new(None)),
                stop: Arc::new(AtomicBool::new(false)),
                worker: Some(worker),
            }
        }

        #[test]
        fn stream_goes_inactive_when_capture_thread_exits() {
            let (release_tx, release_rx) = bounded::<()>(1);
            let stream = stream_with(thread::spawn(move || {
                let _ = release_rx.recv();
            }));
            assert!(stream.is_active());

            release_tx.send(()).unwrap();
            let deadline = Instant::now() + Duration::from_secs(5);
            while stream.is_active() {
                assert!(Instant::now() < deadline, "capture thread never finished");
                thread::sleep(Duration::from_millis(5));
            }
        }

        #[test]
        fn stopped_stream_is_inactive() {
            let mut stream = stream_with(thread::spawn(|| {}));
            stream.stop();
            assert!(!stream.is_active());
            stream.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices() -> CameraDevices {
        CameraDevices {
            front: PathBuf::from("/dev/video0"),
            back: PathBuf::from("/dev/video2"),
            width: 1280,
        }
    }

    #[test]
    fn facing_selects_device() {
        let devices = devices();
        assert_eq!(devices.path_for(FacingMode::User), Path::new("/dev/video0"));
        assert_eq!(
            devices.path_for(FacingMode::Environment),
            Path::new("/dev/video2")
        );
    }

    #[test]
    fn disabled_backend_reports_no_device() {
        let mut backend = backend(None);
        let err = backend
            .open(StreamRequest::new(FacingMode::Environment))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            CameraAccessError::NoDevice {
                facing: FacingMode::Environment
            }
        ));
    }

    #[test]
    fn yuyv_grey_stays_grey() {
        // Two pixels of mid grey with neutral chroma.
        let rgba = yuyv_to_rgba(&[128, 128, 128, 128], 2, 1, 4);
        assert_eq!(rgba, vec![128, 128, 128, 255, 128, 128, 128, 255]);
    }

    #[test]
    fn yuyv_chroma_shifts_channels() {
        // Strong V pushes red up and green down.
        let rgba = yuyv_to_rgba(&[100, 128, 100, 200], 2, 1, 4);
        assert!(rgba[0] > 150);
        assert!(rgba[1] < 100);
        assert_eq!(rgba[0..4], rgba[4..8]);
    }

    #[test]
    fn yuyv_pads_short_buffers() {
        let rgba = yuyv_to_rgba(&[255, 128, 255, 128], 2, 2, 0);
        assert_eq!(rgba.len(), 16);
        assert_eq!(&rgba[8..], &[0, 0, 0, 255, 0, 0, 0, 255]);
    }

    #[test]
    fn yuyv_skips_row_padding() {
        // 2x2 frame with 4 bytes of padding after each row.
        let data = [
            255, 128, 255, 128, 9, 9, 9, 9, //
            0, 128, 0, 128, 9, 9, 9, 9,
        ];
        let rgba = yuyv_to_rgba(&data, 2, 2, 8);
        assert_eq!(&rgba[..8], &[255, 255, 255, 255, 255, 255, 255, 255]);
        assert_eq!(&rgba[8..], &[0, 0, 0, 255, 0, 0, 0, 255]);

        let image = PixelLayout::Yuyv.decode(&data, 2, 2, 8).unwrap();
        assert_eq!(image.get_pixel(0, 1).0, [0, 0, 0, 255]);
    }

    #[test]
    fn layouts_round_their_fourcc() {
        for layout in [PixelLayout::Mjpeg, PixelLayout::Yuyv] {
            assert_eq!(PixelLayout::from_fourcc(layout.fourcc()), Some(layout));
        }
        assert_eq!(PixelLayout::from_fourcc(*b"NV12"), None);
    }

    #[test]
    fn decodes_mjpeg_frames() {
        let mut jpeg = Vec::new();
        let source = RgbaImage::from_pixel(8, 4, image::Rgba([200, 10, 10, 255]));
        image::DynamicImage::ImageRgba8(source)
            .to_rgb8()
            .write_to(&mut std::io::Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
            .unwrap();

        let decoded = PixelLayout::Mjpeg.decode(&jpeg, 8, 4, 0).unwrap();
        assert_eq!(decoded.dimensions(), (8, 4));
        assert!(PixelLayout::Mjpeg.decode(b"not a jpeg", 8, 4, 0).is_none());
    }

    #[test]
    fn requested_height_is_sixteen_by_nine() {
        assert_eq!(requested_height(4096), 2304);
        assert_eq!(requested_height(1), 1);
    }
}
