//! High-resolution still export.
//!
//! An export walks `Idle → Preparing → Rendering → Idle`:
//!
//! * **Preparing**: the display loop is paused, the export target is resized
//!   for the job and receives the current parameters and frame. A short settle
//!   delay lets the upload land before rendering.
//! * **Rendering**: one pass at time zero is read back and handed to a worker
//!   thread that encodes and writes the PNG.
//! * Back to **Idle**: the export texture is released and the display loop
//!   resumes, whether or not the save worked.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use crossbeam_channel::{bounded, Receiver, TryRecvError};
use image::{ImageFormat, RgbaImage};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::frame::Frame;
use crate::params::ParameterState;
use crate::session::{ExportRenderer, QuiltUniforms, RenderError, RenderLoop};

pub const MAX_EXPORT_DIMENSION: u32 = 4096;
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(8);
pub const DEFAULT_PREFIX: &str = "pixelquilt";

/// How often the event loop should check on a running save.
const SAVE_POLL_INTERVAL: Duration = Duration::from_millis(4);

/// Output size of one export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportJob {
    pub width: u32,
    pub height: u32,
}

impl ExportJob {
    /// Scales `native` by `2^(shuffle_depth + 1)`.
    ///
    /// If either side would exceed `max_dimension`, the larger side becomes
    /// exactly `max_dimension` and the other follows the aspect ratio.
    pub fn compute(native: (u32, u32), shuffle_depth: f32, max_dimension: u32) -> Self {
        let max = f64::from(max_dimension.max(1));
        let width = f64::from(native.0.max(1));
        let height = f64::from(native.1.max(1));
        let scale = 2f64.powf(f64::from(shuffle_depth) + 1.0);

        let (scaled_w, scaled_h) = (width * scale, height * scale);
        let (target_w, target_h) = if scaled_w > max || scaled_h > max {
            if width > height {
                (max, (max * height / width).round())
            } else {
                ((max * width / height).round(), max)
            }
        } else {
            (scaled_w.round(), scaled_h.round())
        };

        Self {
            width: target_w.clamp(1.0, max) as u32,
            height: target_h.clamp(1.0, max) as u32,
        }
    }
}

impl fmt::Display for ExportJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportSettings {
    pub max_dimension: u32,
    pub prefix: String,
    pub output_dir: PathBuf,
    pub settle_delay: Duration,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            max_dimension: MAX_EXPORT_DIMENSION,
            prefix: DEFAULT_PREFIX.to_string(),
            output_dir: PathBuf::from("."),
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

impl ExportSettings {
    /// `<prefix>-<YYYYmmdd-HHMMSS>.png`, with a counter appended when a file
    /// from the same second already exists.
    pub fn next_path(&self) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d-%H%M%S");
        let base = format!("{}-{}", self.prefix, stamp);
        let mut path = self.output_dir.join(format!("{base}.png"));
        let mut counter = 1;
        while path.exists() {
            path = self.output_dir.join(format!("{base}-{counter}.png"));
            counter += 1;
        }
        path
    }
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("failed to create export directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to start save worker: {0}")]
    Spawn(#[source] io::Error),
    #[error("save worker exited without reporting")]
    WorkerLost,
    #[error("an export is already running")]
    Busy,
    #[error("nothing to export: no active input")]
    NoInput,
}

#[derive(Debug)]
pub enum ExportState {
    Idle,
    Preparing {
        job: ExportJob,
        deadline: Instant,
    },
    Rendering {
        job: ExportJob,
        done: Receiver<Result<PathBuf, SaveError>>,
    },
}

impl ExportState {
    /// The job being exported, if any.
    pub fn job(&self) -> Option<ExportJob> {
        match self {
            ExportState::Idle => None,
            ExportState::Preparing { job, .. } | ExportState::Rendering { job, .. } => Some(*job),
        }
    }
}

#[derive(Debug)]
pub struct ExportOrchestrator {
    settings: ExportSettings,
    state: ExportState,
}

impl ExportOrchestrator {
    pub fn new(settings: ExportSettings) -> Self {
        Self {
            settings,
            state: ExportState::Idle,
        }
    }

    pub fn settings(&self) -> &ExportSettings {
        &self.settings
    }

    pub fn state(&self) -> &ExportState {
        &self.state
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, ExportState::Idle)
    }

    /// Starts an export if none is running and there is something to export.
    /// Refusals are logged; see [`Self::try_request`] for the reason.
    pub fn request<E: ExportRenderer>(
        &mut self,
        now: Instant,
        frame: Option<Frame>,
        native: Option<(u32, u32)>,
        params: &ParameterState,
        renderer: &mut E,
        render_loop: &mut RenderLoop,
    ) -> bool {
        match self.try_request(now, frame, native, params, renderer, render_loop) {
            Ok(()) => true,
            Err(SaveError::Busy) => {
                debug!("export already running; request ignored");
                false
            }
            Err(err) => {
                warn!("{err}");
                false
            }
        }
    }

    /// Like [`Self::request`] but reports why nothing started
    /// ([`SaveError::Busy`] or [`SaveError::NoInput`]).
    pub fn try_request<E: ExportRenderer>(
        &mut self,
        now: Instant,
        frame: Option<Frame>,
        native: Option<(u32, u32)>,
        params: &ParameterState,
        renderer: &mut E,
        render_loop: &mut RenderLoop,
    ) -> Result<(), SaveError> {
        if !self.is_idle() {
            return Err(SaveError::Busy);
        }
        let frame = frame.ok_or(SaveError::NoInput)?;

        render_loop.pause(now);

        let native = native.unwrap_or_else(|| frame.dimensions());
        let job = ExportJob::compute(native, params.shuffle_depth(), self.settings.max_dimension);
        renderer.resize(job.width, job.height);
        renderer.set_uniforms(&QuiltUniforms::from_params(params, false));
        renderer.set_texture(Some(&frame));

        info!(
            width = job.width,
            height = job.height,
            strips = params.strip_count(),
            shuffles = params.shuffle_depth(),
            "export started"
        );
        self.state = ExportState::Preparing {
            job,
            deadline: now + self.settings.settle_delay,
        };
        Ok(())
    }

    /// Advances the state machine. Returns the result once an export is done.
    pub fn poll<E: ExportRenderer>(
        &mut self,
        now: Instant,
        renderer: &mut E,
        render_loop: &mut RenderLoop,
    ) -> Option<Result<PathBuf, SaveError>> {
        match &self.state {
            ExportState::Idle => None,
            ExportState::Preparing { job, deadline } => {
                if now < *deadline {
                    return None;
                }
                let job = *job;
                match render_still(renderer) {
                    Ok(image) => {
                        let path = self.settings.next_path();
                        match spawn_save(image, path.clone()) {
                            Ok(done) => {
                                debug!(%job, path = %path.display(), "export rendered; saving");
                                self.state = ExportState::Rendering { job, done };
                                None
                            }
                            Err(err) => Some(self.finish(Err(err), now, renderer, render_loop)),
                        }
                    }
                    Err(err) => Some(self.finish(Err(err.into()), now, renderer, render_loop)),
                }
            }
            ExportState::Rendering { done, .. } => {
                let received = done.try_recv();
                match received {
                    Ok(result) => Some(self.finish(result, now, renderer, render_loop)),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => {
                        Some(self.finish(Err(SaveError::WorkerLost), now, renderer, render_loop))
                    }
                }
            }
        }
    }

    /// When the caller should poll again.
    pub fn next_deadline(&self, now: Instant) -> Option<Instant> {
        match &self.state {
            ExportState::Idle => None,
            ExportState::Preparing { deadline, .. } => Some(*deadline),
            ExportState::Rendering { .. } => Some(now + SAVE_POLL_INTERVAL),
        }
    }

    fn finish<E: ExportRenderer>(
        &mut self,
        result: Result<PathBuf, SaveError>,
        now: Instant,
        renderer: &mut E,
        render_loop: &mut RenderLoop,
    ) -> Result<PathBuf, SaveError> {
        renderer.release();
        render_loop.play(now);
        self.state = ExportState::Idle;
        match &result {
            Ok(path) => info!(path = %path.display(), "export saved"),
            Err(err) => error!(error = %err, "export failed"),
        }
        result
    }
}

fn render_still<E: ExportRenderer>(renderer: &mut E) -> Result<RgbaImage, RenderError> {
    renderer.step(0.0)?;
    renderer.capture()
}

fn spawn_save(
    image: RgbaImage,
    path: PathBuf,
) -> Result<Receiver<Result<PathBuf, SaveError>>, SaveError> {
    let (tx, rx) = bounded(1);
    thread::Builder::new()
        .name("pixelquilt-save".into())
        .spawn(move || {
            let _ = tx.send(write_png(&image, path));
        })
        .map_err(SaveError::Spawn)?;
    Ok(rx)
}

/// Encodes `image` as PNG at `path`, creating parent directories.
pub fn write_png(image: &RgbaImage, path: PathBuf) -> Result<PathBuf, SaveError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| SaveError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    match image.save_with_format(&path, ImageFormat::Png) {
        Ok(()) => Ok(path),
        Err(source) => Err(SaveError::Encode { path, source }),
    }
}

/// Runs a full export synchronously, for callers without an event loop.
pub fn export_blocking<E: ExportRenderer>(
    settings: ExportSettings,
    frame: Frame,
    params: &ParameterState,
    renderer: &mut E,
) -> Result<PathBuf, SaveError> {
    let mut orchestrator = ExportOrchestrator::new(settings);
    let mut render_loop = RenderLoop::new(Instant::now());
    let native = frame.dimensions();
    orchestrator.try_request(
        Instant::now(),
        Some(frame),
        Some(native),
        params,
        renderer,
        &mut render_loop,
    )?;
    loop {
        let now = Instant::now();
        if let Some(result) = orchestrator.poll(now, renderer, &mut render_loop) {
            return result;
        }
        let wake = orchestrator.next_deadline(now).unwrap_or(now);
        thread::sleep(wake.saturating_duration_since(now));
    }
}
