use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use quilt::{
    ExportJob, FacingMode, InputEvent, InputSourceManager, KeyInput, RenderError, Session, TouchGesture,
    TouchTracker,
};
use renderer::{DisplayTarget, ExportTarget, GpuContext, ShutterButton};
use tracing::{debug, error, info, warn};
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, MouseButton, Touch, TouchPhase, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowBuilder};

use crate::camera;
use crate::run::AppOptions;

const WINDOW_TITLE: &str = "PixelQuilt";
/// How often a paused loop wakes to check for decoded images.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(50);
const MOUSE_POINTER_ID: u64 = u64::MAX;

pub fn run(options: AppOptions) -> Result<()> {
    let event_loop = EventLoop::new().map_err(|err| anyhow!("failed to create event loop: {err}"))?;

    let window = WindowBuilder::new()
        .with_title(WINDOW_TITLE)
        .with_inner_size(PhysicalSize::new(
            options.window_size.width,
            options.window_size.height,
        ))
        .build(&event_loop)
        .map_err(|err| anyhow!("failed to create window: {err}"))?;
    let window = Arc::new(window);

    let (gpu, surface) = GpuContext::for_window(window.as_ref(), options.power)
        .context("failed to initialise GPU for window")?;
    let gpu = Arc::new(gpu);
    if gpu.profile().is_software() {
        warn!(adapter = %gpu.profile(), "software rasterizer detected; expect a slow preview");
    }

    let size = window.inner_size();
    let mut display = DisplayTarget::new(Arc::clone(&gpu), surface, (size.width, size.height))?;
    if options.shutter {
        display.set_shutter(Some(ShutterButton::default()));
    }
    let export = ExportTarget::new(Arc::clone(&gpu));

    let mut settings = options.export;
    settings.max_dimension = settings.max_dimension.min(gpu.max_texture_dimension());

    let mut inputs = InputSourceManager::new(camera::backend(options.camera));
    match options.image {
        Some(ref path) => {
            if !inputs.set_still_image(path) {
                warn!(path = %path.display(), "not an image file; waiting for a drop instead");
            }
        }
        None => {
            if inputs.acquire_camera(FacingMode::User).is_err() {
                info!("no camera; drop an image onto the window to start");
            }
        }
    }

    let session = Session::new(
        inputs,
        display,
        export,
        options.params,
        settings,
        Instant::now(),
    )
    .with_router(options.router);

    let mut app = App {
        session,
        pointer: PointerState::default(),
        drop_taken: false,
        title_job: None,
        window,
    };
    app.window.request_redraw();

    event_loop
        .run(move |event, elwt| app.handle_event(event, elwt))
        .map_err(|err| anyhow!("window event loop error: {err}"))
}

struct App {
    // Declared before `window` so the surface is dropped first.
    session: Session<DisplayTarget, ExportTarget>,
    pointer: PointerState,
    drop_taken: bool,
    title_job: Option<ExportJob>,
    window: Arc<Window>,
}

impl App {
    fn handle_event(&mut self, event: Event<()>, elwt: &EventLoopWindowTarget<()>) {
        match event {
            Event::WindowEvent { window_id, event } if window_id == self.window.id() => {
                self.handle_window_event(event, elwt);
            }
            Event::AboutToWait => self.about_to_wait(elwt),
            _ => {}
        }
    }

    fn handle_window_event(&mut self, event: WindowEvent, elwt: &EventLoopWindowTarget<()>) {
        let now = Instant::now();
        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => elwt.exit(),
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed {
                    if let Some(key) = key_input(&event.logical_key) {
                        self.session.handle(InputEvent::Key(key), now);
                    }
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                if let Some(input) = self.pointer.cursor_moved(position.x, position.y) {
                    self.session.handle(input, now);
                }
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => {
                let shutter = self.shutter_hit_test();
                let input = match state {
                    ElementState::Pressed => self.pointer.mouse_pressed(shutter),
                    ElementState::Released => self.pointer.mouse_released(),
                };
                if let Some(input) = input {
                    self.session.handle(input, now);
                }
            }
            WindowEvent::Touch(touch) => {
                let shutter = self.shutter_hit_test();
                if let Some(input) = self.pointer.touch(&touch, shutter) {
                    self.session.handle(input, now);
                }
            }
            WindowEvent::DroppedFile(path) => {
                if std::mem::replace(&mut self.drop_taken, true) {
                    debug!(path = %path.display(), "ignoring extra dropped file");
                } else if !self.session.drop_file(&path) {
                    debug!(path = %path.display(), "ignoring dropped file that is not an image");
                }
            }
            WindowEvent::Resized(size) => {
                self.session.display_mut().resize(size.width, size.height);
                self.window.request_redraw();
            }
            WindowEvent::RedrawRequested => self.redraw(now, elwt),
            _ => {}
        }
    }

    fn redraw(&mut self, now: Instant, elwt: &EventLoopWindowTarget<()>) {
        match self.session.draw_frame(now) {
            Ok(()) => {}
            Err(RenderError::Lost) => self.session.display_mut().reconfigure(),
            Err(RenderError::OutOfMemory) => {
                error!("surface out of memory; exiting");
                elwt.exit();
            }
            Err(RenderError::Skipped(reason)) => debug!(%reason, "frame skipped"),
            Err(RenderError::Failed(reason)) => warn!(%reason, "frame failed"),
        }
    }

    fn about_to_wait(&mut self, elwt: &EventLoopWindowTarget<()>) {
        self.drop_taken = false;

        let now = Instant::now();
        if let Some(Ok(path)) = self.session.poll(now) {
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.window.set_title(&format!("{WINDOW_TITLE} (saved {name})"));
        }
        let job = self.session.export_job();
        if job != self.title_job {
            if let Some(job) = job {
                self.window.set_title(&format!("{WINDOW_TITLE} (exporting {job})"));
            }
            self.title_job = job;
        }

        if self.session.is_playing() {
            self.window.request_redraw();
            elwt.set_control_flow(ControlFlow::Wait);
        } else {
            let idle = now + IDLE_POLL_INTERVAL;
            let wake = self
                .session
                .next_deadline(now)
                .map_or(idle, |deadline| deadline.min(idle));
            elwt.set_control_flow(ControlFlow::WaitUntil(wake));
        }
    }

    fn shutter_hit_test(&self) -> ShutterHit {
        let display = self.session.display();
        ShutterHit {
            button: display.shutter().copied(),
            size: display.size(),
        }
    }
}

/// The shutter button and the surface size it is laid out in.
#[derive(Debug, Clone, Copy)]
struct ShutterHit {
    button: Option<ShutterButton>,
    size: (u32, u32),
}

impl ShutterHit {
    fn contains(&self, x: f64, y: f64) -> bool {
        self.button
            .is_some_and(|button| button.contains(self.size.0, self.size.1, x, y))
    }
}

/// Mouse and touch bookkeeping; the mouse is treated as one more finger.
#[derive(Debug, Default)]
struct PointerState {
    tracker: TouchTracker,
    cursor: Option<(f64, f64)>,
}

impl PointerState {
    fn cursor_moved(&mut self, x: f64, y: f64) -> Option<InputEvent> {
        self.cursor = Some((x, y));
        self.tracker.moved(MOUSE_POINTER_ID, x, y).map(gesture_event)
    }

    fn mouse_pressed(&mut self, shutter: ShutterHit) -> Option<InputEvent> {
        let (x, y) = self.cursor?;
        self.press(MOUSE_POINTER_ID, x, y, shutter)
    }

    fn mouse_released(&mut self) -> Option<InputEvent> {
        self.tracker.end(MOUSE_POINTER_ID).map(gesture_event)
    }

    fn touch(&mut self, touch: &Touch, shutter: ShutterHit) -> Option<InputEvent> {
        let (x, y) = (touch.location.x, touch.location.y);
        match touch.phase {
            TouchPhase::Started => self.press(touch.id, x, y, shutter),
            TouchPhase::Moved => self.tracker.moved(touch.id, x, y).map(gesture_event),
            TouchPhase::Ended => self.tracker.end(touch.id).map(gesture_event),
            TouchPhase::Cancelled => {
                self.tracker.cancel(touch.id);
                None
            }
        }
    }

    fn press(&mut self, id: u64, x: f64, y: f64, shutter: ShutterHit) -> Option<InputEvent> {
        if shutter.contains(x, y) {
            return Some(InputEvent::ShutterClick);
        }
        self.tracker.begin(id, x, y);
        None
    }
}

fn gesture_event(gesture: TouchGesture) -> InputEvent {
    match gesture {
        TouchGesture::Swipe { axis, delta } => InputEvent::Swipe { axis, delta },
        TouchGesture::End => InputEvent::TouchEnd,
    }
}

fn key_input(key: &Key) -> Option<KeyInput> {
    match key {
        Key::Named(NamedKey::ArrowUp) => Some(KeyInput::ArrowUp),
        Key::Named(NamedKey::ArrowDown) => Some(KeyInput::ArrowDown),
        Key::Named(NamedKey::ArrowLeft) => Some(KeyInput::ArrowLeft),
        Key::Named(NamedKey::ArrowRight) => Some(KeyInput::ArrowRight),
        Key::Character(text) => {
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(ch), None) => Some(KeyInput::Character(ch)),
                _ => None,
            }
        }
        _ => None,
    }
}
