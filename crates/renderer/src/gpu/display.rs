use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use quilt::{Frame, QuiltRenderer, QuiltUniforms, RenderError};
use tracing::{debug, warn};

use crate::shutter::ShutterButton;

use super::context::GpuContext;
use super::pass::QuiltPass;

/// The on-screen instance: renders into the window surface every frame.
pub struct DisplayTarget {
    pass: QuiltPass,
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    shutter: Option<ShutterButton>,
    stats: FrameStats,
}

impl DisplayTarget {
    pub fn new(gpu: Arc<GpuContext>, surface: wgpu::Surface<'static>, size: (u32, u32)) -> Result<Self> {
        let (width, height) = (size.0.max(1), size.1.max(1));
        let max_dimension = gpu.max_texture_dimension();
        if width > max_dimension || height > max_dimension {
            bail!("GPU max texture dimension is {max_dimension}, requested surface is {width}x{height}");
        }

        let caps = surface.get_capabilities(&gpu.adapter);
        let Some(&fallback) = caps.formats.first() else {
            bail!("surface reports no supported formats");
        };
        // Shader output is already gamma-encoded.
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|format| !format.is_srgb())
            .unwrap_or_else(|| {
                warn!(?fallback, "no non-sRGB surface format available; colours will be brighter");
                fallback
            });
        let present_mode = if caps.present_modes.contains(&wgpu::PresentMode::Fifo) {
            wgpu::PresentMode::Fifo
        } else {
            caps.present_modes
                .first()
                .copied()
                .unwrap_or(wgpu::PresentMode::Fifo)
        };
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&gpu.device, &config);
        debug!(?format, ?present_mode, width, height, "configured display surface");

        Ok(Self {
            pass: QuiltPass::new(gpu, format, (width, height)),
            surface,
            config,
            shutter: None,
            stats: FrameStats::new(Instant::now()),
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    /// Ignores zero sizes (minimised windows).
    pub fn resize(&mut self, width: u32, height: u32) {
        let max_dimension = self.pass.gpu().max_texture_dimension();
        let Some((width, height)) = clamp_surface_size(width, height, max_dimension) else {
            return;
        };
        if (width, height) != (self.config.width, self.config.height) {
            debug!(width, height, max_dimension, "resizing surface");
        }
        self.config.width = width;
        self.config.height = height;
        self.reconfigure();
    }

    /// Re-applies the current configuration after a lost or outdated surface.
    pub fn reconfigure(&mut self) {
        self.surface.configure(&self.pass.gpu().device, &self.config);
        self.pass.set_resolution(self.config.width, self.config.height);
        self.refresh_shutter();
    }

    pub fn set_shutter(&mut self, shutter: Option<ShutterButton>) {
        self.shutter = shutter;
        self.refresh_shutter();
    }

    pub fn shutter(&self) -> Option<&ShutterButton> {
        self.shutter.as_ref()
    }

    fn refresh_shutter(&mut self) {
        let uniform = self
            .shutter
            .map(|button| button.uniform(self.config.width, self.config.height))
            .unwrap_or([0.0; 4]);
        self.pass.set_shutter(uniform);
    }
}

impl QuiltRenderer for DisplayTarget {
    fn set_uniforms(&mut self, uniforms: &QuiltUniforms) {
        self.pass.set_uniforms(uniforms);
    }

    fn set_texture(&mut self, frame: Option<&Frame>) {
        self.pass.set_texture(frame);
    }

    fn step(&mut self, time: f32) -> Result<(), RenderError> {
        let frame = self.surface.get_current_texture().map_err(surface_error)?;
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        self.pass.set_time(time);
        let gpu = self.pass.gpu();
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("display encoder"),
            });
        self.pass.encode(&mut encoder, &view);
        gpu.queue.submit(std::iter::once(encoder.finish()));
        frame.present();

        self.stats.record(Instant::now(), time);
        Ok(())
    }
}

fn surface_error(err: wgpu::SurfaceError) -> RenderError {
    match err {
        wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => RenderError::Lost,
        wgpu::SurfaceError::OutOfMemory => RenderError::OutOfMemory,
        other => RenderError::Skipped(other.to_string()),
    }
}

/// Once-a-second FPS debug log.
struct FrameStats {
    last_update: Instant,
    frames: u32,
}

impl FrameStats {
    fn new(now: Instant) -> Self {
        Self {
            last_update: now,
            frames: 0,
        }
    }

    fn record(&mut self, now: Instant, time: f32) {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.last_update);
        if elapsed >= Duration::from_secs(1) {
            let fps = self.frames as f32 / elapsed.as_secs_f32();
            debug!(fps = fps.round(), time, "render stats");
            self.frames = 0;
            self.last_update = now;
        }
    }
}

/// Surface size to configure for a window size, or `None` while minimised.
/// Each side is capped at the device texture limit.
fn clamp_surface_size(width: u32, height: u32, max_dimension: u32) -> Option<(u32, u32)> {
    if width == 0 || height == 0 {
        return None;
    }
    Some((width.min(max_dimension), height.min(max_dimension)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimised_windows_keep_the_old_surface() {
        assert_eq!(clamp_surface_size(0, 720, 8192), None);
        assert_eq!(clamp_surface_size(1280, 0, 8192), None);
    }

    #[test]
    fn oversized_windows_are_capped_per_side() {
        assert_eq!(clamp_surface_size(1280, 720, 8192), Some((1280, 720)));
        assert_eq!(clamp_surface_size(10_000, 720, 8192), Some((8192, 720)));
        assert_eq!(clamp_surface_size(10_000, 9_000, 8192), Some((8192, 8192)));
    }
}
