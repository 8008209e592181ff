use std::sync::Arc;

use crossbeam_channel::bounded;
use image::RgbaImage;
use quilt::{ExportRenderer, Frame, QuiltRenderer, QuiltUniforms, RenderError};
use tracing::debug;

use super::context::GpuContext;
use super::pass::QuiltPass;

const EXPORT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const BYTES_PER_PIXEL: u32 = 4;

struct OffscreenTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

/// The off-screen instance used for high-resolution stills.
///
/// Its texture only exists between `resize` and `release`.
pub struct ExportTarget {
    pass: QuiltPass,
    target: Option<OffscreenTexture>,
}

impl ExportTarget {
    pub fn new(gpu: Arc<GpuContext>) -> Self {
        Self {
            pass: QuiltPass::new(gpu, EXPORT_FORMAT, (1, 1)),
            target: None,
        }
    }

    fn attached(&self) -> Result<&OffscreenTexture, RenderError> {
        self.target
            .as_ref()
            .ok_or_else(|| RenderError::Failed("export target is not attached".into()))
    }
}

impl QuiltRenderer for ExportTarget {
    fn set_uniforms(&mut self, uniforms: &QuiltUniforms) {
        self.pass.set_uniforms(uniforms);
    }

    fn set_texture(&mut self, frame: Option<&Frame>) {
        self.pass.set_texture(frame);
    }

    fn step(&mut self, time: f32) -> Result<(), RenderError> {
        self.pass.set_time(time);
        let target = self.attached()?;
        let gpu = self.pass.gpu();
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("export encoder"),
            });
        self.pass.encode(&mut encoder, &target.view);
        gpu.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}

impl ExportRenderer for ExportTarget {
    fn resize(&mut self, width: u32, height: u32) {
        let (width, height) = (width.max(1), height.max(1));
        let texture = self
            .pass
            .gpu()
            .device
            .create_texture(&wgpu::TextureDescriptor {
                label: Some("quilt export target"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: EXPORT_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.target = Some(OffscreenTexture {
            texture,
            view,
            width,
            height,
        });
        self.pass.set_resolution(width, height);
        debug!(width, height, "export target attached");
    }

    fn capture(&mut self) -> Result<RgbaImage, RenderError> {
        let target = self.attached()?;
        let gpu = self.pass.gpu();
        let (width, height) = (target.width, target.height);

        let unpadded_row_bytes = width * BYTES_PER_PIXEL;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_row_bytes = unpadded_row_bytes.div_ceil(align) * align;

        let readback = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("export readback"),
            size: u64::from(padded_row_bytes) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("export readback encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row_bytes),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        gpu.queue.submit(std::iter::once(encoder.finish()));

        let slice = readback.slice(..);
        let (tx, rx) = bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        gpu.device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| RenderError::Failed(format!("device poll failed: {err}")))?;
        rx.recv()
            .map_err(|_| RenderError::Failed("readback callback dropped".into()))?
            .map_err(|err| RenderError::Failed(format!("failed to map readback buffer: {err}")))?;

        let pixels = {
            let data = slice.get_mapped_range();
            let mut pixels = Vec::with_capacity((unpadded_row_bytes * height) as usize);
            for row in 0..height {
                let start = (row * padded_row_bytes) as usize;
                pixels.extend_from_slice(&data[start..start + unpadded_row_bytes as usize]);
            }
            pixels
        };
        readback.unmap();

        RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| RenderError::Failed("readback size mismatch".into()))
    }

    fn release(&mut self) {
        if self.target.take().is_some() {
            debug!("export target released");
        }
    }

    fn is_attached(&self) -> bool {
        self.target.is_some()
    }
}
