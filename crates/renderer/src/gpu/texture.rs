use std::borrow::Cow;

use image::imageops::{self, FilterType};
use image::RgbaImage;
use quilt::Frame;
use wgpu::util::{DeviceExt, TextureDataOrder};

/// Gamma-encoded input; targets are non-sRGB too, so values pass through.
const INPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// The source image sampled by the quilt shader.
pub(crate) struct InputTexture {
    texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
    size: (u32, u32),
}

impl InputTexture {
    /// 1×1 dark texel shown while there is no input.
    pub fn placeholder(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        Self::with_data(device, queue, (1, 1), &[24, 24, 24, 255], "quilt placeholder texture")
    }

    /// Uploads `frame`, reusing the texture when the size is unchanged.
    ///
    /// Returns `true` when the texture was recreated and bind groups that
    /// reference it need rebuilding.
    pub fn upload(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, frame: &Frame, max_dimension: u32) -> bool {
        let pixels = fit_within(frame, max_dimension);
        if pixels.dimensions() != self.size {
            *self = Self::with_data(
                device,
                queue,
                pixels.dimensions(),
                pixels.as_raw(),
                "quilt input texture",
            );
            return true;
        }

        let (width, height) = self.size;
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels.as_raw(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        false
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    fn with_data(device: &wgpu::Device, queue: &wgpu::Queue, size: (u32, u32), data: &[u8], label: &str) -> Self {
        let texture = device.create_texture_with_data(
            queue,
            &wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width: size.0,
                    height: size.1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: INPUT_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            TextureDataOrder::LayerMajor,
            data,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("quilt input sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            texture,
            view,
            sampler,
            size,
        }
    }
}

/// Downscales frames larger than the device allows, keeping aspect ratio.
fn fit_within(frame: &Frame, max_dimension: u32) -> Cow<'_, RgbaImage> {
    let (width, height) = frame.dimensions();
    if width <= max_dimension && height <= max_dimension {
        return Cow::Borrowed(frame.image());
    }

    let scale = f64::from(max_dimension) / f64::from(width.max(height));
    let target_w = ((f64::from(width) * scale).round() as u32).clamp(1, max_dimension);
    let target_h = ((f64::from(height) * scale).round() as u32).clamp(1, max_dimension);
    tracing::warn!(
        width,
        height,
        target_w,
        target_h,
        "input exceeds GPU texture limit; downscaling"
    );
    Cow::Owned(imageops::resize(frame.image(), target_w, target_h, FilterType::Triangle))
}
