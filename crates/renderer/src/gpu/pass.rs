use std::sync::Arc;

use quilt::{Frame, QuiltUniforms};

use super::context::GpuContext;
use super::texture::InputTexture;
use super::uniforms::QuiltUniformBlock;

/// Per-target GPU state: its own uniforms and input texture, drawn with the
/// shared quilt pipeline.
pub(crate) struct QuiltPass {
    gpu: Arc<GpuContext>,
    pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    block: QuiltUniformBlock,
    input: InputTexture,
    input_bind_group: wgpu::BindGroup,
}

impl QuiltPass {
    pub fn new(gpu: Arc<GpuContext>, format: wgpu::TextureFormat, size: (u32, u32)) -> Self {
        let device = &gpu.device;
        let pipeline = gpu.program.pipeline_for(device, format);

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("quilt uniform buffer"),
            size: std::mem::size_of::<QuiltUniformBlock>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("quilt uniform bind group"),
            layout: &gpu.program.uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let input = InputTexture::placeholder(device, &gpu.queue);
        let input_bind_group = create_input_bind_group(&gpu, &input);

        Self {
            pipeline,
            uniform_buffer,
            uniform_bind_group,
            block: QuiltUniformBlock::new(size.0, size.1),
            input,
            input_bind_group,
            gpu,
        }
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    pub fn set_uniforms(&mut self, uniforms: &QuiltUniforms) {
        self.block.apply(uniforms);
    }

    pub fn set_resolution(&mut self, width: u32, height: u32) {
        self.block.set_resolution(width, height);
    }

    pub fn set_time(&mut self, time: f32) {
        self.block.time = time;
    }

    pub fn set_shutter(&mut self, shutter: [f32; 4]) {
        self.block.shutter = shutter;
    }

    pub fn set_texture(&mut self, frame: Option<&Frame>) {
        let gpu = Arc::clone(&self.gpu);
        let max_dimension = gpu.max_texture_dimension();
        let recreated = match frame {
            Some(frame) => self.input.upload(&gpu.device, &gpu.queue, frame, max_dimension),
            None => {
                self.input = InputTexture::placeholder(&gpu.device, &gpu.queue);
                true
            }
        };
        if recreated {
            self.input_bind_group = create_input_bind_group(&gpu, &self.input);
        }
        let (width, height) = self.input.size();
        self.block.set_source_resolution(width, height);
    }

    /// Records a full-screen draw into `view`, clearing it first.
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView) {
        self.gpu
            .queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&self.block));

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("quilt pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        render_pass.set_pipeline(&self.pipeline);
        render_pass.set_bind_group(0, &self.uniform_bind_group, &[]);
        render_pass.set_bind_group(1, &self.input_bind_group, &[]);
        render_pass.draw(0..3, 0..1);
    }
}

fn create_input_bind_group(gpu: &GpuContext, input: &InputTexture) -> wgpu::BindGroup {
    gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("quilt input bind group"),
        layout: &gpu.program.texture_layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&input.view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(&input.sampler),
            },
        ],
    })
}
