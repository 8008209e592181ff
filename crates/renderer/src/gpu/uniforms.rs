use bytemuck::{Pod, Zeroable};
use quilt::QuiltUniforms;

/// std140 mirror of the `QuiltParams` block in the shader header.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub(crate) struct QuiltUniformBlock {
    pub resolution: [f32; 2],
    pub time: f32,
    pub strips: f32,
    pub shuffles: i32,
    pub mirror: i32,
    pub source_resolution: [f32; 2],
    /// Ring centre (x, y) in pixels from the top-left, radius, enabled.
    pub shutter: [f32; 4],
}

impl QuiltUniformBlock {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            resolution: [width.max(1) as f32, height.max(1) as f32],
            time: 0.0,
            strips: quilt::params::DEFAULT_STRIPS as f32,
            shuffles: quilt::params::DEFAULT_SHUFFLES as i32,
            mirror: 0,
            source_resolution: [1.0, 1.0],
            shutter: [0.0; 4],
        }
    }

    pub fn apply(&mut self, uniforms: &QuiltUniforms) {
        self.strips = uniforms.strips;
        self.shuffles = uniforms.shuffles;
        self.mirror = i32::from(uniforms.mirror);
    }

    pub fn set_resolution(&mut self, width: u32, height: u32) {
        self.resolution = [width.max(1) as f32, height.max(1) as f32];
    }

    pub fn set_source_resolution(&mut self, width: u32, height: u32) {
        self.source_resolution = [width.max(1) as f32, height.max(1) as f32];
    }
}
