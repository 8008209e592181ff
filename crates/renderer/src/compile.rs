use std::borrow::Cow;

use anyhow::{anyhow, Result};
use wgpu::naga::ShaderStage;

/// Body of the quilt effect; wrapped by [`HEADER`] and [`FOOTER`].
const QUILT_SOURCE: &str = include_str!("../shaders/quilt.frag");

/// Upper bound of the shuffle loop; matches the largest shuffle depth.
pub(crate) const MAX_SHUFFLE_LEVELS: u32 = 32;

/// Compiles the static full-screen triangle vertex shader.
pub(crate) fn compile_vertex_shader(device: &wgpu::Device) -> Result<wgpu::ShaderModule> {
    compile_checked(device, "quilt vertex", VERTEX_SHADER_GLSL.into(), ShaderStage::Vertex)
}

/// Wraps the quilt body with the uniform prelude and compiles it.
pub(crate) fn compile_fragment_shader(device: &wgpu::Device) -> Result<wgpu::ShaderModule> {
    compile_checked(
        device,
        "quilt fragment",
        Cow::Owned(wrap_fragment(QUILT_SOURCE)),
        ShaderStage::Fragment,
    )
}

/// Naga reports GLSL errors through the device error callback, which panics
/// by default; capture them in a validation scope instead.
fn compile_checked(
    device: &wgpu::Device,
    label: &str,
    shader: Cow<'_, str>,
    stage: ShaderStage,
) -> Result<wgpu::ShaderModule> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Glsl {
            shader,
            stage,
            defines: &[],
        },
    });
    match pollster::block_on(device.pop_error_scope()) {
        Some(err) => Err(anyhow!("failed to compile {label}: {err}")),
        None => Ok(module),
    }
}

fn wrap_fragment(body: &str) -> String {
    format!(
        "{HEADER}#define MAX_SHUFFLE_LEVELS {MAX_SHUFFLE_LEVELS}\n#line 1\n{body}\n{FOOTER}"
    )
}

/// Uniform block layout must match `QuiltUniformBlock` in `gpu/uniforms.rs`.
const HEADER: &str = r"#version 450
layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 outColor;

layout(std140, set = 0, binding = 0) uniform QuiltParams {
    vec2 _resolution;
    float _time;
    float _strips;
    int _shuffles;
    int _mirror;
    vec2 _sourceResolution;
    vec4 _shutter;
} ubo;

#define uResolution ubo._resolution
#define uTime ubo._time
#define uStrips ubo._strips
#define uShuffles ubo._shuffles
#define uMirror ubo._mirror
#define uSourceResolution ubo._sourceResolution
#define uShutter ubo._shutter

layout(set = 1, binding = 0) uniform texture2D quilt_input_texture;
layout(set = 1, binding = 1) uniform sampler quilt_input_sampler;
#define uInput sampler2D(quilt_input_texture, quilt_input_sampler)
";

/// Flips to a top-left texture origin, runs the effect and overlays the
/// shutter ring.
const FOOTER: &str = r"void main() {
    vec2 uv = vec2(v_uv.x, 1.0 - v_uv.y);
    vec4 color = quilt(uv);
    outColor = vec4(shutterRing(color.rgb, gl_FragCoord.xy), 1.0);
}
";

/// Minimal full-screen triangle vertex shader.
const VERTEX_SHADER_GLSL: &str = r"#version 450
layout(location = 0) out vec2 v_uv;

const vec2 positions[3] = vec2[3](
    vec2(-1.0, -3.0),
    vec2(3.0, 1.0),
    vec2(-1.0, 1.0)
);

void main() {
    uint vertex_index = uint(gl_VertexIndex);
    vec2 pos = positions[vertex_index];
    v_uv = pos * 0.5 + vec2(0.5, 0.5);
    gl_Position = vec4(pos, 0.0, 1.0);
}
";
