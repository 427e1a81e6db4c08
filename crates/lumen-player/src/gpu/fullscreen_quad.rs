/// Fullscreen triangle vertex shader with UVs (WGSL).
///
/// Three vertices from `vertex_index` cover the whole viewport without a
/// vertex buffer. UV (0,0) is the top-left texel.
pub const FULLSCREEN_TRIANGLE_VS: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4f,
    @location(0) uv: vec2f,
}

@vertex
fn vs_main(@builtin(vertex_index) vi: u32) -> VertexOutput {
    let x = f32(i32(vi & 1u) * 4) - 1.0;
    let y = f32(i32(vi & 2u) * 2) - 1.0;
    var out: VertexOutput;
    out.position = vec4f(x, y, 0.0, 1.0);
    out.uv = vec2f((x + 1.0) * 0.5, (1.0 - y) * 0.5);
    return out;
}
"#;

/// Samples the frame inside the letterbox rectangle, black outside it.
pub const LETTERBOX_BLIT_FS: &str = r#"
struct Letterbox {
    scale: vec2f,
    offset: vec2f,
}

@group(0) @binding(0) var frame_tex: texture_2d<f32>;
@group(0) @binding(1) var frame_sampler: sampler;
@group(0) @binding(2) var<uniform> letterbox: Letterbox;

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4f {
    let uv = (in.uv - letterbox.offset) / letterbox.scale;
    let color = textureSample(frame_tex, frame_sampler, clamp(uv, vec2f(0.0), vec2f(1.0)));
    let inside = all(uv >= vec2f(0.0)) && all(uv <= vec2f(1.0));
    return select(vec4f(0.0, 0.0, 0.0, 1.0), vec4f(color.rgb, 1.0), inside);
}
"#;

/// Vertex and fragment stages joined into one module source.
pub fn blit_shader_source() -> String {
    format!("{FULLSCREEN_TRIANGLE_VS}\n{LETTERBOX_BLIT_FS}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blit_source_has_both_entry_points() {
        let src = blit_shader_source();
        assert!(src.contains("fn vs_main"));
        assert!(src.contains("fn fs_main"));
        // Fragment stage consumes the vertex stage's output struct
        assert!(src.find("struct VertexOutput") < src.find("fn fs_main(in: VertexOutput)"));
    }
}
