// ============================================================================
// MITCHELL–NETRAVALI SCALE SHADER — separable 4-tap cubic resample
// ============================================================================

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use bytemuck::{Pod, Zeroable};

use crate::buffer::UploadBuffer;
use crate::builder::{Dimensions, ShaderBuilder};
use crate::context::GpuContext;
use crate::error::TexResult;
use crate::format::PixelFormat;
use crate::size::{LayerMipmapCount, LayerMipmapSlice, Size3};
use crate::texture::Texture;

use super::{
    build_pipeline, dispatch, full_view_dim, sampled_entry, slice_view_dim,
    storage_texture_entry, uniform_entry, PipelineBundle,
};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ScaleParams {
    // xy = axis one-hot, w = layer
    dir: [i32; 4],
    src_size: [i32; 4],
    dst_size: [i32; 4],
}

struct ScalePipeline {
    bundle: PipelineBundle,
    params: UploadBuffer<ScaleParams>,
}

/// Resamples 2D-array textures with the Mitchell–Netravali cubic at
/// B = 0, C = 0.5 (Catmull-Rom), one axis per pass with clamped taps.
/// An unchanged axis reproduces the input exactly (the kernel interpolates).
pub struct MitchellNetravaliShader {
    pipelines: RefCell<HashMap<PixelFormat, Rc<ScalePipeline>>>,
}

impl MitchellNetravaliShader {
    pub fn new() -> Self {
        Self {
            pipelines: RefCell::new(HashMap::new()),
        }
    }

    pub(crate) fn source(builder: &ShaderBuilder, format: PixelFormat) -> TexResult<String> {
        let src_ty = builder.sampled_slice("f32");
        let dst_ty = builder.storage_mip(format.wgsl_storage_format()?);
        let wg = builder.workgroup_decl();
        Ok(format!(
            r#"@group(0) @binding(0) var src_image: {src_ty};
@group(0) @binding(1) var dst_image: {dst_ty};

struct Params {{
    dir: vec4<i32>,
    src_size: vec4<i32>,
    dst_size: vec4<i32>,
}};
@group(0) @binding(2) var<uniform> params: Params;

// Mitchell-Netravali with B = 0, C = 0.5
fn mn_weight(d: f32) -> f32 {{
    let x = abs(d);
    if (x < 1.0) {{
        return 1.5 * x * x * x - 2.5 * x * x + 1.0;
    }}
    if (x < 2.0) {{
        return -0.5 * x * x * x + 2.5 * x * x - 4.0 * x + 2.0;
    }}
    return 0.0;
}}

@compute {wg}
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{
    let coord = vec2<i32>(gid.xy);
    if (coord.x >= params.dst_size.x || coord.y >= params.dst_size.y) {{
        return;
    }}
    let dirv = params.dir.xy;
    let scale = f32(dot(params.src_size.xy, dirv)) / f32(dot(params.dst_size.xy, dirv));
    let src_pos = (f32(dot(coord, dirv)) + 0.5) * scale - 0.5;
    let base = i32(floor(src_pos));
    let t = src_pos - f32(base);
    var sum = vec4<f32>(0.0);
    for (var i = -1; i <= 2; i = i + 1) {{
        let w = mn_weight(f32(i) - t);
        var sc = coord * (vec2<i32>(1) - dirv) + dirv * (base + i);
        sc = clamp(sc, vec2<i32>(0), params.src_size.xy - vec2<i32>(1));
        sum = sum + w * textureLoad(src_image, sc, 0);
    }}
    textureStore(dst_image, coord, params.dir.w, sum);
}}
"#
        ))
    }

    fn pipeline(&self, ctx: &GpuContext, format: PixelFormat) -> TexResult<Rc<ScalePipeline>> {
        if let Some(p) = self.pipelines.borrow().get(&format) {
            return Ok(p.clone());
        }
        let dim = Dimensions::TwoD;
        let builder = ShaderBuilder::new(dim, ctx.max_workgroup_invocations);
        let source = Self::source(&builder, format)?;
        let entries = [
            sampled_entry(0, slice_view_dim(dim), false),
            storage_texture_entry(1, format.wgpu_format(), full_view_dim(dim)),
            uniform_entry(2),
        ];
        let bundle = build_pipeline(ctx, "mitchell scale", &source, &entries, builder)?;
        let params = UploadBuffer::new(ctx, "mitchell scale");
        let pipe = Rc::new(ScalePipeline { bundle, params });
        self.pipelines.borrow_mut().insert(format, pipe.clone());
        Ok(pipe)
    }

    fn pass(
        &self,
        ctx: &GpuContext,
        pipe: &ScalePipeline,
        src: &Texture,
        dst: &Texture,
        layer: u32,
        axis: usize,
    ) {
        let s = src.size();
        let d = dst.size();
        let dir = if axis == 0 { [1, 0] } else { [0, 1] };
        pipe.params.set(
            ctx,
            &ScaleParams {
                dir: [dir[0], dir[1], 0, layer as i32],
                src_size: [s.x as i32, s.y as i32, 1, 0],
                dst_size: [d.x as i32, d.y as i32, 1, 0],
            },
        );
        let groups = pipe.bundle.builder.dispatch_groups(d);
        dispatch(
            ctx,
            "mitchell scale",
            &pipe.bundle,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(
                        src.srv(LayerMipmapSlice::new(layer, 0)),
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(dst.uav(0)),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: pipe.params.binding(),
                },
            ],
            groups,
        );
    }

    /// Resample every layer's base mip to `dst_size`; width pass first, then
    /// height. Produces a single-mip texture in the source format.
    pub fn scale(&self, ctx: &GpuContext, src: &Texture, dst_size: Size3) -> TexResult<Texture> {
        assert!(!src.dim().is_3d(), "cubic resample is 2d only");
        assert_eq!(dst_size.z, 1);
        assert!(dst_size.x > 0 && dst_size.y > 0);

        let layers = src.layer_mipmap().layers;
        let lm = LayerMipmapCount::new(layers, 1);
        let mid_size = Size3::new_2d(dst_size.x, src.size().y);
        let mid = Texture::new(ctx, "scale mid", mid_size, lm, src.format(), src.dim())?;
        let dst = Texture::new(ctx, "scaled", dst_size, lm, src.format(), src.dim())?;
        let pipe = self.pipeline(ctx, src.format())?;

        for layer in 0..layers {
            self.pass(ctx, &pipe, src, &mid, layer, 0);
            self.pass(ctx, &pipe, &mid, &dst, layer, 1);
        }
        Ok(dst)
    }
}

impl Default for MitchellNetravaliShader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Host-side mirror of `mn_weight` for the identity check.
    fn mn_weight(d: f32) -> f32 {
        let x = d.abs();
        if x < 1.0 {
            1.5 * x * x * x - 2.5 * x * x + 1.0
        } else if x < 2.0 {
            -0.5 * x * x * x + 2.5 * x * x - 4.0 * x + 2.0
        } else {
            0.0
        }
    }

    #[test]
    fn integer_offsets_make_the_kernel_an_identity() {
        assert!((mn_weight(0.0) - 1.0).abs() < 1e-6);
        for d in [1.0f32, -1.0, 2.0, -2.0] {
            assert!(mn_weight(d).abs() < 1e-6);
        }
    }

    #[test]
    fn weights_partition_unity() {
        for t in [0.0f32, 0.25, 0.5, 0.75] {
            let sum: f32 = (-1..=2).map(|i| mn_weight(i as f32 - t)).sum();
            assert!((sum - 1.0).abs() < 1e-5, "t={t}: {sum}");
        }
    }

    #[test]
    fn source_declares_catmull_rom() {
        let b = ShaderBuilder::new(Dimensions::TwoD, 1024);
        let src =
            MitchellNetravaliShader::source(&b, PixelFormat::Rgba32Float).unwrap();
        assert!(src.contains("fn mn_weight"));
        assert!(src.contains("for (var i = -1; i <= 2;"));
    }
}
