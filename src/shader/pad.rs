// ============================================================================
// PADDING SHADER — grow the canvas with a border fill policy
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

/// What the padded border is filled with. `Clamp` repeats the nearest edge
/// texel; the policy lives in the shader because border-color samplers are a
/// native-only wgpu feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    Black,
    White,
    Transparent,
    Clamp,
}

impl FillMode {
    fn index(self) -> i32 {
        match self {
            FillMode::Black => 0,
            FillMode::White => 1,
            FillMode::Transparent => 2,
            FillMode::Clamp => 3,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct PadParams {
    // xyz = translation of the source inside the destination, w = layer
    offset: [i32; 4],
    // xyz = destination extent, w = fill mode
    size: [i32; 4],
    src_size: [i32; 4],
}

struct PadPipeline {
    bundle: PipelineBundle,
    params: UploadBuffer<PadParams>,
}

/// Pads a texture to a larger extent, placing the source at an offset and
/// filling the border per [`FillMode`]. Produces a single-mip texture with
/// the source's layer count and format.
pub struct PaddingShader {
    pipelines: RefCell<HashMap<(Dimensions, PixelFormat), Rc<PadPipeline>>>,
}

impl PaddingShader {
    pub fn new() -> Self {
        Self {
            pipelines: RefCell::new(HashMap::new()),
        }
    }

    pub(crate) fn source(builder: &ShaderBuilder, format: PixelFormat) -> TexResult<String> {
        let scalar = format.wgsl_scalar();
        let src_ty = builder.sampled_slice(scalar);
        let dst_ty = builder.storage_mip(format.wgsl_storage_format()?);
        let load = builder.load_slice("src_image", "sc");
        let store = builder.store_mip("dst_image", "coord", "params.offset.w", "value");
        let wg = builder.workgroup_decl();
        Ok(format!(
            r#"@group(0) @binding(0) var src_image: {src_ty};
@group(0) @binding(1) var dst_image: {dst_ty};

struct Params {{
    offset: vec4<i32>,
    size: vec4<i32>,
    src_size: vec4<i32>,
}};
@group(0) @binding(2) var<uniform> params: Params;

fn sample_padded(c: vec3<i32>) -> vec4<{scalar}> {{
    let inside = all(c >= vec3<i32>(0)) && all(c < params.src_size.xyz);
    let mode = params.size.w;
    if (inside || mode == 3) {{
        let sc = clamp(c, vec3<i32>(0), params.src_size.xyz - vec3<i32>(1));
        return {load};
    }}
    if (mode == 0) {{
        return vec4<{scalar}>(vec4<f32>(0.0, 0.0, 0.0, 1.0));
    }}
    if (mode == 1) {{
        return vec4<{scalar}>(vec4<f32>(1.0));
    }}
    return vec4<{scalar}>(vec4<f32>(0.0));
}}

@compute {wg}
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{
    let coord = vec3<i32>(gid);
    if (coord.x >= params.size.x || coord.y >= params.size.y || coord.z >= params.size.z) {{
        return;
    }}
    let value = sample_padded(coord - params.offset.xyz);
    {store};
}}
"#
        ))
    }

    fn pipeline(
        &self,
        ctx: &GpuContext,
        dim: Dimensions,
        format: PixelFormat,
    ) -> TexResult<Rc<PadPipeline>> {
        let key = (dim, format);
        if let Some(p) = self.pipelines.borrow().get(&key) {
            return Ok(p.clone());
        }
        let builder = ShaderBuilder::new(dim, ctx.max_workgroup_invocations);
        let label = format!("padding {}", builder.label_suffix());
        let source = Self::source(&builder, format)?;
        let entries = [
            sampled_entry(0, slice_view_dim(dim), format.wgsl_scalar() == "u32"),
            storage_texture_entry(1, format.wgpu_format(), full_view_dim(dim)),
            uniform_entry(2),
        ];
        let bundle = build_pipeline(ctx, &label, &source, &entries, builder)?;
        let params = UploadBuffer::new(ctx, &label);
        let pipe = Rc::new(PadPipeline { bundle, params });
        self.pipelines.borrow_mut().insert(key, pipe.clone());
        Ok(pipe)
    }

    /// Pad `src` (base mip of each layer) by `before` texels on the low side
    /// of each axis and `after` on the high side.
    pub fn pad(
        &self,
        ctx: &GpuContext,
        src: &Texture,
        before: Size3,
        after: Size3,
        mode: FillMode,
    ) -> TexResult<Texture> {
        let src_size = src.size();
        let dst_size = Size3::new(
            src_size.x + before.x + after.x,
            src_size.y + before.y + after.y,
            src_size.z + before.z + after.z,
        );
        let layers = src.layer_mipmap().layers;
        let dst = Texture::new(
            ctx,
            "padded",
            dst_size,
            LayerMipmapCount::new(layers, 1),
            src.format(),
            src.dim(),
        )?;
        let pipe = self.pipeline(ctx, src.dim(), src.format())?;

        for layer in 0..layers {
            pipe.params.set(
                ctx,
                &PadParams {
                    offset: [
                        before.x as i32,
                        before.y as i32,
                        before.z as i32,
                        layer as i32,
                    ],
                    size: [
                        dst_size.x as i32,
                        dst_size.y as i32,
                        dst_size.z as i32,
                        mode.index(),
                    ],
                    src_size: [src_size.x as i32, src_size.y as i32, src_size.z as i32, 0],
                },
            );
            let groups = pipe.bundle.builder.dispatch_groups(dst_size);
            dispatch(
                ctx,
                "padding",
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
        Ok(dst)
    }
}

impl Default for PaddingShader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_modes_cover_all_branches() {
        let b = ShaderBuilder::new(Dimensions::TwoD, 1024);
        let src = PaddingShader::source(&b, PixelFormat::Rgba32Float).unwrap();
        assert!(src.contains("mode == 3")); // clamp reuses the sample path
        assert!(src.contains("vec4<f32>(0.0, 0.0, 0.0, 1.0)")); // black
        assert!(src.contains("vec4<f32>(1.0)")); // white
    }
}
