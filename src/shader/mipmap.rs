// ============================================================================
// MIPMAP SHADER — box-filter pyramid generation
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
use crate::size::{LayerMipmapCount, LayerMipmapSlice};
use crate::texture::Texture;

use super::{
    build_pipeline, dispatch, full_view_dim, sampled_entry, slice_view_dim,
    storage_texture_entry, uniform_entry, PipelineBundle,
};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct MipParams {
    // xyz = destination extent, w = layer
    dst_size: [i32; 4],
    src_size: [i32; 4],
}

struct MipPipeline {
    bundle: PipelineBundle,
    params: UploadBuffer<MipParams>,
}

/// Builds each mip level as the box average of the level above: 2×2 texels
/// for images, 2×2×2 for volumes, with clamped taps on odd-sized levels.
pub struct MipmapShader {
    pipelines: RefCell<HashMap<(Dimensions, PixelFormat), Rc<MipPipeline>>>,
}

impl MipmapShader {
    pub fn new() -> Self {
        Self {
            pipelines: RefCell::new(HashMap::new()),
        }
    }

    pub(crate) fn source(builder: &ShaderBuilder, format: PixelFormat) -> TexResult<String> {
        let src_ty = builder.sampled_slice("f32");
        let dst_ty = builder.storage_mip(format.wgsl_storage_format()?);
        let load = builder.load_slice("src_image", "sc");
        let store = builder.store_mip("dst_image", "coord", "params.dst_size.w", "sum / count");
        let wg = builder.workgroup_decl();
        let (z_taps, tap_count) = if builder.dim.is_3d() {
            ("2", "8.0")
        } else {
            ("1", "4.0")
        };
        Ok(format!(
            r#"@group(0) @binding(0) var src_image: {src_ty};
@group(0) @binding(1) var dst_image: {dst_ty};

struct Params {{
    dst_size: vec4<i32>,
    src_size: vec4<i32>,
}};
@group(0) @binding(2) var<uniform> params: Params;

@compute {wg}
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{
    let coord = vec3<i32>(gid);
    if (coord.x >= params.dst_size.x || coord.y >= params.dst_size.y || coord.z >= params.dst_size.z) {{
        return;
    }}
    var sum = vec4<f32>(0.0);
    let count = {tap_count};
    for (var dz = 0; dz < {z_taps}; dz = dz + 1) {{
        for (var dy = 0; dy < 2; dy = dy + 1) {{
            for (var dx = 0; dx < 2; dx = dx + 1) {{
                let sc = min(
                    coord * 2 + vec3<i32>(dx, dy, dz),
                    params.src_size.xyz - vec3<i32>(1),
                );
                sum = sum + {load};
            }}
        }}
    }}
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
    ) -> TexResult<Rc<MipPipeline>> {
        let key = (dim, format);
        if let Some(p) = self.pipelines.borrow().get(&key) {
            return Ok(p.clone());
        }
        let builder = ShaderBuilder::new(dim, ctx.max_workgroup_invocations);
        let label = format!("mipmap {}", builder.label_suffix());
        let source = Self::source(&builder, format)?;
        let entries = [
            sampled_entry(0, slice_view_dim(dim), false),
            storage_texture_entry(1, format.wgpu_format(), full_view_dim(dim)),
            uniform_entry(2),
        ];
        let bundle = build_pipeline(ctx, &label, &source, &entries, builder)?;
        let params = UploadBuffer::new(ctx, &label);
        let pipe = Rc::new(MipPipeline { bundle, params });
        self.pipelines.borrow_mut().insert(key, pipe.clone());
        Ok(pipe)
    }

    /// Recompute levels 1.. of `tex` from its base level.
    pub fn regenerate(&self, ctx: &GpuContext, tex: &Texture) -> TexResult<()> {
        let lm = tex.layer_mipmap();
        let pipe = self.pipeline(ctx, tex.dim(), tex.format())?;
        for mip in 1..lm.mips {
            let dst_size = tex.mip_size(mip);
            let src_size = tex.mip_size(mip - 1);
            for layer in 0..lm.layers {
                pipe.params.set(
                    ctx,
                    &MipParams {
                        dst_size: [
                            dst_size.x as i32,
                            dst_size.y as i32,
                            dst_size.z as i32,
                            layer as i32,
                        ],
                        src_size: [src_size.x as i32, src_size.y as i32, src_size.z as i32, 0],
                    },
                );
                let groups = pipe.bundle.builder.dispatch_groups(dst_size);
                dispatch(
                    ctx,
                    "mipmap",
                    &pipe.bundle,
                    &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(
                                tex.srv(LayerMipmapSlice::new(layer, mip - 1)),
                            ),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::TextureView(tex.uav(mip)),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: pipe.params.binding(),
                        },
                    ],
                    groups,
                );
            }
        }
        Ok(())
    }

    /// A new texture with `mips` levels: the base is copied from `src` and
    /// the rest are box-filtered down from it.
    pub fn generate_mipmap_levels(
        &self,
        ctx: &GpuContext,
        src: &Texture,
        mips: u32,
    ) -> TexResult<Texture> {
        assert!(mips >= 1 && mips <= src.size().max_mip_levels());
        let dst = Texture::new(
            ctx,
            "mipmapped",
            src.size(),
            LayerMipmapCount::new(src.layer_mipmap().layers, mips),
            src.format(),
            src.dim(),
        )?;
        src.copy_base_to(ctx, &dst);
        self.regenerate(ctx, &dst)?;
        Ok(dst)
    }
}

impl Default for MipmapShader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_d_averages_eight_taps() {
        let b = ShaderBuilder::new(Dimensions::ThreeD, 256);
        let src = MipmapShader::source(&b, PixelFormat::Rgba32Float).unwrap();
        assert!(src.contains("let count = 8.0;"));
        assert!(src.contains("dz < 2"));
    }

    #[test]
    fn two_d_averages_four_taps() {
        let b = ShaderBuilder::new(Dimensions::TwoD, 1024);
        let src = MipmapShader::source(&b, PixelFormat::Rgba32Float).unwrap();
        assert!(src.contains("let count = 4.0;"));
        assert!(src.contains("dz < 1"));
    }
}
