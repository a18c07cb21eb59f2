// ============================================================================
// EMPTY SPACE SKIPPING — directional min relaxation over a volume
// ============================================================================

use std::cell::RefCell;
use std::rc::Rc;

use bytemuck::{Pod, Zeroable};

use crate::buffer::UploadBuffer;
use crate::builder::{Dimensions, ShaderBuilder};
use crate::context::GpuContext;
use crate::error::TexResult;
use crate::format::PixelFormat;
use crate::pool::TextureCache;
use crate::shader::transform::TransformShader;
use crate::shader::{
    build_pipeline, dispatch, full_view_dim, sampled_entry, slice_view_dim,
    storage_texture_entry, uniform_entry, PipelineBundle,
};
use crate::size::{LayerMipmapCount, LayerMipmapSlice};
use crate::texture::Texture;

/// Distance ceiling; also the encodable maximum, so the round count equals it.
pub const MAX_DISTANCE: u32 = 127;
const ALPHA_THRESHOLD: &str = "0.1";

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RelaxParams {
    dir: [i32; 4],
}

struct RelaxPipeline {
    bundle: PipelineBundle,
    params: UploadBuffer<RelaxParams>,
}

/// Builds a per-voxel "distance to the nearest occupied voxel" field for a
/// volume: voxels with alpha above 0.1 start at 0, everything else at 127,
/// then 127 rounds of one-step min relaxation along each axis propagate the
/// distances outward. Relaxation ping-pongs between the result texture and a
/// pooled scratch volume; nothing is read and written in the same pass.
pub struct EmptySpaceSkippingShader {
    init: TransformShader,
    relax: RefCell<Option<Rc<RelaxPipeline>>>,
}

pub(crate) fn relax_source(builder: &ShaderBuilder, max_distance: u32) -> String {
    let src_ty = builder.sampled_slice("u32");
    let dst_ty = builder.storage_mip("r32uint");
    let wg = builder.workgroup_decl();
    format!(
        r#"@group(0) @binding(0) var src_image: {src_ty};
@group(0) @binding(1) var dst_image: {dst_ty};

struct Params {{
    dir: vec4<i32>,
}};
@group(0) @binding(2) var<uniform> params: Params;

fn neighbor(c: vec3<i32>) -> u32 {{
    let size = vec3<i32>(textureDimensions(src_image));
    if (all(c >= vec3<i32>(0)) && all(c < size)) {{
        return textureLoad(src_image, c, 0).x;
    }}
    return {max_distance}u;
}}

@compute {wg}
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{
    let coord = vec3<i32>(gid);
    let size = vec3<i32>(textureDimensions(src_image));
    if (coord.x >= size.x || coord.y >= size.y || coord.z >= size.z) {{
        return;
    }}
    let here = textureLoad(src_image, coord, 0).x;
    let d = params.dir.xyz;
    var best = min(neighbor(coord + d), neighbor(coord - d)) + 1u;
    best = min(here, best);
    textureStore(dst_image, coord, vec4<u32>(min(best, {max_distance}u), 0u, 0u, 0u));
}}
"#
    )
}

impl EmptySpaceSkippingShader {
    pub fn new() -> Self {
        let init_expr = format!(
            "select(vec4<u32>({MAX_DISTANCE}u, 0u, 0u, 0u), vec4<u32>(0u), value.a > {ALPHA_THRESHOLD})"
        );
        Self {
            init: TransformShader::new(
                "occupancy init",
                &init_expr,
                PixelFormat::Rgba32Float,
                PixelFormat::R32Uint,
            ),
            relax: RefCell::new(None),
        }
    }

    fn relax_pipeline(&self, ctx: &GpuContext) -> TexResult<Rc<RelaxPipeline>> {
        if let Some(p) = self.relax.borrow().as_ref() {
            return Ok(p.clone());
        }
        let dim = Dimensions::ThreeD;
        let builder = ShaderBuilder::new(dim, ctx.max_workgroup_invocations);
        let source = relax_source(&builder, MAX_DISTANCE);
        let entries = [
            sampled_entry(0, slice_view_dim(dim), true),
            storage_texture_entry(1, PixelFormat::R32Uint.wgpu_format(), full_view_dim(dim)),
            uniform_entry(2),
        ];
        let bundle = build_pipeline(ctx, "empty space relax", &source, &entries, builder)?;
        let params = UploadBuffer::new(ctx, "empty space relax");
        let p = Rc::new(RelaxPipeline { bundle, params });
        *self.relax.borrow_mut() = Some(p.clone());
        Ok(p)
    }

    fn relax_pass(
        &self,
        ctx: &GpuContext,
        pipe: &RelaxPipeline,
        src: &Texture,
        dst: &Texture,
        axis: usize,
    ) {
        let mut dir = [0i32; 4];
        dir[axis] = 1;
        pipe.params.set(ctx, &RelaxParams { dir });
        let groups = pipe.bundle.builder.dispatch_groups(src.size());
        let lm = LayerMipmapSlice::MIP0;
        dispatch(
            ctx,
            "empty space relax",
            &pipe.bundle,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(src.srv(lm)),
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

    /// Compute the skip volume for `src` (an Rgba32Float volume, single mip).
    pub fn run(
        &self,
        ctx: &GpuContext,
        cache: &TextureCache,
        src: &Texture,
    ) -> TexResult<Texture> {
        assert!(src.dim().is_3d(), "empty space skipping works on volumes");
        assert_eq!(src.format(), PixelFormat::Rgba32Float);

        let result = Texture::new(
            ctx,
            "skip volume",
            src.size(),
            LayerMipmapCount::ONE,
            PixelFormat::R32Uint,
            Dimensions::ThreeD,
        )?;
        let scratch = cache.lease(
            ctx,
            src.size(),
            LayerMipmapCount::ONE,
            PixelFormat::R32Uint,
            Dimensions::ThreeD,
        )?;

        self.init.run(ctx, src, &result, LayerMipmapSlice::MIP0)?;

        let pipe = self.relax_pipeline(ctx)?;
        let mut cur_is_result = true;
        for round in 0..MAX_DISTANCE {
            for axis in 0..3 {
                let (from, to): (&Texture, &Texture) = if cur_is_result {
                    (&result, &scratch)
                } else {
                    (&scratch, &result)
                };
                self.relax_pass(ctx, &pipe, from, to, axis);
                cur_is_result = !cur_is_result;
            }
            if round % 8 == 7 {
                ctx.wait_idle();
                tracing::debug!(round = round + 1, "empty space relaxation");
            }
        }
        if !cur_is_result {
            scratch.copy_slice_to(ctx, LayerMipmapSlice::MIP0, &result);
        }
        Ok(result)
    }
}

impl Default for EmptySpaceSkippingShader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relax_source_clamps_to_ceiling() {
        let b = ShaderBuilder::new(Dimensions::ThreeD, 256);
        let src = relax_source(&b, MAX_DISTANCE);
        assert!(src.contains("min(best, 127u)"));
        assert!(src.contains("return 127u;")); // out-of-range neighbor
        assert!(src.contains("texture_3d<u32>"));
    }
}
