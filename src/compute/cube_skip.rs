// ============================================================================
// CUBE SKIPPING — six-neighbor min relaxation over a volume
// ============================================================================

use std::cell::RefCell;
use std::rc::Rc;

use crate::builder::{Dimensions, ShaderBuilder};
use crate::context::GpuContext;
use crate::error::TexResult;
use crate::format::PixelFormat;
use crate::pool::TextureCache;
use crate::shader::transform::TransformShader;
use crate::shader::{
    build_pipeline, dispatch, full_view_dim, sampled_entry, slice_view_dim,
    storage_texture_entry, PipelineBundle,
};
use crate::size::{LayerMipmapCount, LayerMipmapSlice};
use crate::texture::Texture;

/// Distance ceiling for the 8-bit-range variant.
pub const MAX_DISTANCE: u32 = 255;

/// One full relaxation visits both directions of every axis at once, so the
/// worst case needs `MAX_DISTANCE - 1` rounds to converge.
const ROUNDS: u32 = MAX_DISTANCE - 1;

/// Occupancy for cube skipping counts any non-zero alpha.
const INIT_EXPR: &str = "select(vec4<u32>(255u, 0u, 0u, 0u), vec4<u32>(0u), value.a > 0.0)";

pub(crate) fn relax_source(builder: &ShaderBuilder) -> String {
    let src_ty = builder.sampled_slice("u32");
    let dst_ty = builder.storage_mip("r32uint");
    let wg = builder.workgroup_decl();
    format!(
        r#"@group(0) @binding(0) var src_image: {src_ty};
@group(0) @binding(1) var dst_image: {dst_ty};

fn neighbor(c: vec3<i32>) -> u32 {{
    let size = vec3<i32>(textureDimensions(src_image));
    if (all(c >= vec3<i32>(0)) && all(c < size)) {{
        return textureLoad(src_image, c, 0).x;
    }}
    return {MAX_DISTANCE}u;
}}

@compute {wg}
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{
    let coord = vec3<i32>(gid);
    let size = vec3<i32>(textureDimensions(src_image));
    if (coord.x >= size.x || coord.y >= size.y || coord.z >= size.z) {{
        return;
    }}
    let here = textureLoad(src_image, coord, 0).x;
    var best = neighbor(coord + vec3<i32>(1, 0, 0));
    best = min(best, neighbor(coord - vec3<i32>(1, 0, 0)));
    best = min(best, neighbor(coord + vec3<i32>(0, 1, 0)));
    best = min(best, neighbor(coord - vec3<i32>(0, 1, 0)));
    best = min(best, neighbor(coord + vec3<i32>(0, 0, 1)));
    best = min(best, neighbor(coord - vec3<i32>(0, 0, 1)));
    best = min(here, best + 1u);
    textureStore(dst_image, coord, vec4<u32>(min(best, {MAX_DISTANCE}u), 0u, 0u, 0u));
}}
"#
    )
}

/// Manhattan-metric distance field over a volume: occupied voxels (alpha
/// above zero) are 0, everything else the clamped distance to the nearest
/// occupied voxel. Relaxes all six axis neighbors per round with explicit
/// ping-pong; occupied voxels rewrite their 0 every round, so both textures
/// stay fully defined.
pub struct CubeSkippingShader {
    init: TransformShader,
    relax: RefCell<Option<Rc<PipelineBundle>>>,
}

impl CubeSkippingShader {
    pub fn new() -> Self {
        Self {
            init: TransformShader::new(
                "cube occupancy init",
                INIT_EXPR,
                PixelFormat::Rgba32Float,
                PixelFormat::R32Uint,
            ),
            relax: RefCell::new(None),
        }
    }

    fn relax_pipeline(&self, ctx: &GpuContext) -> TexResult<Rc<PipelineBundle>> {
        if let Some(p) = self.relax.borrow().as_ref() {
            return Ok(p.clone());
        }
        let dim = Dimensions::ThreeD;
        let builder = ShaderBuilder::new(dim, ctx.max_workgroup_invocations);
        let source = relax_source(&builder);
        let entries = [
            sampled_entry(0, slice_view_dim(dim), true),
            storage_texture_entry(1, PixelFormat::R32Uint.wgpu_format(), full_view_dim(dim)),
        ];
        let bundle = build_pipeline(ctx, "cube skip relax", &source, &entries, builder)?;
        let p = Rc::new(bundle);
        *self.relax.borrow_mut() = Some(p.clone());
        Ok(p)
    }

    /// Compute the cube-skip volume for `src` (an Rgba32Float volume).
    pub fn run(
        &self,
        ctx: &GpuContext,
        cache: &TextureCache,
        src: &Texture,
    ) -> TexResult<Texture> {
        assert!(src.dim().is_3d(), "cube skipping works on volumes");
        assert_eq!(src.format(), PixelFormat::Rgba32Float);

        let result = Texture::new(
            ctx,
            "cube skip volume",
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
        let lm = LayerMipmapSlice::MIP0;
        let mut cur_is_result = true;
        for round in 0..ROUNDS {
            let (from, to): (&Texture, &Texture) = if cur_is_result {
                (&result, &scratch)
            } else {
                (&scratch, &result)
            };
            let groups = pipe.builder.dispatch_groups(src.size());
            dispatch(
                ctx,
                "cube skip relax",
                &pipe,
                &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(from.srv(lm)),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(to.uav(0)),
                    },
                ],
                groups,
            );
            cur_is_result = !cur_is_result;
            if round % 32 == 31 {
                ctx.wait_idle();
                tracing::debug!(round = round + 1, "cube skip relaxation");
            }
        }
        if !cur_is_result {
            scratch.copy_slice_to(ctx, lm, &result);
        }
        Ok(result)
    }
}

impl Default for CubeSkippingShader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relax_source_visits_six_neighbors() {
        let b = ShaderBuilder::new(Dimensions::ThreeD, 1024);
        let src = relax_source(&b);
        assert_eq!(src.matches("neighbor(coord ").count(), 6);
        assert!(src.contains("min(best, 255u)"));
    }

    #[test]
    fn init_marks_any_nonzero_alpha() {
        assert!(INIT_EXPR.contains("value.a > 0.0"));
        assert!(INIT_EXPR.contains("255u"));
    }
}
