// ============================================================================
// TRANSFORM SHADER — per-pixel expression over one (layer, mip) slice
// ============================================================================

use bytemuck::{Pod, Zeroable};

use crate::builder::{Dimensions, ShaderBuilder};
use crate::context::GpuContext;
use crate::error::TexResult;
use crate::format::PixelFormat;
use crate::size::LayerMipmapSlice;
use crate::texture::Texture;

use super::{
    build_pipeline, dispatch, full_view_dim, sampled_entry, slice_view_dim,
    storage_texture_entry, uniform_entry, DimTable, PipelineBundle,
};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct TransformParams {
    layer: i32,
    _pad: [i32; 3],
}

struct TransformPipeline {
    bundle: PipelineBundle,
    params: crate::buffer::UploadBuffer<TransformParams>,
}

/// Applies `transform(value)` to every texel of one slice, where the body is
/// caller-supplied WGSL. Input and output formats may differ (occupancy
/// initialization maps f32 color to u32 distance).
pub struct TransformShader {
    name: String,
    helpers: String,
    body: String,
    in_format: PixelFormat,
    out_format: PixelFormat,
    pipelines: DimTable<TransformPipeline>,
}

impl TransformShader {
    /// `expression` must evaluate to `vec4<OUT>` given `value: vec4<IN>`,
    /// where IN/OUT are the scalar types of the two formats.
    pub fn new(
        name: &str,
        expression: &str,
        in_format: PixelFormat,
        out_format: PixelFormat,
    ) -> Self {
        Self::with_body(
            name,
            "",
            &format!("return {expression};"),
            in_format,
            out_format,
        )
    }

    /// Full-body form: `body` is the statement list of
    /// `fn transform(value: vec4<IN>) -> vec4<OUT>` and must return;
    /// `helpers` is module-scope WGSL spliced above it.
    pub fn with_body(
        name: &str,
        helpers: &str,
        body: &str,
        in_format: PixelFormat,
        out_format: PixelFormat,
    ) -> Self {
        Self {
            name: name.to_string(),
            helpers: helpers.to_string(),
            body: body.to_string(),
            in_format,
            out_format,
            pipelines: DimTable::new(),
        }
    }

    pub(crate) fn source(&self, builder: &ShaderBuilder) -> TexResult<String> {
        let in_scalar = self.in_format.wgsl_scalar();
        let out_scalar = self.out_format.wgsl_scalar();
        let src_ty = builder.sampled_slice(in_scalar);
        let dst_ty = builder.storage_mip(self.out_format.wgsl_storage_format()?);
        let size_expr = builder.size_of_slice("src_image");
        let load = builder.load_slice("src_image", "coord");
        let store = builder.store_mip("dst_image", "coord", "params.layer", "transform(value)");
        let wg = builder.workgroup_decl();
        let helpers = &self.helpers;
        let body = &self.body;
        Ok(format!(
            r#"@group(0) @binding(0) var src_image: {src_ty};
@group(0) @binding(1) var dst_image: {dst_ty};

struct Params {{
    layer: i32,
    pad0: i32,
    pad1: i32,
    pad2: i32,
}};
@group(0) @binding(2) var<uniform> params: Params;
{helpers}
fn transform(value: vec4<{in_scalar}>) -> vec4<{out_scalar}> {{
    {body}
}}

@compute {wg}
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{
    let coord = vec3<i32>(gid);
    let size = {size_expr};
    if (coord.x >= size.x || coord.y >= size.y || coord.z >= size.z) {{
        return;
    }}
    let value = {load};
    {store};
}}
"#
        ))
    }

    fn pipeline(
        &self,
        ctx: &GpuContext,
        dim: Dimensions,
    ) -> TexResult<std::rc::Rc<TransformPipeline>> {
        self.pipelines.get_or_try_init(dim, || {
            let builder = ShaderBuilder::new(dim, ctx.max_workgroup_invocations);
            let label = format!("transform {} {}", self.name, builder.label_suffix());
            let source = self.source(&builder)?;
            let entries = [
                sampled_entry(0, slice_view_dim(dim), self.in_format.wgsl_scalar() == "u32"),
                storage_texture_entry(1, self.out_format.wgpu_format(), full_view_dim(dim)),
                uniform_entry(2),
            ];
            let bundle = build_pipeline(ctx, &label, &source, &entries, builder)?;
            let params = crate::buffer::UploadBuffer::new(ctx, &label);
            Ok(TransformPipeline { bundle, params })
        })
    }

    /// Run over one (layer, mip) slice; source and destination address the
    /// same slice.
    pub fn run(
        &self,
        ctx: &GpuContext,
        src: &Texture,
        dst: &Texture,
        lm: LayerMipmapSlice,
    ) -> TexResult<()> {
        self.run_slices(ctx, src, lm, dst, lm)
    }

    /// Independent source/destination slices of equal extent.
    pub fn run_slices(
        &self,
        ctx: &GpuContext,
        src: &Texture,
        src_lm: LayerMipmapSlice,
        dst: &Texture,
        dst_lm: LayerMipmapSlice,
    ) -> TexResult<()> {
        assert_eq!(src.format(), self.in_format);
        assert_eq!(dst.format(), self.out_format);
        assert_eq!(src.dim(), dst.dim());
        assert_eq!(src.mip_size(src_lm.mip), dst.mip_size(dst_lm.mip));

        let pipe = self.pipeline(ctx, src.dim())?;
        pipe.params.set(
            ctx,
            &TransformParams {
                layer: dst_lm.layer as i32,
                _pad: [0; 3],
            },
        );
        let groups = pipe.bundle.builder.dispatch_groups(src.mip_size(src_lm.mip));
        dispatch(
            ctx,
            "transform",
            &pipe.bundle,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(src.srv(src_lm)),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(dst.uav(dst_lm.mip)),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: pipe.params.binding(),
                },
            ],
            groups,
        );
        Ok(())
    }

    /// Run over every slice the destination has.
    pub fn run_all(&self, ctx: &GpuContext, src: &Texture, dst: &Texture) -> TexResult<()> {
        for lm in dst.layer_mipmap().slices() {
            self.run(ctx, src, dst, lm)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_splices_expression_and_types() {
        let t = TransformShader::new(
            "occupancy",
            "select(vec4<u32>(0u), vec4<u32>(127u, 0u, 0u, 0u), value.a <= 0.1)",
            PixelFormat::Rgba32Float,
            PixelFormat::R32Uint,
        );
        let b = ShaderBuilder::new(Dimensions::ThreeD, 1024);
        let src = t.source(&b).unwrap();
        assert!(src.contains("var src_image: texture_3d<f32>"));
        assert!(src.contains("var dst_image: texture_storage_3d<r32uint, write>"));
        assert!(src.contains("fn transform(value: vec4<f32>) -> vec4<u32>"));
        assert!(src.contains("return select(vec4<u32>(0u)"));
        assert!(src.contains("@workgroup_size(10, 10, 10)"));
    }

    #[test]
    fn two_d_source_uses_array_storage() {
        let t = TransformShader::new(
            "identity",
            "value",
            PixelFormat::Rgba32Float,
            PixelFormat::Rgba32Float,
        );
        let b = ShaderBuilder::new(Dimensions::TwoD, 1024);
        let src = t.source(&b).unwrap();
        assert!(src.contains("texture_storage_2d_array<rgba32float, write>"));
        assert!(src.contains("textureStore(dst_image, (coord).xy, i32(params.layer)"));
        assert!(src.contains("@workgroup_size(32, 32, 1)"));
        let b_small = ShaderBuilder::new(Dimensions::TwoD, 256);
        let src_small = t.source(&b_small).unwrap();
        assert!(src_small.contains("@workgroup_size(16, 16, 1)"));
    }

    #[test]
    fn helpers_are_spliced_above_the_body() {
        let t = TransformShader::with_body(
            "gamma",
            "fn gamma(v: f32) -> f32 { return pow(v, 2.2); }",
            "return vec4<f32>(gamma(value.x), gamma(value.y), gamma(value.z), value.w);",
            PixelFormat::Rgba32Float,
            PixelFormat::Rgba32Float,
        );
        let b = ShaderBuilder::new(Dimensions::TwoD, 1024);
        let src = t.source(&b).unwrap();
        let helper_at = src.find("fn gamma").unwrap();
        let transform_at = src.find("fn transform").unwrap();
        assert!(helper_at < transform_at);
    }
}
