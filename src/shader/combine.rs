// ============================================================================
// IMAGE COMBINE SHADER — N-source color/alpha formula evaluation
// ============================================================================

use bytemuck::{Pod, Zeroable};

use crate::builder::{Dimensions, ShaderBuilder};
use crate::context::GpuContext;
use crate::error::TexResult;
use crate::format::PixelFormat;
use crate::texture::Texture;

use super::{
    build_pipeline, dispatch, full_view_dim, sampled_entry, storage_texture_entry,
    uniform_entry, DimTable, PipelineBundle,
};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct CombineParams {
    layer: i32,
    level: i32,
    _pad: [i32; 2],
    size: [i32; 4],
}

struct CombinePipeline {
    bundle: PipelineBundle,
    params: crate::buffer::UploadBuffer<CombineParams>,
}

/// Evaluates a color formula and an alpha formula over N source images and
/// writes `vec4(color.rgb, alpha.a)` into every slice of the destination.
///
/// Formulas are WGSL expressions over the synthesized `GetTexture{i}()`
/// getters plus the comparison helpers (`fequal`, `fbigger`, `fsmaller`,
/// `fbiggereq`, `fsmallereq`) and the splat constructors `f4`/`f3`/`f2`.
pub struct ImageCombineShader {
    name: String,
    num_images: usize,
    color_formula: String,
    alpha_formula: String,
    pipelines: DimTable<CombinePipeline>,
}

/// Per-component comparison and splat helpers available to formulas.
const FORMULA_HELPERS: &str = r#"
fn fequal(a: vec4<f32>, b: vec4<f32>) -> vec4<f32> {
    return select(vec4<f32>(0.0), vec4<f32>(1.0), a == b);
}
fn fbigger(a: vec4<f32>, b: vec4<f32>) -> vec4<f32> {
    return select(vec4<f32>(0.0), vec4<f32>(1.0), a > b);
}
fn fsmaller(a: vec4<f32>, b: vec4<f32>) -> vec4<f32> {
    return select(vec4<f32>(0.0), vec4<f32>(1.0), a < b);
}
fn fbiggereq(a: vec4<f32>, b: vec4<f32>) -> vec4<f32> {
    return select(vec4<f32>(0.0), vec4<f32>(1.0), a >= b);
}
fn fsmallereq(a: vec4<f32>, b: vec4<f32>) -> vec4<f32> {
    return select(vec4<f32>(0.0), vec4<f32>(1.0), a <= b);
}
fn f4(v: f32) -> vec4<f32> { return vec4<f32>(v); }
fn f3(v: f32) -> vec3<f32> { return vec3<f32>(v); }
fn f2(v: f32) -> vec2<f32> { return vec2<f32>(v); }
"#;

impl ImageCombineShader {
    pub fn new(name: &str, num_images: usize, color_formula: &str, alpha_formula: &str) -> Self {
        assert!(num_images > 0);
        Self {
            name: name.to_string(),
            num_images,
            color_formula: color_formula.to_string(),
            alpha_formula: alpha_formula.to_string(),
            pipelines: DimTable::new(),
        }
    }

    pub(crate) fn source(&self, builder: &ShaderBuilder) -> String {
        let sampled_ty = builder.sampled_full("f32");
        let mut bindings = String::new();
        let mut getters = String::new();
        for i in 0..self.num_images {
            bindings.push_str(&format!(
                "@group(0) @binding({i}) var texture{i}: {sampled_ty};\n"
            ));
            let load = builder.load_full(
                &format!("texture{i}"),
                "pixel_coord",
                "params.layer",
                "params.level",
            );
            getters.push_str(&format!(
                "fn GetTexture{i}() -> vec4<f32> {{ return {load}; }}\n"
            ));
        }
        let dst_binding = self.num_images;
        let uniform_binding = self.num_images + 1;
        let dst_ty = builder.storage_mip("rgba32float");
        let store = builder.store_mip(
            "dst_image",
            "pixel_coord",
            "params.layer",
            "vec4<f32>(color.rgb, alpha.a)",
        );
        let wg = builder.workgroup_decl();
        let color = &self.color_formula;
        let alpha = &self.alpha_formula;
        format!(
            r#"{bindings}@group(0) @binding({dst_binding}) var dst_image: {dst_ty};

struct Params {{
    layer: i32,
    level: i32,
    pad0: i32,
    pad1: i32,
    size: vec4<i32>,
}};
@group(0) @binding({uniform_binding}) var<uniform> params: Params;

var<private> pixel_coord: vec3<i32>;
{FORMULA_HELPERS}
{getters}
fn combine_color() -> vec4<f32> {{
    return {color};
}}

fn combine_alpha() -> vec4<f32> {{
    return {alpha};
}}

@compute {wg}
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{
    let coord = vec3<i32>(gid);
    if (coord.x >= params.size.x || coord.y >= params.size.y || coord.z >= params.size.z) {{
        return;
    }}
    pixel_coord = coord;
    let color = combine_color();
    let alpha = combine_alpha();
    {store};
}}
"#
        )
    }

    fn pipeline(
        &self,
        ctx: &GpuContext,
        dim: Dimensions,
    ) -> TexResult<std::rc::Rc<CombinePipeline>> {
        self.pipelines.get_or_try_init(dim, || {
            let builder = ShaderBuilder::new(dim, ctx.max_workgroup_invocations);
            let label = format!("combine {} {}", self.name, builder.label_suffix());
            let source = self.source(&builder);
            let mut entries = Vec::with_capacity(self.num_images + 2);
            for i in 0..self.num_images {
                entries.push(sampled_entry(i as u32, full_view_dim(dim), false));
            }
            entries.push(storage_texture_entry(
                self.num_images as u32,
                PixelFormat::Rgba32Float.wgpu_format(),
                full_view_dim(dim),
            ));
            entries.push(uniform_entry(self.num_images as u32 + 1));
            let bundle = build_pipeline(ctx, &label, &source, &entries, builder)?;
            let params = crate::buffer::UploadBuffer::new(ctx, &label);
            Ok(CombinePipeline { bundle, params })
        })
    }

    /// Evaluate the formulas into every (layer, mip) slice of `dst`. All
    /// sources must share the destination's extent and layer/mip layout.
    pub fn run(&self, ctx: &GpuContext, srcs: &[&Texture], dst: &Texture) -> TexResult<()> {
        assert_eq!(srcs.len(), self.num_images);
        assert_eq!(dst.format(), PixelFormat::Rgba32Float);
        for src in srcs {
            assert_eq!(src.size(), dst.size());
            assert_eq!(src.layer_mipmap(), dst.layer_mipmap());
            assert_eq!(src.dim(), dst.dim());
        }

        let pipe = self.pipeline(ctx, dst.dim())?;
        for lm in dst.layer_mipmap().slices() {
            let size = dst.mip_size(lm.mip);
            pipe.params.set(
                ctx,
                &CombineParams {
                    layer: lm.layer as i32,
                    level: lm.mip as i32,
                    _pad: [0; 2],
                    size: [size.x as i32, size.y as i32, size.z as i32, 0],
                },
            );
            let mut bind = Vec::with_capacity(self.num_images + 2);
            for (i, src) in srcs.iter().enumerate() {
                bind.push(wgpu::BindGroupEntry {
                    binding: i as u32,
                    resource: wgpu::BindingResource::TextureView(src.full_view()),
                });
            }
            bind.push(wgpu::BindGroupEntry {
                binding: self.num_images as u32,
                resource: wgpu::BindingResource::TextureView(dst.uav(lm.mip)),
            });
            bind.push(wgpu::BindGroupEntry {
                binding: self.num_images as u32 + 1,
                resource: pipe.params.binding(),
            });
            let groups = pipe.bundle.builder.dispatch_groups(size);
            dispatch(ctx, "combine", &pipe.bundle, &bind, groups);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_declares_one_binding_per_image() {
        let c = ImageCombineShader::new(
            "diff",
            2,
            "abs(GetTexture0() - GetTexture1())",
            "GetTexture0()",
        );
        let b = ShaderBuilder::new(Dimensions::TwoD, 1024);
        let src = c.source(&b);
        assert!(src.contains("@binding(0) var texture0: texture_2d_array<f32>"));
        assert!(src.contains("@binding(1) var texture1: texture_2d_array<f32>"));
        assert!(src.contains("@binding(2) var dst_image:"));
        assert!(src.contains("@binding(3) var<uniform> params"));
        assert!(src.contains("fn GetTexture1()"));
        assert!(src.contains("abs(GetTexture0() - GetTexture1())"));
    }

    #[test]
    fn helpers_are_present() {
        let c = ImageCombineShader::new("t", 1, "GetTexture0()", "f4(1.0)");
        let b = ShaderBuilder::new(Dimensions::ThreeD, 256);
        let src = c.source(&b);
        for helper in ["fequal", "fbigger", "fsmaller", "fbiggereq", "fsmallereq"] {
            assert!(src.contains(&format!("fn {helper}(")), "missing {helper}");
        }
        assert!(src.contains("texture_3d<f32>"));
    }
}
