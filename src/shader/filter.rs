// ============================================================================
// FILTER SHADER — user kernels with packed scalar params & aux textures
// ============================================================================

use crate::buffer::{DownloadBuffer, GpuBuffer};
use crate::builder::{Dimensions, ShaderBuilder};
use crate::context::GpuContext;
use crate::error::TexResult;
use crate::format::PixelFormat;
use crate::size::LayerMipmapSlice;
use crate::texture::Texture;

use super::{
    build_pipeline, dispatch, full_view_dim, sampled_entry, slice_view_dim,
    storage_buffer_entry, storage_texture_entry, uniform_entry, DimTable, PipelineBundle,
};

/// Auxiliary texture bindings start here; 0..3 are source, destination,
/// uniform block and the continue flag.
pub const TEXTURE_BINDING_START: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterParamKind {
    Int,
    Float,
    Bool,
}

/// One declared scalar parameter. Every parameter occupies one i32 slot in
/// the uniform block; floats travel bit-packed and are `bitcast` in WGSL.
#[derive(Debug, Clone)]
pub struct FilterParam {
    pub name: String,
    pub kind: FilterParamKind,
}

impl FilterParam {
    pub fn new(name: &str, kind: FilterParamKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum FilterParamValue {
    Int(i32),
    Float(f32),
    Bool(bool),
}

impl FilterParamValue {
    fn to_bits(self) -> i32 {
        match self {
            FilterParamValue::Int(v) => v,
            FilterParamValue::Float(v) => v.to_bits() as i32,
            FilterParamValue::Bool(v) => v as i32,
        }
    }

    fn kind(&self) -> FilterParamKind {
        match self {
            FilterParamValue::Int(_) => FilterParamKind::Int,
            FilterParamValue::Float(_) => FilterParamKind::Float,
            FilterParamValue::Bool(_) => FilterParamKind::Bool,
        }
    }
}

/// Axis of one pass of a separable filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDirection {
    X,
    Y,
    Z,
}

impl FilterDirection {
    fn one_hot(self) -> [i32; 3] {
        match self {
            FilterDirection::X => [1, 0, 0],
            FilterDirection::Y => [0, 1, 0],
            FilterDirection::Z => [0, 0, 1],
        }
    }
}

/// Per-run arguments.
pub struct FilterArgs<'a> {
    pub params: &'a [FilterParamValue],
    pub textures: &'a [&'a Texture],
    pub direction: Option<FilterDirection>,
    pub iteration: i32,
}

impl Default for FilterArgs<'_> {
    fn default() -> Self {
        FilterArgs {
            params: &[],
            textures: &[],
            direction: None,
            iteration: 0,
        }
    }
}

struct FilterPipeline {
    bundle: PipelineBundle,
    params_buf: wgpu::Buffer,
    flag: GpuBuffer,
    flag_staging: DownloadBuffer,
}

/// A caller-authored per-pixel kernel. The body must define
/// `fn apply_filter(coord: vec3<i32>) -> vec4<f32>` and may use the synthesized
/// helpers: `src_size()`, `load_src(c)`, `load_src_clamped(c)`,
/// `filter_dir()`, `iteration()`, the per-parameter getters `p_{name}()`,
/// `request_iteration()` and the aux bindings `aux_texture0..N-1`.
pub struct FilterShader {
    name: String,
    body: String,
    params: Vec<FilterParam>,
    texture_count: usize,
    separable: bool,
    pipelines: DimTable<FilterPipeline>,
}

impl FilterShader {
    pub fn new(
        name: &str,
        body: &str,
        params: Vec<FilterParam>,
        texture_count: usize,
        separable: bool,
    ) -> Self {
        Self {
            name: name.to_string(),
            body: body.to_string(),
            params,
            texture_count,
            separable,
            pipelines: DimTable::new(),
        }
    }

    fn user_vec4_count(&self) -> usize {
        (self.params.len() + 3) / 4
    }

    fn uniform_size(&self) -> u64 {
        48 + self.user_vec4_count() as u64 * 16
    }

    pub(crate) fn source(&self, builder: &ShaderBuilder) -> String {
        let src_ty = builder.sampled_slice("f32");
        let dst_ty = builder.storage_mip("rgba32float");
        let aux_ty = builder.sampled_full("f32");
        let load = builder.load_slice("src_image", "c");
        let load_clamped = builder.load_slice("src_image", "cc");
        let store = builder.store_mip("dst_image", "coord", "params.layer", "value");
        let wg = builder.workgroup_decl();

        let user_field = if self.params.is_empty() {
            String::new()
        } else {
            format!("    user: array<vec4<i32>, {}>,\n", self.user_vec4_count())
        };

        let mut getters = String::new();
        for (i, p) in self.params.iter().enumerate() {
            let (vec, comp) = (i / 4, ["x", "y", "z", "w"][i % 4]);
            let slot = format!("params.user[{vec}].{comp}");
            let name = &p.name;
            match p.kind {
                FilterParamKind::Int => getters.push_str(&format!(
                    "fn p_{name}() -> i32 {{ return {slot}; }}\n"
                )),
                FilterParamKind::Float => getters.push_str(&format!(
                    "fn p_{name}() -> f32 {{ return bitcast<f32>({slot}); }}\n"
                )),
                FilterParamKind::Bool => getters.push_str(&format!(
                    "fn p_{name}() -> bool {{ return {slot} != 0; }}\n"
                )),
            }
        }

        let mut aux = String::new();
        for i in 0..self.texture_count {
            let binding = TEXTURE_BINDING_START as usize + i;
            aux.push_str(&format!(
                "@group(0) @binding({binding}) var aux_texture{i}: {aux_ty};\n"
            ));
        }

        let body = &self.body;
        format!(
            r#"@group(0) @binding(0) var src_image: {src_ty};
@group(0) @binding(1) var dst_image: {dst_ty};

struct Params {{
    layer: i32,
    level: i32,
    iter: i32,
    pad0: i32,
    size: vec4<i32>,
    dir: vec4<i32>,
{user_field}}};
@group(0) @binding(2) var<uniform> params: Params;
@group(0) @binding(3) var<storage, read_write> continue_flags: array<u32>;
{aux}
fn src_size() -> vec3<i32> {{ return params.size.xyz; }}
fn filter_dir() -> vec3<i32> {{ return params.dir.xyz; }}
fn iteration() -> i32 {{ return params.iter; }}
fn request_iteration() {{ continue_flags[0] = 1u; }}
fn load_src(c: vec3<i32>) -> vec4<f32> {{ return {load}; }}
fn load_src_clamped(c: vec3<i32>) -> vec4<f32> {{
    let cc = clamp(c, vec3<i32>(0), params.size.xyz - vec3<i32>(1));
    return {load_clamped};
}}
{getters}
{body}

@compute {wg}
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{
    let coord = vec3<i32>(gid);
    if (coord.x >= params.size.x || coord.y >= params.size.y || coord.z >= params.size.z) {{
        return;
    }}
    let value = apply_filter(coord);
    {store};
}}
"#
        )
    }

    fn pipeline(
        &self,
        ctx: &GpuContext,
        dim: Dimensions,
    ) -> TexResult<std::rc::Rc<FilterPipeline>> {
        self.pipelines.get_or_try_init(dim, || {
            let builder = ShaderBuilder::new(dim, ctx.max_workgroup_invocations);
            let label = format!("filter {} {}", self.name, builder.label_suffix());
            let source = self.source(&builder);
            let mut entries = vec![
                sampled_entry(0, slice_view_dim(dim), false),
                storage_texture_entry(1, PixelFormat::Rgba32Float.wgpu_format(), full_view_dim(dim)),
                uniform_entry(2),
                storage_buffer_entry(3, false),
            ];
            for i in 0..self.texture_count {
                entries.push(sampled_entry(
                    TEXTURE_BINDING_START + i as u32,
                    full_view_dim(dim),
                    false,
                ));
            }
            let bundle = build_pipeline(ctx, &label, &source, &entries, builder)?;
            let params_buf = ctx.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&label),
                size: self.uniform_size(),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let flag = GpuBuffer::new(ctx, &label, 1);
            let flag_staging = DownloadBuffer::new(ctx, &label, 4);
            Ok(FilterPipeline {
                bundle,
                params_buf,
                flag,
                flag_staging,
            })
        })
    }

    fn pack_uniform(
        &self,
        lm: LayerMipmapSlice,
        size: crate::size::Size3,
        args: &FilterArgs,
    ) -> Vec<i32> {
        assert_eq!(args.params.len(), self.params.len(), "parameter count");
        for (decl, value) in self.params.iter().zip(args.params) {
            assert_eq!(decl.kind, value.kind(), "parameter '{}' kind", decl.name);
        }
        let dir = match (self.separable, args.direction) {
            (true, Some(d)) => d.one_hot(),
            (true, None) => panic!("separable filter needs a direction"),
            (false, None) => [0, 0, 0],
            (false, Some(_)) => panic!("direction given to a non-separable filter"),
        };
        let mut data = vec![
            lm.layer as i32,
            lm.mip as i32,
            args.iteration,
            0,
            size.x as i32,
            size.y as i32,
            size.z as i32,
            0,
            dir[0],
            dir[1],
            dir[2],
            0,
        ];
        for v in args.params {
            data.push(v.to_bits());
        }
        data.resize(12 + self.user_vec4_count() * 4, 0);
        data
    }

    /// Run one pass over a (layer, mip) slice. Returns true when the kernel
    /// requested another iteration.
    pub fn run(
        &self,
        ctx: &GpuContext,
        src: &Texture,
        dst: &Texture,
        lm: LayerMipmapSlice,
        args: &FilterArgs,
    ) -> TexResult<bool> {
        self.run_slices(ctx, src, lm, dst, lm, args)
    }

    /// Like [`run`](Self::run) but with independent source and destination
    /// slices, for passes routed through pooled single-mip intermediates.
    /// The two slices must have the same extent.
    pub fn run_slices(
        &self,
        ctx: &GpuContext,
        src: &Texture,
        src_lm: LayerMipmapSlice,
        dst: &Texture,
        dst_lm: LayerMipmapSlice,
        args: &FilterArgs,
    ) -> TexResult<bool> {
        assert_eq!(args.textures.len(), self.texture_count);
        assert_eq!(src.dim(), dst.dim());
        assert_eq!(src.mip_size(src_lm.mip), dst.mip_size(dst_lm.mip));
        assert_eq!(dst.format(), PixelFormat::Rgba32Float);

        let pipe = self.pipeline(ctx, src.dim())?;
        let size = src.mip_size(src_lm.mip);
        let uniform = self.pack_uniform(dst_lm, size, args);
        ctx.queue
            .write_buffer(&pipe.params_buf, 0, bytemuck::cast_slice(&uniform));
        pipe.flag.upload(ctx, &[0u32]);

        let mut bind = vec![
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
                resource: pipe.params_buf.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: pipe.flag.binding(),
            },
        ];
        for (i, tex) in args.textures.iter().enumerate() {
            bind.push(wgpu::BindGroupEntry {
                binding: TEXTURE_BINDING_START + i as u32,
                resource: wgpu::BindingResource::TextureView(tex.full_view()),
            });
        }
        let groups = pipe.bundle.builder.dispatch_groups(size);
        dispatch(ctx, "filter", &pipe.bundle, &bind, groups);

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("filter flag readback"),
            });
        pipe.flag_staging.copy_from(&mut encoder, pipe.flag.raw(), 4);
        ctx.submit_one(encoder);
        let flags: Vec<u32> = pipe.flag_staging.read(ctx)?;
        Ok(flags[0] != 0)
    }

    /// Re-run the kernel while it keeps requesting iterations, up to
    /// `max_iterations` passes. Source and destination swap roles between
    /// passes via `scratch`.
    pub fn run_iterations(
        &self,
        ctx: &GpuContext,
        src: &Texture,
        dst: &Texture,
        scratch: &Texture,
        lm: LayerMipmapSlice,
        params: &[FilterParamValue],
        textures: &[&Texture],
        max_iterations: i32,
    ) -> TexResult<i32> {
        assert!(!self.separable, "iterations only apply to non-separable kernels");
        assert!(max_iterations > 0);
        let mut from = src;
        let mut pair = (dst, scratch);
        let mut iteration = 0;
        loop {
            let args = FilterArgs {
                params,
                textures,
                direction: None,
                iteration,
            };
            let again = self.run(ctx, from, pair.0, lm, &args)?;
            iteration += 1;
            if !again || iteration >= max_iterations {
                break;
            }
            from = pair.0;
            pair = (pair.1, pair.0);
        }
        // odd pass counts end in dst, even ones in scratch
        if iteration % 2 == 0 {
            scratch.copy_slice_to(ctx, lm, dst);
        }
        tracing::debug!(iterations = iteration, filter = %self.name, "iteration chain done");
        Ok(iteration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_getters_pack_four_per_vec() {
        let f = FilterShader::new(
            "blur",
            "fn apply_filter(coord: vec3<i32>) -> vec4<f32> { return load_src(coord) * p_strength(); }",
            vec![
                FilterParam::new("radius", FilterParamKind::Int),
                FilterParam::new("strength", FilterParamKind::Float),
                FilterParam::new("wrap", FilterParamKind::Bool),
                FilterParam::new("mode", FilterParamKind::Int),
                FilterParam::new("bias", FilterParamKind::Float),
            ],
            0,
            false,
        );
        let b = ShaderBuilder::new(Dimensions::TwoD, 1024);
        let src = f.source(&b);
        assert!(src.contains("fn p_radius() -> i32 { return params.user[0].x; }"));
        assert!(src.contains("fn p_strength() -> f32 { return bitcast<f32>(params.user[0].y); }"));
        assert!(src.contains("fn p_wrap() -> bool { return params.user[0].z != 0; }"));
        assert!(src.contains("fn p_bias() -> f32 { return bitcast<f32>(params.user[1].x); }"));
        assert!(src.contains("array<vec4<i32>, 2>"));
    }

    #[test]
    fn aux_textures_start_at_fixed_binding() {
        let f = FilterShader::new(
            "mask",
            "fn apply_filter(coord: vec3<i32>) -> vec4<f32> { return textureLoad(aux_texture0, coord.xy, 0, 0); }",
            vec![],
            2,
            false,
        );
        let b = ShaderBuilder::new(Dimensions::TwoD, 1024);
        let src = f.source(&b);
        assert!(src.contains("@binding(4) var aux_texture0:"));
        assert!(src.contains("@binding(5) var aux_texture1:"));
        // no user params -> no user array in the block
        assert!(!src.contains("user:"));
    }

    #[test]
    fn uniform_packing_layout() {
        let f = FilterShader::new(
            "t",
            "fn apply_filter(coord: vec3<i32>) -> vec4<f32> { return load_src(coord); }",
            vec![
                FilterParam::new("a", FilterParamKind::Int),
                FilterParam::new("b", FilterParamKind::Float),
            ],
            0,
            true,
        );
        let packed = f.pack_uniform(
            LayerMipmapSlice::new(1, 2),
            crate::size::Size3::new(8, 4, 1),
            &FilterArgs {
                params: &[FilterParamValue::Int(7), FilterParamValue::Float(0.5)],
                textures: &[],
                direction: Some(FilterDirection::Y),
                iteration: 3,
            },
        );
        assert_eq!(&packed[0..4], &[1, 2, 3, 0]);
        assert_eq!(&packed[4..8], &[8, 4, 1, 0]);
        assert_eq!(&packed[8..12], &[0, 1, 0, 0]);
        assert_eq!(packed[12], 7);
        assert_eq!(packed[13], 0.5f32.to_bits() as i32);
        assert_eq!(packed.len(), 16);
    }
}
