// ============================================================================
// STATISTICS — min/max/avg over derived channels via ping-pong halving
// ============================================================================

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use bytemuck::{Pod, Zeroable};

use crate::buffer::UploadBuffer;
use crate::builder::{Dimensions, ShaderBuilder, SRGB_FUNCTIONS};
use crate::context::GpuContext;
use crate::error::TexResult;
use crate::format::PixelFormat;
use crate::pool::TextureCache;
use crate::shader::pixel_value::PixelValueShader;
use crate::shader::transform::TransformShader;
use crate::shader::{
    build_pipeline, dispatch, full_view_dim, sampled_entry, slice_view_dim,
    storage_texture_entry, uniform_entry, PipelineBundle,
};
use crate::size::{LayerMipmapCount, LayerMipmapSlice, Size3};
use crate::texture::Texture;

/// Derived scalar a statistic is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatChannel {
    /// Linear-space luminance (Rec. 709 primaries).
    Luminance,
    /// Gamma-space luma (Rec. 601 weights on sRGB-encoded values).
    Luma,
    /// CIE lightness of the linear luminance, 0..100.
    Lightness,
    Alpha,
    /// Plain average of the color channels.
    Uniform,
}

impl StatChannel {
    pub const ALL: [StatChannel; 5] = [
        StatChannel::Luminance,
        StatChannel::Luma,
        StatChannel::Lightness,
        StatChannel::Alpha,
        StatChannel::Uniform,
    ];

    fn expr(self) -> &'static str {
        match self {
            StatChannel::Luminance => "dot(v.rgb, vec3<f32>(0.2125, 0.7154, 0.0721))",
            StatChannel::Luma => "dot(to_srgb(v).rgb, vec3<f32>(0.299, 0.587, 0.114))",
            StatChannel::Lightness => {
                "max(116.0 * pow(dot(v.rgb, vec3<f32>(0.2125, 0.7154, 0.0721)), 1.0 / 3.0) - 16.0, 0.0)"
            }
            StatChannel::Alpha => "v.a",
            StatChannel::Uniform => "dot(v.rgb, vec3<f32>(1.0 / 3.0))",
        }
    }

    fn name(self) -> &'static str {
        match self {
            StatChannel::Luminance => "luminance",
            StatChannel::Luma => "luma",
            StatChannel::Lightness => "lightness",
            StatChannel::Alpha => "alpha",
            StatChannel::Uniform => "uniform",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CombineOp {
    Min,
    Max,
    Sum,
}

impl CombineOp {
    fn expr(self) -> &'static str {
        match self {
            CombineOp::Min => "min(a, b)",
            CombineOp::Max => "max(a, b)",
            CombineOp::Sum => "a + b",
        }
    }
}

/// Min/max/avg of one channel over one (layer, mip) slice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelStats {
    pub min: f32,
    pub max: f32,
    pub avg: f32,
}

/// All channels of one slice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Statistics {
    pub luminance: ChannelStats,
    pub luma: ChannelStats,
    pub lightness: ChannelStats,
    pub alpha: ChannelStats,
    pub uniform: ChannelStats,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct HalveParams {
    // xyz = halving axis one-hot
    dir: [i32; 4],
    dst_size: [i32; 4],
    src_size: [i32; 4],
}

struct HalvePipeline {
    bundle: PipelineBundle,
    params: UploadBuffer<HalveParams>,
}

pub(crate) fn halve_source(builder: &ShaderBuilder, op_expr: &str) -> String {
    let src_ty = builder.sampled_slice("f32");
    let dst_ty = builder.storage_mip("rgba32float");
    let load_a = builder.load_slice("src_image", "sc");
    let load_b = builder.load_slice("src_image", "sc2");
    let store = builder.store_mip("dst_image", "coord", "0", "v");
    let wg = builder.workgroup_decl();
    format!(
        r#"@group(0) @binding(0) var src_image: {src_ty};
@group(0) @binding(1) var dst_image: {dst_ty};

struct Params {{
    dir: vec4<i32>,
    dst_size: vec4<i32>,
    src_size: vec4<i32>,
}};
@group(0) @binding(2) var<uniform> params: Params;

fn combine(a: vec4<f32>, b: vec4<f32>) -> vec4<f32> {{
    return {op_expr};
}}

@compute {wg}
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{
    let coord = vec3<i32>(gid);
    if (coord.x >= params.dst_size.x || coord.y >= params.dst_size.y || coord.z >= params.dst_size.z) {{
        return;
    }}
    let d = params.dir.xyz;
    let sc = coord + coord * d;
    var v = {load_a};
    let sc2 = sc + d;
    // the partner texel may hang over the edge on odd extents
    if (all(sc2 < params.src_size.xyz)) {{
        v = combine(v, {load_b});
    }}
    {store};
}}
"#
    )
}

/// Computes per-channel statistics: a one-time modify pass maps the texels to
/// the channel value (zeroing NaNs), then repeated halving passes fold the
/// image along x, then y, then z with the metric's combine operator until one
/// texel remains, which is read back. Averages divide the folded sum by the
/// texel count on the CPU.
pub struct StatisticsShader {
    modify: RefCell<HashMap<StatChannel, Rc<TransformShader>>>,
    halve: RefCell<HashMap<(CombineOp, Dimensions), Rc<HalvePipeline>>>,
    pixel: PixelValueShader,
}

impl StatisticsShader {
    pub fn new() -> Self {
        Self {
            modify: RefCell::new(HashMap::new()),
            halve: RefCell::new(HashMap::new()),
            pixel: PixelValueShader::new(),
        }
    }

    fn modify_shader(&self, channel: StatChannel) -> Rc<TransformShader> {
        if let Some(t) = self.modify.borrow().get(&channel) {
            return t.clone();
        }
        // a `value != value` test can be folded to `false` under fast math;
        // NaN fails both orderings, so the comparison form survives
        let body = format!(
            "let nan = !(value < vec4<f32>(0.0)) & !(value >= vec4<f32>(0.0));\n    \
             let v = select(value, vec4<f32>(0.0), nan);\n    return vec4<f32>({});",
            channel.expr()
        );
        let t = Rc::new(TransformShader::with_body(
            channel.name(),
            SRGB_FUNCTIONS,
            &body,
            PixelFormat::Rgba32Float,
            PixelFormat::Rgba32Float,
        ));
        self.modify.borrow_mut().insert(channel, t.clone());
        t
    }

    fn halve_pipeline(
        &self,
        ctx: &GpuContext,
        op: CombineOp,
        dim: Dimensions,
    ) -> TexResult<Rc<HalvePipeline>> {
        let key = (op, dim);
        if let Some(p) = self.halve.borrow().get(&key) {
            return Ok(p.clone());
        }
        let builder = ShaderBuilder::new(dim, ctx.max_workgroup_invocations);
        let label = format!("stat halve {}", builder.label_suffix());
        let source = halve_source(&builder, op.expr());
        let entries = [
            sampled_entry(0, slice_view_dim(dim), false),
            storage_texture_entry(1, PixelFormat::Rgba32Float.wgpu_format(), full_view_dim(dim)),
            uniform_entry(2),
        ];
        let bundle = build_pipeline(ctx, &label, &source, &entries, builder)?;
        let params = UploadBuffer::new(ctx, &label);
        let p = Rc::new(HalvePipeline { bundle, params });
        self.halve.borrow_mut().insert(key, p.clone());
        Ok(p)
    }

    fn halve_pass(
        &self,
        ctx: &GpuContext,
        pipe: &HalvePipeline,
        src: &Texture,
        dst: &Texture,
        src_size: Size3,
        dst_size: Size3,
        axis: usize,
    ) {
        let mut dir = [0i32; 4];
        dir[axis] = 1;
        pipe.params.set(
            ctx,
            &HalveParams {
                dir,
                dst_size: [dst_size.x as i32, dst_size.y as i32, dst_size.z as i32, 0],
                src_size: [src_size.x as i32, src_size.y as i32, src_size.z as i32, 0],
            },
        );
        let groups = pipe.bundle.builder.dispatch_groups(dst_size);
        let lm = LayerMipmapSlice::MIP0;
        dispatch(
            ctx,
            "stat halve",
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

    /// Fold `modified` (left untouched) down to one texel with `op` and read
    /// it back.
    fn fold(
        &self,
        ctx: &GpuContext,
        cache: &TextureCache,
        modified: &Texture,
        size: Size3,
        op: CombineOp,
    ) -> TexResult<f32> {
        if size == Size3::new(1, 1, 1) {
            let v = self
                .pixel
                .run(ctx, modified, LayerMipmapSlice::MIP0, [0, 0, 0], 0)?;
            return Ok(v[0]);
        }
        let dim = modified.dim();
        let pipe = self.halve_pipeline(ctx, op, dim)?;

        // ping-pong targets are sized for the first halving result; later
        // passes only use shrinking top-left corners of them
        let ping = cache.lease(ctx, size, LayerMipmapCount::ONE, PixelFormat::Rgba32Float, dim)?;
        let pong = cache.lease(ctx, size, LayerMipmapCount::ONE, PixelFormat::Rgba32Float, dim)?;

        let next = |s: Size3, axis: usize| -> Size3 {
            let mut n = s;
            match axis {
                0 => n.x = (n.x + 1) / 2,
                1 => n.y = (n.y + 1) / 2,
                _ => n.z = (n.z + 1) / 2,
            }
            n
        };
        let pick_axis = |s: Size3| -> usize {
            if s.x > 1 {
                0
            } else if s.y > 1 {
                1
            } else {
                2
            }
        };

        let mut cur_size = size;
        let axis = pick_axis(cur_size);
        let mut dst_size = next(cur_size, axis);
        self.halve_pass(ctx, &pipe, modified, &ping, cur_size, dst_size, axis);
        cur_size = dst_size;

        let mut cur_is_ping = true;
        while cur_size != Size3::new(1, 1, 1) {
            let axis = pick_axis(cur_size);
            dst_size = next(cur_size, axis);
            let (from, to): (&Texture, &Texture) = if cur_is_ping {
                (&ping, &pong)
            } else {
                (&pong, &ping)
            };
            self.halve_pass(ctx, &pipe, from, to, cur_size, dst_size, axis);
            cur_size = dst_size;
            cur_is_ping = !cur_is_ping;
        }

        let final_tex: &Texture = if cur_is_ping { &ping } else { &pong };
        let v = self
            .pixel
            .run(ctx, final_tex, LayerMipmapSlice::MIP0, [0, 0, 0], 0)?;
        Ok(v[0])
    }

    /// Min/max/avg of one channel over one slice.
    pub fn channel_stats(
        &self,
        ctx: &GpuContext,
        cache: &TextureCache,
        tex: &Texture,
        lm: LayerMipmapSlice,
        channel: StatChannel,
    ) -> TexResult<ChannelStats> {
        assert_eq!(tex.format(), PixelFormat::Rgba32Float);
        let size = tex.mip_size(lm.mip);
        let dim = tex.dim();

        let modified = cache.lease(ctx, size, LayerMipmapCount::ONE, PixelFormat::Rgba32Float, dim)?;
        self.modify_shader(channel)
            .run_slices(ctx, tex, lm, &modified, LayerMipmapSlice::MIP0)?;

        let min = self.fold(ctx, cache, &modified, size, CombineOp::Min)?;
        let max = self.fold(ctx, cache, &modified, size, CombineOp::Max)?;
        let sum = self.fold(ctx, cache, &modified, size, CombineOp::Sum)?;
        Ok(ChannelStats {
            min,
            max,
            avg: sum / size.product() as f32,
        })
    }

    /// Statistics for every channel of one slice.
    pub fn statistics(
        &self,
        ctx: &GpuContext,
        cache: &TextureCache,
        tex: &Texture,
        lm: LayerMipmapSlice,
    ) -> TexResult<Statistics> {
        Ok(Statistics {
            luminance: self.channel_stats(ctx, cache, tex, lm, StatChannel::Luminance)?,
            luma: self.channel_stats(ctx, cache, tex, lm, StatChannel::Luma)?,
            lightness: self.channel_stats(ctx, cache, tex, lm, StatChannel::Lightness)?,
            alpha: self.channel_stats(ctx, cache, tex, lm, StatChannel::Alpha)?,
            uniform: self.channel_stats(ctx, cache, tex, lm, StatChannel::Uniform)?,
        })
    }
}

impl Default for StatisticsShader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halve_source_guards_the_partner_texel() {
        let b = ShaderBuilder::new(Dimensions::TwoD, 1024);
        let src = halve_source(&b, CombineOp::Sum.expr());
        assert!(src.contains("all(sc2 < params.src_size.xyz)"));
        assert!(src.contains("return a + b;"));
    }

    #[test]
    fn nan_zeroing_avoids_self_inequality() {
        let shader = StatisticsShader::new().modify_shader(StatChannel::Alpha);
        let b = ShaderBuilder::new(Dimensions::TwoD, 1024);
        let src = shader.source(&b).unwrap();
        assert!(src.contains("!(value < vec4<f32>(0.0)) & !(value >= vec4<f32>(0.0))"));
        assert!(!src.contains("value != value"));
    }

    #[test]
    fn channel_expressions() {
        assert!(StatChannel::Luminance.expr().contains("0.7154"));
        assert!(StatChannel::Luma.expr().contains("to_srgb"));
        assert!(StatChannel::Lightness.expr().contains("116.0"));
        assert_eq!(StatChannel::Alpha.expr(), "v.a");
    }
}
