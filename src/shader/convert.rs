// ============================================================================
// CONVERT FORMAT SHADER — format conversion, crop, multiplier
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
struct ConvertParams {
    // crop offset in source texels
    offset: [i32; 4],
    // destination slice extent
    size: [i32; 4],
    mul: [f32; 4],
}

/// Conversion request. `layer`/`mip` of `None` carry the whole range over;
/// cropping requires a single selected mip.
pub struct ConvertArgs {
    pub format: PixelFormat,
    pub layer: Option<u32>,
    pub mip: Option<u32>,
    pub crop_offset: Size3,
    pub crop_size: Option<Size3>,
    pub multiplier: f32,
}

impl ConvertArgs {
    pub fn to_format(format: PixelFormat) -> Self {
        Self {
            format,
            layer: None,
            mip: None,
            crop_offset: Size3::ZERO,
            crop_size: None,
            multiplier: 1.0,
        }
    }
}

struct ConvertPipeline {
    bundle: PipelineBundle,
    params: UploadBuffer<ConvertParams>,
}

type ConvertKey = (Dimensions, &'static str, PixelFormat);

/// Copies a texture into a fresh allocation of another format, optionally
/// cropping, selecting a layer/mip subset and scaling values.
pub struct ConvertFormatShader {
    pipelines: RefCell<HashMap<ConvertKey, Rc<ConvertPipeline>>>,
}

impl ConvertFormatShader {
    pub fn new() -> Self {
        Self {
            pipelines: RefCell::new(HashMap::new()),
        }
    }

    pub(crate) fn source(
        builder: &ShaderBuilder,
        in_scalar: &str,
        out_format: PixelFormat,
    ) -> TexResult<String> {
        let src_ty = builder.sampled_slice(in_scalar);
        let dst_ty = builder.storage_mip(out_format.wgsl_storage_format()?);
        let out_scalar = out_format.wgsl_scalar();
        let load = builder.load_slice("src_image", "src_coord");
        let store = builder.store_mip("dst_image", "coord", "params.offset.w", "converted");
        let wg = builder.workgroup_decl();
        Ok(format!(
            r#"@group(0) @binding(0) var src_image: {src_ty};
@group(0) @binding(1) var dst_image: {dst_ty};

struct Params {{
    offset: vec4<i32>,
    size: vec4<i32>,
    mul: vec4<f32>,
}};
@group(0) @binding(2) var<uniform> params: Params;

@compute {wg}
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{
    let coord = vec3<i32>(gid);
    if (coord.x >= params.size.x || coord.y >= params.size.y || coord.z >= params.size.z) {{
        return;
    }}
    let src_coord = coord + params.offset.xyz;
    let value = {load};
    let converted = vec4<{out_scalar}>(vec4<f32>(value) * params.mul.x);
    {store};
}}
"#
        ))
    }

    fn pipeline(
        &self,
        ctx: &GpuContext,
        dim: Dimensions,
        in_format: PixelFormat,
        out_format: PixelFormat,
    ) -> TexResult<Rc<ConvertPipeline>> {
        let key = (dim, in_format.wgsl_scalar(), out_format);
        if let Some(p) = self.pipelines.borrow().get(&key) {
            return Ok(p.clone());
        }
        let builder = ShaderBuilder::new(dim, ctx.max_workgroup_invocations);
        let label = format!("convert {}", builder.label_suffix());
        let source = Self::source(&builder, in_format.wgsl_scalar(), out_format)?;
        let entries = [
            sampled_entry(0, slice_view_dim(dim), in_format.wgsl_scalar() == "u32"),
            storage_texture_entry(1, out_format.wgpu_format(), full_view_dim(dim)),
            uniform_entry(2),
        ];
        let bundle = build_pipeline(ctx, &label, &source, &entries, builder)?;
        let params = UploadBuffer::new(ctx, &label);
        let pipe = Rc::new(ConvertPipeline { bundle, params });
        self.pipelines.borrow_mut().insert(key, pipe.clone());
        Ok(pipe)
    }

    /// Build the converted texture.
    pub fn convert(
        &self,
        ctx: &GpuContext,
        src: &Texture,
        args: &ConvertArgs,
    ) -> TexResult<Texture> {
        let src_lm = src.layer_mipmap();
        if let Some(layer) = args.layer {
            assert!(layer < src_lm.layers);
        }
        if let Some(mip) = args.mip {
            assert!(mip < src_lm.mips);
        }
        assert!(
            args.crop_size.is_none() || args.mip.is_some() || src_lm.mips == 1,
            "cropping needs a single mip"
        );

        let base_mip = args.mip.unwrap_or(0);
        let dst_size = args.crop_size.unwrap_or(src.mip_size(base_mip));
        let dst_lm = LayerMipmapCount::new(
            if args.layer.is_some() { 1 } else { src_lm.layers },
            if args.mip.is_some() { 1 } else { src_lm.mips },
        );
        if args.crop_size.is_some() {
            let limit = src.mip_size(base_mip);
            assert!(
                args.crop_offset.x + dst_size.x <= limit.x
                    && args.crop_offset.y + dst_size.y <= limit.y
                    && args.crop_offset.z + dst_size.z <= limit.z,
                "crop window out of bounds"
            );
        }

        let dst = Texture::new(ctx, "converted", dst_size, dst_lm, args.format, src.dim())?;
        let pipe = self.pipeline(ctx, src.dim(), src.format(), args.format)?;

        for lm in dst_lm.slices() {
            let src_slice = LayerMipmapSlice::new(
                args.layer.unwrap_or(lm.layer),
                args.mip.unwrap_or(lm.mip),
            );
            let size = dst.mip_size(lm.mip);
            pipe.params.set(
                ctx,
                &ConvertParams {
                    offset: [
                        args.crop_offset.x as i32,
                        args.crop_offset.y as i32,
                        args.crop_offset.z as i32,
                        lm.layer as i32,
                    ],
                    size: [size.x as i32, size.y as i32, size.z as i32, 0],
                    mul: [args.multiplier, 0.0, 0.0, 0.0],
                },
            );
            let groups = pipe.bundle.builder.dispatch_groups(size);
            dispatch(
                ctx,
                "convert",
                &pipe.bundle,
                &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(src.srv(src_slice)),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(dst.uav(lm.mip)),
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

impl Default for ConvertFormatShader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_casts_through_f32() {
        let b = ShaderBuilder::new(Dimensions::TwoD, 1024);
        let src = ConvertFormatShader::source(&b, "f32", PixelFormat::R32Uint).unwrap();
        assert!(src.contains("vec4<u32>(vec4<f32>(value) * params.mul.x)"));
        assert!(src.contains("texture_storage_2d_array<r32uint, write>"));
    }

    #[test]
    fn srgb_destination_is_rejected() {
        let b = ShaderBuilder::new(Dimensions::TwoD, 1024);
        assert!(ConvertFormatShader::source(&b, "f32", PixelFormat::Rgba8Srgb).is_err());
    }
}
