// ============================================================================
// PIXEL VALUE SHADER — windowed average of one coordinate, read back
// ============================================================================

use bytemuck::{Pod, Zeroable};

use crate::buffer::{DownloadBuffer, UploadBuffer};
use crate::builder::{Dimensions, ShaderBuilder};
use crate::context::GpuContext;
use crate::error::TexResult;
use crate::size::LayerMipmapSlice;
use crate::texture::Texture;

use super::{
    build_pipeline, dispatch, sampled_entry, slice_view_dim, storage_buffer_entry,
    uniform_entry, DimTable, PipelineBundle,
};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct PixelValueParams {
    // xyz = coordinate, w = window radius
    coord: [i32; 4],
    size: [i32; 4],
}

struct PixelValuePipeline {
    bundle: PipelineBundle,
    params: UploadBuffer<PixelValueParams>,
    out: wgpu::Buffer,
    staging: DownloadBuffer,
}

/// Averages the texels in a `(2r+1)`-window around one coordinate and reads
/// the result back synchronously. A single invocation does the whole window;
/// this is a point query, not a bulk pass.
pub struct PixelValueShader {
    pipelines: DimTable<PixelValuePipeline>,
}

impl PixelValueShader {
    pub fn new() -> Self {
        Self {
            pipelines: DimTable::new(),
        }
    }

    pub(crate) fn source(builder: &ShaderBuilder) -> String {
        let src_ty = builder.sampled_slice("f32");
        let load = builder.load_slice("src_image", "c");
        format!(
            r#"@group(0) @binding(0) var src_image: {src_ty};

struct Params {{
    coord: vec4<i32>,
    size: vec4<i32>,
}};
@group(0) @binding(1) var<uniform> params: Params;
@group(0) @binding(2) var<storage, read_write> out_value: array<vec4<f32>>;

@compute @workgroup_size(1, 1, 1)
fn main() {{
    let radius = params.coord.w;
    let rz = select(0, radius, params.size.z > 1);
    var sum = vec4<f32>(0.0);
    var count = 0.0;
    for (var dz = -rz; dz <= rz; dz = dz + 1) {{
        for (var dy = -radius; dy <= radius; dy = dy + 1) {{
            for (var dx = -radius; dx <= radius; dx = dx + 1) {{
                let c = params.coord.xyz + vec3<i32>(dx, dy, dz);
                if (all(c >= vec3<i32>(0)) && all(c < params.size.xyz)) {{
                    sum = sum + {load};
                    count = count + 1.0;
                }}
            }}
        }}
    }}
    out_value[0] = sum / max(count, 1.0);
}}
"#
        )
    }

    fn pipeline(
        &self,
        ctx: &GpuContext,
        dim: Dimensions,
    ) -> TexResult<std::rc::Rc<PixelValuePipeline>> {
        self.pipelines.get_or_try_init(dim, || {
            let builder = ShaderBuilder::new(dim, ctx.max_workgroup_invocations);
            let label = format!("pixel value {}", builder.label_suffix());
            let source = Self::source(&builder);
            let entries = [
                sampled_entry(0, slice_view_dim(dim), false),
                uniform_entry(1),
                storage_buffer_entry(2, false),
            ];
            let bundle = build_pipeline(ctx, &label, &source, &entries, builder)?;
            let params = UploadBuffer::new(ctx, &label);
            let out = ctx.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&label),
                size: 16,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            });
            let staging = DownloadBuffer::new(ctx, &label, 16);
            Ok(PixelValuePipeline {
                bundle,
                params,
                out,
                staging,
            })
        })
    }

    /// Average around `coord` (must be in bounds of the slice) with the given
    /// window radius; radius 0 reads the single texel.
    pub fn run(
        &self,
        ctx: &GpuContext,
        tex: &Texture,
        lm: LayerMipmapSlice,
        coord: [u32; 3],
        radius: i32,
    ) -> TexResult<[f32; 4]> {
        assert!(radius >= 0);
        let size = tex.mip_size(lm.mip);
        assert!(coord[0] < size.x && coord[1] < size.y && coord[2] < size.z);

        let pipe = self.pipeline(ctx, tex.dim())?;
        pipe.params.set(
            ctx,
            &PixelValueParams {
                coord: [coord[0] as i32, coord[1] as i32, coord[2] as i32, radius],
                size: [size.x as i32, size.y as i32, size.z as i32, 0],
            },
        );
        dispatch(
            ctx,
            "pixel value",
            &pipe.bundle,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(tex.srv(lm)),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: pipe.params.binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: pipe.out.as_entire_binding(),
                },
            ],
            (1, 1, 1),
        );

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("pixel value readback"),
            });
        pipe.staging.copy_from(&mut encoder, &pipe.out, 16);
        ctx.submit_one(encoder);
        let values: Vec<f32> = pipe.staging.read(ctx)?;
        Ok([values[0], values[1], values[2], values[3]])
    }
}

impl Default for PixelValueShader {
    fn default() -> Self {
        Self::new()
    }
}
