// ============================================================================
// REDUCE SHADER — work-efficient tree reduction over a storage buffer
// ============================================================================

use std::cell::RefCell;
use std::rc::Rc;

use bytemuck::{Pod, Zeroable};

use crate::buffer::{DownloadBuffer, GpuBuffer, UploadBuffer};
use crate::context::GpuContext;
use crate::error::TexResult;
use crate::shader::{storage_buffer_entry, uniform_entry};
use crate::size::div_round_up;

use super::{build_buffer_pipeline, dispatch_buffers, split_dispatch, BufferPipeline};

pub const LOCAL_SIZE: u32 = 64;
pub const ELEMENTS_PER_THREAD: u32 = 8;
pub const ELEMENTS_PER_GROUP: u32 = LOCAL_SIZE * ELEMENTS_PER_THREAD;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ReduceParams {
    num_elements: u32,
    num_groups: u32,
    groups_x: u32,
    _pad: u32,
}

struct ReducePipeline {
    pipe: BufferPipeline,
    params: UploadBuffer<ReduceParams>,
    scratch: RefCell<Option<GpuBuffer>>,
    staging: DownloadBuffer,
}

/// Reduces a buffer of f32 elements to one value with a caller-supplied
/// associative operator. Each 64-thread group folds 512 elements; the host
/// loop repeats until one element remains, with the result left in element 0
/// of the caller's buffer. Group counts past the device's per-dimension
/// dispatch limit split into a 2D grid.
pub struct ReduceShader {
    name: String,
    op: String,
    identity: String,
    pipeline: RefCell<Option<Rc<ReducePipeline>>>,
}

impl ReduceShader {
    /// `op` is a WGSL expression over `a` and `b`; `identity` its neutral
    /// element as a WGSL literal.
    pub fn new(name: &str, op: &str, identity: &str) -> Self {
        Self {
            name: name.to_string(),
            op: op.to_string(),
            identity: identity.to_string(),
            pipeline: RefCell::new(None),
        }
    }

    pub fn sum() -> Self {
        Self::new("sum", "a + b", "0.0")
    }

    pub fn min() -> Self {
        Self::new("min", "min(a, b)", "3.40282347e38")
    }

    pub fn max() -> Self {
        Self::new("max", "max(a, b)", "-3.40282347e38")
    }

    pub(crate) fn source(&self) -> String {
        let op = &self.op;
        let identity = &self.identity;
        format!(
            r#"@group(0) @binding(0) var<storage, read> src_data: array<f32>;
@group(0) @binding(1) var<storage, read_write> dst_data: array<f32>;

struct Params {{
    num_elements: u32,
    num_groups: u32,
    groups_x: u32,
    pad0: u32,
}};
@group(0) @binding(2) var<uniform> params: Params;

var<workgroup> shared_data: array<f32, 64>;

fn reduce_op(a: f32, b: f32) -> f32 {{
    return {op};
}}

@compute @workgroup_size(64, 1, 1)
fn main(@builtin(local_invocation_id) lid: vec3<u32>,
        @builtin(workgroup_id) wid: vec3<u32>) {{
    let group_index = wid.y * params.groups_x + wid.x;
    let base = group_index * 512u + lid.x;
    var acc = {identity};
    for (var i = 0u; i < 8u; i = i + 1u) {{
        let idx = base + i * 64u;
        if (idx < params.num_elements) {{
            acc = reduce_op(acc, src_data[idx]);
        }}
    }}
    shared_data[lid.x] = acc;
    workgroupBarrier();
    var stride = 32u;
    while (stride > 0u) {{
        if (lid.x < stride) {{
            shared_data[lid.x] = reduce_op(shared_data[lid.x], shared_data[lid.x + stride]);
        }}
        workgroupBarrier();
        stride = stride >> 1u;
    }}
    if (lid.x == 0u && group_index < params.num_groups) {{
        dst_data[group_index] = shared_data[0u];
    }}
}}
"#
        )
    }

    fn pipeline(&self, ctx: &GpuContext) -> TexResult<Rc<ReducePipeline>> {
        if let Some(p) = self.pipeline.borrow().as_ref() {
            return Ok(p.clone());
        }
        let label = format!("reduce {}", self.name);
        let entries = [
            storage_buffer_entry(0, true),
            storage_buffer_entry(1, false),
            uniform_entry(2),
        ];
        let pipe = build_buffer_pipeline(ctx, &label, &self.source(), &entries)?;
        let params = UploadBuffer::new(ctx, &label);
        let staging = DownloadBuffer::new(ctx, &label, 4);
        let p = Rc::new(ReducePipeline {
            pipe,
            params,
            scratch: RefCell::new(None),
            staging,
        });
        *self.pipeline.borrow_mut() = Some(p.clone());
        Ok(p)
    }

    /// Reduce `buffer[0..num_elements]`; the result lands in `buffer[0]`.
    /// Passes alternate between the caller's buffer and an internal scratch
    /// buffer, so no group ever reads an element another group is writing.
    pub fn run(&self, ctx: &GpuContext, buffer: &GpuBuffer, num_elements: u32) -> TexResult<()> {
        assert!(num_elements >= 1);
        assert!(num_elements <= buffer.element_count());

        if num_elements == 1 {
            return Ok(());
        }
        let pipe = self.pipeline(ctx)?;

        let scratch_needed = div_round_up(num_elements, ELEMENTS_PER_GROUP);
        {
            let mut scratch = pipe.scratch.borrow_mut();
            let too_small = scratch
                .as_ref()
                .map(|s| s.element_count() < scratch_needed)
                .unwrap_or(true);
            if too_small {
                *scratch = Some(GpuBuffer::new(ctx, "reduce scratch", scratch_needed));
            }
        }
        let scratch = pipe.scratch.borrow();
        let scratch = scratch.as_ref().unwrap();

        let mut num = num_elements;
        let mut src_is_user = true;
        while num > 1 {
            let groups = div_round_up(num, ELEMENTS_PER_GROUP);
            let (gx, gy) = split_dispatch(ctx, groups);
            pipe.params.set(
                ctx,
                &ReduceParams {
                    num_elements: num,
                    num_groups: groups,
                    groups_x: gx,
                    _pad: 0,
                },
            );
            let (src, dst) = if src_is_user {
                (buffer, scratch)
            } else {
                (scratch, buffer)
            };
            dispatch_buffers(
                ctx,
                "reduce",
                &pipe.pipe,
                &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: src.binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: dst.binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: pipe.params.binding(),
                    },
                ],
                (gx, gy),
            );
            num = groups;
            src_is_user = !src_is_user;
        }

        if !src_is_user {
            // final value ended up in scratch[0]
            let mut encoder = ctx
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("reduce result copy"),
                });
            encoder.copy_buffer_to_buffer(scratch.raw(), 0, buffer.raw(), 0, 4);
            ctx.submit_one(encoder);
        }
        Ok(())
    }

    /// [`run`](Self::run) plus a blocking readback of the result.
    pub fn run_and_read(
        &self,
        ctx: &GpuContext,
        buffer: &GpuBuffer,
        num_elements: u32,
    ) -> TexResult<f32> {
        self.run(ctx, buffer, num_elements)?;
        let pipe = self.pipeline(ctx)?;
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("reduce readback"),
            });
        pipe.staging.copy_from(&mut encoder, buffer.raw(), 4);
        ctx.submit_one(encoder);
        let values: Vec<f32> = pipe.staging.read(ctx)?;
        Ok(values[0])
    }
}
