// ============================================================================
// SCAN SHADER — inclusive prefix sum with an aux-buffer chain
// ============================================================================

use std::cell::RefCell;
use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};

use crate::buffer::{GpuBuffer, UploadBuffer};
use crate::context::GpuContext;
use crate::error::{TexError, TexResult};
use crate::shader::{storage_buffer_entry, uniform_entry};
use crate::size::align_to;

use super::{build_buffer_pipeline, dispatch_buffers, split_dispatch, BufferPipeline};

pub const LOCAL_SIZE: u32 = 1024;
pub const ELEMENTS_PER_THREAD: u32 = 8;
/// Elements one workgroup scans, and the required buffer padding granule.
pub const BUFFER_ALIGNMENT: u32 = LOCAL_SIZE * ELEMENTS_PER_THREAD;
const LOCAL_SIZE_PUSH: u32 = 64;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ScanParams {
    total: u32,
    num_groups: u32,
    groups_x: u32,
    _pad: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct PushParams {
    total: u32,
    groups_x: u32,
    _pad: [u32; 2],
}

/// Inclusive prefix sum over f32 buffers.
///
/// Each pass scans 8192-element blocks in place and writes block totals into
/// the next buffer of a cached aux chain; once every level is scanned, push
/// passes fold the scanned totals back down. Buffers are padded to
/// [`BUFFER_ALIGNMENT`] and the padding is cleared here, so the block scans
/// never read stale data.
///
/// The intra-block step is a barrier-synchronized log-step shared-memory
/// scan: every shared read and write is separated by `workgroupBarrier`.
pub struct ScanShader {
    scan: BufferPipeline,
    push: BufferPipeline,
    scan_params: UploadBuffer<ScanParams>,
    push_params: UploadBuffer<PushParams>,
    // top-level totals sink, never read back
    dummy_totals: GpuBuffer,
    // aux chains keyed by the aligned element count they serve
    aux: RefCell<HashMap<u32, Vec<GpuBuffer>>>,
}

pub(crate) fn scan_source() -> String {
    format!(
        r#"@group(0) @binding(0) var<storage, read_write> scan_data: array<f32>;
@group(0) @binding(1) var<storage, read_write> block_sums: array<f32>;

struct Params {{
    total: u32,
    num_groups: u32,
    groups_x: u32,
    pad0: u32,
}};
@group(0) @binding(2) var<uniform> params: Params;

var<workgroup> shared_sums: array<f32, {LOCAL_SIZE}>;

@compute @workgroup_size({LOCAL_SIZE}, 1, 1)
fn main(@builtin(local_invocation_id) lid: vec3<u32>,
        @builtin(workgroup_id) wid: vec3<u32>) {{
    let group_index = wid.y * params.groups_x + wid.x;
    let base = group_index * {BUFFER_ALIGNMENT}u + lid.x * {ELEMENTS_PER_THREAD}u;

    // serial inclusive scan of this thread's chunk
    var vals: array<f32, {ELEMENTS_PER_THREAD}>;
    var acc = 0.0;
    for (var i = 0u; i < {ELEMENTS_PER_THREAD}u; i = i + 1u) {{
        let idx = base + i;
        var v = 0.0;
        if (idx < params.total) {{
            v = scan_data[idx];
        }}
        acc = acc + v;
        vals[i] = acc;
    }}
    shared_sums[lid.x] = acc;
    workgroupBarrier();

    // log-step scan of the chunk totals
    for (var stride = 1u; stride < {LOCAL_SIZE}u; stride = stride << 1u) {{
        var v = shared_sums[lid.x];
        if (lid.x >= stride) {{
            v = v + shared_sums[lid.x - stride];
        }}
        workgroupBarrier();
        shared_sums[lid.x] = v;
        workgroupBarrier();
    }}

    var offset = 0.0;
    if (lid.x > 0u) {{
        offset = shared_sums[lid.x - 1u];
    }}
    for (var i = 0u; i < {ELEMENTS_PER_THREAD}u; i = i + 1u) {{
        let idx = base + i;
        if (idx < params.total) {{
            scan_data[idx] = vals[i] + offset;
        }}
    }}
    if (lid.x == {LOCAL_SIZE}u - 1u && group_index < params.num_groups) {{
        block_sums[group_index] = shared_sums[{LOCAL_SIZE}u - 1u];
    }}
}}
"#
    )
}

pub(crate) fn push_source() -> String {
    format!(
        r#"@group(0) @binding(0) var<storage, read_write> scan_data: array<f32>;
@group(0) @binding(1) var<storage, read> block_sums: array<f32>;

struct Params {{
    total: u32,
    groups_x: u32,
    pad0: u32,
    pad1: u32,
}};
@group(0) @binding(2) var<uniform> params: Params;

@compute @workgroup_size({LOCAL_SIZE_PUSH}, 1, 1)
fn main(@builtin(local_invocation_id) lid: vec3<u32>,
        @builtin(workgroup_id) wid: vec3<u32>) {{
    let flat = (wid.y * params.groups_x + wid.x) * {LOCAL_SIZE_PUSH}u + lid.x;
    let idx = flat + {BUFFER_ALIGNMENT}u;
    if (idx < params.total) {{
        scan_data[idx] = scan_data[idx] + block_sums[flat / {BUFFER_ALIGNMENT}u];
    }}
}}
"#
    )
}

impl ScanShader {
    /// Fails with `ResourceLimit` when the device cannot run 1024-invocation
    /// workgroups.
    pub fn new(ctx: &GpuContext) -> TexResult<Self> {
        if ctx.max_workgroup_invocations < LOCAL_SIZE {
            return Err(TexError::resource_limit(
                "scan workgroup size",
                LOCAL_SIZE as u64,
                ctx.max_workgroup_invocations as u64,
            ));
        }
        let entries = [
            storage_buffer_entry(0, false),
            storage_buffer_entry(1, false),
            uniform_entry(2),
        ];
        let scan = build_buffer_pipeline(ctx, "scan", &scan_source(), &entries)?;
        let push_entries = [
            storage_buffer_entry(0, false),
            storage_buffer_entry(1, true),
            uniform_entry(2),
        ];
        let push = build_buffer_pipeline(ctx, "scan push", &push_source(), &push_entries)?;
        Ok(Self {
            scan,
            push,
            scan_params: UploadBuffer::new(ctx, "scan params"),
            push_params: UploadBuffer::new(ctx, "scan push params"),
            dummy_totals: GpuBuffer::new(ctx, "scan totals sink", 1),
            aux: RefCell::new(HashMap::new()),
        })
    }

    /// Element capacity a buffer needs to scan `num_elements` values.
    pub fn source_buffer_alignment(num_elements: u32) -> u32 {
        align_to(num_elements.max(1), BUFFER_ALIGNMENT)
    }

    /// Aligned sizes of every level above the data buffer.
    fn chain_sizes(aligned: u32) -> Vec<u32> {
        let mut sizes = Vec::new();
        let mut size = aligned;
        while size > BUFFER_ALIGNMENT {
            size = align_to(size / BUFFER_ALIGNMENT, BUFFER_ALIGNMENT);
            sizes.push(size);
        }
        sizes
    }

    fn scan_pass(&self, ctx: &GpuContext, data: &GpuBuffer, totals: &GpuBuffer, total: u32) {
        let groups = total / BUFFER_ALIGNMENT;
        let (gx, gy) = split_dispatch(ctx, groups);
        self.scan_params.set(
            ctx,
            &ScanParams {
                total,
                num_groups: groups,
                groups_x: gx,
                _pad: 0,
            },
        );
        dispatch_buffers(
            ctx,
            "scan",
            &self.scan,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: data.binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: totals.binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.scan_params.binding(),
                },
            ],
            (gx, gy),
        );
    }

    fn push_pass(&self, ctx: &GpuContext, data: &GpuBuffer, totals: &GpuBuffer, total: u32) {
        let threads = total - BUFFER_ALIGNMENT;
        let groups = threads / LOCAL_SIZE_PUSH;
        let (gx, gy) = split_dispatch(ctx, groups);
        self.push_params.set(
            ctx,
            &PushParams {
                total,
                groups_x: gx,
                _pad: [0; 2],
            },
        );
        dispatch_buffers(
            ctx,
            "scan push",
            &self.push,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: data.binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: totals.binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.push_params.binding(),
                },
            ],
            (gx, gy),
        );
    }

    /// In-place inclusive prefix sum of `buffer[0..num_elements]`. The buffer
    /// must hold at least [`source_buffer_alignment`](Self::source_buffer_alignment)
    /// elements; the padding region is cleared here before scanning.
    pub fn run(&self, ctx: &GpuContext, buffer: &GpuBuffer, num_elements: u32) -> TexResult<()> {
        assert!(num_elements >= 1);
        let aligned = Self::source_buffer_alignment(num_elements);
        assert!(buffer.element_count() >= aligned, "buffer not padded to alignment");

        // zero the padding and any stale aux contents
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("scan clear"),
            });
        if num_elements < aligned {
            encoder.clear_buffer(
                buffer.raw(),
                num_elements as u64 * GpuBuffer::ELEMENT_SIZE as u64,
                Some((aligned - num_elements) as u64 * GpuBuffer::ELEMENT_SIZE as u64),
            );
        }
        {
            let mut aux_map = self.aux.borrow_mut();
            let chain = aux_map.entry(aligned).or_insert_with(|| {
                Self::chain_sizes(aligned)
                    .into_iter()
                    .map(|size| GpuBuffer::new(ctx, "scan aux", size))
                    .collect()
            });
            for aux in chain.iter() {
                encoder.clear_buffer(aux.raw(), 0, None);
            }
        }
        ctx.submit_one(encoder);

        let aux_map = self.aux.borrow();
        let chain = &aux_map[&aligned];
        tracing::debug!(num_elements, levels = chain.len() + 1, "scan");

        // bottom-up block scans, each level's totals feeding the next
        let mut sizes = vec![aligned];
        sizes.extend(chain.iter().map(|b| b.element_count()));
        for level in 0..sizes.len() {
            let data: &GpuBuffer = if level == 0 { buffer } else { &chain[level - 1] };
            let totals: &GpuBuffer = if level < chain.len() {
                &chain[level]
            } else {
                &self.dummy_totals
            };
            self.scan_pass(ctx, data, totals, sizes[level]);
        }

        // top-down pushes of the scanned totals
        for level in (0..chain.len()).rev() {
            let data: &GpuBuffer = if level == 0 { buffer } else { &chain[level - 1] };
            self.push_pass(ctx, data, &chain[level], sizes[level]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_rounds_up_to_block() {
        assert_eq!(ScanShader::source_buffer_alignment(1), 8192);
        assert_eq!(ScanShader::source_buffer_alignment(8192), 8192);
        assert_eq!(ScanShader::source_buffer_alignment(8193), 16384);
    }

    #[test]
    fn chain_sizes_shrink_by_block_factor() {
        assert_eq!(ScanShader::chain_sizes(8192), Vec::<u32>::new());
        assert_eq!(ScanShader::chain_sizes(16384), vec![8192]);
        // 67108864 / 8192 = 8192 -> one more level collapses it
        assert_eq!(ScanShader::chain_sizes(67_108_864), vec![8192]);
        assert_eq!(ScanShader::chain_sizes(67_108_864 + 8192), vec![16384, 8192]);
    }

    #[test]
    fn sources_use_barriered_shared_scan() {
        let s = scan_source();
        assert!(s.contains("var<workgroup> shared_sums"));
        // two barriers per log step
        assert!(s.matches("workgroupBarrier();").count() >= 3);
        let p = push_source();
        assert!(p.contains("block_sums[flat / 8192u]"));
    }
}
