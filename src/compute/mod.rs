// ============================================================================
// PARALLEL PRIMITIVES — reduction, prefix scan, skip volumes
// ============================================================================
//! Buffer-level building blocks (tree reduction, prefix scan) and the volume
//! distance relaxations built on them plus the transform shader.

pub mod cube_skip;
pub mod empty_space;
pub mod reduce;
pub mod scan;

use crate::context::GpuContext;
use crate::error::{TexError, TexResult};
use crate::size::div_round_up;

/// Compiled pipeline for buffer-only kernels (no texture views involved).
pub(crate) struct BufferPipeline {
    pub pipeline: wgpu::ComputePipeline,
    pub bgl: wgpu::BindGroupLayout,
}

pub(crate) fn build_buffer_pipeline(
    ctx: &GpuContext,
    label: &str,
    source: &str,
    entries: &[wgpu::BindGroupLayoutEntry],
) -> TexResult<BufferPipeline> {
    let module = ctx.compile_shader(label, source)?;
    let bgl = ctx
        .device
        .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries,
        });
    let layout = ctx
        .device
        .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });
    ctx.device
        .push_error_scope(wgpu::ErrorFilter::Validation);
    let pipeline = ctx
        .device
        .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(&layout),
            module: &module,
            entry_point: "main",
            compilation_options: Default::default(),
        });
    if let Some(err) = pollster::block_on(ctx.device.pop_error_scope()) {
        return Err(TexError::shader_compile(label, &err.to_string(), source));
    }
    Ok(BufferPipeline { pipeline, bgl })
}

/// One pass over flat buffers: fresh bind group, one dispatch, submit.
pub(crate) fn dispatch_buffers(
    ctx: &GpuContext,
    label: &str,
    pipe: &BufferPipeline,
    bind_entries: &[wgpu::BindGroupEntry],
    groups: (u32, u32),
) {
    let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout: &pipe.bgl,
        entries: bind_entries,
    });
    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        pass.set_pipeline(&pipe.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(groups.0, groups.1, 1);
    }
    ctx.submit_one(encoder);
}

/// Split a flat workgroup count into a 2D dispatch when it exceeds the
/// device's per-dimension limit. The shader recombines
/// `wid.y * groups_x + wid.x` and masks the padding groups.
pub(crate) fn split_dispatch(ctx: &GpuContext, groups: u32) -> (u32, u32) {
    let max = ctx.max_workgroups_per_dim;
    if groups <= max {
        (groups, 1)
    } else {
        (max, div_round_up(groups, max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_dispatch_math() {
        // mirror of the split without a live device
        let split = |groups: u32, max: u32| -> (u32, u32) {
            if groups <= max {
                (groups, 1)
            } else {
                (max, div_round_up(groups, max))
            }
        };
        assert_eq!(split(100, 65535), (100, 1));
        assert_eq!(split(65535, 65535), (65535, 1));
        assert_eq!(split(65536, 65535), (65535, 2));
        assert_eq!(split(200_000, 65535), (65535, 4));
    }
}
