// ============================================================================
// SHADER FAMILIES — dynamic WGSL synthesis
// ============================================================================
//! Each family renders a WGSL template with caller-supplied fragments, compiles
//! it on first use per dimensionality, and keeps the result in a two-entry
//! table. Synthesized source functions are `pub(crate)` so unit tests can
//! assert on the generated text without a GPU.

pub mod combine;
pub mod convert;
pub mod filter;
pub mod gauss;
pub mod kernel;
pub mod mipmap;
pub mod pad;
pub mod pixel_value;
pub mod scale;
pub mod transform;

use std::cell::RefCell;
use std::rc::Rc;

use crate::builder::{Dimensions, ShaderBuilder};
use crate::context::GpuContext;
use crate::error::{TexError, TexResult};

/// Lazily-built per-dimensionality memo table.
pub(crate) struct DimTable<T> {
    two_d: RefCell<Option<Rc<T>>>,
    three_d: RefCell<Option<Rc<T>>>,
}

impl<T> DimTable<T> {
    pub fn new() -> Self {
        Self {
            two_d: RefCell::new(None),
            three_d: RefCell::new(None),
        }
    }

    pub fn get_or_try_init(
        &self,
        dim: Dimensions,
        init: impl FnOnce() -> TexResult<T>,
    ) -> TexResult<Rc<T>> {
        let cell = match dim {
            Dimensions::TwoD => &self.two_d,
            Dimensions::ThreeD => &self.three_d,
        };
        if let Some(v) = cell.borrow().as_ref() {
            return Ok(v.clone());
        }
        let v = Rc::new(init()?);
        *cell.borrow_mut() = Some(v.clone());
        Ok(v)
    }
}

/// A compiled pipeline plus the layout its bind groups are built from.
pub(crate) struct PipelineBundle {
    pub pipeline: wgpu::ComputePipeline,
    pub bgl: wgpu::BindGroupLayout,
    pub builder: ShaderBuilder,
}

/// Compile + lay out a compute pipeline. Both the module and the pipeline are
/// created under validation error scopes so interface errors also surface as
/// `ShaderCompile` with the numbered source.
pub(crate) fn build_pipeline(
    ctx: &GpuContext,
    label: &str,
    source: &str,
    entries: &[wgpu::BindGroupLayoutEntry],
    builder: ShaderBuilder,
) -> TexResult<PipelineBundle> {
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
    Ok(PipelineBundle {
        pipeline,
        bgl,
        builder,
    })
}

/// Record one compute pass with a fresh bind group and submit it. The bind
/// group drops with the encoder, so no binding outlives its dispatch.
pub(crate) fn dispatch(
    ctx: &GpuContext,
    label: &str,
    bundle: &PipelineBundle,
    bind_entries: &[wgpu::BindGroupEntry],
    groups: (u32, u32, u32),
) {
    let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout: &bundle.bgl,
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
        pass.set_pipeline(&bundle.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(groups.0, groups.1, groups.2);
    }
    ctx.submit_one(encoder);
}

// ---- bind group layout entry helpers (all COMPUTE visibility) --------------

pub(crate) fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub(crate) fn storage_buffer_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub(crate) fn sampled_entry(
    binding: u32,
    view_dim: wgpu::TextureViewDimension,
    uint: bool,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            sample_type: if uint {
                wgpu::TextureSampleType::Uint
            } else {
                wgpu::TextureSampleType::Float { filterable: false }
            },
            view_dimension: view_dim,
            multisampled: false,
        },
        count: None,
    }
}

pub(crate) fn storage_texture_entry(
    binding: u32,
    format: wgpu::TextureFormat,
    view_dim: wgpu::TextureViewDimension,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format,
            view_dimension: view_dim,
        },
        count: None,
    }
}

/// View dimension of a single-slice sampled view.
pub(crate) fn slice_view_dim(dim: Dimensions) -> wgpu::TextureViewDimension {
    if dim.is_3d() {
        wgpu::TextureViewDimension::D3
    } else {
        wgpu::TextureViewDimension::D2
    }
}

/// View dimension of a whole-texture or per-mip view.
pub(crate) fn full_view_dim(dim: Dimensions) -> wgpu::TextureViewDimension {
    if dim.is_3d() {
        wgpu::TextureViewDimension::D3
    } else {
        wgpu::TextureViewDimension::D2Array
    }
}
