// ============================================================================
// GPU CONTEXT — adapter/device init, shader compilation, submit, readback
// ============================================================================

use std::sync::{mpsc, Arc};

use crate::error::{TexError, TexResult};

/// Owns the wgpu device/queue pair every other component borrows.
///
/// There is no global instance; constructors take `&GpuContext` explicitly.
/// Command issuance is single-threaded: each dispatch helper records one
/// encoder and submits it, and readbacks block until the queue drains.
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub adapter_name: String,
    /// Max dimension for 2D textures on this device.
    pub max_texture_dim_2d: u32,
    /// Max dimension for 3D textures on this device.
    pub max_texture_dim_3d: u32,
    /// Max invocations in one compute workgroup.
    pub max_workgroup_invocations: u32,
    /// Max workgroups along one dispatch dimension.
    pub max_workgroups_per_dim: u32,
}

impl GpuContext {
    /// Synchronous construction. Tries a hardware adapter first, then the
    /// software fallback, and passes the adapter's own limits through so
    /// large textures and wide workgroups are available where the hardware
    /// has them.
    pub fn new(power: wgpu::PowerPreference) -> TexResult<Self> {
        pollster::block_on(Self::new_async(power))
    }

    pub async fn new_async(power: wgpu::PowerPreference) -> TexResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let mut adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: power,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await;
        if adapter.is_none() {
            adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: power,
                    compatible_surface: None,
                    force_fallback_adapter: true,
                })
                .await;
        }
        let adapter = adapter.ok_or(TexError::NoAdapter)?;

        let info = adapter.get_info();
        tracing::info!(
            adapter = %info.name,
            backend = ?info.backend,
            "selected gpu adapter"
        );

        let limits = adapter.limits();
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("texproc device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits.clone(),
                },
                None,
            )
            .await
            .map_err(|e| TexError::DeviceRequest(e.to_string()))?;

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_name: info.name,
            max_texture_dim_2d: limits.max_texture_dimension_2d,
            max_texture_dim_3d: limits.max_texture_dimension_3d,
            max_workgroup_invocations: limits.max_compute_invocations_per_workgroup,
            max_workgroups_per_dim: limits.max_compute_workgroups_per_dimension,
        })
    }

    /// Compile a synthesized WGSL module under a validation error scope.
    /// Validation failures come back as `ShaderCompile` with the full
    /// line-numbered source.
    pub fn compile_shader(&self, name: &str, source: &str) -> TexResult<wgpu::ShaderModule> {
        self.device
            .push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(name),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(TexError::shader_compile(name, &err.to_string(), source));
        }
        Ok(module)
    }

    /// Record-and-submit helper for single-pass work.
    pub fn submit_one(&self, encoder: wgpu::CommandEncoder) {
        self.queue.submit(Some(encoder.finish()));
    }

    /// Block until all submitted work has completed.
    pub fn wait_idle(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }

    /// Map a MAP_READ staging buffer and copy its contents out. Blocks.
    pub fn read_buffer(&self, staging: &wgpu::Buffer) -> TexResult<Vec<u8>> {
        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = tx.send(r);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| TexError::Readback("map callback dropped".into()))?
            .map_err(|e| TexError::Readback(e.to_string()))?;
        let data = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(data)
    }
}
