// ============================================================================
// BUFFERS — uniform upload, storage, staging readback
// ============================================================================

use std::marker::PhantomData;

use bytemuck::Pod;

use crate::context::GpuContext;
use crate::error::TexResult;

/// Uniform buffer for one `#[repr(C)]` Pod struct, created once and refilled
/// with `write_buffer` before each dispatch.
pub struct UploadBuffer<T: Pod> {
    buffer: wgpu::Buffer,
    _marker: PhantomData<T>,
}

impl<T: Pod> UploadBuffer<T> {
    pub fn new(ctx: &GpuContext, label: &str) -> Self {
        let size = std::mem::size_of::<T>() as u64;
        // uniform blocks are 16-byte granular
        debug_assert_eq!(size % 16, 0, "uniform struct must be 16-byte aligned");
        let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            _marker: PhantomData,
        }
    }

    pub fn set(&self, ctx: &GpuContext, value: &T) {
        ctx.queue
            .write_buffer(&self.buffer, 0, bytemuck::bytes_of(value));
    }

    pub fn binding(&self) -> wgpu::BindingResource<'_> {
        self.buffer.as_entire_binding()
    }
}

/// Storage buffer of 4-byte scalar elements for the reduce/scan machinery and
/// shader-side flags.
pub struct GpuBuffer {
    buffer: wgpu::Buffer,
    element_count: u32,
}

impl GpuBuffer {
    pub const ELEMENT_SIZE: u32 = 4;

    pub fn new(ctx: &GpuContext, label: &str, element_count: u32) -> Self {
        let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: element_count as u64 * Self::ELEMENT_SIZE as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            element_count,
        }
    }

    pub fn element_count(&self) -> u32 {
        self.element_count
    }

    pub fn size_bytes(&self) -> u64 {
        self.element_count as u64 * Self::ELEMENT_SIZE as u64
    }

    /// Overwrite the front of the buffer with `data`; anything past it keeps
    /// its previous contents.
    pub fn upload<T: Pod>(&self, ctx: &GpuContext, data: &[T]) {
        let bytes = bytemuck::cast_slice(data);
        debug_assert!(bytes.len() as u64 <= self.size_bytes());
        ctx.queue.write_buffer(&self.buffer, 0, bytes);
    }

    pub fn raw(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn binding(&self) -> wgpu::BindingResource<'_> {
        self.buffer.as_entire_binding()
    }

    /// Blocking readback of the first `elements` values through a one-shot
    /// staging buffer.
    pub fn read_back<T: Pod>(&self, ctx: &GpuContext, elements: u32) -> TexResult<Vec<T>> {
        debug_assert!(elements <= self.element_count);
        debug_assert_eq!(std::mem::size_of::<T>(), Self::ELEMENT_SIZE as usize);
        let len = elements as u64 * Self::ELEMENT_SIZE as u64;
        let staging = DownloadBuffer::new(ctx, "buffer readback", len);
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("buffer readback"),
            });
        staging.copy_from(&mut encoder, &self.buffer, len);
        ctx.submit_one(encoder);
        staging.read(ctx)
    }
}

/// MAP_READ staging buffer plus a blocking typed read.
pub struct DownloadBuffer {
    buffer: wgpu::Buffer,
    size: u64,
}

impl DownloadBuffer {
    pub fn new(ctx: &GpuContext, label: &str, size: u64) -> Self {
        let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self { buffer, size }
    }

    /// Record a copy of `len` bytes from `src` into this staging buffer.
    pub fn copy_from(&self, encoder: &mut wgpu::CommandEncoder, src: &wgpu::Buffer, len: u64) {
        debug_assert!(len <= self.size);
        encoder.copy_buffer_to_buffer(src, 0, &self.buffer, 0, len);
    }

    pub fn raw(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Block until the queue drains, then read the staging contents as `T`s.
    pub fn read<T: Pod>(&self, ctx: &GpuContext) -> TexResult<Vec<T>> {
        let bytes = ctx.read_buffer(&self.buffer)?;
        Ok(bytemuck::cast_slice(&bytes).to_vec())
    }
}
