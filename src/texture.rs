// ============================================================================
// TEXTURE — 2D-array / 3D texture with per-(layer,mip) views
// ============================================================================

use crate::builder::Dimensions;
use crate::context::GpuContext;
use crate::error::{TexError, TexResult};
use crate::format::PixelFormat;
use crate::size::{align_to, LayerMipmapCount, LayerMipmapSlice, Size3};

/// A GPU texture owned by the compute core.
///
/// Views are created eagerly alongside the texture and dropped with it:
/// one sampled view per (layer, mip) slice, one storage view per mip level
/// (covering all layers), and one whole-texture sampled view. 3D textures
/// always have exactly one layer.
pub struct Texture {
    texture: wgpu::Texture,
    size: Size3,
    lm: LayerMipmapCount,
    format: PixelFormat,
    dim: Dimensions,
    // index = mip * layers + layer
    srv: Vec<wgpu::TextureView>,
    // index = mip; empty when the format cannot be bound as storage
    uav: Vec<wgpu::TextureView>,
    full: wgpu::TextureView,
}

impl Texture {
    /// Create an uninitialized texture. Fails with `ResourceLimit` when the
    /// extent exceeds what the device supports, reporting the device maximum
    /// so the caller can retry smaller.
    pub fn new(
        ctx: &GpuContext,
        label: &str,
        size: Size3,
        lm: LayerMipmapCount,
        format: PixelFormat,
        dim: Dimensions,
    ) -> TexResult<Self> {
        assert!(size.x > 0 && size.y > 0 && size.z > 0);
        assert!(
            !dim.is_3d() || lm.layers == 1,
            "3d textures have exactly one layer"
        );
        assert!(dim.is_3d() || size.z == 1, "2d textures have depth 1");
        assert!(lm.mips <= size.max_mip_levels());

        let max_dim = if dim.is_3d() {
            ctx.max_texture_dim_3d
        } else {
            ctx.max_texture_dim_2d
        };
        let largest = size.x.max(size.y).max(size.z);
        if largest > max_dim {
            return Err(TexError::resource_limit(
                "texture dimension",
                largest as u64,
                max_dim as u64,
            ));
        }

        // sRGB views are sample-only, every other format also binds as storage
        let storage_capable = format.wgsl_storage_format().is_ok();
        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC;
        if storage_capable {
            usage |= wgpu::TextureUsages::STORAGE_BINDING;
        }

        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size.x,
                height: size.y,
                depth_or_array_layers: if dim.is_3d() { size.z } else { lm.layers },
            },
            mip_level_count: lm.mips,
            sample_count: 1,
            dimension: if dim.is_3d() {
                wgpu::TextureDimension::D3
            } else {
                wgpu::TextureDimension::D2
            },
            format: format.wgpu_format(),
            usage,
            view_formats: &[],
        });

        let mut srv = Vec::with_capacity((lm.layers * lm.mips) as usize);
        for slice in lm.slices() {
            srv.push(texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some(label),
                dimension: Some(if dim.is_3d() {
                    wgpu::TextureViewDimension::D3
                } else {
                    wgpu::TextureViewDimension::D2
                }),
                base_mip_level: slice.mip,
                mip_level_count: Some(1),
                base_array_layer: if dim.is_3d() { 0 } else { slice.layer },
                array_layer_count: if dim.is_3d() { None } else { Some(1) },
                ..Default::default()
            }));
        }

        let mut uav = Vec::new();
        if storage_capable {
            for mip in 0..lm.mips {
                uav.push(texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some(label),
                    dimension: Some(if dim.is_3d() {
                        wgpu::TextureViewDimension::D3
                    } else {
                        wgpu::TextureViewDimension::D2Array
                    }),
                    base_mip_level: mip,
                    mip_level_count: Some(1),
                    ..Default::default()
                }));
            }
        }

        let full = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(label),
            dimension: Some(if dim.is_3d() {
                wgpu::TextureViewDimension::D3
            } else {
                wgpu::TextureViewDimension::D2Array
            }),
            ..Default::default()
        });

        Ok(Self {
            texture,
            size,
            lm,
            format,
            dim,
            srv,
            uav,
            full,
        })
    }

    /// Create and fill from decoded byte buffers, one per (layer, mip) slice
    /// in `lm.slices()` order.
    pub fn with_data(
        ctx: &GpuContext,
        label: &str,
        size: Size3,
        lm: LayerMipmapCount,
        format: PixelFormat,
        dim: Dimensions,
        data: &[&[u8]],
    ) -> TexResult<Self> {
        assert_eq!(data.len(), (lm.layers * lm.mips) as usize);
        let tex = Self::new(ctx, label, size, lm, format, dim)?;
        for (slice, bytes) in lm.slices().zip(data) {
            tex.upload(ctx, slice, bytes);
        }
        Ok(tex)
    }

    pub fn size(&self) -> Size3 {
        self.size
    }

    pub fn mip_size(&self, mip: u32) -> Size3 {
        self.size.mip_size(mip)
    }

    pub fn layer_mipmap(&self) -> LayerMipmapCount {
        self.lm
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn dim(&self) -> Dimensions {
        self.dim
    }

    pub fn raw(&self) -> &wgpu::Texture {
        &self.texture
    }

    /// Sampled view of one (layer, mip) slice.
    pub fn srv(&self, lm: LayerMipmapSlice) -> &wgpu::TextureView {
        assert!(self.lm.contains(lm), "slice out of range: {lm:?}");
        &self.srv[(lm.mip * self.lm.layers + lm.layer) as usize]
    }

    /// Write-only storage view of one mip level, all layers.
    pub fn uav(&self, mip: u32) -> &wgpu::TextureView {
        assert!(mip < self.lm.mips, "mip out of range: {mip}");
        assert!(
            !self.uav.is_empty(),
            "format {:?} has no storage views",
            self.format
        );
        &self.uav[mip as usize]
    }

    /// Sampled view covering all layers and mips.
    pub fn full_view(&self) -> &wgpu::TextureView {
        &self.full
    }

    fn copy_extent(&self, mip: u32) -> wgpu::Extent3d {
        let s = self.mip_size(mip);
        wgpu::Extent3d {
            width: s.x,
            height: s.y,
            depth_or_array_layers: if self.dim.is_3d() { s.z } else { 1 },
        }
    }

    /// Upload decoded bytes into one (layer, mip) slice.
    pub fn upload(&self, ctx: &GpuContext, lm: LayerMipmapSlice, bytes: &[u8]) {
        assert!(self.lm.contains(lm));
        let s = self.mip_size(lm.mip);
        let bpp = self.format.bytes_per_pixel();
        assert_eq!(bytes.len(), s.product() * bpp as usize);
        ctx.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: lm.mip,
                origin: wgpu::Origin3d {
                    x: 0,
                    y: 0,
                    z: if self.dim.is_3d() { 0 } else { lm.layer },
                },
                aspect: wgpu::TextureAspect::All,
            },
            bytes,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(s.x * bpp),
                rows_per_image: Some(s.y),
            },
            self.copy_extent(lm.mip),
        );
    }

    /// Read one (layer, mip) slice back to the CPU as tightly packed bytes.
    pub fn read_bytes(&self, ctx: &GpuContext, lm: LayerMipmapSlice) -> TexResult<Vec<u8>> {
        assert!(self.lm.contains(lm));
        let s = self.mip_size(lm.mip);
        let bpp = self.format.bytes_per_pixel();
        let padded_row = align_to(s.x * bpp, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("texture readback staging"),
            size: padded_row as u64 * s.y as u64 * s.z as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("texture readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: lm.mip,
                origin: wgpu::Origin3d {
                    x: 0,
                    y: 0,
                    z: if self.dim.is_3d() { 0 } else { lm.layer },
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(s.y),
                },
            },
            self.copy_extent(lm.mip),
        );
        ctx.submit_one(encoder);

        let padded = ctx.read_buffer(&staging)?;
        let tight_row = (s.x * bpp) as usize;
        let mut out = Vec::with_capacity(tight_row * s.y as usize * s.z as usize);
        for row in 0..(s.y * s.z) as usize {
            let start = row * padded_row as usize;
            out.extend_from_slice(&padded[start..start + tight_row]);
        }
        Ok(out)
    }

    /// Read one slice decoded to `[f32; 4]` texels.
    pub fn read_texels(
        &self,
        ctx: &GpuContext,
        lm: LayerMipmapSlice,
    ) -> TexResult<Vec<[f32; 4]>> {
        Ok(self.format.decode_pixels(&self.read_bytes(ctx, lm)?))
    }

    /// Deep copy: a new texture with identical contents and layout.
    pub fn clone_texture(&self, ctx: &GpuContext, label: &str) -> TexResult<Texture> {
        let dst = Texture::new(ctx, label, self.size, self.lm, self.format, self.dim)?;
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("texture clone"),
            });
        for mip in 0..self.lm.mips {
            let mut extent = self.copy_extent(mip);
            if !self.dim.is_3d() {
                extent.depth_or_array_layers = self.lm.layers;
            }
            encoder.copy_texture_to_texture(
                wgpu::ImageCopyTexture {
                    texture: &self.texture,
                    mip_level: mip,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::ImageCopyTexture {
                    texture: &dst.texture,
                    mip_level: mip,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                extent,
            );
        }
        ctx.submit_one(encoder);
        Ok(dst)
    }

    /// A single-mip copy of the given level, at that level's size.
    pub fn clone_without_mipmaps(
        &self,
        ctx: &GpuContext,
        label: &str,
        mip: u32,
    ) -> TexResult<Texture> {
        assert!(mip < self.lm.mips);
        let dst = Texture::new(
            ctx,
            label,
            self.mip_size(mip),
            LayerMipmapCount::new(self.lm.layers, 1),
            self.format,
            self.dim,
        )?;
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("texture mip extract"),
            });
        let mut extent = self.copy_extent(mip);
        if !self.dim.is_3d() {
            extent.depth_or_array_layers = self.lm.layers;
        }
        encoder.copy_texture_to_texture(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: mip,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyTexture {
                texture: &dst.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            extent,
        );
        ctx.submit_one(encoder);
        Ok(dst)
    }

    /// Copy one (layer, mip) slice into the matching slice of `dst`.
    pub(crate) fn copy_slice_to(&self, ctx: &GpuContext, lm: LayerMipmapSlice, dst: &Texture) {
        assert!(self.lm.contains(lm) && dst.lm.contains(lm));
        assert_eq!(self.mip_size(lm.mip), dst.mip_size(lm.mip));
        assert_eq!(self.format, dst.format);
        let origin = wgpu::Origin3d {
            x: 0,
            y: 0,
            z: if self.dim.is_3d() { 0 } else { lm.layer },
        };
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("texture slice copy"),
            });
        encoder.copy_texture_to_texture(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: lm.mip,
                origin,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyTexture {
                texture: &dst.texture,
                mip_level: lm.mip,
                origin,
                aspect: wgpu::TextureAspect::All,
            },
            self.copy_extent(lm.mip),
        );
        ctx.submit_one(encoder);
    }

    /// Copy this texture's base level into `dst`'s base level (sizes must
    /// match). Used when rebuilding a mip pyramid into a fresh allocation.
    pub(crate) fn copy_base_to(&self, ctx: &GpuContext, dst: &Texture) {
        assert_eq!(self.size, dst.size);
        assert_eq!(self.lm.layers, dst.lm.layers);
        assert_eq!(self.format, dst.format);
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("texture base copy"),
            });
        let mut extent = self.copy_extent(0);
        if !self.dim.is_3d() {
            extent.depth_or_array_layers = self.lm.layers;
        }
        encoder.copy_texture_to_texture(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyTexture {
                texture: &dst.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            extent,
        );
        ctx.submit_one(encoder);
    }
}
