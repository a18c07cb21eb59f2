// ============================================================================
// PIXEL FORMATS — wgpu mapping, WGSL identifiers, CPU encode/decode
// ============================================================================

use half::f16;

use crate::error::{TexError, TexResult};

/// The pixel formats the compute core works with.
///
/// `Rgba32Float` is the working format for all filtering and statistics;
/// the others exist for ingestion, export and the integer skip volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgba8Unorm,
    Rgba8Srgb,
    Rgba16Float,
    Rgba32Float,
    R32Float,
    R32Uint,
}

impl PixelFormat {
    pub fn wgpu_format(&self) -> wgpu::TextureFormat {
        match self {
            PixelFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            PixelFormat::Rgba8Srgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            PixelFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            PixelFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
            PixelFormat::R32Float => wgpu::TextureFormat::R32Float,
            PixelFormat::R32Uint => wgpu::TextureFormat::R32Uint,
        }
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            PixelFormat::Rgba8Unorm | PixelFormat::Rgba8Srgb => 4,
            PixelFormat::Rgba16Float => 8,
            PixelFormat::Rgba32Float => 16,
            PixelFormat::R32Float | PixelFormat::R32Uint => 4,
        }
    }

    /// WGSL storage-texture format identifier, or an error for formats WGSL
    /// cannot bind as storage (sRGB views are sample-only).
    pub fn wgsl_storage_format(&self) -> TexResult<&'static str> {
        match self {
            PixelFormat::Rgba8Unorm => Ok("rgba8unorm"),
            PixelFormat::Rgba16Float => Ok("rgba16float"),
            PixelFormat::Rgba32Float => Ok("rgba32float"),
            PixelFormat::R32Float => Ok("r32float"),
            PixelFormat::R32Uint => Ok("r32uint"),
            PixelFormat::Rgba8Srgb => Err(TexError::UnsupportedFormat(
                "rgba8unorm-srgb cannot be bound as a storage texture".into(),
            )),
        }
    }

    /// Sampled-texture scalar type in WGSL (`texture_2d_array<f32>` vs `<u32>`).
    pub fn wgsl_scalar(&self) -> &'static str {
        match self {
            PixelFormat::R32Uint => "u32",
            _ => "f32",
        }
    }

    pub fn channels(&self) -> u32 {
        match self {
            PixelFormat::R32Float | PixelFormat::R32Uint => 1,
            _ => 4,
        }
    }

    /// Encode one texel, appending its bytes to `out`. Single-channel formats
    /// take the value from `.x`.
    pub fn encode(&self, v: [f32; 4], out: &mut Vec<u8>) {
        match self {
            PixelFormat::Rgba8Unorm => {
                for c in v {
                    out.push(unorm8(c));
                }
            }
            PixelFormat::Rgba8Srgb => {
                out.push(unorm8(linear_to_srgb(v[0])));
                out.push(unorm8(linear_to_srgb(v[1])));
                out.push(unorm8(linear_to_srgb(v[2])));
                out.push(unorm8(v[3]));
            }
            PixelFormat::Rgba16Float => {
                for c in v {
                    out.extend_from_slice(&f16::from_f32(c).to_le_bytes());
                }
            }
            PixelFormat::Rgba32Float => {
                for c in v {
                    out.extend_from_slice(&c.to_le_bytes());
                }
            }
            PixelFormat::R32Float => out.extend_from_slice(&v[0].to_le_bytes()),
            PixelFormat::R32Uint => out.extend_from_slice(&(v[0] as u32).to_le_bytes()),
        }
    }

    /// Decode one texel from `bytes` (must hold exactly `bytes_per_pixel`).
    /// Single-channel formats expand to `(v, 0, 0, 1)` as sampling does.
    pub fn decode(&self, bytes: &[u8]) -> [f32; 4] {
        debug_assert_eq!(bytes.len(), self.bytes_per_pixel() as usize);
        match self {
            PixelFormat::Rgba8Unorm => [
                bytes[0] as f32 / 255.0,
                bytes[1] as f32 / 255.0,
                bytes[2] as f32 / 255.0,
                bytes[3] as f32 / 255.0,
            ],
            PixelFormat::Rgba8Srgb => [
                srgb_to_linear(bytes[0] as f32 / 255.0),
                srgb_to_linear(bytes[1] as f32 / 255.0),
                srgb_to_linear(bytes[2] as f32 / 255.0),
                bytes[3] as f32 / 255.0,
            ],
            PixelFormat::Rgba16Float => {
                let c = |i: usize| {
                    f16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]).to_f32()
                };
                [c(0), c(1), c(2), c(3)]
            }
            PixelFormat::Rgba32Float => {
                let c = |i: usize| {
                    f32::from_le_bytes(bytes[i * 4..i * 4 + 4].try_into().unwrap())
                };
                [c(0), c(1), c(2), c(3)]
            }
            PixelFormat::R32Float => {
                [f32::from_le_bytes(bytes[0..4].try_into().unwrap()), 0.0, 0.0, 1.0]
            }
            PixelFormat::R32Uint => {
                [u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as f32, 0.0, 0.0, 1.0]
            }
        }
    }

    pub fn encode_pixels(&self, pixels: &[[f32; 4]]) -> Vec<u8> {
        let mut out = Vec::with_capacity(pixels.len() * self.bytes_per_pixel() as usize);
        for &p in pixels {
            self.encode(p, &mut out);
        }
        out
    }

    pub fn decode_pixels(&self, bytes: &[u8]) -> Vec<[f32; 4]> {
        let bpp = self.bytes_per_pixel() as usize;
        debug_assert_eq!(bytes.len() % bpp, 0);
        bytes.chunks_exact(bpp).map(|c| self.decode(c)).collect()
    }
}

fn unorm8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8
}

fn linear_to_srgb(v: f32) -> f32 {
    if v <= 0.0031308 {
        v * 12.92
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

fn srgb_to_linear(v: f32) -> f32 {
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}
