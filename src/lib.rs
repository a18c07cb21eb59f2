//! GPU compute core for texture viewing and processing.
//!
//! Everything runs through [`GpuContext`] (a wgpu device opened for compute)
//! and [`Texture`] (a 2D-array or 3D texture with per-slice views). Shader
//! families under [`shader`] synthesize their WGSL at runtime from the
//! texture's dimensionality and format and cache one pipeline per variant;
//! the parallel building blocks under [`compute`] do the same over raw
//! storage buffers.
//!
//! Typical flow: open a context, upload texels into a [`Texture`], run the
//! passes you need (format conversion, scaling, blurring, mipmap generation,
//! statistics), and read results back synchronously.

pub mod buffer;
pub mod builder;
pub mod compute;
pub mod context;
pub mod error;
pub mod format;
pub mod pool;
pub mod shader;
pub mod size;
pub mod stats;
pub mod texture;

pub use buffer::{DownloadBuffer, GpuBuffer, UploadBuffer};
pub use builder::{Dimensions, ShaderBuilder};
pub use context::GpuContext;
pub use error::{TexError, TexResult};
pub use format::PixelFormat;
pub use pool::{TextureCache, TextureLease};
pub use size::{LayerMipmapCount, LayerMipmapSlice, Size3};
pub use stats::{ChannelStats, StatChannel, Statistics, StatisticsShader};
pub use texture::Texture;
