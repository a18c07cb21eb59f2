// ============================================================================
// TEXTURE CACHE — pooled intermediates with RAII leases
// ============================================================================

use std::cell::RefCell;
use std::collections::HashMap;
use std::ops::Deref;

use crate::builder::Dimensions;
use crate::context::GpuContext;
use crate::error::TexResult;
use crate::format::PixelFormat;
use crate::size::{LayerMipmapCount, Size3};
use crate::texture::Texture;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    size: Size3,
    layers: u32,
    mips: u32,
    format: PixelFormat,
    dim: Dimensions,
}

/// Pool of scratch textures for multi-pass shaders (separable blur passes,
/// statistics ping-pong). Leases return their texture to the pool on drop,
/// so no pass can leak a checkout on an early exit.
pub struct TextureCache {
    slots: RefCell<HashMap<CacheKey, Vec<Texture>>>,
    max_per_key: usize,
}

impl TextureCache {
    pub fn new() -> Self {
        Self {
            slots: RefCell::new(HashMap::new()),
            max_per_key: 4,
        }
    }

    /// Check out a texture with the given layout, reusing a pooled one when
    /// available and allocating otherwise.
    pub fn lease(
        &self,
        ctx: &GpuContext,
        size: Size3,
        lm: LayerMipmapCount,
        format: PixelFormat,
        dim: Dimensions,
    ) -> TexResult<TextureLease<'_>> {
        let key = CacheKey {
            size,
            layers: lm.layers,
            mips: lm.mips,
            format,
            dim,
        };
        let pooled = self
            .slots
            .borrow_mut()
            .get_mut(&key)
            .and_then(|v| v.pop());
        let tex = match pooled {
            Some(t) => t,
            None => Texture::new(ctx, "pooled texture", size, lm, format, dim)?,
        };
        Ok(TextureLease {
            cache: self,
            key,
            tex: Some(tex),
        })
    }

    /// Check out a texture laid out like `like`.
    pub fn lease_like(&self, ctx: &GpuContext, like: &Texture) -> TexResult<TextureLease<'_>> {
        self.lease(ctx, like.size(), like.layer_mipmap(), like.format(), like.dim())
    }

    fn give_back(&self, key: CacheKey, tex: Texture) {
        let mut slots = self.slots.borrow_mut();
        let entry = slots.entry(key).or_default();
        if entry.len() < self.max_per_key {
            entry.push(tex);
        }
        // otherwise drop: the key already holds enough spares
    }

    /// Drop every pooled texture.
    pub fn clear(&self) {
        self.slots.borrow_mut().clear();
    }

    #[cfg(test)]
    fn pooled_count(&self) -> usize {
        self.slots.borrow().values().map(Vec::len).sum()
    }
}

impl Default for TextureCache {
    fn default() -> Self {
        Self::new()
    }
}

/// A checked-out pool texture. Dereferences to [`Texture`]; returns to the
/// pool on drop.
pub struct TextureLease<'a> {
    cache: &'a TextureCache,
    key: CacheKey,
    tex: Option<Texture>,
}

impl Deref for TextureLease<'_> {
    type Target = Texture;

    fn deref(&self) -> &Texture {
        self.tex.as_ref().unwrap()
    }
}

impl Drop for TextureLease<'_> {
    fn drop(&mut self) {
        if let Some(tex) = self.tex.take() {
            self.cache.give_back(self.key, tex);
        }
    }
}
