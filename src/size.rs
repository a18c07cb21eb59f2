// ============================================================================
// SIZE & ADDRESSING TYPES — Size3, LayerMipmapSlice, LayerMipmapCount
// ============================================================================

/// Integer extent of a texture: width, height, depth.
///
/// 2D array textures carry `depth == 1`; the layer count lives in
/// [`LayerMipmapCount`], not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Size3 {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// 2D size (depth 1).
    pub const fn new_2d(x: u32, y: u32) -> Self {
        Self { x, y, z: 1 }
    }

    pub const ZERO: Size3 = Size3::new(0, 0, 0);

    /// Size of the given mip level (each level halves every axis, floor, min 1).
    pub fn mip_size(&self, level: u32) -> Size3 {
        Size3 {
            x: (self.x >> level).max(1),
            y: (self.y >> level).max(1),
            z: (self.z >> level).max(1),
        }
    }

    /// Number of mip levels down to 1×1×1.
    pub fn max_mip_levels(&self) -> u32 {
        let max_dim = self.x.max(self.y).max(self.z);
        32 - max_dim.leading_zeros()
    }

    /// Total number of texels.
    pub fn product(&self) -> usize {
        self.x as usize * self.y as usize * self.z as usize
    }

    pub fn component(&self, axis: usize) -> u32 {
        match axis {
            0 => self.x,
            1 => self.y,
            2 => self.z,
            _ => panic!("axis out of range: {axis}"),
        }
    }

    /// Linear index of a coordinate (x fastest, then y, then z).
    pub fn index_of(&self, x: u32, y: u32, z: u32) -> usize {
        debug_assert!(x < self.x && y < self.y && z < self.z);
        (z as usize * self.y as usize + y as usize) * self.x as usize + x as usize
    }

    /// Iterate all coordinates in linear order.
    pub fn coords(&self) -> impl Iterator<Item = (u32, u32, u32)> + '_ {
        let (w, h, d) = (self.x, self.y, self.z);
        (0..d).flat_map(move |z| (0..h).flat_map(move |y| (0..w).map(move |x| (x, y, z))))
    }
}

/// One (layer, mip) addressing unit. A "single mip" operation always
/// addresses exactly one layer and one mip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerMipmapSlice {
    pub layer: u32,
    pub mip: u32,
}

impl LayerMipmapSlice {
    pub const fn new(layer: u32, mip: u32) -> Self {
        Self { layer, mip }
    }

    /// Layer 0, mip 0.
    pub const MIP0: LayerMipmapSlice = LayerMipmapSlice::new(0, 0);
}

/// A layer×mip extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerMipmapCount {
    pub layers: u32,
    pub mips: u32,
}

impl LayerMipmapCount {
    pub const fn new(layers: u32, mips: u32) -> Self {
        debug_assert!(layers > 0 && mips > 0);
        Self { layers, mips }
    }

    /// Single layer, single mip.
    pub const ONE: LayerMipmapCount = LayerMipmapCount::new(1, 1);

    pub fn contains(&self, lm: LayerMipmapSlice) -> bool {
        lm.layer < self.layers && lm.mip < self.mips
    }

    /// Iterate every (layer, mip) slice, mips outer so all layers of one mip
    /// are visited together.
    pub fn slices(&self) -> impl Iterator<Item = LayerMipmapSlice> {
        let layers = self.layers;
        let mips = self.mips;
        (0..mips).flat_map(move |mip| (0..layers).map(move |layer| LayerMipmapSlice { layer, mip }))
    }

    /// All layers of one mip level.
    pub fn layers_of(&self, mip: u32) -> impl Iterator<Item = LayerMipmapSlice> {
        debug_assert!(mip < self.mips);
        (0..self.layers).map(move |layer| LayerMipmapSlice { layer, mip })
    }
}

/// Ceiling division, used for dispatch group counts everywhere.
pub(crate) fn div_round_up(a: u32, b: u32) -> u32 {
    debug_assert!(b > 0);
    (a + b - 1) / b
}

/// Round `a` up to the next multiple of `alignment`.
pub(crate) fn align_to(a: u32, alignment: u32) -> u32 {
    div_round_up(a, alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_size_halves_and_clamps() {
        let s = Size3::new(16, 8, 1);
        assert_eq!(s.mip_size(0), Size3::new(16, 8, 1));
        assert_eq!(s.mip_size(1), Size3::new(8, 4, 1));
        assert_eq!(s.mip_size(3), Size3::new(2, 1, 1));
        assert_eq!(s.mip_size(4), Size3::new(1, 1, 1));
    }

    #[test]
    fn max_mip_levels() {
        assert_eq!(Size3::new(1, 1, 1).max_mip_levels(), 1);
        assert_eq!(Size3::new(4, 4, 1).max_mip_levels(), 3);
        assert_eq!(Size3::new(5, 4, 1).max_mip_levels(), 3);
        assert_eq!(Size3::new(1024, 1, 1).max_mip_levels(), 11);
    }

    #[test]
    fn slice_iteration_visits_layers_of_a_mip_together() {
        let lm = LayerMipmapCount::new(2, 2);
        let v: Vec<_> = lm.slices().collect();
        assert_eq!(
            v,
            vec![
                LayerMipmapSlice::new(0, 0),
                LayerMipmapSlice::new(1, 0),
                LayerMipmapSlice::new(0, 1),
                LayerMipmapSlice::new(1, 1),
            ]
        );
    }

    #[test]
    fn rounding_helpers() {
        assert_eq!(div_round_up(0, 16), 0);
        assert_eq!(div_round_up(1, 16), 1);
        assert_eq!(div_round_up(16, 16), 1);
        assert_eq!(div_round_up(17, 16), 2);
        assert_eq!(align_to(8193, 8192), 16384);
    }

    #[test]
    fn linear_index_is_x_fastest() {
        let s = Size3::new(4, 3, 2);
        assert_eq!(s.index_of(0, 0, 0), 0);
        assert_eq!(s.index_of(3, 0, 0), 3);
        assert_eq!(s.index_of(0, 1, 0), 4);
        assert_eq!(s.index_of(0, 0, 1), 12);
        assert_eq!(s.coords().count(), s.product());
    }
}
