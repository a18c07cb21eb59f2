// ============================================================================
// SHADER BUILDER — dimension-specific WGSL fragments & workgroup sizes
// ============================================================================

use crate::size::{div_round_up, Size3};

/// Texture dimensionality. Every synthesized shader family keeps one pipeline
/// per variant, built lazily on first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimensions {
    TwoD,
    ThreeD,
}

impl Dimensions {
    pub fn is_3d(&self) -> bool {
        matches!(self, Dimensions::ThreeD)
    }
}

/// Renders the WGSL fragments that differ between 2D-array and 3D textures:
/// binding types, load/store indexing, and workgroup sizes. Shader families
/// splice these into their templates so one template serves both variants.
#[derive(Debug, Clone, Copy)]
pub struct ShaderBuilder {
    pub dim: Dimensions,
    workgroup: (u32, u32, u32),
}

impl ShaderBuilder {
    /// `max_invocations` is the device's per-workgroup invocation limit; 3D
    /// shaders use 10×10×10 groups where 1000 invocations fit, 6×6×6 otherwise.
    pub fn new(dim: Dimensions, max_invocations: u32) -> Self {
        let workgroup = match dim {
            Dimensions::TwoD => {
                if max_invocations >= 1024 {
                    (32, 32, 1)
                } else {
                    (16, 16, 1)
                }
            }
            Dimensions::ThreeD => {
                if max_invocations >= 1000 {
                    (10, 10, 10)
                } else {
                    (6, 6, 6)
                }
            }
        };
        Self { dim, workgroup }
    }

    pub fn workgroup_size(&self) -> (u32, u32, u32) {
        self.workgroup
    }

    /// `@workgroup_size(..)` attribute text.
    pub fn workgroup_decl(&self) -> String {
        let (x, y, z) = self.workgroup;
        format!("@workgroup_size({x}, {y}, {z})")
    }

    /// Workgroup counts covering `size` texels.
    pub fn dispatch_groups(&self, size: Size3) -> (u32, u32, u32) {
        let (x, y, z) = self.workgroup;
        (
            div_round_up(size.x, x),
            div_round_up(size.y, y),
            div_round_up(size.z, z),
        )
    }

    /// Sampled binding type for a single-slice view (one layer, one mip).
    pub fn sampled_slice(&self, scalar: &str) -> String {
        match self.dim {
            Dimensions::TwoD => format!("texture_2d<{scalar}>"),
            Dimensions::ThreeD => format!("texture_3d<{scalar}>"),
        }
    }

    /// Sampled binding type for a whole-texture view (all layers and mips).
    pub fn sampled_full(&self, scalar: &str) -> String {
        match self.dim {
            Dimensions::TwoD => format!("texture_2d_array<{scalar}>"),
            Dimensions::ThreeD => format!("texture_3d<{scalar}>"),
        }
    }

    /// Write-only storage binding type for a per-mip view (all layers).
    pub fn storage_mip(&self, wgsl_format: &str) -> String {
        match self.dim {
            Dimensions::TwoD => {
                format!("texture_storage_2d_array<{wgsl_format}, write>")
            }
            Dimensions::ThreeD => format!("texture_storage_3d<{wgsl_format}, write>"),
        }
    }

    /// Load from a single-slice sampled binding named `tex` at `coord`
    /// (vec3<i32>, z ignored in 2D).
    pub fn load_slice(&self, tex: &str, coord: &str) -> String {
        match self.dim {
            Dimensions::TwoD => format!("textureLoad({tex}, ({coord}).xy, 0)"),
            Dimensions::ThreeD => format!("textureLoad({tex}, {coord}, 0)"),
        }
    }

    /// Load from a whole-texture binding at an explicit layer and mip.
    pub fn load_full(&self, tex: &str, coord: &str, layer: &str, mip: &str) -> String {
        match self.dim {
            Dimensions::TwoD => {
                format!("textureLoad({tex}, ({coord}).xy, i32({layer}), i32({mip}))")
            }
            Dimensions::ThreeD => format!("textureLoad({tex}, {coord}, i32({mip}))"),
        }
    }

    /// Store into a per-mip storage binding; `layer` is ignored in 3D.
    pub fn store_mip(&self, tex: &str, coord: &str, layer: &str, value: &str) -> String {
        match self.dim {
            Dimensions::TwoD => {
                format!("textureStore({tex}, ({coord}).xy, i32({layer}), {value})")
            }
            Dimensions::ThreeD => format!("textureStore({tex}, {coord}, {value})"),
        }
    }

    /// Query the size of a single-slice sampled binding as vec3<i32>.
    pub fn size_of_slice(&self, tex: &str) -> String {
        match self.dim {
            Dimensions::TwoD => {
                format!("vec3<i32>(vec2<i32>(textureDimensions({tex})), 1)")
            }
            Dimensions::ThreeD => format!("vec3<i32>(textureDimensions({tex}))"),
        }
    }

    /// Suffix for pipeline labels and cache keys.
    pub fn label_suffix(&self) -> &'static str {
        match self.dim {
            Dimensions::TwoD => "2d",
            Dimensions::ThreeD => "3d",
        }
    }
}

/// sRGB transfer helpers, spliced into the families that need perceptual
/// channels (statistics Luma) or sRGB-space filtering.
pub const SRGB_FUNCTIONS: &str = r#"
fn to_srgb_c(c: f32) -> f32 {
    if (c <= 0.0031308) { return c * 12.92; }
    return 1.055 * pow(c, 1.0 / 2.4) - 0.055;
}
fn to_srgb(v: vec4<f32>) -> vec4<f32> {
    return vec4<f32>(to_srgb_c(v.x), to_srgb_c(v.y), to_srgb_c(v.z), v.w);
}
fn from_srgb_c(c: f32) -> f32 {
    if (c <= 0.04045) { return c / 12.92; }
    return pow((c + 0.055) / 1.055, 2.4);
}
fn from_srgb(v: vec4<f32>) -> vec4<f32> {
    return vec4<f32>(from_srgb_c(v.x), from_srgb_c(v.y), from_srgb_c(v.z), v.w);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workgroup_sizes_respect_invocation_limit() {
        assert_eq!(
            ShaderBuilder::new(Dimensions::TwoD, 1024).workgroup_size(),
            (32, 32, 1)
        );
        assert_eq!(
            ShaderBuilder::new(Dimensions::ThreeD, 1024).workgroup_size(),
            (10, 10, 10)
        );
        assert_eq!(
            ShaderBuilder::new(Dimensions::ThreeD, 256).workgroup_size(),
            (6, 6, 6)
        );
        assert_eq!(
            ShaderBuilder::new(Dimensions::TwoD, 256).workgroup_size(),
            (16, 16, 1)
        );
    }

    #[test]
    fn binding_types_match_dimensionality() {
        let b2 = ShaderBuilder::new(Dimensions::TwoD, 1024);
        let b3 = ShaderBuilder::new(Dimensions::ThreeD, 1024);
        assert_eq!(b2.sampled_slice("f32"), "texture_2d<f32>");
        assert_eq!(b3.sampled_slice("u32"), "texture_3d<u32>");
        assert_eq!(
            b2.storage_mip("rgba32float"),
            "texture_storage_2d_array<rgba32float, write>"
        );
        assert_eq!(
            b3.storage_mip("r32uint"),
            "texture_storage_3d<r32uint, write>"
        );
    }

    #[test]
    fn dispatch_groups_round_up() {
        let b = ShaderBuilder::new(Dimensions::TwoD, 1024);
        assert_eq!(b.dispatch_groups(Size3::new(33, 32, 1)), (2, 1, 1));
        let b3 = ShaderBuilder::new(Dimensions::ThreeD, 256);
        assert_eq!(b3.dispatch_groups(Size3::new(7, 6, 13)), (2, 1, 3));
    }
}
