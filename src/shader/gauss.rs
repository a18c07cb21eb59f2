// ============================================================================
// GAUSS SHADER — separable Gaussian blur through pooled intermediates
// ============================================================================

use crate::context::GpuContext;
use crate::error::TexResult;
use crate::pool::TextureCache;
use crate::size::{LayerMipmapCount, LayerMipmapSlice};
use crate::texture::Texture;

use super::filter::{
    FilterArgs, FilterDirection, FilterParam, FilterParamKind, FilterParamValue, FilterShader,
};

/// One-axis Gaussian convolution body. Weights are renormalized over the taps
/// that land in bounds, so edges keep full energy instead of darkening.
const GAUSS_BODY: &str = r#"fn apply_filter(coord: vec3<i32>) -> vec4<f32> {
    let dir = filter_dir();
    let radius = p_radius();
    let variance = p_variance();
    var sum = vec4<f32>(0.0);
    var weight_sum = 0.0;
    for (var o = -radius; o <= radius; o = o + 1) {
        let c = coord + dir * o;
        if (all(c >= vec3<i32>(0)) && all(c < src_size())) {
            let w = exp(-0.5 * f32(o * o) / variance);
            sum = sum + w * load_src(c);
            weight_sum = weight_sum + w;
        }
    }
    return sum / weight_sum;
}"#;

/// Separable Gaussian blur. 2D images take two passes through one pooled
/// intermediate; volumes take three passes through two.
pub struct GaussShader {
    inner: FilterShader,
}

impl GaussShader {
    pub fn new() -> Self {
        Self {
            inner: FilterShader::new(
                "gauss",
                GAUSS_BODY,
                vec![
                    FilterParam::new("radius", FilterParamKind::Int),
                    FilterParam::new("variance", FilterParamKind::Float),
                ],
                0,
                true,
            ),
        }
    }

    /// Blur one (layer, mip) slice of `src` into the same slice of `dst`.
    pub fn run(
        &self,
        ctx: &GpuContext,
        cache: &TextureCache,
        src: &Texture,
        dst: &Texture,
        lm: LayerMipmapSlice,
        radius: i32,
        variance: f32,
    ) -> TexResult<()> {
        assert!(radius > 0 && variance > 0.0);
        assert_eq!(src.dim(), dst.dim());

        let size = src.mip_size(lm.mip);
        let params = [
            FilterParamValue::Int(radius),
            FilterParamValue::Float(variance),
        ];
        let pass = |from: &Texture,
                    from_lm: LayerMipmapSlice,
                    to: &Texture,
                    to_lm: LayerMipmapSlice,
                    dir: FilterDirection|
         -> TexResult<()> {
            self.inner.run_slices(
                ctx,
                from,
                from_lm,
                to,
                to_lm,
                &FilterArgs {
                    params: &params,
                    textures: &[],
                    direction: Some(dir),
                    iteration: 0,
                },
            )?;
            Ok(())
        };

        let mip0 = LayerMipmapSlice::MIP0;
        if src.dim().is_3d() {
            let tmp1 = cache.lease(ctx, size, LayerMipmapCount::ONE, dst.format(), src.dim())?;
            let tmp2 = cache.lease(ctx, size, LayerMipmapCount::ONE, dst.format(), src.dim())?;
            pass(src, lm, &tmp1, mip0, FilterDirection::X)?;
            pass(&tmp1, mip0, &tmp2, mip0, FilterDirection::Y)?;
            pass(&tmp2, mip0, dst, lm, FilterDirection::Z)?;
        } else {
            let tmp = cache.lease(ctx, size, LayerMipmapCount::ONE, dst.format(), src.dim())?;
            pass(src, lm, &tmp, mip0, FilterDirection::X)?;
            pass(&tmp, mip0, dst, lm, FilterDirection::Y)?;
        }
        Ok(())
    }
}

impl Default for GaussShader {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalized 1D kernel weights as the shader computes them over a fully
/// in-bounds window.
pub fn gauss_kernel_weights(radius: i32, variance: f32) -> Vec<f32> {
    let mut weights: Vec<f32> = (-radius..=radius)
        .map(|o| (-0.5 * (o * o) as f32 / variance).exp())
        .collect();
    let sum: f32 = weights.iter().sum();
    for w in &mut weights {
        *w /= sum;
    }
    weights
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_weights_normalize_and_peak_at_center() {
        let w = gauss_kernel_weights(3, 2.0);
        assert_eq!(w.len(), 7);
        let sum: f32 = w.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(w[3] > w[2] && w[2] > w[1] && w[1] > w[0]);
        // symmetric
        for i in 0..3 {
            assert!((w[i] - w[6 - i]).abs() < 1e-7);
        }
    }

    #[test]
    fn body_renormalizes_in_bounds_taps() {
        assert!(GAUSS_BODY.contains("weight_sum = weight_sum + w"));
        assert!(GAUSS_BODY.contains("return sum / weight_sum"));
        assert!(GAUSS_BODY.contains("exp(-0.5 * f32(o * o) / variance)"));
    }
}
