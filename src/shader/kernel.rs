// ============================================================================
// NON-SEPARABLE KERNEL SHADER — windowed loop with spliced body fragments
// ============================================================================

#[cfg(test)]
use crate::builder::ShaderBuilder;
use crate::context::GpuContext;
use crate::error::TexResult;
use crate::size::LayerMipmapSlice;
use crate::texture::Texture;

use super::filter::{FilterArgs, FilterParam, FilterParamKind, FilterParamValue, FilterShader};

/// A kernel that visits every texel in a `(2r+1)`-wide window (cube in 3D,
/// square in 2D) around the output coordinate. The caller supplies three WGSL
/// fragments spliced around the loop:
///
/// - `before_loop` — declarations, e.g. `var sum = vec4<f32>(0.0);`
/// - `in_loop` — runs per sample with `offset: vec3<i32>` and
///   `value: vec4<f32>` (clamped-edge sample) in scope
/// - `after_loop` — must `return` the output texel
pub struct NonSepKernelShader {
    inner: FilterShader,
}

impl NonSepKernelShader {
    pub fn new(
        name: &str,
        before_loop: &str,
        in_loop: &str,
        after_loop: &str,
        params: Vec<FilterParam>,
        texture_count: usize,
    ) -> Self {
        let mut all = vec![FilterParam::new("kernel_radius", FilterParamKind::Int)];
        all.extend(params);
        let body = format!(
            r#"fn apply_filter(coord: vec3<i32>) -> vec4<f32> {{
    let size = src_size();
    let radius = p_kernel_radius();
    let rz = select(0, radius, size.z > 1);
    {before_loop}
    for (var dz = -rz; dz <= rz; dz = dz + 1) {{
        for (var dy = -radius; dy <= radius; dy = dy + 1) {{
            for (var dx = -radius; dx <= radius; dx = dx + 1) {{
                let offset = vec3<i32>(dx, dy, dz);
                let value = load_src_clamped(coord + offset);
                {in_loop}
            }}
        }}
    }}
    {after_loop}
}}"#
        );
        Self {
            inner: FilterShader::new(name, &body, all, texture_count, false),
        }
    }

    #[cfg(test)]
    pub(crate) fn source(&self, builder: &ShaderBuilder) -> String {
        self.inner.source(builder)
    }

    /// Run over one (layer, mip) slice with the given window radius.
    pub fn run(
        &self,
        ctx: &GpuContext,
        src: &Texture,
        dst: &Texture,
        lm: LayerMipmapSlice,
        radius: i32,
        params: &[FilterParamValue],
        textures: &[&Texture],
    ) -> TexResult<()> {
        assert!(radius >= 0);
        let mut all = vec![FilterParamValue::Int(radius)];
        all.extend_from_slice(params);
        self.inner.run(
            ctx,
            src,
            dst,
            lm,
            &FilterArgs {
                params: &all,
                textures,
                direction: None,
                iteration: 0,
            },
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Dimensions;

    #[test]
    fn window_loop_wraps_spliced_fragments() {
        let k = NonSepKernelShader::new(
            "box",
            "var sum = vec4<f32>(0.0);\nvar count = 0.0;",
            "sum = sum + value;\ncount = count + 1.0;",
            "return sum / count;",
            vec![],
            0,
        );
        let b = ShaderBuilder::new(Dimensions::TwoD, 1024);
        let src = k.source(&b);
        assert!(src.contains("let radius = p_kernel_radius();"));
        assert!(src.contains("var sum = vec4<f32>(0.0);"));
        assert!(src.contains("sum = sum + value;"));
        assert!(src.contains("return sum / count;"));
        // z loop collapses for depth-1 sources
        assert!(src.contains("select(0, radius, size.z > 1)"));
    }
}
