// ============================================================================
// GPU PIPELINE TESTS — texture passes end to end
// ============================================================================
//! Every test opens its own device and returns early when no adapter is
//! available, so the suite passes on headless CI without a GPU.

use texproc::shader::combine::ImageCombineShader;
use texproc::shader::convert::{ConvertArgs, ConvertFormatShader};
use texproc::shader::gauss::GaussShader;
use texproc::shader::mipmap::MipmapShader;
use texproc::shader::pad::{FillMode, PaddingShader};
use texproc::shader::pixel_value::PixelValueShader;
use texproc::shader::scale::MitchellNetravaliShader;
use texproc::{
    Dimensions, GpuContext, LayerMipmapCount, LayerMipmapSlice, PixelFormat, Size3,
    StatChannel, StatisticsShader, Texture, TextureCache,
};

fn ctx() -> Option<GpuContext> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    GpuContext::new(wgpu::PowerPreference::LowPower).ok()
}

fn image_2d(ctx: &GpuContext, size: Size3, pixels: &[[f32; 4]]) -> Texture {
    assert_eq!(pixels.len(), size.product());
    let bytes = PixelFormat::Rgba32Float.encode_pixels(pixels);
    Texture::with_data(
        ctx,
        "test image",
        size,
        LayerMipmapCount::ONE,
        PixelFormat::Rgba32Float,
        Dimensions::TwoD,
        &[&bytes],
    )
    .unwrap()
}

fn close(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-4
}

#[test]
fn convert_round_trips_rgba8() {
    let Some(ctx) = ctx() else { return };
    let size = Size3::new_2d(3, 2);
    let bytes: Vec<u8> = (0..24).map(|i| (i * 10) as u8).collect();
    let src = Texture::with_data(
        &ctx,
        "rgba8",
        size,
        LayerMipmapCount::ONE,
        PixelFormat::Rgba8Unorm,
        Dimensions::TwoD,
        &[&bytes],
    )
    .unwrap();

    let convert = ConvertFormatShader::new();
    let float = convert
        .convert(&ctx, &src, &ConvertArgs::to_format(PixelFormat::Rgba32Float))
        .unwrap();
    let back = convert
        .convert(&ctx, &float, &ConvertArgs::to_format(PixelFormat::Rgba8Unorm))
        .unwrap();
    assert_eq!(back.read_bytes(&ctx, LayerMipmapSlice::MIP0).unwrap(), bytes);
}

#[test]
fn convert_crops_a_window() {
    let Some(ctx) = ctx() else { return };
    let size = Size3::new_2d(4, 4);
    let pixels: Vec<[f32; 4]> = (0..16).map(|i| [i as f32, 0.0, 0.0, 1.0]).collect();
    let src = image_2d(&ctx, size, &pixels);

    let args = ConvertArgs {
        crop_offset: Size3::new(1, 1, 0),
        crop_size: Some(Size3::new_2d(2, 2)),
        ..ConvertArgs::to_format(PixelFormat::Rgba32Float)
    };
    let cropped = ConvertFormatShader::new().convert(&ctx, &src, &args).unwrap();
    assert_eq!(cropped.size(), Size3::new_2d(2, 2));
    let texels = cropped.read_texels(&ctx, LayerMipmapSlice::MIP0).unwrap();
    let reds: Vec<f32> = texels.iter().map(|t| t[0]).collect();
    assert_eq!(reds, vec![5.0, 6.0, 9.0, 10.0]);
}

#[test]
fn convert_applies_multiplier() {
    let Some(ctx) = ctx() else { return };
    let src = image_2d(&ctx, Size3::new_2d(2, 1), &[[1.0, 2.0, 3.0, 4.0], [0.5; 4]]);
    let args = ConvertArgs {
        multiplier: 2.0,
        ..ConvertArgs::to_format(PixelFormat::Rgba32Float)
    };
    let doubled = ConvertFormatShader::new().convert(&ctx, &src, &args).unwrap();
    let texels = doubled.read_texels(&ctx, LayerMipmapSlice::MIP0).unwrap();
    assert_eq!(texels[0], [2.0, 4.0, 6.0, 8.0]);
    assert_eq!(texels[1], [1.0; 4]);
}

#[test]
fn mipmap_box_filters_each_level() {
    let Some(ctx) = ctx() else { return };
    let pixels: Vec<[f32; 4]> = (0..16).map(|i| [i as f32, 0.0, 0.0, 1.0]).collect();
    let src = image_2d(&ctx, Size3::new_2d(4, 4), &pixels);

    let mipmapped = MipmapShader::new()
        .generate_mipmap_levels(&ctx, &src, 3)
        .unwrap();
    assert_eq!(mipmapped.layer_mipmap().mips, 3);

    let mip1 = mipmapped
        .read_texels(&ctx, LayerMipmapSlice::new(0, 1))
        .unwrap();
    let reds: Vec<f32> = mip1.iter().map(|t| t[0]).collect();
    // each texel averages a 2x2 quad of the base level
    assert_eq!(reds, vec![2.5, 4.5, 10.5, 12.5]);

    let mip2 = mipmapped
        .read_texels(&ctx, LayerMipmapSlice::new(0, 2))
        .unwrap();
    assert!(close(mip2[0][0], 7.5));
    assert!(close(mip2[0][3], 1.0));
}

#[test]
fn mipmap_handles_odd_extents() {
    let Some(ctx) = ctx() else { return };
    let pixels = vec![[4.0, 0.0, 0.0, 1.0]; 15];
    let src = image_2d(&ctx, Size3::new_2d(5, 3), &pixels);
    let mipmapped = MipmapShader::new()
        .generate_mipmap_levels(&ctx, &src, 2)
        .unwrap();
    // 5x3 -> 2x1, still averaging only in-bounds texels
    let mip1 = mipmapped
        .read_texels(&ctx, LayerMipmapSlice::new(0, 1))
        .unwrap();
    assert_eq!(mip1.len(), 2);
    for t in mip1 {
        assert!(close(t[0], 4.0));
    }
}

#[test]
fn gauss_preserves_constant_images() {
    let Some(ctx) = ctx() else { return };
    let cache = TextureCache::new();
    let size = Size3::new_2d(16, 16);
    let pixels = vec![[0.2, 0.4, 0.6, 0.8]; size.product()];
    let src = image_2d(&ctx, size, &pixels);
    let dst = Texture::new(
        &ctx,
        "blurred",
        size,
        LayerMipmapCount::ONE,
        PixelFormat::Rgba32Float,
        Dimensions::TwoD,
    )
    .unwrap();

    GaussShader::new()
        .run(&ctx, &cache, &src, &dst, LayerMipmapSlice::MIP0, 3, 2.0)
        .unwrap();

    // edge taps are renormalized, so even border texels keep the value
    for t in dst.read_texels(&ctx, LayerMipmapSlice::MIP0).unwrap() {
        for c in 0..4 {
            assert!(close(t[c], pixels[0][c]), "{t:?}");
        }
    }
}

#[test]
fn gauss_spreads_an_impulse_symmetrically() {
    let Some(ctx) = ctx() else { return };
    let cache = TextureCache::new();
    let size = Size3::new_2d(9, 9);
    let mut pixels = vec![[0.0, 0.0, 0.0, 0.0]; size.product()];
    pixels[size.index_of(4, 4, 0)] = [1.0, 1.0, 1.0, 1.0];
    let src = image_2d(&ctx, size, &pixels);
    let dst = Texture::new(
        &ctx,
        "blurred",
        size,
        LayerMipmapCount::ONE,
        PixelFormat::Rgba32Float,
        Dimensions::TwoD,
    )
    .unwrap();

    GaussShader::new()
        .run(&ctx, &cache, &src, &dst, LayerMipmapSlice::MIP0, 2, 1.5)
        .unwrap();

    let texels = dst.read_texels(&ctx, LayerMipmapSlice::MIP0).unwrap();
    let at = |x: u32, y: u32| texels[size.index_of(x, y, 0)][0];
    assert!(at(4, 4) > at(3, 4));
    assert!(close(at(3, 4), at(5, 4)));
    assert!(close(at(4, 3), at(4, 5)));
    assert!(close(at(3, 4), at(4, 3)));
}

#[test]
fn padding_fill_modes() {
    let Some(ctx) = ctx() else { return };
    let src = image_2d(&ctx, Size3::new_2d(2, 2), &[[1.0, 0.5, 0.25, 1.0]; 4]);
    let shader = PaddingShader::new();
    let one = Size3::new(1, 1, 0);

    let black = shader.pad(&ctx, &src, one, one, FillMode::Black).unwrap();
    assert_eq!(black.size(), Size3::new_2d(4, 4));
    let texels = black.read_texels(&ctx, LayerMipmapSlice::MIP0).unwrap();
    assert_eq!(texels[0], [0.0, 0.0, 0.0, 1.0]);
    assert_eq!(texels[5], [1.0, 0.5, 0.25, 1.0]);

    let white = shader.pad(&ctx, &src, one, one, FillMode::White).unwrap();
    let texels = white.read_texels(&ctx, LayerMipmapSlice::MIP0).unwrap();
    assert_eq!(texels[0], [1.0; 4]);

    let transparent = shader
        .pad(&ctx, &src, one, one, FillMode::Transparent)
        .unwrap();
    let texels = transparent.read_texels(&ctx, LayerMipmapSlice::MIP0).unwrap();
    assert_eq!(texels[0], [0.0; 4]);

    let clamp = shader.pad(&ctx, &src, one, one, FillMode::Clamp).unwrap();
    let texels = clamp.read_texels(&ctx, LayerMipmapSlice::MIP0).unwrap();
    assert_eq!(texels[0], [1.0, 0.5, 0.25, 1.0]);
}

#[test]
fn scale_to_same_size_is_identity() {
    let Some(ctx) = ctx() else { return };
    let size = Size3::new_2d(8, 8);
    let pixels: Vec<[f32; 4]> = (0..size.product())
        .map(|i| {
            let v = ((i * 37) % 101) as f32 / 101.0;
            [v, 1.0 - v, v * v, 1.0]
        })
        .collect();
    let src = image_2d(&ctx, size, &pixels);
    let scaled = MitchellNetravaliShader::new().scale(&ctx, &src, size).unwrap();
    let texels = scaled.read_texels(&ctx, LayerMipmapSlice::MIP0).unwrap();
    for (got, want) in texels.iter().zip(&pixels) {
        for c in 0..4 {
            assert!((got[c] - want[c]).abs() < 1e-3, "{got:?} vs {want:?}");
        }
    }
}

#[test]
fn scale_downsamples_constant_images_exactly() {
    let Some(ctx) = ctx() else { return };
    let pixels = vec![[0.3, 0.6, 0.9, 1.0]; 16 * 12];
    let src = image_2d(&ctx, Size3::new_2d(16, 12), &pixels);
    let scaled = MitchellNetravaliShader::new()
        .scale(&ctx, &src, Size3::new_2d(7, 5))
        .unwrap();
    assert_eq!(scaled.size(), Size3::new_2d(7, 5));
    for t in scaled.read_texels(&ctx, LayerMipmapSlice::MIP0).unwrap() {
        for c in 0..4 {
            assert!(close(t[c], pixels[0][c]));
        }
    }
}

#[test]
fn combine_evaluates_both_formulas() {
    let Some(ctx) = ctx() else { return };
    let size = Size3::new_2d(2, 2);
    let a = image_2d(&ctx, size, &[[0.1, 0.2, 0.3, 0.9]; 4]);
    let b = image_2d(&ctx, size, &[[0.4, 0.3, 0.2, 0.5]; 4]);
    let dst = Texture::new(
        &ctx,
        "combined",
        size,
        LayerMipmapCount::ONE,
        PixelFormat::Rgba32Float,
        Dimensions::TwoD,
    )
    .unwrap();

    ImageCombineShader::new(
        "add",
        2,
        "GetTexture0() + GetTexture1()",
        "fbigger(GetTexture0(), GetTexture1())",
    )
    .run(&ctx, &[&a, &b], &dst)
    .unwrap();

    for t in dst.read_texels(&ctx, LayerMipmapSlice::MIP0).unwrap() {
        assert!(close(t[0], 0.5));
        assert!(close(t[1], 0.5));
        assert!(close(t[2], 0.5));
        // alpha formula: 0.9 > 0.5
        assert!(close(t[3], 1.0));
    }
}

#[test]
fn pixel_value_averages_a_window() {
    let Some(ctx) = ctx() else { return };
    let size = Size3::new_2d(3, 3);
    let pixels: Vec<[f32; 4]> = (0..9).map(|i| [i as f32, 0.0, 0.0, 1.0]).collect();
    let tex = image_2d(&ctx, size, &pixels);
    let shader = PixelValueShader::new();

    let center = shader
        .run(&ctx, &tex, LayerMipmapSlice::MIP0, [1, 1, 0], 0)
        .unwrap();
    assert!(close(center[0], 4.0));

    let window = shader
        .run(&ctx, &tex, LayerMipmapSlice::MIP0, [1, 1, 0], 1)
        .unwrap();
    assert!(close(window[0], 4.0));

    // corner window is truncated to the 4 in-bounds texels
    let corner = shader
        .run(&ctx, &tex, LayerMipmapSlice::MIP0, [0, 0, 0], 1)
        .unwrap();
    assert!(close(corner[0], (0.0 + 1.0 + 3.0 + 4.0) / 4.0));
}

#[test]
fn clone_is_independent_of_the_source() {
    let Some(ctx) = ctx() else { return };
    let size = Size3::new_2d(2, 2);
    let tex = image_2d(&ctx, size, &[[1.0; 4]; 4]);
    let clone = tex.clone_texture(&ctx, "clone").unwrap();

    let bytes = PixelFormat::Rgba32Float.encode_pixels(&[[9.0; 4]; 4]);
    tex.upload(&ctx, LayerMipmapSlice::MIP0, &bytes);

    let texels = clone.read_texels(&ctx, LayerMipmapSlice::MIP0).unwrap();
    assert_eq!(texels, vec![[1.0; 4]; 4]);
}

#[test]
fn statistics_alpha_channel() {
    let Some(ctx) = ctx() else { return };
    let cache = TextureCache::new();
    let size = Size3::new_2d(2, 2);
    let pixels = [
        [0.5, 0.5, 0.5, 0.0],
        [0.5, 0.5, 0.5, 0.25],
        [0.5, 0.5, 0.5, 0.75],
        [0.5, 0.5, 0.5, 1.0],
    ];
    let tex = image_2d(&ctx, size, &pixels);

    let stats = StatisticsShader::new()
        .channel_stats(&ctx, &cache, &tex, LayerMipmapSlice::MIP0, StatChannel::Alpha)
        .unwrap();
    assert!(close(stats.min, 0.0));
    assert!(close(stats.max, 1.0));
    assert!(close(stats.avg, 0.5));
}

#[test]
fn statistics_luminance_of_pure_red() {
    let Some(ctx) = ctx() else { return };
    let cache = TextureCache::new();
    let tex = image_2d(&ctx, Size3::new_2d(4, 4), &[[1.0, 0.0, 0.0, 1.0]; 16]);
    let stats = StatisticsShader::new()
        .channel_stats(
            &ctx,
            &cache,
            &tex,
            LayerMipmapSlice::MIP0,
            StatChannel::Luminance,
        )
        .unwrap();
    assert!(close(stats.min, 0.2125));
    assert!(close(stats.max, 0.2125));
    assert!(close(stats.avg, 0.2125));
}

#[test]
fn statistics_zero_nan_texels() {
    let Some(ctx) = ctx() else { return };
    let cache = TextureCache::new();
    let size = Size3::new_2d(2, 1);
    let pixels = [[f32::NAN, f32::NAN, f32::NAN, f32::NAN], [0.5, 0.5, 0.5, 0.5]];
    let tex = image_2d(&ctx, size, &pixels);
    let stats = StatisticsShader::new()
        .channel_stats(
            &ctx,
            &cache,
            &tex,
            LayerMipmapSlice::MIP0,
            StatChannel::Uniform,
        )
        .unwrap();
    // the NaN texel counts as zero
    assert!(close(stats.min, 0.0));
    assert!(close(stats.max, 0.5));
    assert!(close(stats.avg, 0.25));
}

#[test]
fn statistics_of_a_larger_image() {
    let Some(ctx) = ctx() else { return };
    let cache = TextureCache::new();
    let size = Size3::new_2d(33, 17);
    let n = size.product();
    let pixels: Vec<[f32; 4]> = (0..n)
        .map(|i| {
            let v = i as f32 / (n - 1) as f32;
            [v, v, v, 1.0]
        })
        .collect();
    let tex = image_2d(&ctx, size, &pixels);
    let stats = StatisticsShader::new()
        .channel_stats(
            &ctx,
            &cache,
            &tex,
            LayerMipmapSlice::MIP0,
            StatChannel::Uniform,
        )
        .unwrap();
    assert!(close(stats.min, 0.0));
    assert!(close(stats.max, 1.0));
    assert!((stats.avg - 0.5).abs() < 1e-3);
}
