// ============================================================================
// PARALLEL PRIMITIVE TESTS — reduce, scan, skip volumes
// ============================================================================
//! Every test opens its own device and returns early when no adapter is
//! available, so the suite passes on headless CI without a GPU.

use texproc::compute::cube_skip::CubeSkippingShader;
use texproc::compute::empty_space::EmptySpaceSkippingShader;
use texproc::compute::reduce::ReduceShader;
use texproc::compute::scan::ScanShader;
use texproc::{
    Dimensions, GpuBuffer, GpuContext, LayerMipmapCount, LayerMipmapSlice, PixelFormat,
    Size3, Texture, TextureCache,
};

fn ctx() -> Option<GpuContext> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    GpuContext::new(wgpu::PowerPreference::LowPower).ok()
}

fn volume(ctx: &GpuContext, size: Size3, pixels: &[[f32; 4]]) -> Texture {
    assert_eq!(pixels.len(), size.product());
    let bytes = PixelFormat::Rgba32Float.encode_pixels(pixels);
    Texture::with_data(
        ctx,
        "test volume",
        size,
        LayerMipmapCount::ONE,
        PixelFormat::Rgba32Float,
        Dimensions::ThreeD,
        &[&bytes],
    )
    .unwrap()
}

fn read_distances(ctx: &GpuContext, tex: &Texture) -> Vec<u32> {
    let bytes = tex.read_bytes(ctx, LayerMipmapSlice::MIP0).unwrap();
    bytemuck::cast_slice(&bytes).to_vec()
}

#[test]
fn reduce_sum_sizes() {
    let Some(ctx) = ctx() else { return };
    let sum = ReduceShader::sum();
    // straddles the 512-element group size and forces multiple passes
    for n in [1u32, 511, 512, 513, 100_000, 1_000_000] {
        let data: Vec<f32> = (0..n).map(|i| (i % 7) as f32).collect();
        let expected: f32 = data.iter().sum();
        let buffer = GpuBuffer::new(&ctx, "reduce input", n);
        buffer.upload(&ctx, &data);
        let got = sum.run_and_read(&ctx, &buffer, n).unwrap();
        assert_eq!(got, expected, "n = {n}");
    }
}

#[test]
fn reduce_min_and_max() {
    let Some(ctx) = ctx() else { return };
    let n = 10_000u32;
    let mut data: Vec<f32> = (0..n).map(|i| ((i * 7919) % 997) as f32).collect();
    data[1234] = -5.0;
    data[8765] = 2000.0;

    let buffer = GpuBuffer::new(&ctx, "reduce input", n);

    buffer.upload(&ctx, &data);
    let min = ReduceShader::min().run_and_read(&ctx, &buffer, n).unwrap();
    assert_eq!(min, -5.0);

    // the reduction consumes the buffer contents, reload between ops
    buffer.upload(&ctx, &data);
    let max = ReduceShader::max().run_and_read(&ctx, &buffer, n).unwrap();
    assert_eq!(max, 2000.0);
}

#[test]
fn scan_of_ones_counts_up() {
    let Some(ctx) = ctx() else { return };
    let Ok(scan) = ScanShader::new(&ctx) else { return };
    for n in [1u32, 100, 8192, 8193, 65_536] {
        let capacity = ScanShader::source_buffer_alignment(n);
        let buffer = GpuBuffer::new(&ctx, "scan input", capacity);
        buffer.upload(&ctx, &vec![1.0f32; n as usize]);
        scan.run(&ctx, &buffer, n).unwrap();
        let result: Vec<f32> = buffer.read_back(&ctx, n).unwrap();
        assert_eq!(result[0], 1.0, "n = {n}");
        assert_eq!(result[(n - 1) as usize], n as f32, "n = {n}");
        // spot-check the block seam
        if n > 8192 {
            assert_eq!(result[8191], 8192.0);
            assert_eq!(result[8192], 8193.0);
        }
    }
}

#[test]
fn scan_matches_cpu_prefix_sum() {
    let Some(ctx) = ctx() else { return };
    let Ok(scan) = ScanShader::new(&ctx) else { return };
    let n = 10_000u32;
    let data: Vec<f32> = (0..n).map(|i| (i % 5) as f32).collect();
    let mut expected = data.clone();
    for i in 1..expected.len() {
        expected[i] += expected[i - 1];
    }

    let capacity = ScanShader::source_buffer_alignment(n);
    let buffer = GpuBuffer::new(&ctx, "scan input", capacity);
    buffer.upload(&ctx, &data);
    scan.run(&ctx, &buffer, n).unwrap();
    let result: Vec<f32> = buffer.read_back(&ctx, n).unwrap();
    assert_eq!(result, expected);
}

#[test]
fn scan_reuses_buffers_without_stale_data() {
    let Some(ctx) = ctx() else { return };
    let Ok(scan) = ScanShader::new(&ctx) else { return };
    let n = 9000u32;
    let capacity = ScanShader::source_buffer_alignment(n);
    let buffer = GpuBuffer::new(&ctx, "scan input", capacity);

    // first run leaves non-zero values in the aux chain and the padding
    buffer.upload(&ctx, &vec![2.0f32; n as usize]);
    scan.run(&ctx, &buffer, n).unwrap();

    buffer.upload(&ctx, &vec![1.0f32; n as usize]);
    scan.run(&ctx, &buffer, n).unwrap();
    let result: Vec<f32> = buffer.read_back(&ctx, n).unwrap();
    assert_eq!(result[(n - 1) as usize], n as f32);
}

#[test]
fn empty_space_distances_from_a_point() {
    let Some(ctx) = ctx() else { return };
    let cache = TextureCache::new();
    let size = Size3::new(9, 9, 9);
    let mut pixels = vec![[0.0f32; 4]; size.product()];
    pixels[size.index_of(4, 4, 4)] = [1.0, 1.0, 1.0, 1.0];
    let src = volume(&ctx, size, &pixels);

    let skip = EmptySpaceSkippingShader::new().run(&ctx, &cache, &src).unwrap();
    assert_eq!(skip.format(), PixelFormat::R32Uint);
    let d = read_distances(&ctx, &skip);

    assert_eq!(d[size.index_of(4, 4, 4)], 0);
    assert_eq!(d[size.index_of(5, 4, 4)], 1);
    assert_eq!(d[size.index_of(7, 4, 4)], 3);
    assert_eq!(d[size.index_of(4, 0, 4)], 4);
    // Manhattan metric at the corner
    assert_eq!(d[size.index_of(0, 0, 0)], 12);
}

#[test]
fn empty_space_threshold_ignores_faint_alpha() {
    let Some(ctx) = ctx() else { return };
    let cache = TextureCache::new();
    let size = Size3::new(3, 3, 3);
    // alpha 0.05 sits below the occupancy threshold
    let pixels = vec![[1.0, 1.0, 1.0, 0.05]; size.product()];
    let src = volume(&ctx, size, &pixels);

    let skip = EmptySpaceSkippingShader::new().run(&ctx, &cache, &src).unwrap();
    for d in read_distances(&ctx, &skip) {
        assert_eq!(d, 127);
    }
}

#[test]
fn cube_skip_counts_any_nonzero_alpha() {
    let Some(ctx) = ctx() else { return };
    let cache = TextureCache::new();
    let size = Size3::new(5, 5, 5);
    let mut pixels = vec![[0.0f32; 4]; size.product()];
    // below the empty-space threshold but non-zero, so cube skipping sees it
    pixels[size.index_of(2, 2, 2)] = [0.0, 0.0, 0.0, 0.05];
    let src = volume(&ctx, size, &pixels);

    let skip = CubeSkippingShader::new().run(&ctx, &cache, &src).unwrap();
    let d = read_distances(&ctx, &skip);
    assert_eq!(d[size.index_of(2, 2, 2)], 0);
    assert_eq!(d[size.index_of(2, 2, 3)], 1);
    assert_eq!(d[size.index_of(0, 0, 0)], 6);
}

#[test]
fn cube_skip_all_empty_saturates() {
    let Some(ctx) = ctx() else { return };
    let cache = TextureCache::new();
    let size = Size3::new(4, 4, 4);
    let pixels = vec![[0.0f32; 4]; size.product()];
    let src = volume(&ctx, size, &pixels);

    let skip = CubeSkippingShader::new().run(&ctx, &cache, &src).unwrap();
    for d in read_distances(&ctx, &skip) {
        assert_eq!(d, 255);
    }
}
