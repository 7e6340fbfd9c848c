// benches/gpu_benchmarks.rs — GPU statistics benchmarks.
//
// Mirrors benchmarks.rs. Each group times the CPU oracle and the GPU engine
// on the same frame for direct comparison.
//
//   cargo bench --bench gpu_benchmarks
//
// Skipped entirely (with a message) when no adapter is available.
//
//
// CRITERION + GPU CAVEATS
// ────────────────────────
// Wall time includes the per-call scratch allocations, bind group creation,
// submits and the blocking readback of the result. Upload is excluded: the
// `GpuImage` is created once outside the timed loop.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

use tilestat::convert::SampleEncoding;
use tilestat::gpu::{DeviceBuffer, GpuDevice, GpuImage, GpuReduction, GpuStatistics};
use tilestat::image::Image;
use tilestat::math::Vec4;
use tilestat::reference;

// ============================================================
// Shared helpers
// ============================================================

const SIZES: [(usize, usize); 3] = [(256, 256), (752, 480), (1920, 1080)];

fn make_frame(w: usize, h: usize) -> Image<[u8; 4]> {
    Image::from_fn(w, h, |x, y| {
        [
            (x * 255 / w) as u8,
            (y * 255 / h) as u8,
            ((x ^ y) & 0xff) as u8,
            255,
        ]
    })
}

fn device() -> Option<GpuDevice> {
    match GpuDevice::new() {
        Ok(gpu) => Some(gpu),
        Err(e) => {
            eprintln!("[gpu_benchmarks] skipping: {e}");
            None
        }
    }
}

// ============================================================
// Sum / average: CPU vs GPU
// ============================================================

fn bench_sum(c: &mut Criterion) {
    let Some(gpu) = device() else { return };
    let Ok(stats) = GpuStatistics::new(&gpu) else { return };

    let mut group = c.benchmark_group("sum");
    group.warm_up_time(Duration::from_secs(2));

    for (w, h) in SIZES {
        let img = make_frame(w, h);
        let Ok(gpu_img) = GpuImage::upload(&gpu, &img, SampleEncoding::Srgb) else { continue };
        let label = format!("{w}x{h}");

        group.bench_with_input(BenchmarkId::new("cpu", &label), &img, |b, img| {
            b.iter(|| reference::total(reference::samples(img, SampleEncoding::Srgb)))
        });
        group.bench_with_input(BenchmarkId::new("gpu", &label), &gpu_img, |b, gpu_img| {
            b.iter(|| stats.sum(&gpu, gpu_img))
        });
        group.bench_with_input(BenchmarkId::new("gpu_average", &label), &gpu_img, |b, gpu_img| {
            b.iter(|| stats.average(&gpu, gpu_img))
        });
    }
    group.finish();
}

// ============================================================
// Covariance: CPU vs GPU
// ============================================================

fn bench_covariance(c: &mut Criterion) {
    let Some(gpu) = device() else { return };
    let Ok(stats) = GpuStatistics::new(&gpu) else { return };

    let mut group = c.benchmark_group("covariance");
    group.warm_up_time(Duration::from_secs(2));
    group.sample_size(30);

    for (w, h) in SIZES {
        let img = make_frame(w, h);
        let Ok(gpu_img) = GpuImage::upload(&gpu, &img, SampleEncoding::Linear) else { continue };
        let label = format!("{w}x{h}");

        group.bench_with_input(BenchmarkId::new("cpu", &label), &img, |b, img| {
            b.iter(|| {
                let avg = reference::average(img.samples()).unwrap_or_default();
                reference::covariance(img.samples(), avg)
            })
        });
        group.bench_with_input(BenchmarkId::new("gpu", &label), &gpu_img, |b, gpu_img| {
            b.iter(|| stats.covariance(&gpu, gpu_img))
        });
    }
    group.finish();
}

// ============================================================
// Raw reduction of a resident grid
// ============================================================

fn bench_reduction(c: &mut Criterion) {
    let Some(gpu) = device() else { return };
    let Ok(reduction) = GpuReduction::new(&gpu) else { return };

    let mut group = c.benchmark_group("reduction");
    group.warm_up_time(Duration::from_secs(2));

    // Tile grids of the frames above, plus a long thin one.
    for (w, h) in [(16usize, 16usize), (47, 30), (120, 68), (4096, 4)] {
        let data = vec![Vec4::ONE; w * h];
        let Ok(grid) = DeviceBuffer::from_slice(&gpu, &data, "bench grid") else { continue };
        group.bench_function(format!("accumulate4_{w}x{h}"), |b| {
            b.iter(|| reduction.accumulate4(&gpu, &grid, w as u32, h as u32))
        });
    }
    group.finish();
}

// ============================================================
// Register
// ============================================================

criterion_group!(benches, bench_sum, bench_covariance, bench_reduction);
criterion_main!(benches);
