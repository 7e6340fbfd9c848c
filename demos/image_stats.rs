// demos/image_stats.rs — GPU vs CPU statistics of one image.
//
// Computes the per-channel sum, mean and 4×4 covariance of an image on the
// GPU, recomputes them with the CPU oracle, and prints both with the largest
// relative disagreement.
//
// USAGE
// ─────
//   cargo run --example image_stats                     # generated pattern
//   cargo run --example image_stats -- path/to/img.png  # any image file
//   cargo run --example image_stats -- img.png srgb     # linearise first
//
// Set RUST_LOG=debug to see adapter selection and every dispatch.

use std::process::ExitCode;

use log::{error, info};

use tilestat::convert::{self, SampleEncoding};
use tilestat::gpu::{GpuDevice, GpuImage, GpuResult, GpuStatistics};
use tilestat::image::Image;
use tilestat::math::{Mat4, Vec4};
use tilestat::reference;

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let encoding = match args.get(2).map(String::as_str) {
        Some("srgb") => SampleEncoding::Srgb,
        _ => SampleEncoding::Linear,
    };

    let src = match args.get(1) {
        Some(path) => match image::open(path) {
            Ok(img) => convert::from_dynamic(&img),
            Err(e) => {
                error!("cannot open {path}: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => {
            info!("no image path given, using a generated pattern");
            pattern(640, 480)
        }
    };
    println!("source: {}×{}, encoding {encoding:?}", src.width(), src.height());

    match run(&src, encoding) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("GPU statistics failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(src: &Image<[f32; 4]>, encoding: SampleEncoding) -> GpuResult<()> {
    let gpu = GpuDevice::new()?;
    println!("{gpu}");

    let stats = GpuStatistics::new(&gpu)?;
    let gpu_img = GpuImage::upload(&gpu, src, encoding)?;

    let t0 = std::time::Instant::now();
    let sum = stats.sum(&gpu, &gpu_img)?;
    let avg = stats.average(&gpu, &gpu_img)?;
    let cov = stats.covariance(&gpu, &gpu_img)?;
    let gpu_time = t0.elapsed();

    let t0 = std::time::Instant::now();
    let cpu_sum = reference::total(reference::samples(src, encoding));
    let cpu_avg = reference::average(reference::samples(src, encoding)).unwrap_or_default();
    let cpu_cov = reference::covariance(reference::samples(src, encoding), cpu_avg).unwrap_or_default();
    let cpu_time = t0.elapsed();

    println!("\nsum      gpu {sum}\n         cpu {cpu_sum}   (max rel err {:.2e})", vec_err(sum, cpu_sum));
    println!("average  gpu {avg}\n         cpu {cpu_avg}   (max rel err {:.2e})", vec_err(avg, cpu_avg));
    println!("\ncovariance (gpu):\n{cov}");
    println!("covariance (cpu):\n{cpu_cov}");
    println!("max rel err {:.2e}, symmetric: {}", mat_err(&cov, &cpu_cov), cov.is_symmetric());

    let agree = reference::vec4_within_tolerance(sum, cpu_sum)
        && reference::vec4_within_tolerance(avg, cpu_avg)
        && reference::mat4_within_tolerance(&cov, &cpu_cov);
    println!(
        "\ngpu {:.2} ms, cpu {:.2} ms, within tolerance: {agree}",
        gpu_time.as_secs_f64() * 1e3,
        cpu_time.as_secs_f64() * 1e3
    );
    Ok(())
}

fn rel_err(a: f32, b: f32) -> f32 {
    (a - b).abs() / a.abs().max(b.abs()).max(reference::ABSOLUTE_TOLERANCE)
}

fn vec_err(a: Vec4, b: Vec4) -> f32 {
    (0..4).map(|i| rel_err(a[i], b[i])).fold(0.0, f32::max)
}

fn mat_err(a: &Mat4, b: &Mat4) -> f32 {
    (0..4).map(|c| vec_err(a.cols[c], b.cols[c])).fold(0.0, f32::max)
}

/// Diagonal colour gradient with a checkerboard in blue, mostly opaque.
fn pattern(w: usize, h: usize) -> Image<[f32; 4]> {
    Image::from_fn(w, h, |x, y| {
        let checker = ((x / 32 + y / 32) % 2) as f32;
        [
            x as f32 / w as f32,
            y as f32 / h as f32,
            checker,
            if checker > 0.0 { 1.0 } else { 0.8 },
        ]
    })
}
