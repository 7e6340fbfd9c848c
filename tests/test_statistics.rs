// tests/test_statistics.rs — Sum / average / covariance of uploaded images,
// cross-checked against the CPU oracle.

mod common;

use tilestat::convert::SampleEncoding;
use tilestat::gpu::{DeviceBuffer, GpuError, GpuImage, GpuStatistics};
use tilestat::image::Image;
use tilestat::math::{Mat4, Vec4};
use tilestat::reference;

/// 32×32 image with pixel (x, y) = (1, x, y, 0.5). Every partial sum is
/// exactly representable, so results are exact.
fn ramp_image() -> Image<[f32; 4]> {
    Image::from_fn(32, 32, |x, y| [1.0, x as f32, y as f32, 0.5])
}

// ===== Upload =====

#[test]
fn upload_readback_preserves_samples() {
    let Some(gpu) = common::gpu() else { return };
    let img = common::noise_image_u8(21, 9, 3);
    let gpu_img = GpuImage::upload(&gpu, &img, SampleEncoding::Linear).unwrap();
    assert_eq!((gpu_img.width, gpu_img.height), (21, 9));
    assert_eq!(gpu_img.pixel_count(), 189);

    let back = gpu_img.readback(&gpu).unwrap();
    let expected: Vec<Vec4> = img.samples().collect();
    assert_eq!(back, expected);
}

#[test]
fn upload_of_empty_image_fails() {
    let Some(gpu) = common::gpu() else { return };
    let img = Image::<f32>::new(0, 5);
    assert!(matches!(
        GpuImage::upload(&gpu, &img, SampleEncoding::Linear),
        Err(GpuError::EmptyImage { width: 0, height: 5 })
    ));
}

// ===== Sum & average =====

#[test]
fn ramp_image_sum_is_exact() {
    let Some(gpu) = common::gpu() else { return };
    let stats = GpuStatistics::new(&gpu).unwrap();
    let img = GpuImage::upload(&gpu, &ramp_image(), SampleEncoding::Linear).unwrap();

    // Σx over 32 rows of 0..31 = 32 · 496.
    assert_eq!(stats.sum(&gpu, &img).unwrap(), Vec4::new(1024.0, 15872.0, 15872.0, 512.0));
    assert_eq!(stats.average(&gpu, &img).unwrap(), Vec4::new(1.0, 15.5, 15.5, 0.5));
}

#[test]
fn sum_matches_oracle_for_odd_sizes() {
    let Some(gpu) = common::gpu() else { return };
    let stats = GpuStatistics::new(&gpu).unwrap();

    // Partial tiles on the right, the bottom, or both; one tile; one pixel.
    for &(w, h) in &[(1, 1), (16, 16), (17, 16), (16, 17), (37, 23), (300, 7)] {
        let img = common::noise_image(w, h, (w * h) as u64);
        let gpu_img = GpuImage::upload(&gpu, &img, SampleEncoding::Linear).unwrap();

        let gpu_sum = stats.sum(&gpu, &gpu_img).unwrap();
        let cpu_sum = reference::total(reference::samples(&img, SampleEncoding::Linear));
        assert!(
            reference::vec4_within_tolerance(gpu_sum, cpu_sum),
            "{w}×{h}: gpu {gpu_sum} vs cpu {cpu_sum}"
        );
    }
}

#[test]
fn average_is_sum_scaled_exactly() {
    let Some(gpu) = common::gpu() else { return };
    let stats = GpuStatistics::new(&gpu).unwrap();
    let img = common::noise_image(45, 31, 11);
    let gpu_img = GpuImage::upload(&gpu, &img, SampleEncoding::Linear).unwrap();

    let sum = stats.sum(&gpu, &gpu_img).unwrap();
    let avg = stats.average(&gpu, &gpu_img).unwrap();
    assert_eq!(avg, sum * gpu_img.inverse_pixel_count());

    let cpu_avg = reference::average(reference::samples(&img, SampleEncoding::Linear)).unwrap();
    assert!(reference::vec4_within_tolerance(avg, cpu_avg), "gpu {avg} vs cpu {cpu_avg}");
}

#[test]
fn sum_is_deterministic() {
    let Some(gpu) = common::gpu() else { return };
    let stats = GpuStatistics::new(&gpu).unwrap();
    let img = common::noise_image(123, 77, 5);
    let gpu_img = GpuImage::upload(&gpu, &img, SampleEncoding::Linear).unwrap();

    let a = stats.sum(&gpu, &gpu_img).unwrap();
    let b = stats.sum(&gpu, &gpu_img).unwrap();
    assert_eq!(a.to_array().map(f32::to_bits), b.to_array().map(f32::to_bits));
}

#[test]
fn gray_pixels_broadcast_to_rgb() {
    let Some(gpu) = common::gpu() else { return };
    let stats = GpuStatistics::new(&gpu).unwrap();
    let img = Image::<u8>::from_vec(4, 2, vec![0, 51, 102, 153, 204, 255, 0, 255]);
    let gpu_img = GpuImage::upload(&gpu, &img, SampleEncoding::Linear).unwrap();

    let sum = stats.sum(&gpu, &gpu_img).unwrap();
    let cpu = reference::total(img.samples());
    assert!(reference::vec4_within_tolerance(sum, cpu));
    assert_eq!(sum.w, 8.0);
}

// ===== Covariance =====

#[test]
fn ramp_image_covariance() {
    let Some(gpu) = common::gpu() else { return };
    let stats = GpuStatistics::new(&gpu).unwrap();
    let img = GpuImage::upload(&gpu, &ramp_image(), SampleEncoding::Linear).unwrap();

    let cov = stats.covariance(&gpu, &img).unwrap();
    // x and y are independent uniform over 0..32: variance (32² - 1) / 12.
    let mut expected = Mat4::ZERO;
    expected.set(1, 1, 85.25);
    expected.set(2, 2, 85.25);
    assert!(reference::mat4_within_tolerance(&cov, &expected), "got {cov}");
}

#[test]
fn covariance_matches_oracle_and_is_symmetric() {
    let Some(gpu) = common::gpu() else { return };
    let stats = GpuStatistics::new(&gpu).unwrap();
    let img = common::noise_image(53, 29, 17);
    let gpu_img = GpuImage::upload(&gpu, &img, SampleEncoding::Linear).unwrap();

    let cov = stats.covariance(&gpu, &gpu_img).unwrap();
    assert!(cov.is_symmetric(), "not symmetric: {cov}");

    let avg = reference::average(reference::samples(&img, SampleEncoding::Linear)).unwrap();
    let cpu = reference::covariance(reference::samples(&img, SampleEncoding::Linear), avg).unwrap();
    assert!(reference::mat4_within_tolerance(&cov, &cpu), "gpu {cov}\ncpu {cpu}");
    // Green is built from red, so they must covary.
    assert!(cov.get(0, 1) > 0.01);
}

#[test]
fn srgb_statistics_match_linearised_oracle() {
    let Some(gpu) = common::gpu() else { return };
    let stats = GpuStatistics::new(&gpu).unwrap();
    let img = common::noise_image_u8(40, 24, 23);
    let gpu_img = GpuImage::upload(&gpu, &img, SampleEncoding::Srgb).unwrap();

    let samples = || reference::samples(&img, SampleEncoding::Srgb);
    let cpu_avg = reference::average(samples()).unwrap();
    let cpu_cov = reference::covariance(samples(), cpu_avg).unwrap();

    let avg = stats.average(&gpu, &gpu_img).unwrap();
    assert!(reference::vec4_within_tolerance(avg, cpu_avg), "gpu {avg} vs cpu {cpu_avg}");
    let cov = stats.covariance(&gpu, &gpu_img).unwrap();
    assert!(reference::mat4_within_tolerance(&cov, &cpu_cov), "gpu {cov}\ncpu {cpu_cov}");

    // Linearisation must actually change the result.
    let linear_avg = reference::average(reference::samples(&img, SampleEncoding::Linear)).unwrap();
    assert!(!reference::vec4_within_tolerance(avg, linear_avg));
}

#[test]
fn covariance_about_supplied_mean() {
    let Some(gpu) = common::gpu() else { return };
    let stats = GpuStatistics::new(&gpu).unwrap();
    let img = common::noise_image(20, 20, 29);
    let gpu_img = GpuImage::upload(&gpu, &img, SampleEncoding::Linear).unwrap();

    // About the origin the result is the raw second moment E[s sᵀ].
    let origin = DeviceBuffer::from_slice(&gpu, &[Vec4::ZERO], "origin").unwrap();
    let out = DeviceBuffer::with_elements::<Mat4>(&gpu, 1, "moment").unwrap();
    stats.covariance_with_average_into(&gpu, &gpu_img, &origin, &out).unwrap();
    let moment = out.read_as::<Mat4>(&gpu).unwrap()[0];

    let cpu = reference::covariance(reference::samples(&img, SampleEncoding::Linear), Vec4::ZERO).unwrap();
    assert!(reference::mat4_within_tolerance(&moment, &cpu), "gpu {moment}\ncpu {cpu}");
}

#[test]
fn average_chains_into_covariance_on_device() {
    let Some(gpu) = common::gpu() else { return };
    let stats = GpuStatistics::new(&gpu).unwrap();
    let img = common::noise_image(33, 18, 31);
    let gpu_img = GpuImage::upload(&gpu, &img, SampleEncoding::Linear).unwrap();

    let avg = DeviceBuffer::with_elements::<Vec4>(&gpu, 1, "avg").unwrap();
    let cov = DeviceBuffer::with_elements::<Mat4>(&gpu, 1, "cov").unwrap();
    stats.average_into(&gpu, &gpu_img, &avg).unwrap();
    stats.covariance_with_average_into(&gpu, &gpu_img, &avg, &cov).unwrap();

    let chained = cov.read_as::<Mat4>(&gpu).unwrap()[0];
    let direct = stats.covariance(&gpu, &gpu_img).unwrap();
    assert_eq!(chained, direct);
}

// ===== Scaling =====

#[test]
fn multiply_scales_every_element() {
    let Some(gpu) = common::gpu() else { return };
    let stats = GpuStatistics::new(&gpu).unwrap();

    let data: Vec<Vec4> = (0..40).map(|i| Vec4::splat(i as f32)).collect();
    let input = DeviceBuffer::from_slice(&gpu, &data, "in").unwrap();
    let output = DeviceBuffer::with_elements::<Vec4>(&gpu, 40, "out").unwrap();
    let factor = Vec4::new(1.0, 0.5, -2.0, 0.0);
    stats.multiply4(&gpu, &input, factor, &output).unwrap();

    let back = output.read_as::<Vec4>(&gpu).unwrap();
    for (i, v) in back.iter().enumerate() {
        assert_eq!(*v, data[i].mul_elem(factor), "element {i}");
    }

    let m = Vec4::new(1.0, 2.0, 3.0, 4.0).outer();
    let input = DeviceBuffer::from_slice(&gpu, &[m; 3], "in4x4").unwrap();
    let output = DeviceBuffer::with_elements::<Mat4>(&gpu, 3, "out4x4").unwrap();
    stats.multiply4x4(&gpu, &input, Mat4::splat(0.25), &output).unwrap();
    for v in output.read_as::<Mat4>(&gpu).unwrap() {
        assert_eq!(v, m * 0.25);
    }
}

#[test]
fn multiply_covers_buffers_past_one_dispatch_axis() {
    let Some(gpu) = common::gpu() else { return };
    let stats = GpuStatistics::new(&gpu).unwrap();

    // 1_100_000 elements need 68_750 groups of 16.
    const COUNT: usize = 1_100_000;
    let input = DeviceBuffer::from_slice(&gpu, &vec![Vec4::ONE; COUNT], "long in").unwrap();
    let output = DeviceBuffer::with_elements::<Vec4>(&gpu, COUNT, "long out").unwrap();
    stats.multiply4(&gpu, &input, Vec4::splat(2.0), &output).unwrap();

    let back = output.read_as::<Vec4>(&gpu).unwrap();
    assert_eq!(back.len(), COUNT);
    if let Some(i) = back.iter().position(|v| *v != Vec4::splat(2.0)) {
        panic!("element {i} not scaled: {}", back[i]);
    }
}

#[test]
fn multiply_rejects_aliasing_and_short_output() {
    let Some(gpu) = common::gpu() else { return };
    let stats = GpuStatistics::new(&gpu).unwrap();
    let buf = DeviceBuffer::from_slice(&gpu, &[Vec4::ONE; 4], "buf").unwrap();

    assert!(matches!(
        stats.multiply4(&gpu, &buf, Vec4::splat(2.0), &buf),
        Err(GpuError::AliasedBuffers { kernel: "Multiply4" })
    ));

    let short = DeviceBuffer::with_elements::<Vec4>(&gpu, 3, "short").unwrap();
    assert!(matches!(
        stats.multiply4(&gpu, &buf, Vec4::splat(2.0), &short),
        Err(GpuError::DimensionMismatch { required: 4, capacity: 3, .. })
    ));
}

#[test]
fn result_buffers_are_checked() {
    let Some(gpu) = common::gpu() else { return };
    let stats = GpuStatistics::new(&gpu).unwrap();
    let gpu_img = GpuImage::upload(&gpu, &ramp_image(), SampleEncoding::Linear).unwrap();

    let wrong_kind = DeviceBuffer::with_elements::<Vec4>(&gpu, 1, "vec4").unwrap();
    assert!(matches!(
        stats.covariance_into(&gpu, &gpu_img, &wrong_kind),
        Err(GpuError::StrideMismatch { expected: 64, actual: 16 })
    ));

    let empty = DeviceBuffer::with_elements::<Vec4>(&gpu, 0, "empty").unwrap();
    assert!(matches!(
        stats.sum_into(&gpu, &gpu_img, &empty),
        Err(GpuError::DimensionMismatch { .. })
    ));
}
