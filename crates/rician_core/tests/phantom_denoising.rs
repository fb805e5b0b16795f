//! End-to-end tests of the public deconvolution API on a Rician-noise phantom.

mod common;

use common::{add_rician_noise, interior_rmse, phantom, rmse, BACKGROUND, SPHERE};
use ndarray::{Array3, ArrayViewMut3};
use rician_core::{
    gaussian_blur, rician_deconv3, rician_deconv3_with_config, rician_deconv3_with_smoother,
    rician_denoise, DeconvConfig, RecursiveGaussian, ResidualMode, Smoother, VolumeShape,
    GAUSSIAN_NUMSTEPS, MAX_ITERATIONS,
};

const SIZE: usize = 32;
const NOISE_SIGMA: f64 = 0.05;

/// Recursive Gaussian that records how often the loop invokes it.
struct CountingGaussian {
    inner: RecursiveGaussian<f64>,
    calls: usize,
}

impl Smoother<f64> for CountingGaussian {
    fn smooth(&mut self, volume: ArrayViewMut3<f64>) -> Result<(), String> {
        self.calls += 1;
        self.inner.smooth(volume)
    }
}

fn noisy_phantom(seed: u64) -> (Array3<f64>, Array3<f64>) {
    let clean = phantom(SIZE);
    let noisy = add_rician_noise(&clean, NOISE_SIGMA, seed);
    (clean, noisy)
}

#[test]
fn test_rician_noise_is_biased_upwards() {
    // Sanity check of the generator: magnitude noise raises the dark background.
    let (clean, noisy) = noisy_phantom(1);
    let mean_bg: f64 = noisy
        .iter()
        .zip(clean.iter())
        .filter(|&(_, &c)| c == BACKGROUND)
        .map(|(&v, _)| v)
        .sum::<f64>()
        / clean.iter().filter(|&&c| c == BACKGROUND).count() as f64;
    assert!(mean_bg > BACKGROUND, "background mean {} not biased", mean_bg);
}

#[test]
fn test_diffusion_reduces_error() {
    let (clean, noisy) = noisy_phantom(42);
    let before = interior_rmse(&noisy, &clean);

    // Pure TV flow: no fidelity term, larger step, more iterations.
    let config = DeconvConfig {
        dt: 1.0e-3,
        max_iterations: 20,
        ..DeconvConfig::with_params(1.0, NOISE_SIGMA, 0.0)
    };
    let denoised = rician_denoise(noisy.view(), &config).unwrap();
    let after = interior_rmse(&denoised, &clean);

    assert!(
        after < 0.9 * before,
        "RMSE did not improve enough: before {:.5}, after {:.5}",
        before,
        after
    );
    // Boundary voxels are copied through, so the whole-volume error drops too.
    assert!(rmse(&denoised, &clean) < rmse(&noisy, &clean));
}

#[test]
fn test_edges_survive_diffusion() {
    let (clean, noisy) = noisy_phantom(7);
    let config = DeconvConfig {
        dt: 1.0e-3,
        max_iterations: 20,
        ..DeconvConfig::with_params(1.0, NOISE_SIGMA, 0.0)
    };
    let denoised = rician_denoise(noisy.view(), &config).unwrap();

    // Mean inside the sphere stays far from the background level.
    let c = SIZE / 2;
    let mut inside = 0.0;
    let mut count = 0.0;
    for i in c - 3..=c + 3 {
        for j in c - 3..=c + 3 {
            inside += denoised[[i, j, c]];
            count += 1.0;
        }
    }
    let inside = inside / count;
    assert!(
        (inside - SPHERE).abs() < 0.05,
        "sphere interior drifted to {}",
        inside
    );
    assert!(clean[[c, c, c]] == SPHERE);
}

#[test]
fn test_blur_invoked_twice_per_iteration() {
    let (_, noisy) = noisy_phantom(3);
    let config = DeconvConfig::with_params(1.2, NOISE_SIGMA, 0.065);

    let mut counting = CountingGaussian {
        inner: RecursiveGaussian::new(config.sigma_blur, GAUSSIAN_NUMSTEPS).unwrap(),
        calls: 0,
    };
    let mut u_counted = noisy.clone();
    let mut g = Array3::zeros(noisy.dim());
    let mut conv = Array3::zeros(noisy.dim());
    let mut last_progress = (0, 0);
    rician_deconv3_with_smoother(
        u_counted.view_mut(),
        noisy.view(),
        g.view_mut(),
        conv.view_mut(),
        &config,
        &mut counting,
        |it, max| last_progress = (it, max),
    )
    .unwrap();

    assert_eq!(counting.calls, 2 * MAX_ITERATIONS);
    assert_eq!(last_progress, (MAX_ITERATIONS, MAX_ITERATIONS));

    // Wrapping the blur does not change the numbers.
    let mut u_plain = noisy.clone();
    rician_deconv3_with_config(
        u_plain.view_mut(),
        noisy.view(),
        g.view_mut(),
        conv.view_mut(),
        &config,
    )
    .unwrap();
    assert_eq!(u_counted, u_plain);
}

#[test]
fn test_reference_call_keeps_boundary_and_stays_finite() {
    let (_, noisy) = noisy_phantom(5);
    let mut u = noisy.clone();
    let mut g = Array3::zeros(noisy.dim());
    let mut conv = Array3::zeros(noisy.dim());

    rician_deconv3(
        u.view_mut(),
        noisy.view(),
        g.view_mut(),
        conv.view_mut(),
        1.0,
        NOISE_SIGMA,
        0.065,
    )
    .unwrap();

    let shape = VolumeShape::of(&u);
    for ((i, j, k), &v) in u.indexed_iter() {
        assert!(v.is_finite());
        if shape.is_boundary(i, j, k) {
            assert_eq!(v, noisy[[i, j, k]]);
        }
    }
}

#[test]
fn test_corrected_mode_runs_on_phantom() {
    let (_, noisy) = noisy_phantom(9);
    let config = DeconvConfig {
        residual_mode: ResidualMode::Corrected,
        ..DeconvConfig::with_params(1.0, NOISE_SIGMA, 0.065)
    };
    let denoised = rician_denoise(noisy.view(), &config).unwrap();
    assert_eq!(denoised.dim(), noisy.dim());
    assert!(denoised.iter().all(|v| v.is_finite()));
    assert_ne!(denoised, noisy);
}

#[test]
fn test_mismatched_shapes_fail_fast() {
    let (_, noisy) = noisy_phantom(11);
    let mut u = noisy.clone();
    let mut g = Array3::zeros((SIZE, SIZE, SIZE - 1));
    let mut conv = Array3::zeros(noisy.dim());
    let err = rician_deconv3(
        u.view_mut(),
        noisy.view(),
        g.view_mut(),
        conv.view_mut(),
        1.0,
        NOISE_SIGMA,
        0.065,
    )
    .unwrap_err();
    assert!(err.contains("mismatch"), "unexpected error: {}", err);
    assert_eq!(u, noisy);
}

#[test]
fn test_public_blur_preserves_phantom_mean() {
    let clean = phantom(SIZE);
    let mut blurred = clean.clone();
    gaussian_blur(blurred.view_mut(), 2.0).unwrap();

    let mean_before = clean.sum() / clean.len() as f64;
    let mean_after = blurred.sum() / blurred.len() as f64;
    assert!(
        (mean_before - mean_after).abs() < 2e-3,
        "mean moved from {} to {}",
        mean_before,
        mean_after
    );
    assert!(gaussian_blur(blurred.view_mut(), 0.0).is_err());
}
