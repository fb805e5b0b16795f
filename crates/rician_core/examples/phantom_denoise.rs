//! Denoise a synthetic phantom corrupted by Rician noise and report the error.
//!
//! Run with: cargo run --release -p rician_core --example phantom_denoise -- --size 64 --noise 0.05
//! Set RUST_LOG=debug for per-iteration logs, RICIAN_PROFILE_TIMING=1 for stage timings.

use ndarray::Array3;
use rand::prelude::*;
use rand_distr::{Distribution, Normal};
use rician_core::{rician_denoise, DeconvConfig, ResidualMode};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse::<T>().ok())
        .unwrap_or(default)
}

// Same phantom, noise model and metric as tests/common/mod.rs; keep the two in sync.
fn build_phantom(size: usize) -> Array3<f64> {
    let c = size as f64 / 2.0;
    let r2 = (size as f64 / 4.0).powi(2);
    let lo = size / 8;
    let hi = lo + size / 5;
    Array3::from_shape_fn((size, size, size), |(i, j, k)| {
        let (x, y, z) = (i as f64 - c, j as f64 - c, k as f64 - c);
        if x * x + y * y + z * z <= r2 {
            0.8
        } else if (lo..hi).contains(&i) && (lo..hi).contains(&j) && (lo..hi).contains(&k) {
            0.5
        } else {
            0.2
        }
    })
}

fn add_rician_noise(clean: &Array3<f64>, sigma: f64, seed: u64) -> Result<Array3<f64>, String> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, sigma).map_err(|e| format!("invalid noise level: {}", e))?;
    Ok(clean.mapv(|s| {
        let re = s + normal.sample(&mut rng);
        let im = normal.sample(&mut rng);
        (re * re + im * im).sqrt()
    }))
}

fn rmse(a: &Array3<f64>, b: &Array3<f64>) -> f64 {
    let sum_sq: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum();
    (sum_sq / a.len() as f64).sqrt()
}

fn main() -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let size = parse_arg(&args, "--size", 48usize);
    let noise = parse_arg(&args, "--noise", 0.05f64);
    let sigma_blur = parse_arg(&args, "--sigma-blur", 1.0f64);
    let lambda = parse_arg(&args, "--lambda", 0.0f64);
    let iterations = parse_arg(&args, "--iterations", 20usize);
    let dt = parse_arg(&args, "--dt", 1.0e-3f64);
    let seed = parse_arg(&args, "--seed", 42u64);
    let corrected = args.iter().any(|a| a == "--corrected");

    let config = DeconvConfig {
        max_iterations: iterations,
        dt,
        residual_mode: if corrected {
            ResidualMode::Corrected
        } else {
            ResidualMode::ReferenceCompatible
        },
        ..DeconvConfig::with_params(sigma_blur, noise, lambda)
    };
    config.validate()?;

    let clean = build_phantom(size);
    let noisy = add_rician_noise(&clean, noise, seed)?;

    let start = Instant::now();
    let denoised = rician_denoise(noisy.view(), &config)?;
    let elapsed = start.elapsed();

    println!(
        "size={} noise={} lambda={} iterations={} mode={:?}",
        size, noise, lambda, iterations, config.residual_mode
    );
    println!("rmse noisy    = {:.6}", rmse(&noisy, &clean));
    println!("rmse denoised = {:.6}", rmse(&denoised, &clean));
    println!("elapsed       = {:.3} s", elapsed.as_secs_f64());
    Ok(())
}
