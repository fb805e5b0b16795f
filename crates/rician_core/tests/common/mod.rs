//! Common test utilities for rician_core integration tests

#![allow(dead_code)]

use ndarray::Array3;
use rand::prelude::*;
use rand_distr::{Distribution, Normal};

/// Background intensity of the phantom.
pub const BACKGROUND: f64 = 0.2;

/// Intensity inside the phantom sphere.
pub const SPHERE: f64 = 0.8;

/// Intensity inside the phantom cube.
pub const CUBE: f64 = 0.5;

/// Clean piecewise-constant phantom: a sphere and a cube on a flat background.
pub fn phantom(size: usize) -> Array3<f64> {
    let c = size as f64 / 2.0;
    let radius = size as f64 / 4.0;
    let cube = (size / 8, size / 8 + size / 5);
    Array3::from_shape_fn((size, size, size), |(i, j, k)| {
        let (x, y, z) = (i as f64 - c, j as f64 - c, k as f64 - c);
        if x * x + y * y + z * z <= radius * radius {
            SPHERE
        } else if (cube.0..cube.1).contains(&i)
            && (cube.0..cube.1).contains(&j)
            && (cube.0..cube.1).contains(&k)
        {
            CUBE
        } else {
            BACKGROUND
        }
    })
}

/// Magnitude of the clean signal plus independent Gaussian noise on the real
/// and imaginary channels.
pub fn add_rician_noise(clean: &Array3<f64>, sigma: f64, seed: u64) -> Array3<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, sigma).unwrap();
    clean.mapv(|s| {
        let re = s + normal.sample(&mut rng);
        let im = normal.sample(&mut rng);
        (re * re + im * im).sqrt()
    })
}

/// Root mean square error between two volumes.
pub fn rmse(a: &Array3<f64>, b: &Array3<f64>) -> f64 {
    assert_eq!(a.dim(), b.dim());
    let sum_sq: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum();
    (sum_sq / a.len() as f64).sqrt()
}

/// Root mean square error restricted to interior voxels.
pub fn interior_rmse(a: &Array3<f64>, b: &Array3<f64>) -> f64 {
    let (m, n, p) = a.dim();
    let mut sum_sq = 0.0;
    let mut count = 0usize;
    for ((i, j, k), &x) in a.indexed_iter() {
        if i == 0 || j == 0 || k == 0 || i + 1 == m || j + 1 == n || k + 1 == p {
            continue;
        }
        let d = x - b[[i, j, k]];
        sum_sq += d * d;
        count += 1;
    }
    if count == 0 {
        return 0.0;
    }
    (sum_sq / count as f64).sqrt()
}
