//! Rician Deconvolution Core Library
//!
//! Pure Rust implementation of total-variation deconvolution for 3D magnitude
//! volumes corrupted by Rician noise, built on a recursive (IIR) Gaussian blur.
//!
//! Volumes are `ndarray` 3D arrays owned by the caller; the deconvolution works
//! in place on the estimate and on two caller-provided scratch volumes.

pub mod deconvolution;
pub mod float_trait;
pub mod gaussian;
mod profiling;
pub mod volume;

// Re-export commonly used types at the crate root
pub use deconvolution::{
    likelihood_ratio, rician_deconv3, rician_deconv3_with_config, rician_deconv3_with_progress,
    rician_deconv3_with_smoother, rician_denoise, DeconvConfig, DeconvScratch, ResidualMode,
    DT, EPSILON, MAX_ITERATIONS,
};
pub use float_trait::RicianFloat;
pub use gaussian::{
    gaussian_blur, gaussian_blur_with_steps, RecursiveGaussian, Smoother, GAUSSIAN_NUMSTEPS,
};
pub use volume::VolumeShape;
