//! Rician-noise total-variation deconvolution of 3D volumes.
//!
//! Refines an estimate `u` of the clean volume behind a magnitude image `f`
//! whose noise is Rician, by gradient descent on a total-variation regularised
//! Rician negative log-likelihood. Every iteration:
//!
//! 1. Estimates the diffusivity `g = 1 / |grad u|` on the interior voxels.
//! 2. Copies `u` into `conv`, blurs it, replaces it pointwise by the
//!    likelihood residual and blurs it again.
//! 3. Updates `u` in place with a semi-implicit step that couples each voxel
//!    to its six face neighbours through `g`.
//!
//! The loop runs a fixed number of iterations; there is no convergence test.
//!
//! ## Sweep order
//!
//! The update overwrites `u` while reading it. Voxels are visited with `k`
//! outermost, then `j`, then `i`, all ascending. The `j - 1` and `k - 1`
//! neighbours have already been updated when a voxel is visited; the `i - 1`
//! neighbour is taken from a rolling window and still holds its value from
//! before the sweep reached it. This order is part of the numerical result.
//!
//! Reference:
//! Getreuer, P., Tong, M., Vese, L.A., "A Variational Model for the
//! Restoration of MR Images Corrupted by Blur and Rician Noise,"
//! Proc. ISVC 2011, LNCS 6938, pp. 686-698.

use ndarray::{s, Array3, ArrayView2, ArrayView3, ArrayViewMut2, ArrayViewMut3, Axis, Zip};
use rayon::prelude::*;

use crate::float_trait::RicianFloat;
use crate::gaussian::{RecursiveGaussian, Smoother, GAUSSIAN_NUMSTEPS};
use crate::profiling::{resolve_profile_timing, Stage, StageTimings};
use crate::volume::{ensure_interior, ensure_same_shape, face_neighbors, AxisWindow, VolumeShape};

// =============================================================================
// Constants
// =============================================================================

/// Number of gradient-descent iterations.
pub const MAX_ITERATIONS: usize = 10;

/// Time step of the semi-implicit update.
pub const DT: f64 = 1.0e-4;

/// Regularisation of the gradient magnitude in flat regions.
pub const EPSILON: f64 = 1.0e-10;

/// Default blur standard deviation.
const DEFAULT_SIGMA_BLUR: f64 = 1.0;

/// Default Rician noise standard deviation.
const DEFAULT_SIGMA_NOISE: f64 = 1.0;

/// Default fidelity weight.
const DEFAULT_LAMBDA: f64 = 0.065;

/// Minimum voxel count before the independent stages run on rayon.
/// Below roughly 64^3 voxels the sequential loops are faster.
const PARALLEL_VOXEL_THRESHOLD: usize = 1 << 18;

/// Numerator coefficients of the rational likelihood term, innermost last:
/// `r * (c0 + r * (c1 + r))`.
const RATIO_NUMER: [f64; 2] = [2.38944, 0.950037];

/// Denominator coefficients of the rational likelihood term:
/// `d0 + r * (d1 + r * (d2 + r * (d3 + r)))`.
const RATIO_DENOM: [f64; 4] = [4.65314, 2.57541, 2.57541, 1.48937];

// =============================================================================
// Types
// =============================================================================

/// How the blurred residual turns into the data-fidelity term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResidualMode {
    /// `conv -= f * r` with `r = conv * f / sigma_noise^2`.
    /// The rational likelihood term is not applied. Reproduces the
    /// established kernel output.
    #[default]
    ReferenceCompatible,
    /// `conv -= f * likelihood_ratio(r)`.
    /// Applies the rational likelihood term in place of the raw `r`.
    Corrected,
}

/// Configuration for the Rician deconvolution.
///
/// `Default::default()` gives the reference constants.
#[derive(Debug, Clone)]
pub struct DeconvConfig<F: RicianFloat> {
    /// Standard deviation of the blur kernel. Default: 1.0
    pub sigma_blur: F,
    /// Standard deviation of the Rician noise. Default: 1.0
    pub sigma_noise: F,
    /// Data-fidelity weight. Default: 0.065
    pub lambda: F,
    /// Number of iterations, always run in full. Default: 10
    pub max_iterations: usize,
    /// Semi-implicit time step. Default: 1e-4
    pub dt: F,
    /// Gradient magnitude regulariser. Default: 1e-10
    pub epsilon: F,
    /// Time steps of the recursive Gaussian. Default: 3
    pub gaussian_steps: usize,
    /// Fidelity term variant. Default: ReferenceCompatible
    pub residual_mode: ResidualMode,
}

impl<F: RicianFloat> Default for DeconvConfig<F> {
    fn default() -> Self {
        Self {
            sigma_blur: F::from_f64_c(DEFAULT_SIGMA_BLUR),
            sigma_noise: F::from_f64_c(DEFAULT_SIGMA_NOISE),
            lambda: F::from_f64_c(DEFAULT_LAMBDA),
            max_iterations: MAX_ITERATIONS,
            dt: F::from_f64_c(DT),
            epsilon: F::from_f64_c(EPSILON),
            gaussian_steps: GAUSSIAN_NUMSTEPS,
            residual_mode: ResidualMode::default(),
        }
    }
}

impl<F: RicianFloat> DeconvConfig<F> {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Default configuration with the three model parameters set.
    pub fn with_params(sigma_blur: F, sigma_noise: F, lambda: F) -> Self {
        Self {
            sigma_blur,
            sigma_noise,
            lambda,
            ..Self::default()
        }
    }

    /// Validate the configuration parameters.
    pub fn validate(&self) -> Result<(), String> {
        if !self.sigma_blur.is_finite() || self.sigma_blur <= F::zero() {
            return Err(format!("sigma_blur must be finite and > 0, got {:?}", self.sigma_blur));
        }
        if !self.sigma_noise.is_finite() || self.sigma_noise <= F::zero() {
            return Err(format!("sigma_noise must be finite and > 0, got {:?}", self.sigma_noise));
        }
        if !self.lambda.is_finite() || self.lambda < F::zero() {
            return Err(format!("lambda must be finite and >= 0, got {:?}", self.lambda));
        }
        if self.max_iterations == 0 {
            return Err("max_iterations must be > 0".to_string());
        }
        if !self.dt.is_finite() || self.dt <= F::zero() {
            return Err(format!("dt must be finite and > 0, got {:?}", self.dt));
        }
        if !self.epsilon.is_finite() || self.epsilon <= F::zero() {
            return Err(format!("epsilon must be finite and > 0, got {:?}", self.epsilon));
        }
        if self.gaussian_steps == 0 {
            return Err("gaussian_steps must be > 0".to_string());
        }
        Ok(())
    }
}

/// Owned `g` and `conv` buffers for repeated deconvolutions of one shape.
#[derive(Debug, Clone)]
pub struct DeconvScratch<F: RicianFloat> {
    g: Array3<F>,
    conv: Array3<F>,
}

impl<F: RicianFloat> DeconvScratch<F> {
    pub fn new(shape: VolumeShape) -> Self {
        Self {
            g: Array3::zeros(shape.dim()),
            conv: Array3::zeros(shape.dim()),
        }
    }

    pub fn shape(&self) -> VolumeShape {
        VolumeShape::of(&self.g)
    }

    /// Deconvolve `u` against `f` using the owned scratch volumes.
    pub fn run(
        &mut self,
        u: ArrayViewMut3<F>,
        f: ArrayView3<F>,
        config: &DeconvConfig<F>,
    ) -> Result<(), String> {
        rician_deconv3_with_config(u, f, self.g.view_mut(), self.conv.view_mut(), config)
    }
}

// =============================================================================
// Stages
// =============================================================================

/// Rational approximation used by [`ResidualMode::Corrected`]:
/// `(2.38944 r + 0.950037 r^2 + r^3) / (4.65314 + 2.57541 r + 2.57541 r^2 + 1.48937 r^3 + r^4)`.
#[inline]
pub fn likelihood_ratio<F: RicianFloat>(r: F) -> F {
    let c = F::from_f64_c;
    let numer = r * (c(RATIO_NUMER[0]) + r * (c(RATIO_NUMER[1]) + r));
    let denom = c(RATIO_DENOM[0])
        + r * (c(RATIO_DENOM[1]) + r * (c(RATIO_DENOM[2]) + r * (c(RATIO_DENOM[3]) + r)));
    numer / denom
}

/// Fill the `k`-th `(i, j)` plane of `g` with `1 / sqrt(epsilon + |grad u|^2)`.
fn diffusivity_plane<F: RicianFloat>(
    u: ArrayView3<F>,
    mut plane: ArrayViewMut2<F>,
    k: usize,
    epsilon: F,
) {
    let (m, n, _) = u.dim();
    for j in 1..n - 1 {
        let mut window = AxisWindow::prime(&u, j, k);
        for i in 1..m - 1 {
            window.advance(&u, i, j, k);
            let nb = face_neighbors(&u, &window, i, j, k);
            plane[[i, j]] = F::one() / nb.squared_gradient(window.center, epsilon).sqrt();
        }
    }
}

/// Recompute the interior of `g` from `u`. Boundary voxels of `g` are not written.
fn compute_diffusivity<F: RicianFloat>(
    u: ArrayView3<F>,
    mut g: ArrayViewMut3<F>,
    epsilon: F,
    parallel: bool,
) {
    let p = u.dim().2;
    let planes: Vec<(usize, ArrayViewMut2<F>)> = g
        .axis_iter_mut(Axis(2))
        .enumerate()
        .skip(1)
        .take(p - 2)
        .collect();

    if parallel {
        planes
            .into_par_iter()
            .for_each(|(k, plane)| diffusivity_plane(u, plane, k, epsilon));
    } else {
        for (k, plane) in planes {
            diffusivity_plane(u, plane, k, epsilon);
        }
    }
}

#[inline]
fn residual_slab<F: RicianFloat>(
    mut conv: ArrayViewMut2<F>,
    f: ArrayView2<F>,
    sigma2: F,
    mode: ResidualMode,
) {
    Zip::from(&mut conv).and(&f).for_each(|c, &fv| {
        let r = *c * fv / sigma2;
        let weight = match mode {
            ResidualMode::ReferenceCompatible => r,
            ResidualMode::Corrected => likelihood_ratio(r),
        };
        *c -= fv * weight;
    });
}

/// Pointwise likelihood residual, in place on the blurred estimate.
fn apply_residual<F: RicianFloat>(
    mut conv: ArrayViewMut3<F>,
    f: ArrayView3<F>,
    sigma2: F,
    mode: ResidualMode,
    parallel: bool,
) {
    let slabs: Vec<(ArrayViewMut2<F>, ArrayView2<F>)> = conv
        .axis_iter_mut(Axis(0))
        .zip(f.axis_iter(Axis(0)))
        .collect();

    if parallel {
        slabs
            .into_par_iter()
            .for_each(|(c, fv)| residual_slab(c, fv, sigma2, mode));
    } else {
        for (c, fv) in slabs {
            residual_slab(c, fv, sigma2, mode);
        }
    }
}

/// One semi-implicit update of the interior of `u`, in place.
///
/// Sequential by construction; see the module docs for the visiting order.
fn semi_implicit_sweep<F: RicianFloat>(
    mut u: ArrayViewMut3<F>,
    g: ArrayView3<F>,
    conv: ArrayView3<F>,
    dt: F,
    gamma: F,
) {
    let (m, n, p) = u.dim();
    for k in 1..p - 1 {
        for j in 1..n - 1 {
            let mut u_window = AxisWindow::prime(&u, j, k);
            let mut g_window = AxisWindow::prime(&g, j, k);
            for i in 1..m - 1 {
                u_window.advance(&u, i, j, k);
                g_window.advance(&g, i, j, k);

                let u_nb = face_neighbors(&u, &u_window, i, j, k);
                let g_nb = face_neighbors(&g, &g_window, i, j, k);

                let numer = u_window.center + dt * (u_nb.weighted_sum(&g_nb) - gamma * conv[[i, j, k]]);
                let denom = F::one() + dt * g_nb.sum();
                u[[i, j, k]] = numer / denom;
            }
        }
    }
}

/// Zero the six boundary faces of `g`.
///
/// The diffusivity is only computed on the interior, but the update reads the
/// boundary neighbours of voxels next to the boundary.
fn zero_boundary_shell<F: RicianFloat>(mut g: ArrayViewMut3<F>) {
    let (m, n, p) = g.dim();
    let zero = F::zero();
    g.slice_mut(s![0, .., ..]).fill(zero);
    g.slice_mut(s![m - 1, .., ..]).fill(zero);
    g.slice_mut(s![.., 0, ..]).fill(zero);
    g.slice_mut(s![.., n - 1, ..]).fill(zero);
    g.slice_mut(s![.., .., 0]).fill(zero);
    g.slice_mut(s![.., .., p - 1]).fill(zero);
}

// =============================================================================
// Main Entry Points
// =============================================================================

/// Rician deconvolution with an explicit smoother and progress callback (Internal/Advanced).
///
/// This is the core loop every other entry point goes through. `smoother` is
/// invoked exactly twice per iteration on `conv`; `config.sigma_blur` and
/// `config.gaussian_steps` are ignored here since the smoother already fixes
/// the blur. `progress(iteration, max_iterations)` runs after each completed
/// iteration, 1-based.
///
/// All validation happens before any volume is written. On return `u` holds
/// the result; `g` and `conv` hold no meaningful value.
pub fn rician_deconv3_with_smoother<F, S, P>(
    mut u: ArrayViewMut3<F>,
    f: ArrayView3<F>,
    mut g: ArrayViewMut3<F>,
    mut conv: ArrayViewMut3<F>,
    config: &DeconvConfig<F>,
    smoother: &mut S,
    mut progress: P,
) -> Result<(), String>
where
    F: RicianFloat,
    S: Smoother<F>,
    P: FnMut(usize, usize),
{
    config.validate()?;

    let shape = VolumeShape::of(&u);
    ensure_same_shape("f", shape, VolumeShape::of(&f))?;
    ensure_same_shape("g", shape, VolumeShape::of(&g))?;
    ensure_same_shape("conv", shape, VolumeShape::of(&conv))?;
    ensure_interior(shape)?;

    let sigma2 = config.sigma_noise * config.sigma_noise;
    let gamma = config.lambda / sigma2;
    let parallel = shape.voxel_count() >= PARALLEL_VOXEL_THRESHOLD;
    let mut timings = StageTimings::new(resolve_profile_timing());

    zero_boundary_shell(g.view_mut());

    for iteration in 1..=config.max_iterations {
        timings.time(Stage::Diffusivity, || {
            compute_diffusivity(u.view(), g.view_mut(), config.epsilon, parallel)
        });

        conv.assign(&u);
        timings.time(Stage::Blur, || smoother.smooth(conv.view_mut()))?;
        timings.time(Stage::Residual, || {
            apply_residual(conv.view_mut(), f, sigma2, config.residual_mode, parallel)
        });
        timings.time(Stage::Blur, || smoother.smooth(conv.view_mut()))?;

        timings.time(Stage::Update, || {
            semi_implicit_sweep(u.view_mut(), g.view(), conv.view(), config.dt, gamma)
        });

        tracing::debug!(
            iteration,
            max_iterations = config.max_iterations,
            shape = %shape,
            "rician deconvolution iteration done"
        );
        progress(iteration, config.max_iterations);
    }

    timings.report(&shape.to_string(), config.max_iterations);
    Ok(())
}

/// Rician deconvolution with a progress callback.
///
/// Uses the recursive Gaussian with `config.sigma_blur` and `config.gaussian_steps`.
pub fn rician_deconv3_with_progress<F, P>(
    u: ArrayViewMut3<F>,
    f: ArrayView3<F>,
    g: ArrayViewMut3<F>,
    conv: ArrayViewMut3<F>,
    config: &DeconvConfig<F>,
    progress: P,
) -> Result<(), String>
where
    F: RicianFloat,
    P: FnMut(usize, usize),
{
    config.validate()?;
    let mut smoother = RecursiveGaussian::new(config.sigma_blur, config.gaussian_steps)?;
    rician_deconv3_with_smoother(u, f, g, conv, config, &mut smoother, progress)
}

/// Rician deconvolution with a full configuration.
pub fn rician_deconv3_with_config<F: RicianFloat>(
    u: ArrayViewMut3<F>,
    f: ArrayView3<F>,
    g: ArrayViewMut3<F>,
    conv: ArrayViewMut3<F>,
    config: &DeconvConfig<F>,
) -> Result<(), String> {
    rician_deconv3_with_progress(u, f, g, conv, config, |_, _| {})
}

/// Rician deconvolution of `u` against the observed volume `f`.
///
/// `u` is the starting estimate (usually a copy of `f`) and is refined in
/// place. `g` and `conv` are caller-owned scratch volumes. All four volumes
/// must share one shape with every extent >= 3. Runs [`MAX_ITERATIONS`]
/// iterations in [`ResidualMode::ReferenceCompatible`].
///
/// # Example
/// ```
/// use ndarray::Array3;
/// use rician_core::rician_deconv3;
///
/// let f = Array3::<f64>::from_elem((8, 8, 8), 1.0);
/// let mut u = f.clone();
/// let mut g = Array3::zeros(f.dim());
/// let mut conv = Array3::zeros(f.dim());
///
/// rician_deconv3(u.view_mut(), f.view(), g.view_mut(), conv.view_mut(), 1.0, 1.0, 0.065).unwrap();
/// assert!(u.iter().all(|v| (v - 1.0).abs() < 1e-6));
/// ```
pub fn rician_deconv3<F: RicianFloat>(
    u: ArrayViewMut3<F>,
    f: ArrayView3<F>,
    g: ArrayViewMut3<F>,
    conv: ArrayViewMut3<F>,
    sigma_blur: F,
    sigma_noise: F,
    lambda: F,
) -> Result<(), String> {
    let config = DeconvConfig::with_params(sigma_blur, sigma_noise, lambda);
    rician_deconv3_with_config(u, f, g, conv, &config)
}

/// Denoise `f`, allocating the estimate and scratch volumes internally.
///
/// Starts from `u = f` and returns the refined estimate.
pub fn rician_denoise<F: RicianFloat>(
    f: ArrayView3<F>,
    config: &DeconvConfig<F>,
) -> Result<Array3<F>, String> {
    config.validate()?;
    let shape = VolumeShape::of(&f);
    ensure_interior(shape)?;

    tracing::info!(
        shape = %shape,
        interior_voxels = shape.interior_len(),
        iterations = config.max_iterations,
        mode = ?config.residual_mode,
        "rician denoise"
    );

    let mut u = f.to_owned();
    let mut scratch = DeconvScratch::new(shape);
    scratch.run(u.view_mut(), f, config)?;
    Ok(u)
}
