//! Volume shape checks and the 6-connected stencil used by the deconvolution.
//!
//! Volumes are plain `ndarray` 3-D arrays in the default row-major layout,
//! indexed `[[i, j, k]]` with extents `(m, n, p)`. Axis 0 (`i`) is the axis the
//! stencil sweeps walk with a rolling window; axes 1 (`j`) and 2 (`k`) are read
//! directly from the array.

use std::fmt;

use ndarray::{ArrayBase, Data, Ix3};

use crate::float_trait::RicianFloat;

/// Smallest extent along any axis that still leaves an interior voxel.
pub const MIN_INTERIOR_EXTENT: usize = 3;

/// Extents of a volume along `(i, j, k)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeShape {
    pub m: usize,
    pub n: usize,
    pub p: usize,
}

impl VolumeShape {
    pub fn new(m: usize, n: usize, p: usize) -> Self {
        Self { m, n, p }
    }

    /// Shape of an ndarray volume.
    pub fn of<S: Data>(volume: &ArrayBase<S, Ix3>) -> Self {
        Self::from_dim(volume.dim())
    }

    pub fn from_dim((m, n, p): (usize, usize, usize)) -> Self {
        Self { m, n, p }
    }

    pub fn dim(&self) -> (usize, usize, usize) {
        (self.m, self.n, self.p)
    }

    /// Total number of voxels.
    pub fn voxel_count(&self) -> usize {
        self.m * self.n * self.p
    }

    /// True when every extent is at least [`MIN_INTERIOR_EXTENT`].
    pub fn has_interior(&self) -> bool {
        self.m >= MIN_INTERIOR_EXTENT && self.n >= MIN_INTERIOR_EXTENT && self.p >= MIN_INTERIOR_EXTENT
    }

    /// True for voxels on index 0 or extent-1 of any axis.
    #[inline]
    pub fn is_boundary(&self, i: usize, j: usize, k: usize) -> bool {
        i == 0 || j == 0 || k == 0 || i + 1 == self.m || j + 1 == self.n || k + 1 == self.p
    }

    /// Number of voxels the stencil sweeps visit.
    pub fn interior_len(&self) -> usize {
        if self.has_interior() {
            (self.m - 2) * (self.n - 2) * (self.p - 2)
        } else {
            0
        }
    }
}

impl fmt::Display for VolumeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.m, self.n, self.p)
    }
}

/// Reject a volume whose shape differs from the reference volume's.
pub fn ensure_same_shape(
    name: &str,
    expected: VolumeShape,
    actual: VolumeShape,
) -> Result<(), String> {
    if expected != actual {
        return Err(format!(
            "Volume shape mismatch: `{}` has shape {}, expected {}",
            name, actual, expected
        ));
    }
    Ok(())
}

/// Reject shapes too small to have any interior voxel.
pub fn ensure_interior(shape: VolumeShape) -> Result<(), String> {
    if !shape.has_interior() {
        return Err(format!(
            "Volume shape {} has no interior voxel: every extent must be >= {}",
            shape, MIN_INTERIOR_EXTENT
        ));
    }
    Ok(())
}

/// The six face-adjacent values of a voxel.
///
/// `up`/`down` are the `i-1`/`i+1` neighbours, `left`/`right` are `j-1`/`j+1`,
/// `inward`/`outward` are `k-1`/`k+1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceNeighbors<F> {
    pub up: F,
    pub down: F,
    pub left: F,
    pub right: F,
    pub inward: F,
    pub outward: F,
}

impl<F: RicianFloat> FaceNeighbors<F> {
    /// Sum of the six values, accumulated right, left, down, up, inward, outward.
    #[inline]
    pub fn sum(&self) -> F {
        self.right + self.left + self.down + self.up + self.inward + self.outward
    }

    /// `epsilon` plus the squared differences between `center` and each neighbour.
    ///
    /// The square root of this is the regularised gradient magnitude at the voxel.
    #[inline]
    pub fn squared_gradient(&self, center: F, epsilon: F) -> F {
        let sq = |v: F| (center - v) * (center - v);
        epsilon
            + sq(self.right)
            + sq(self.left)
            + sq(self.up)
            + sq(self.down)
            + sq(self.inward)
            + sq(self.outward)
    }

    /// Sum of neighbour values weighted by the matching neighbours of `weights`.
    #[inline]
    pub fn weighted_sum(&self, weights: &FaceNeighbors<F>) -> F {
        self.right * weights.right
            + self.left * weights.left
            + self.up * weights.up
            + self.down * weights.down
            + self.inward * weights.inward
            + self.outward * weights.outward
    }
}

/// Three consecutive samples along axis `i` at a fixed `(j, k)`.
///
/// The stencil sweeps walk `i` upwards and shift this window instead of
/// re-reading the `i-1` and `i` samples. A value enters the window as `down`
/// when the sweep is one step before it, so `up` and `center` hold whatever the
/// volume contained at that moment, even if the sweep has since overwritten it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisWindow<F> {
    pub up: F,
    pub center: F,
    pub down: F,
}

impl<F: RicianFloat> AxisWindow<F> {
    /// Window positioned just before `i = 1`: `center` is `i = 0`, `down` is `i = 1`.
    #[inline]
    pub fn prime<S>(volume: &ArrayBase<S, Ix3>, j: usize, k: usize) -> Self
    where
        S: Data<Elem = F>,
    {
        Self {
            up: F::zero(),
            center: volume[[0, j, k]],
            down: volume[[1, j, k]],
        }
    }

    /// Shift the window onto voxel `i`; reads `i + 1` from the volume.
    #[inline]
    pub fn advance<S>(&mut self, volume: &ArrayBase<S, Ix3>, i: usize, j: usize, k: usize)
    where
        S: Data<Elem = F>,
    {
        self.up = self.center;
        self.center = self.down;
        self.down = volume[[i + 1, j, k]];
    }
}

/// Gather the six face neighbours of interior voxel `(i, j, k)`.
///
/// The `i` neighbours come from `window`, the `j` and `k` neighbours are read
/// from `volume` as it is now.
#[inline]
pub fn face_neighbors<S, F>(
    volume: &ArrayBase<S, Ix3>,
    window: &AxisWindow<F>,
    i: usize,
    j: usize,
    k: usize,
) -> FaceNeighbors<F>
where
    S: Data<Elem = F>,
    F: RicianFloat,
{
    debug_assert!(
        !VolumeShape::of(volume).is_boundary(i, j, k),
        "stencil read at boundary voxel ({}, {}, {})",
        i,
        j,
        k
    );
    FaceNeighbors {
        up: window.up,
        down: window.down,
        left: volume[[i, j - 1, k]],
        right: volume[[i, j + 1, k]],
        inward: volume[[i, j, k - 1]],
        outward: volume[[i, j, k + 1]],
    }
}
