// src/spline/features.rs
//! Features of a single Hermite cubic segment, as functions of its duration
//! and boundary velocities. Used as cost and constraint terms when timing a
//! waypoint sequence.

use nalgebra::{DMatrix, DVector};

use super::{SplineError, SplineResult};

/// One Hermite segment from `(x0, v0)` to `(x1, v1)` over `tau`.
#[derive(Debug, Clone, Copy)]
pub struct Segment<'a> {
    pub x0: &'a DVector<f64>,
    pub v0: &'a DVector<f64>,
    pub x1: &'a DVector<f64>,
    pub v1: &'a DVector<f64>,
    pub tau: f64,
}

impl Segment<'_> {
    fn check(&self) -> SplineResult<usize> {
        let dim = self.x0.len();
        for v in [self.v0, self.x1, self.v1] {
            if v.len() != dim {
                return Err(SplineError::DimensionMismatch {
                    expected: dim,
                    found: v.len(),
                });
            }
        }
        if !(self.tau > 0.0) || !self.tau.is_finite() {
            return Err(SplineError::InvalidParameter(self.tau));
        }
        Ok(dim)
    }
}

/// Feature values with Jacobians w.r.t. `tau`, `v0` and `v1`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureBlock {
    pub values: DVector<f64>,
    pub d_tau: DVector<f64>,
    pub d_v0: DMatrix<f64>,
    pub d_v1: DMatrix<f64>,
}

impl FeatureBlock {
    fn zeros(rows: usize, dim: usize) -> Self {
        Self {
            values: DVector::zeros(rows),
            d_tau: DVector::zeros(rows),
            d_v0: DMatrix::zeros(rows, dim),
            d_v1: DMatrix::zeros(rows, dim),
        }
    }

    /// Scales values and Jacobians together.
    pub fn scale(&mut self, factor: f64) {
        self.values *= factor;
        self.d_tau *= factor;
        self.d_v0 *= factor;
        self.d_v1 *= factor;
    }
}

pub trait SegmentFeature {
    /// Number of feature rows for a `dim`-dimensional segment.
    fn rows(&self, dim: usize) -> usize;

    fn eval(&self, segment: &Segment<'_>) -> SplineResult<FeatureBlock>;
}

/// `[√12 τ^-1.5 D ; τ^-0.5 V]` with `D = Δx − τ/2 (v0 + v1)` and
/// `V = v1 − v0`. Its squared norm equals `∫ |ẍ|² dt` over the segment.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeapCost;

impl SegmentFeature for LeapCost {
    fn rows(&self, dim: usize) -> usize {
        2 * dim
    }

    fn eval(&self, seg: &Segment<'_>) -> SplineResult<FeatureBlock> {
        let dim = seg.check()?;
        let tau = seg.tau;
        let s12 = 12f64.sqrt();
        let v_sum = seg.v0 + seg.v1;
        let d = (seg.x1 - seg.x0) - &v_sum * (0.5 * tau);
        let v = seg.v1 - seg.v0;

        let mut out = FeatureBlock::zeros(2 * dim, dim);
        let t15 = tau.powf(-1.5);
        let t05 = tau.powf(-0.5);
        let identity = DMatrix::<f64>::identity(dim, dim);

        out.values.rows_mut(0, dim).copy_from(&(&d * (s12 * t15)));
        out.values.rows_mut(dim, dim).copy_from(&(&v * t05));

        let dd_dtau = &v_sum * -0.5;
        out.d_tau
            .rows_mut(0, dim)
            .copy_from(&((&d * (-1.5 * tau.powf(-2.5)) + dd_dtau * t15) * s12));
        out.d_tau
            .rows_mut(dim, dim)
            .copy_from(&(&v * (-0.5 * t15)));

        let dd_dv = &identity * (-0.5 * s12 * t05);
        out.d_v0.view_mut((0, 0), (dim, dim)).copy_from(&dd_dv);
        out.d_v1.view_mut((0, 0), (dim, dim)).copy_from(&dd_dv);
        out.d_v0
            .view_mut((dim, 0), (dim, dim))
            .copy_from(&(&identity * -t05));
        out.d_v1
            .view_mut((dim, 0), (dim, dim))
            .copy_from(&(&identity * t05));
        Ok(out)
    }
}

/// Boundary accelerations as `[b; −b; b+a; −b−a]`, where `b` is the start
/// acceleration and `b + a` the end acceleration. Bounding each row by a
/// limit bounds both accelerations per axis.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxAcc;

impl SegmentFeature for MaxAcc {
    fn rows(&self, dim: usize) -> usize {
        4 * dim
    }

    fn eval(&self, seg: &Segment<'_>) -> SplineResult<FeatureBlock> {
        let dim = seg.check()?;
        let tau = seg.tau;
        let tau2 = tau * tau;
        let tau3 = tau2 * tau;
        let delta = seg.x1 - seg.x0;
        let v_sum = seg.v0 + seg.v1;
        let v1_2v0 = seg.v1 + seg.v0 * 2.0;

        let b = (&delta * 3.0 - &v1_2v0 * tau) * (2.0 / tau2);
        let a = (&delta * -2.0 + &v_sum * tau) * (6.0 / tau2);
        let b_tau = &delta * (-12.0 / tau3) + &v1_2v0 * (2.0 / tau2);
        let a_tau = &delta * (24.0 / tau3) - &v_sum * (6.0 / tau2);

        let identity = DMatrix::<f64>::identity(dim, dim);
        let b_v0 = &identity * (-4.0 / tau);
        let b_v1 = &identity * (-2.0 / tau);
        let a_v = &identity * (6.0 / tau);

        let mut out = FeatureBlock::zeros(4 * dim, dim);
        let blocks = [
            (1.0, 0.0),  // b
            (-1.0, 0.0), // -b
            (1.0, 1.0),  // b + a
            (-1.0, -1.0),
        ];
        for (i, (sb, sa)) in blocks.into_iter().enumerate() {
            let r = i * dim;
            out.values
                .rows_mut(r, dim)
                .copy_from(&(&b * sb + &a * sa));
            out.d_tau
                .rows_mut(r, dim)
                .copy_from(&(&b_tau * sb + &a_tau * sa));
            out.d_v0
                .view_mut((r, 0), (dim, dim))
                .copy_from(&(&b_v0 * sb + &a_v * sa));
            out.d_v1
                .view_mut((r, 0), (dim, dim))
                .copy_from(&(&b_v1 * sb + &a_v * sa));
        }
        Ok(out)
    }
}

/// Start velocity as `[v0; −v0]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxVel;

impl SegmentFeature for MaxVel {
    fn rows(&self, dim: usize) -> usize {
        2 * dim
    }

    fn eval(&self, seg: &Segment<'_>) -> SplineResult<FeatureBlock> {
        let dim = seg.check()?;
        let mut out = FeatureBlock::zeros(2 * dim, dim);
        out.values.rows_mut(0, dim).copy_from(seg.v0);
        out.values.rows_mut(dim, dim).copy_from(&(-seg.v0));
        let identity = DMatrix::<f64>::identity(dim, dim);
        out.d_v0.view_mut((0, 0), (dim, dim)).copy_from(&identity);
        out.d_v0.view_mut((dim, 0), (dim, dim)).copy_from(&(-identity));
        Ok(out)
    }
}
