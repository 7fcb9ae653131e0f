// src/spline/mod.rs
//! Curve engines: clamped B-splines over timed waypoints, C¹ piecewise
//! cubics built from waypoint/velocity pairs, cubic segment features used as
//! optimization costs, and an online path adapter.

pub mod basis;
pub mod cubic;
pub mod features;
pub mod path;

pub use cubic::{CubicPiece, CubicSpline};
pub use features::{FeatureBlock, LeapCost, MaxAcc, MaxVel, Segment, SegmentFeature};
pub use path::Path;

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use self::basis::cox_de_boor;

/// Tolerance under which two control points count as one (double knot).
const COINCIDENT_TOL: f64 = 1e-10;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SplineError {
    #[error("Spline has no points")]
    Empty,
    #[error("Got {points} points but {times} times")]
    LengthMismatch { points: usize, times: usize },
    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("Times must be strictly increasing (violated at index {0})")]
    NonMonotonicTimes(usize),
    #[error("Need at least {required} points, got {found}")]
    TooFewPoints { required: usize, found: usize },
    #[error("Derivative order {0} is not supported (max 2)")]
    UnsupportedDerivative(usize),
    #[error("{operation} requires degree 2, spline has degree {degree}")]
    UnsupportedDegree { operation: &'static str, degree: usize },
    #[error("Control points at waypoint {0} do not form a double knot")]
    NotDoubleKnot(usize),
    #[error("Index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("Appended curve starts at time 0 but is {0} away from the current end")]
    AppendDiscontinuity(f64),
    #[error("Appended times must start at or after 0 (got {0})")]
    NegativeAppendTime(f64),
    #[error("Acceleration requested at t={0} outside the curve while moving")]
    ExtrapolatedAcceleration(f64),
    #[error("Invalid curve parameter: {0}")]
    InvalidParameter(f64),
}

impl SplineError {
    /// True for caller misuse (bad arguments), false for state-dependent
    /// numeric failures.
    pub fn is_invalid_input(&self) -> bool {
        !matches!(self, SplineError::ExtrapolatedAcceleration(_))
    }
}

pub type SplineResult<T> = Result<T, SplineError>;

pub(crate) fn max_abs_diff(a: &DVector<f64>, b: &DVector<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .fold(0.0, |m, (x, y)| f64::max(m, (x - y).abs()))
}

/// Checks a waypoint list and returns its dimension.
pub(crate) fn check_waypoints(
    points: &[DVector<f64>],
    times: &[f64],
    strict: bool,
) -> SplineResult<usize> {
    if points.is_empty() {
        return Err(SplineError::Empty);
    }
    if points.len() != times.len() {
        return Err(SplineError::LengthMismatch {
            points: points.len(),
            times: times.len(),
        });
    }
    let dim = points[0].len();
    if let Some(p) = points.iter().find(|p| p.len() != dim) {
        return Err(SplineError::DimensionMismatch {
            expected: dim,
            found: p.len(),
        });
    }
    for (i, w) in times.windows(2).enumerate() {
        let ordered = if strict { w[1] > w[0] } else { w[1] >= w[0] };
        if !ordered || !w[1].is_finite() {
            return Err(SplineError::NonMonotonicTimes(i + 1));
        }
    }
    if !times[0].is_finite() {
        return Err(SplineError::NonMonotonicTimes(0));
    }
    Ok(dim)
}

/// Clamped B-spline through timed waypoints.
///
/// `degree / 2` copies of the first and last waypoint pad the control
/// points; the knot vector holds `degree + 1` copies of each end time.
/// Interior knots are the waypoint times for odd degrees and the midpoints
/// between consecutive waypoint times for even degrees.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Spline {
    degree: usize,
    /// Waypoints as given (absolute times after appends)
    points: Vec<DVector<f64>>,
    times: Vec<f64>,
    control_points: Vec<DVector<f64>>,
    knots: Vec<f64>,
}

impl Spline {
    /// Build a spline through `points` at strictly increasing `times`.
    pub fn new(degree: usize, points: &[DVector<f64>], times: &[f64]) -> SplineResult<Self> {
        let mut spline = Self::default();
        spline.set(degree, points, times, None, None)?;
        Ok(spline)
    }

    /// (Re)build knots and control points.
    ///
    /// Optional boundary velocities are pinned through the double-knot
    /// operator and therefore need degree 2.
    pub fn set(
        &mut self,
        degree: usize,
        points: &[DVector<f64>],
        times: &[f64],
        start_vel: Option<&DVector<f64>>,
        end_vel: Option<&DVector<f64>>,
    ) -> SplineResult<()> {
        let dim = check_waypoints(points, times, true)?;
        if (start_vel.is_some() || end_vel.is_some()) && degree != 2 {
            return Err(SplineError::UnsupportedDegree {
                operation: "boundary velocity",
                degree,
            });
        }
        check_velocity_dims(start_vel.into_iter().chain(end_vel), dim)?;
        self.build(degree, points.to_vec(), times.to_vec())?;
        if let Some(v) = start_vel {
            self.pin_velocity(0, v, 0)?;
        }
        if let Some(v) = end_vel {
            let last = points.len() - 1;
            self.pin_velocity(last + 1, v, last)?;
        }
        tracing::debug!(
            "spline set: degree {}, {} waypoints, {} knots",
            degree,
            points.len(),
            self.knots.len()
        );
        Ok(())
    }

    /// Degree-2 spline passing every waypoint with the given velocity.
    ///
    /// Every waypoint and time is doubled and each pair is spread apart so
    /// the curve hits `velocities[i]` at `times[i]`.
    pub fn set_vel(
        &mut self,
        degree: usize,
        points: &[DVector<f64>],
        velocities: &[DVector<f64>],
        times: &[f64],
    ) -> SplineResult<()> {
        if degree != 2 {
            return Err(SplineError::UnsupportedDegree {
                operation: "velocity waypoints",
                degree,
            });
        }
        let dim = check_waypoints(points, times, true)?;
        if velocities.len() != points.len() {
            return Err(SplineError::LengthMismatch {
                points: points.len(),
                times: velocities.len(),
            });
        }
        check_velocity_dims(velocities.iter(), dim)?;
        let doubled_points: Vec<_> = points.iter().flat_map(|p| [p.clone(), p.clone()]).collect();
        let doubled_times: Vec<_> = times.iter().flat_map(|&t| [t, t]).collect();
        self.build(degree, doubled_points, doubled_times)?;
        for (i, v) in velocities.iter().enumerate() {
            self.pin_velocity(2 * i + 1, v, i)?;
        }
        Ok(())
    }

    /// 1-D identity curve over `[0, 1]` with `steps` uniform waypoints.
    pub fn set_uniform(&mut self, degree: usize, steps: usize) -> SplineResult<()> {
        if steps < 2 {
            return Err(SplineError::TooFewPoints {
                required: 2,
                found: steps,
            });
        }
        let times = uniform_grid(steps);
        let points: Vec<_> = times.iter().map(|&t| DVector::from_element(1, t)).collect();
        self.set(degree, &points, &times, None, None)
    }

    fn build(&mut self, degree: usize, points: Vec<DVector<f64>>, times: Vec<f64>) -> SplineResult<()> {
        let pad = degree / 2;
        let n_cp = points.len() + 2 * pad;
        if n_cp < degree + 1 {
            return Err(SplineError::TooFewPoints {
                required: degree + 1 - 2 * pad,
                found: points.len(),
            });
        }

        let first = points[0].clone();
        let last = points[points.len() - 1].clone();
        let mut control_points = Vec::with_capacity(n_cp);
        control_points.extend(std::iter::repeat_n(first, pad));
        control_points.extend(points.iter().cloned());
        control_points.extend(std::iter::repeat_n(last, pad));

        let m = n_cp + degree;
        let t_first = times[0];
        let t_last = times[times.len() - 1];
        let knots = (0..=m)
            .map(|i| {
                if i <= degree {
                    t_first
                } else if i >= m - degree {
                    t_last
                } else if degree % 2 == 1 {
                    times[i - degree]
                } else {
                    0.5 * (times[i - degree - 1] + times[i - degree])
                }
            })
            .collect();

        self.degree = degree;
        self.points = points;
        self.times = times;
        self.control_points = control_points;
        self.knots = knots;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.times.clear();
        self.control_points.clear();
        self.knots.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.control_points.is_empty()
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn dimension(&self) -> usize {
        self.control_points.first().map_or(0, |p| p.len())
    }

    pub fn points(&self) -> &[DVector<f64>] {
        &self.points
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn control_points(&self) -> &[DVector<f64>] {
        &self.control_points
    }

    pub fn knots(&self) -> &[f64] {
        &self.knots
    }

    /// First knot time (start of the domain)
    pub fn begin(&self) -> f64 {
        self.knots.first().copied().unwrap_or(0.0)
    }

    /// Last knot time (end of the domain)
    pub fn end(&self) -> f64 {
        self.knots.last().copied().unwrap_or(0.0)
    }

    /// Position (order 0), velocity (1) or acceleration (2) at `t`.
    pub fn eval(&self, t: f64, order: usize) -> SplineResult<DVector<f64>> {
        let mut out = DVector::zeros(self.dimension());
        match order {
            0 => self.eval_into(t, Some(&mut out), None, None)?,
            1 => self.eval_into(t, None, Some(&mut out), None)?,
            2 => self.eval_into(t, None, None, Some(&mut out))?,
            _ => return Err(SplineError::UnsupportedDerivative(order)),
        }
        Ok(out)
    }

    /// Evaluates only the requested outputs over the local knot window.
    pub fn eval_into(
        &self,
        t: f64,
        x: Option<&mut DVector<f64>>,
        x_dot: Option<&mut DVector<f64>>,
        x_ddot: Option<&mut DVector<f64>>,
    ) -> SplineResult<()> {
        if self.is_empty() {
            return Err(SplineError::Empty);
        }
        if !t.is_finite() {
            return Err(SplineError::InvalidParameter(t));
        }
        let degree = self.degree;
        let window_len = 2 * degree + 2;

        // first knot strictly after t, shifted back to the support start
        let rank = self.knots.partition_point(|&k| k <= t);
        let mut offset = rank.saturating_sub(degree + 1);
        if offset + window_len > self.knots.len() {
            offset = self.knots.len() - window_len;
        }
        let window = &self.knots[offset..offset + window_len];

        let mut b = Vec::with_capacity(degree + 1);
        let mut db = Vec::new();
        let mut ddb = Vec::new();
        cox_de_boor(
            t,
            degree,
            window,
            degree + 1,
            &mut b,
            x_dot.is_some().then_some(&mut db),
            x_ddot.is_some().then_some(&mut ddb),
        );

        let local = &self.control_points[offset..offset + degree + 1];
        if let Some(x) = x {
            *x = weighted_sum(local, &b, self.dimension());
        }
        if let Some(x_dot) = x_dot {
            *x_dot = weighted_sum(local, &db, self.dimension());
        }
        if let Some(x_ddot) = x_ddot {
            *x_ddot = weighted_sum(local, &ddb, self.dimension());
        }
        Ok(())
    }

    pub fn eval_many(&self, ts: &[f64], order: usize) -> SplineResult<Vec<DVector<f64>>> {
        ts.iter().map(|&t| self.eval(t, order)).collect()
    }

    /// Basis weights over all control points at `t`, such that
    /// `eval(t, order) == Σ_j basis_j · control_point_j`.
    pub fn basis(&self, t: f64, order: usize) -> SplineResult<DVector<f64>> {
        if self.is_empty() {
            return Err(SplineError::Empty);
        }
        if order > 2 {
            return Err(SplineError::UnsupportedDerivative(order));
        }
        let n = self.control_points.len();
        let mut b = Vec::with_capacity(n);
        let mut db = Vec::new();
        let mut ddb = Vec::new();
        cox_de_boor(
            t,
            self.degree,
            &self.knots,
            n,
            &mut b,
            (order >= 1).then_some(&mut db),
            (order == 2).then_some(&mut ddb),
        );
        let coeffs = match order {
            0 => b,
            1 => db,
            _ => ddb,
        };
        Ok(DVector::from_vec(coeffs))
    }

    /// `samples × control_points` matrix of basis weights at uniformly
    /// spaced parameters across the domain.
    pub fn grid_basis(&self, samples: usize) -> SplineResult<DMatrix<f64>> {
        if samples < 2 {
            return Err(SplineError::TooFewPoints {
                required: 2,
                found: samples,
            });
        }
        let (t0, t1) = (self.begin(), self.end());
        let mut grid = DMatrix::zeros(samples, self.control_points.len());
        for (row, s) in uniform_grid(samples).into_iter().enumerate() {
            let b = self.basis(t0 + (t1 - t0) * s, 0)?;
            grid.row_mut(row).copy_from(&b.transpose());
        }
        Ok(grid)
    }

    /// Append waypoints at times relative to the current curve end.
    ///
    /// A first relative time of 0 requires the first new point to coincide
    /// with the current last point. Up to degree 3 the curve before the old
    /// end is then left unchanged; from degree 4 on the re-padded tail
    /// reaches back into the last spans before the old end.
    pub fn append(&mut self, points: &[DVector<f64>], times: &[f64]) -> SplineResult<()> {
        if self.is_empty() {
            return Err(SplineError::Empty);
        }
        let dim = check_waypoints(points, times, true)?;
        if dim != self.dimension() {
            return Err(SplineError::DimensionMismatch {
                expected: self.dimension(),
                found: dim,
            });
        }
        if times[0] < 0.0 {
            return Err(SplineError::NegativeAppendTime(times[0]));
        }
        if times[0] == 0.0 {
            let gap = max_abs_diff(&self.points[self.points.len() - 1], &points[0]);
            if gap > COINCIDENT_TOL {
                return Err(SplineError::AppendDiscontinuity(gap));
            }
        }

        let degree = self.degree;
        let pad = degree / 2;
        let t_end = self.end();
        let new_n = points.len();

        self.points.extend(points.iter().cloned());
        self.times.extend(times.iter().map(|t| t + t_end));

        self.control_points.truncate(self.control_points.len() - pad);
        self.knots.truncate(self.knots.len() - 1 - 2 * pad);
        self.control_points.extend(points.iter().cloned());
        self.knots.extend(times.iter().map(|t| t + t_end));

        if degree % 2 == 0 {
            // midpoint knots of the new tail, counted from the end
            let n_knots = self.knots.len();
            let n_times = self.times.len();
            for r in 0..new_n {
                self.knots[n_knots - 1 - r] =
                    0.5 * (self.times[n_times - 2 - r] + self.times[n_times - 1 - r]);
            }
        }

        let last_point = points[new_n - 1].clone();
        let last_time = times[new_n - 1] + t_end;
        self.control_points.extend(std::iter::repeat_n(last_point, pad));
        self.knots.extend(std::iter::repeat_n(last_time, 1 + 2 * pad));

        tracing::debug!("spline append: {} waypoints, end time {}", new_n, last_time);
        Ok(())
    }

    /// Insert a duplicate control point and knot at waypoint `index`.
    pub fn double_knot(&mut self, index: usize) -> SplineResult<()> {
        if self.degree != 2 {
            return Err(SplineError::UnsupportedDegree {
                operation: "double knot",
                degree: self.degree,
            });
        }
        if index >= self.points.len() {
            return Err(SplineError::IndexOutOfRange {
                index,
                len: self.points.len(),
            });
        }
        let pad = self.degree / 2;
        self.control_points
            .insert(index + pad, self.points[index].clone());
        self.knots.insert(index + self.degree + 1, self.times[index]);
        Ok(())
    }

    /// Spread the double knot at waypoint `index` so the curve passes it with
    /// velocity `vel`.
    pub fn set_double_knot_vel(&mut self, index: usize, vel: &DVector<f64>) -> SplineResult<()> {
        self.pin_velocity(index + self.degree / 2, vel, index)
    }

    /// Moves the coincident pair `(cp[j], cp[j+1])` apart along `vel`.
    fn pin_velocity(&mut self, j: usize, vel: &DVector<f64>, waypoint: usize) -> SplineResult<()> {
        if self.degree != 2 {
            return Err(SplineError::UnsupportedDegree {
                operation: "velocity pin",
                degree: self.degree,
            });
        }
        if j + 1 >= self.control_points.len() || j + 3 >= self.knots.len() {
            return Err(SplineError::IndexOutOfRange {
                index: waypoint,
                len: self.points.len(),
            });
        }
        if vel.len() != self.dimension() {
            return Err(SplineError::DimensionMismatch {
                expected: self.dimension(),
                found: vel.len(),
            });
        }
        if max_abs_diff(&self.control_points[j], &self.control_points[j + 1]) > COINCIDENT_TOL {
            tracing::warn!("velocity pin rejected at waypoint {}: not a double knot", waypoint);
            return Err(SplineError::NotDoubleKnot(waypoint));
        }
        let before = 0.5 * (self.knots[j + 2] - self.knots[j + 1]);
        let after = 0.5 * (self.knots[j + 3] - self.knots[j + 2]);
        self.control_points[j] -= vel * before;
        self.control_points[j + 1] += vel * after;
        Ok(())
    }
}

fn check_velocity_dims<'a>(
    velocities: impl IntoIterator<Item = &'a DVector<f64>>,
    dim: usize,
) -> SplineResult<()> {
    match velocities.into_iter().find(|v| v.len() != dim) {
        Some(v) => Err(SplineError::DimensionMismatch {
            expected: dim,
            found: v.len(),
        }),
        None => Ok(()),
    }
}

fn weighted_sum(points: &[DVector<f64>], weights: &[f64], dim: usize) -> DVector<f64> {
    let mut out = DVector::zeros(dim);
    for (p, &w) in points.iter().zip(weights) {
        if w != 0.0 {
            out.axpy(w, p, 1.0);
        }
    }
    out
}

/// `n` uniformly spaced values covering `[0, 1]`.
pub(crate) fn uniform_grid(n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![0.0];
    }
    (0..n).map(|i| i as f64 / (n - 1) as f64).collect()
}
