// src/spline/cubic.rs
//! C¹ piecewise cubic curves built from positions and velocities at timed
//! waypoints (cubic Hermite interpolation).

use nalgebra::DVector;

use super::{SplineError, SplineResult, check_waypoints};

/// Velocity below which extrapolating with zero acceleration is accepted.
const REST_TOL: f64 = 1e-6;

/// Shortest first duration accepted by [`CubicSpline::append`].
const MIN_APPEND_TIME: f64 = 1e-6;

/// One cubic `x(t) = d + c t + b t² + a t³` on `t ∈ [0, τ]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CubicPiece {
    pub a: DVector<f64>,
    pub b: DVector<f64>,
    pub c: DVector<f64>,
    pub d: DVector<f64>,
    /// Duration τ
    pub duration: f64,
}

impl CubicPiece {
    /// Hermite cubic from `(x0, v0)` to `(x1, v1)` over `tau`.
    pub fn new(
        x0: &DVector<f64>,
        v0: &DVector<f64>,
        x1: &DVector<f64>,
        v1: &DVector<f64>,
        tau: f64,
    ) -> SplineResult<Self> {
        let dim = x0.len();
        for v in [v0, x1, v1] {
            if v.len() != dim {
                return Err(SplineError::DimensionMismatch {
                    expected: dim,
                    found: v.len(),
                });
            }
        }
        if !(tau > 0.0) || !tau.is_finite() {
            return Err(SplineError::InvalidParameter(tau));
        }
        let tau2 = tau * tau;
        let tau3 = tau2 * tau;
        let delta = x1 - x0;
        Ok(Self {
            d: x0.clone(),
            c: v0.clone(),
            b: (&delta * 3.0 - (v1 + v0 * 2.0) * tau) / tau2,
            a: (&delta * -2.0 + (v1 + v0) * tau) / tau3,
            duration: tau,
        })
    }

    pub fn dimension(&self) -> usize {
        self.d.len()
    }

    /// Fills whichever of position, velocity and acceleration are requested.
    pub fn eval_into(
        &self,
        t: f64,
        x: Option<&mut DVector<f64>>,
        x_dot: Option<&mut DVector<f64>>,
        x_ddot: Option<&mut DVector<f64>>,
    ) {
        if let Some(x) = x {
            *x = &self.d + &self.c * t + &self.b * (t * t) + &self.a * (t * t * t);
        }
        if let Some(x_dot) = x_dot {
            *x_dot = &self.c + &self.b * (2.0 * t) + &self.a * (3.0 * t * t);
        }
        if let Some(x_ddot) = x_ddot {
            *x_ddot = &self.b * 2.0 + &self.a * (6.0 * t);
        }
    }

    pub fn eval(&self, t: f64, order: usize) -> SplineResult<DVector<f64>> {
        let mut out = DVector::zeros(self.dimension());
        match order {
            0 => self.eval_into(t, Some(&mut out), None, None),
            1 => self.eval_into(t, None, Some(&mut out), None),
            2 => self.eval_into(t, None, None, Some(&mut out)),
            _ => return Err(SplineError::UnsupportedDerivative(order)),
        }
        Ok(out)
    }
}

/// Sequence of Hermite pieces joined at strictly increasing breakpoints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CubicSpline {
    pieces: Vec<CubicPiece>,
    times: Vec<f64>,
}

impl CubicSpline {
    pub fn new(
        points: &[DVector<f64>],
        velocities: &[DVector<f64>],
        times: &[f64],
    ) -> SplineResult<Self> {
        let mut spline = Self::default();
        spline.set(points, velocities, times)?;
        Ok(spline)
    }

    /// Rebuild from waypoints, velocities and absolute breakpoint times.
    pub fn set(
        &mut self,
        points: &[DVector<f64>],
        velocities: &[DVector<f64>],
        times: &[f64],
    ) -> SplineResult<()> {
        check_waypoints(points, times, true)?;
        if times.len() < 2 {
            return Err(SplineError::TooFewPoints {
                required: 2,
                found: times.len(),
            });
        }
        if velocities.len() != points.len() {
            return Err(SplineError::LengthMismatch {
                points: points.len(),
                times: velocities.len(),
            });
        }
        let pieces = (0..points.len() - 1)
            .map(|k| {
                CubicPiece::new(
                    &points[k],
                    &velocities[k],
                    &points[k + 1],
                    &velocities[k + 1],
                    times[k + 1] - times[k],
                )
            })
            .collect::<SplineResult<Vec<_>>>()?;
        self.pieces = pieces;
        self.times = times.to_vec();
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.pieces.first().map_or(0, |p| p.dimension())
    }

    pub fn pieces(&self) -> &[CubicPiece] {
        &self.pieces
    }

    pub fn breakpoints(&self) -> &[f64] {
        &self.times
    }

    pub fn begin(&self) -> f64 {
        self.times.first().copied().unwrap_or(0.0)
    }

    pub fn end(&self) -> f64 {
        self.times.last().copied().unwrap_or(0.0)
    }

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

    /// Evaluates at absolute time `t`.
    ///
    /// Outside the breakpoints the boundary piece is evaluated at its own
    /// boundary; acceleration there is zero and is only defined when the
    /// curve is at rest.
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

        let outside = if t < self.begin() {
            Some((&self.pieces[0], 0.0))
        } else if t > self.end() {
            let last = &self.pieces[self.pieces.len() - 1];
            Some((last, last.duration))
        } else {
            None
        };

        if let Some((piece, local_t)) = outside {
            let mut vel = DVector::zeros(piece.dimension());
            piece.eval_into(local_t, x, Some(&mut vel), None);
            if let Some(x_ddot) = x_ddot {
                if vel.amax() > REST_TOL {
                    return Err(SplineError::ExtrapolatedAcceleration(t));
                }
                *x_ddot = DVector::zeros(piece.dimension());
            }
            if let Some(x_dot) = x_dot {
                *x_dot = vel;
            }
            return Ok(());
        }

        let rank = self.times.partition_point(|&b| b < t);
        let k = rank.saturating_sub(1).min(self.pieces.len() - 1);
        self.pieces[k].eval_into(t - self.times[k], x, x_dot, x_ddot);
        Ok(())
    }

    pub fn eval_many(&self, ts: &[f64], order: usize) -> SplineResult<Vec<DVector<f64>>> {
        ts.iter().map(|&t| self.eval(t, order)).collect()
    }

    /// Extend with waypoints at times relative to the current end.
    ///
    /// The first new piece starts from the end state of the current curve.
    pub fn append(
        &mut self,
        points: &[DVector<f64>],
        velocities: &[DVector<f64>],
        times: &[f64],
    ) -> SplineResult<()> {
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
        if velocities.len() != points.len() {
            return Err(SplineError::LengthMismatch {
                points: points.len(),
                times: velocities.len(),
            });
        }
        if times[0] < MIN_APPEND_TIME {
            return Err(SplineError::InvalidParameter(times[0]));
        }

        let last = &self.pieces[self.pieces.len() - 1];
        let mut x_end = DVector::zeros(dim);
        let mut v_end = DVector::zeros(dim);
        last.eval_into(last.duration, Some(&mut x_end), Some(&mut v_end), None);

        let t_end = self.end();
        let mut new_pieces = Vec::with_capacity(points.len());
        new_pieces.push(CubicPiece::new(&x_end, &v_end, &points[0], &velocities[0], times[0])?);
        for k in 1..points.len() {
            new_pieces.push(CubicPiece::new(
                &points[k - 1],
                &velocities[k - 1],
                &points[k],
                &velocities[k],
                times[k] - times[k - 1],
            )?);
        }

        self.pieces.extend(new_pieces);
        self.times.extend(times.iter().map(|t| t + t_end));
        tracing::debug!(
            "cubic spline append: {} pieces, end time {}",
            points.len(),
            self.end()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spline::max_abs_diff;

    fn v(values: &[f64]) -> DVector<f64> {
        DVector::from_row_slice(values)
    }

    #[test]
    fn test_smoothstep_piece() {
        let piece = CubicPiece::new(&v(&[0.0]), &v(&[0.0]), &v(&[1.0]), &v(&[0.0]), 1.0).unwrap();
        assert_eq!(piece.eval(0.5, 0).unwrap()[0], 0.5);
        assert_eq!(piece.eval(0.5, 1).unwrap()[0], 1.5);
        assert_eq!(piece.eval(1.0, 1).unwrap()[0], 0.0);
    }

    #[test]
    fn test_piece_hits_boundary_conditions() {
        let x0 = v(&[1.0, -2.0]);
        let v0 = v(&[0.5, 0.0]);
        let x1 = v(&[3.0, 1.0]);
        let v1 = v(&[-1.0, 2.0]);
        let piece = CubicPiece::new(&x0, &v0, &x1, &v1, 1.7).unwrap();
        assert!(max_abs_diff(&piece.eval(0.0, 0).unwrap(), &x0) < 1e-12);
        assert!(max_abs_diff(&piece.eval(0.0, 1).unwrap(), &v0) < 1e-12);
        assert!(max_abs_diff(&piece.eval(1.7, 0).unwrap(), &x1) < 1e-12);
        assert!(max_abs_diff(&piece.eval(1.7, 1).unwrap(), &v1) < 1e-12);
    }

    #[test]
    fn test_piece_rejects_nonpositive_duration() {
        let x = v(&[0.0]);
        assert_eq!(
            CubicPiece::new(&x, &x, &x, &x, 0.0),
            Err(SplineError::InvalidParameter(0.0))
        );
    }

    #[test]
    fn test_spline_is_c1_at_breakpoints() {
        let points = vec![v(&[0.0]), v(&[1.0]), v(&[0.0]), v(&[2.0])];
        let vels = vec![v(&[0.0]), v(&[0.3]), v(&[-0.7]), v(&[0.0])];
        let times = [0.0, 1.0, 2.5, 3.0];
        let s = CubicSpline::new(&points, &vels, &times).unwrap();
        assert_eq!(s.pieces().len(), 3);
        for k in 1..3 {
            let eps = 1e-9;
            let left = s.eval(times[k] - eps, 0).unwrap();
            let right = s.eval(times[k] + eps, 0).unwrap();
            assert!(max_abs_diff(&left, &right) < 1e-7);
            assert!(max_abs_diff(&s.eval(times[k], 0).unwrap(), &points[k]) < 1e-12);
            assert!(max_abs_diff(&s.eval(times[k], 1).unwrap(), &vels[k]) < 1e-12);
        }
    }

    #[test]
    fn test_extrapolation_clamps() {
        let points = vec![v(&[0.0]), v(&[1.0])];
        let vels = vec![v(&[0.0]), v(&[0.0])];
        let s = CubicSpline::new(&points, &vels, &[0.0, 1.0]).unwrap();
        assert_eq!(s.eval(-1.0, 0).unwrap()[0], 0.0);
        assert_eq!(s.eval(5.0, 0).unwrap()[0], 1.0);
        assert_eq!(s.eval(5.0, 2).unwrap()[0], 0.0);
    }

    #[test]
    fn test_extrapolated_acceleration_while_moving() {
        let points = vec![v(&[0.0]), v(&[1.0])];
        let vels = vec![v(&[0.0]), v(&[1.0])];
        let s = CubicSpline::new(&points, &vels, &[0.0, 1.0]).unwrap();
        assert_eq!(
            s.eval(2.0, 2),
            Err(SplineError::ExtrapolatedAcceleration(2.0))
        );
        // position and velocity still clamp
        assert_eq!(s.eval(2.0, 1).unwrap()[0], 1.0);
    }

    #[test]
    fn test_set_requires_two_points() {
        let mut s = CubicSpline::default();
        assert!(matches!(
            s.set(&[v(&[0.0])], &[v(&[0.0])], &[0.0]),
            Err(SplineError::TooFewPoints { .. })
        ));
    }

    #[test]
    fn test_append_continues_from_end_state() {
        let points = vec![v(&[0.0, 0.0]), v(&[1.0, 1.0])];
        let vels = vec![v(&[0.0, 0.0]), v(&[1.0, 0.0])];
        let mut s = CubicSpline::new(&points, &vels, &[0.0, 2.0]).unwrap();
        let before = s.eval(1.3, 0).unwrap();

        let more = vec![v(&[2.0, 1.0]), v(&[3.0, 0.0])];
        let more_vels = vec![v(&[0.5, 0.0]), v(&[0.0, 0.0])];
        s.append(&more, &more_vels, &[1.0, 2.0]).unwrap();

        assert_eq!(s.breakpoints(), &[0.0, 2.0, 3.0, 4.0]);
        assert!(max_abs_diff(&s.eval(1.3, 0).unwrap(), &before) < 1e-12);
        assert!(max_abs_diff(&s.eval(2.0, 1).unwrap(), &vels[1]) < 1e-12);
        assert!(max_abs_diff(&s.eval(3.0, 0).unwrap(), &more[0]) < 1e-12);
        assert!(max_abs_diff(&s.eval(4.0, 0).unwrap(), &more[1]) < 1e-12);
    }

    #[test]
    fn test_append_rejects_zero_first_time() {
        let points = vec![v(&[0.0]), v(&[1.0])];
        let mut s = CubicSpline::new(&points, &points, &[0.0, 1.0]).unwrap();
        assert!(matches!(
            s.append(&points, &points, &[0.0, 1.0]),
            Err(SplineError::InvalidParameter(_))
        ));
    }
}
