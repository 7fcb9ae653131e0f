// src/spline/path.rs
//! Geometric path over the normalized parameter `[0, 1]` that can be
//! reshaped online while it is being followed.

use nalgebra::DVector;

use super::{Spline, SplineError, SplineResult, uniform_grid};

const PATH_DEGREE: usize = 3;

/// Cubic B-spline through points at uniform parameters in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    spline: Spline,
}

impl Path {
    pub fn new(points: &[DVector<f64>]) -> SplineResult<Self> {
        let times = uniform_grid(points.len());
        Ok(Self {
            spline: Spline::new(PATH_DEGREE, points, &times)?,
        })
    }

    pub fn spline(&self) -> &Spline {
        &self.spline
    }

    pub fn position(&self, t: f64) -> SplineResult<DVector<f64>> {
        self.spline.eval(t, 0)
    }

    pub fn velocity(&self, t: f64) -> SplineResult<DVector<f64>> {
        self.spline.eval(t, 1)
    }

    /// Shift so the point at `t` becomes `current` while the end stays put.
    /// Control point `i` moves by `(1 − t_i)/(1 − t) · Δ`.
    pub fn transform_current_becomes_end_fixed(&mut self, current: &DVector<f64>, t: f64) -> SplineResult<()> {
        let delta = self.offset_to(current, t)?;
        self.shift(|ti| (1.0 - ti) / (1.0 - t), &delta);
        Ok(())
    }

    /// Move the end to `end` while the point at `t` stays put.
    /// Control point `i` moves by `(t_i − t)/(1 − t) · Δ`.
    pub fn transform_current_fixed_end_becomes(&mut self, end: &DVector<f64>, t: f64) -> SplineResult<()> {
        check_param(t)?;
        self.check_dim(end)?;
        let delta = end - self.spline.eval(1.0, 0)?;
        self.shift(|ti| (ti - t) / (1.0 - t), &delta);
        Ok(())
    }

    /// Translate the whole path so the point at `t` becomes `current`.
    pub fn transform_current_becomes_all_follow(&mut self, current: &DVector<f64>, t: f64) -> SplineResult<()> {
        let delta = self.offset_to(current, t)?;
        self.shift(|_| 1.0, &delta);
        Ok(())
    }

    fn offset_to(&self, target: &DVector<f64>, t: f64) -> SplineResult<DVector<f64>> {
        check_param(t)?;
        self.check_dim(target)?;
        Ok(target - self.spline.eval(t, 0)?)
    }

    fn check_dim(&self, v: &DVector<f64>) -> SplineResult<()> {
        if v.len() != self.spline.dimension() {
            return Err(SplineError::DimensionMismatch {
                expected: self.spline.dimension(),
                found: v.len(),
            });
        }
        Ok(())
    }

    fn shift(&mut self, weight: impl Fn(f64) -> f64, delta: &DVector<f64>) {
        let n = self.spline.control_points.len();
        for (i, cp) in self.spline.control_points.iter_mut().enumerate() {
            let ti = i as f64 / (n - 1) as f64;
            cp.axpy(weight(ti), delta, 1.0);
        }
    }
}

fn check_param(t: f64) -> SplineResult<()> {
    if !t.is_finite() || t >= 1.0 {
        return Err(SplineError::InvalidParameter(t));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spline::max_abs_diff;

    fn square_path() -> Path {
        let points: Vec<_> = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 2.0]]
            .iter()
            .map(|p| DVector::from_row_slice(p))
            .collect();
        Path::new(&points).unwrap()
    }

    #[test]
    fn test_path_spans_unit_interval() {
        let path = square_path();
        assert_eq!(path.spline().begin(), 0.0);
        assert_eq!(path.spline().end(), 1.0);
        assert_eq!(path.position(1.0).unwrap(), DVector::from_row_slice(&[0.0, 2.0]));
    }

    #[test]
    fn test_current_becomes_end_fixed() {
        let mut path = square_path();
        let end = path.position(1.0).unwrap();
        let current = DVector::from_row_slice(&[0.2, -0.1]);
        path.transform_current_becomes_end_fixed(&current, 0.0).unwrap();
        assert!(max_abs_diff(&path.position(0.0).unwrap(), &current) < 1e-12);
        assert!(max_abs_diff(&path.position(1.0).unwrap(), &end) < 1e-12);
    }

    #[test]
    fn test_current_fixed_end_becomes() {
        let mut path = square_path();
        let start = path.position(0.0).unwrap();
        let end = DVector::from_row_slice(&[3.0, 3.0]);
        path.transform_current_fixed_end_becomes(&end, 0.0).unwrap();
        assert!(max_abs_diff(&path.position(0.0).unwrap(), &start) < 1e-12);
        assert!(max_abs_diff(&path.position(1.0).unwrap(), &end) < 1e-12);
    }

    #[test]
    fn test_all_follow_translates() {
        let mut path = square_path();
        let before = path.position(0.3).unwrap();
        let current = DVector::from_row_slice(&[5.0, 5.0]);
        path.transform_current_becomes_all_follow(&current, 0.3).unwrap();
        assert!(max_abs_diff(&path.position(0.3).unwrap(), &current) < 1e-12);
        let shift = &current - &before;
        let end = DVector::from_row_slice(&[0.0, 2.0]) + shift;
        assert!(max_abs_diff(&path.position(1.0).unwrap(), &end) < 1e-12);
    }

    #[test]
    fn test_parameter_at_end_rejected() {
        let mut path = square_path();
        let x = DVector::from_row_slice(&[0.0, 0.0]);
        assert_eq!(
            path.transform_current_becomes_end_fixed(&x, 1.0),
            Err(SplineError::InvalidParameter(1.0))
        );
        assert!(matches!(
            path.transform_current_fixed_end_becomes(&x, f64::NAN),
            Err(SplineError::InvalidParameter(_))
        ));
    }
}
