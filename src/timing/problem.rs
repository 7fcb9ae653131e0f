// src/timing/problem.rs
//! Timing of a waypoint sequence as a feature program.
//!
//! Decision vector: `[ln τ_0 … ln τ_{K−1} ; velocity variables]`. Segment
//! `k` runs from waypoint `k−1` (or the current state for `k = 0`) to
//! waypoint `k`. Every waypoint except the last carries a velocity variable:
//! a free vector, or a scalar speed along a fixed tangent. The last waypoint
//! is reached at rest.

use nalgebra::{DMatrix, DVector};

use super::{TimingError, TimingResult};
use crate::config::TimingConfig;
use crate::optim::{FeatureKind, Nlp, OptimError, OptimResult};
use crate::spline::{FeatureBlock, LeapCost, MaxAcc, MaxVel, Segment, SegmentFeature};

pub struct TimingProblem {
    x0: DVector<f64>,
    v0: DVector<f64>,
    waypoints: Vec<DVector<f64>>,
    /// Unit direction per waypoint with a velocity variable
    tangents: Option<Vec<DVector<f64>>>,
    time_cost: f64,
    ctrl_cost: f64,
    min_duration: f64,
    max_vel: Option<f64>,
    max_acc: Option<f64>,
    kinds: Vec<FeatureKind>,
    init: DVector<f64>,
}

impl TimingProblem {
    pub fn new(
        x0: &DVector<f64>,
        v0: &DVector<f64>,
        waypoints: &[DVector<f64>],
        tangents: Option<&[DVector<f64>]>,
        config: &TimingConfig,
    ) -> TimingResult<Self> {
        if waypoints.is_empty() {
            return Err(TimingError::InvalidInput("no waypoints to time".to_string()));
        }
        let dim = x0.len();
        for v in std::iter::once(v0).chain(waypoints.iter()) {
            if v.len() != dim {
                return Err(TimingError::DimensionMismatch {
                    expected: dim,
                    found: v.len(),
                });
            }
        }
        if let Some(tangents) = tangents {
            if tangents.len() != waypoints.len() - 1 {
                return Err(TimingError::InvalidInput(format!(
                    "expected {} tangents, got {}",
                    waypoints.len() - 1,
                    tangents.len()
                )));
            }
            if let Some(t) = tangents.iter().find(|t| t.len() != dim) {
                return Err(TimingError::DimensionMismatch {
                    expected: dim,
                    found: t.len(),
                });
            }
        }

        let mut problem = Self {
            x0: x0.clone(),
            v0: v0.clone(),
            waypoints: waypoints.to_vec(),
            tangents: tangents.map(|t| t.to_vec()),
            time_cost: config.time_cost,
            ctrl_cost: config.ctrl_cost,
            min_duration: config.min_duration,
            max_vel: config.max_vel,
            max_acc: config.max_acc,
            kinds: Vec::new(),
            init: DVector::zeros(0),
        };
        problem.kinds = problem.build_kinds();
        let durations = vec![config.init_duration; waypoints.len()];
        let velocities = vec![DVector::zeros(dim); waypoints.len()];
        problem.init = problem.encode(&durations, &velocities)?;
        Ok(problem)
    }

    pub fn segments(&self) -> usize {
        self.waypoints.len()
    }

    fn dim(&self) -> usize {
        self.x0.len()
    }

    fn vars_per_velocity(&self) -> usize {
        if self.tangents.is_some() { 1 } else { self.dim() }
    }

    fn build_kinds(&self) -> Vec<FeatureKind> {
        let dim = self.dim();
        let mut kinds = Vec::new();
        for k in 0..self.segments() {
            kinds.push(FeatureKind::Linear);
            kinds.extend(std::iter::repeat_n(FeatureKind::SumOfSquares, LeapCost.rows(dim)));
            if self.max_vel.is_some() && k > 0 {
                kinds.extend(std::iter::repeat_n(FeatureKind::Inequality, MaxVel.rows(dim)));
            }
            if self.max_acc.is_some() {
                kinds.extend(std::iter::repeat_n(FeatureKind::Inequality, MaxAcc.rows(dim)));
            }
        }
        kinds
    }

    /// Warm start from durations and velocities (one per waypoint; the last
    /// velocity is ignored).
    pub fn set_initialization(&mut self, durations: &[f64], velocities: &[DVector<f64>]) -> TimingResult<()> {
        self.init = self.encode(durations, velocities)?;
        Ok(())
    }

    /// Packs durations and velocities into a decision vector. Durations are
    /// floored at `min_duration`; velocities are projected onto tangents.
    pub fn encode(&self, durations: &[f64], velocities: &[DVector<f64>]) -> TimingResult<DVector<f64>> {
        let k_n = self.segments();
        if durations.len() != k_n || velocities.len() != k_n {
            return Err(TimingError::InvalidInput(format!(
                "expected {} durations and velocities, got {} and {}",
                k_n,
                durations.len(),
                velocities.len()
            )));
        }
        let dim = self.dim();
        let per = self.vars_per_velocity();
        let mut x = DVector::zeros(self.dimension());
        for (k, &tau) in durations.iter().enumerate() {
            if !tau.is_finite() {
                return Err(TimingError::InvalidInput(format!("duration {} is {}", k, tau)));
            }
            x[k] = tau.max(self.min_duration).ln();
        }
        for (i, v) in velocities.iter().take(k_n - 1).enumerate() {
            if v.len() != dim {
                return Err(TimingError::DimensionMismatch {
                    expected: dim,
                    found: v.len(),
                });
            }
            match &self.tangents {
                Some(tangents) => x[k_n + i] = tangents[i].dot(v),
                None => x.rows_mut(k_n + i * per, per).copy_from(v),
            }
        }
        Ok(x)
    }

    /// Durations and velocities (with the trailing rest velocity) from a
    /// decision vector.
    pub fn decode(&self, x: &DVector<f64>) -> TimingResult<(Vec<f64>, Vec<DVector<f64>>)> {
        if x.len() != self.dimension() {
            return Err(TimingError::DimensionMismatch {
                expected: self.dimension(),
                found: x.len(),
            });
        }
        let durations = (0..self.segments()).map(|k| x[k].exp()).collect();
        let velocities = (0..self.segments()).map(|i| self.velocity(x, i)).collect();
        Ok((durations, velocities))
    }

    fn velocity(&self, x: &DVector<f64>, i: usize) -> DVector<f64> {
        let k_n = self.segments();
        if i + 1 == k_n {
            return DVector::zeros(self.dim());
        }
        match &self.tangents {
            Some(tangents) => &tangents[i] * x[k_n + i],
            None => x.rows(k_n + i * self.dim(), self.dim()).into_owned(),
        }
    }

    /// Adds `block` (Jacobian w.r.t. the velocity of waypoint `i`) into the
    /// decision-variable Jacobian.
    fn add_velocity_jacobian(&self, jacobian: &mut DMatrix<f64>, row: usize, block: &DMatrix<f64>, i: usize) {
        let k_n = self.segments();
        let rows = block.nrows();
        match &self.tangents {
            Some(tangents) => {
                let mut col = jacobian.view_mut((row, k_n + i), (rows, 1));
                col += block * &tangents[i];
            }
            None => {
                let dim = self.dim();
                let mut view = jacobian.view_mut((row, k_n + i * dim), (rows, dim));
                view += block;
            }
        }
    }

    fn place(
        &self,
        phi: &mut DVector<f64>,
        jacobian: &mut DMatrix<f64>,
        row: usize,
        k: usize,
        tau: f64,
        block: &FeatureBlock,
    ) -> usize {
        let rows = block.values.len();
        phi.rows_mut(row, rows).copy_from(&block.values);
        // d/ds = d/dτ · τ
        let mut col = jacobian.view_mut((row, k), (rows, 1));
        col += &block.d_tau * tau;
        if k > 0 {
            self.add_velocity_jacobian(jacobian, row, &block.d_v0, k - 1);
        }
        if k + 1 < self.segments() {
            self.add_velocity_jacobian(jacobian, row, &block.d_v1, k);
        }
        row + rows
    }
}

fn segment_error(e: crate::spline::SplineError) -> OptimError {
    OptimError::Problem(e.to_string())
}

impl Nlp for TimingProblem {
    fn dimension(&self) -> usize {
        self.segments() + (self.segments() - 1) * self.vars_per_velocity()
    }

    fn feature_kinds(&self) -> &[FeatureKind] {
        &self.kinds
    }

    fn evaluate(&self, x: &DVector<f64>) -> OptimResult<(DVector<f64>, DMatrix<f64>)> {
        if x.len() != self.dimension() {
            return Err(OptimError::DimensionMismatch {
                what: "timing variables",
                expected: self.dimension(),
                found: x.len(),
            });
        }
        let k_n = self.segments();
        let taus: Vec<f64> = (0..k_n).map(|k| x[k].exp()).collect();
        let velocities: Vec<DVector<f64>> = (0..k_n).map(|i| self.velocity(x, i)).collect();

        let mut phi = DVector::zeros(self.kinds.len());
        let mut jacobian = DMatrix::zeros(self.kinds.len(), self.dimension());
        let ctrl_scale = self.ctrl_cost.sqrt();
        let mut row = 0;
        for k in 0..k_n {
            let (start, start_vel) = if k == 0 {
                (&self.x0, &self.v0)
            } else {
                (&self.waypoints[k - 1], &velocities[k - 1])
            };
            let segment = Segment {
                x0: start,
                v0: start_vel,
                x1: &self.waypoints[k],
                v1: &velocities[k],
                tau: taus[k],
            };

            phi[row] = self.time_cost * taus[k];
            jacobian[(row, k)] = self.time_cost * taus[k];
            row += 1;

            let mut leap = LeapCost.eval(&segment).map_err(segment_error)?;
            leap.scale(ctrl_scale);
            row = self.place(&mut phi, &mut jacobian, row, k, taus[k], &leap);

            if let Some(limit) = self.max_vel.filter(|_| k > 0) {
                let mut vel = MaxVel.eval(&segment).map_err(segment_error)?;
                vel.scale(1.0 / limit);
                vel.values.add_scalar_mut(-1.0);
                row = self.place(&mut phi, &mut jacobian, row, k, taus[k], &vel);
            }
            if let Some(limit) = self.max_acc {
                let mut acc = MaxAcc.eval(&segment).map_err(segment_error)?;
                acc.scale(1.0 / limit);
                acc.values.add_scalar_mut(-1.0);
                row = self.place(&mut phi, &mut jacobian, row, k, taus[k], &acc);
            }
        }
        debug_assert_eq!(row, self.kinds.len());
        Ok((phi, jacobian))
    }

    fn f_hessian(&self, x: &DVector<f64>) -> OptimResult<Option<DMatrix<f64>>> {
        let mut hessian = DMatrix::zeros(self.dimension(), self.dimension());
        for k in 0..self.segments() {
            hessian[(k, k)] = self.time_cost * x[k].exp();
        }
        Ok(Some(hessian))
    }

    fn initialization(&self) -> DVector<f64> {
        self.init.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optim::{ScalarizedProblem, check_hessian, check_jacobian};

    fn v(values: &[f64]) -> DVector<f64> {
        DVector::from_row_slice(values)
    }

    fn waypoints() -> Vec<DVector<f64>> {
        vec![v(&[1.0, 0.0]), v(&[1.0, 1.0]), v(&[0.0, 2.0])]
    }

    fn sample_point(problem: &TimingProblem) -> DVector<f64> {
        DVector::from_fn(problem.dimension(), |i, _| 0.1 + 0.07 * i as f64 - 0.2 * (i % 2) as f64)
    }

    #[test]
    fn test_layout_free_velocities() {
        let config = TimingConfig::default();
        let problem = TimingProblem::new(&v(&[0.0, 0.0]), &v(&[0.0, 0.0]), &waypoints(), None, &config).unwrap();
        // 3 log-durations + 2 free 2-d velocities
        assert_eq!(problem.dimension(), 7);
        // per segment: 1 time + 4 leap rows
        assert_eq!(problem.feature_kinds().len(), 15);
        assert_eq!(problem.feature_kinds()[0], FeatureKind::Linear);
        assert_eq!(problem.feature_kinds()[1], FeatureKind::SumOfSquares);
    }

    #[test]
    fn test_jacobian_free_velocities() {
        let config = TimingConfig {
            ctrl_cost: 0.3,
            ..TimingConfig::default()
        };
        let problem =
            TimingProblem::new(&v(&[0.0, 0.0]), &v(&[0.2, -0.1]), &waypoints(), None, &config).unwrap();
        assert!(check_jacobian(&problem, &sample_point(&problem), 1e-5).unwrap());
    }

    #[test]
    fn test_jacobian_tangent_velocities_with_limits() {
        let config = TimingConfig {
            max_vel: Some(2.0),
            max_acc: Some(5.0),
            ..TimingConfig::default()
        };
        let tangents = vec![v(&[0.0, 1.0]), v(&[-0.6, 0.8])];
        let problem = TimingProblem::new(
            &v(&[0.0, 0.0]),
            &v(&[0.5, 0.0]),
            &waypoints(),
            Some(&tangents),
            &config,
        )
        .unwrap();
        assert_eq!(problem.dimension(), 5);
        let ineq = problem
            .feature_kinds()
            .iter()
            .filter(|k| **k == FeatureKind::Inequality)
            .count();
        // max-vel on segments 1 and 2, max-acc on all three
        assert_eq!(ineq, 2 * 4 + 3 * 8);
        assert!(check_jacobian(&problem, &sample_point(&problem), 1e-5).unwrap());
    }

    #[test]
    fn test_f_hessian_matches_time_cost_curvature() {
        let config = TimingConfig {
            time_cost: 1.7,
            ..TimingConfig::default()
        };
        let problem = TimingProblem::new(
            &v(&[0.0, 0.0]),
            &v(&[0.0, 0.0]),
            &waypoints()[..2],
            None,
            &config,
        )
        .unwrap();
        assert_eq!(problem.dimension(), 4);
        let x = DVector::from_row_slice(&[0.0, 0.1, 0.3, -0.2]);
        let hessian = problem.f_hessian(&x).unwrap().unwrap();
        assert!((hessian[(0, 0)] - 1.7).abs() < 1e-12);
        assert!((hessian[(1, 1)] - 1.7 * 0.1f64.exp()).abs() < 1e-12);
        assert_eq!(hessian.fixed_view::<2, 2>(2, 2).sum(), 0.0);
        assert_eq!(hessian[(0, 1)], 0.0);
        assert!(check_hessian(&problem, &x, 1e-6).unwrap());
        assert!(check_hessian(&problem, &sample_point(&problem), 1e-6).unwrap());
    }

    #[test]
    fn test_single_segment_cost() {
        let config = TimingConfig {
            time_cost: 2.0,
            ctrl_cost: 0.5,
            ..TimingConfig::default()
        };
        let x0 = v(&[0.0]);
        let v0 = v(&[1.0]);
        let problem = TimingProblem::new(&x0, &v0, &[v(&[3.0])], None, &config).unwrap();
        assert_eq!(problem.dimension(), 1);

        let tau: f64 = 1.5;
        let x = DVector::from_element(1, tau.ln());
        let scalar = ScalarizedProblem::new(&problem).unwrap();
        let cost = scalar.evaluate(&x, None, None).unwrap();
        let d = 3.0 - 0.5 * tau * 1.0;
        let vel = -1.0;
        let expected = 2.0 * tau + 0.5 * (12.0 * d * d / tau.powi(3) + vel * vel / tau);
        assert!((cost - expected).abs() < 1e-12);
    }

    #[test]
    fn test_encode_decode() {
        let config = TimingConfig::default();
        let problem = TimingProblem::new(&v(&[0.0, 0.0]), &v(&[0.0, 0.0]), &waypoints(), None, &config).unwrap();
        let durations = vec![0.5, 2.0, 1e-6];
        let velocities = vec![v(&[1.0, 0.5]), v(&[-1.0, 0.0]), v(&[9.0, 9.0])];
        let x = problem.encode(&durations, &velocities).unwrap();
        let (taus, vels) = problem.decode(&x).unwrap();
        assert!((taus[0] - 0.5).abs() < 1e-12);
        assert!((taus[1] - 2.0).abs() < 1e-12);
        // floored at min_duration
        assert!((taus[2] - config.min_duration).abs() < 1e-12);
        assert_eq!(vels[0], velocities[0]);
        assert_eq!(vels[2], DVector::zeros(2));
    }

    #[test]
    fn test_rejects_mismatched_tangents() {
        let config = TimingConfig::default();
        let tangents = vec![v(&[1.0, 0.0])];
        let result = TimingProblem::new(
            &v(&[0.0, 0.0]),
            &v(&[0.0, 0.0]),
            &waypoints(),
            Some(&tangents),
            &config,
        );
        assert!(matches!(result, Err(TimingError::InvalidInput(_))));
    }
}
