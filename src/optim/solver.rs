// src/optim/solver.rs
//! Solver seam: anything that can take an [`Nlp`] from an initial point and
//! dual estimate to a solution.

use nalgebra::DVector;

use super::{Nlp, OptOptions, OptimError, OptimResult, ScalarizedProblem, bound_clip, grad_descent};

/// Summary handed back to callers of a solve.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverReturn {
    pub converged: bool,
    pub iterations: usize,
    pub evals: usize,
    pub cost: f64,
}

#[derive(Debug, Clone)]
pub struct SolverOutcome {
    pub x: DVector<f64>,
    /// Dual estimate to warm-start the next solve
    pub dual: DVector<f64>,
    pub report: SolverReturn,
}

pub trait NlpSolver {
    fn solve(
        &mut self,
        nlp: &dyn Nlp,
        x_init: &DVector<f64>,
        dual: &DVector<f64>,
    ) -> OptimResult<SolverOutcome>;
}

/// Gradient descent on the scalarized cost. Handles `SumOfSquares` and
/// `Linear` features only; the dual is passed through unchanged.
#[derive(Debug, Clone, Default)]
pub struct DescentSolver {
    pub options: OptOptions,
}

impl DescentSolver {
    pub fn new(options: OptOptions) -> Self {
        Self { options }
    }
}

impl NlpSolver for DescentSolver {
    fn solve(
        &mut self,
        nlp: &dyn Nlp,
        x_init: &DVector<f64>,
        dual: &DVector<f64>,
    ) -> OptimResult<SolverOutcome> {
        if x_init.len() != nlp.dimension() {
            return Err(OptimError::DimensionMismatch {
                what: "initial point",
                expected: nlp.dimension(),
                found: x_init.len(),
            });
        }
        let problem = ScalarizedProblem::new(nlp)?;
        let mut x = x_init.clone();
        bound_clip(nlp, &mut x)?;

        let report = grad_descent(
            &mut x,
            |x, grad| problem.evaluate(x, Some(grad), None),
            &self.options,
        )?;
        tracing::debug!(
            "descent solver: cost {} in {} evals ({} iterations)",
            report.cost,
            report.evals,
            report.iterations
        );
        Ok(SolverOutcome {
            x,
            dual: dual.clone(),
            report: SolverReturn {
                converged: report.converged,
                iterations: report.iterations,
                evals: report.evals,
                cost: report.cost,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optim::FeatureKind;
    use nalgebra::DMatrix;

    /// Rosenbrock-free bowl: φ = [x0 − 1 ; 2(x1 + 1)] plus linear 0.1·x0.
    struct Bowl {
        kinds: Vec<FeatureKind>,
    }

    impl Nlp for Bowl {
        fn dimension(&self) -> usize {
            2
        }
        fn feature_kinds(&self) -> &[FeatureKind] {
            &self.kinds
        }
        fn evaluate(&self, x: &DVector<f64>) -> OptimResult<(DVector<f64>, DMatrix<f64>)> {
            let phi = DVector::from_row_slice(&[x[0] - 1.0, 2.0 * (x[1] + 1.0), 0.1 * x[0]]);
            let jacobian = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 0.0, 2.0, 0.1, 0.0]);
            Ok((phi, jacobian))
        }
        fn bounds(&self) -> (DVector<f64>, DVector<f64>) {
            (DVector::from_element(2, -5.0), DVector::from_element(2, 5.0))
        }
    }

    fn bowl() -> Bowl {
        Bowl {
            kinds: vec![
                FeatureKind::SumOfSquares,
                FeatureKind::SumOfSquares,
                FeatureKind::Linear,
            ],
        }
    }

    #[test]
    fn test_descent_solver_finds_minimum() {
        let mut solver = DescentSolver::new(OptOptions {
            stop_tolerance: 1e-7,
            stop_evals: 20000,
            max_step: 0.0,
            ..OptOptions::default()
        });
        let dual = DVector::from_element(1, 0.5);
        let outcome = solver
            .solve(&bowl(), &DVector::from_row_slice(&[9.0, 3.0]), &dual)
            .unwrap();
        // d/dx0: 2(x0 − 1) + 0.1 = 0
        assert!((outcome.x[0] - 0.95).abs() < 1e-4);
        assert!((outcome.x[1] + 1.0).abs() < 1e-4);
        assert_eq!(outcome.dual, dual);
        assert!(outcome.report.converged);
    }

    #[test]
    fn test_descent_solver_checks_dimension() {
        let mut solver = DescentSolver::default();
        let err = solver
            .solve(&bowl(), &DVector::zeros(3), &DVector::zeros(0))
            .unwrap_err();
        assert!(matches!(err, OptimError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_descent_solver_rejects_constraints() {
        let mut nlp = bowl();
        nlp.kinds[2] = FeatureKind::Equality;
        let err = DescentSolver::default()
            .solve(&nlp, &DVector::zeros(2), &DVector::zeros(0))
            .unwrap_err();
        assert!(matches!(err, OptimError::UnsupportedFeature { index: 2, .. }));
    }
}
