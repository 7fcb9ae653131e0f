// src/optim/mod.rs
//! Feature-based nonlinear programs, their scalarization into a single
//! cost, and a gradient descent solver.

pub mod descent;
pub mod scalarize;
pub mod solver;

pub use crate::config::OptOptions;
pub use descent::{DescentReport, grad_descent};
pub use scalarize::ScalarizedProblem;
pub use solver::{DescentSolver, NlpSolver, SolverOutcome, SolverReturn};

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

/// How a feature enters the problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureKind {
    /// Contributes `φ²` to the cost
    SumOfSquares,
    /// Contributes `φ` to the cost
    Linear,
    /// Constraint `φ <= 0`
    Inequality,
    /// Constraint `φ == 0`
    Equality,
}

#[derive(Debug, Error)]
pub enum OptimError {
    #[error("Feature {index} of kind {kind:?} cannot be scalarized")]
    UnsupportedFeature { index: usize, kind: FeatureKind },
    #[error("Dimension mismatch in {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Cost is not finite ({cost}) after {evals} evaluations")]
    NonFiniteCost { cost: f64, evals: usize },
    #[error("Invalid optimizer options: {0}")]
    InvalidOptions(String),
    #[error("Problem evaluation failed: {0}")]
    Problem(String),
    #[error("Trace file error: {0}")]
    Io(#[from] std::io::Error),
}

impl OptimError {
    pub fn is_invalid_input(&self) -> bool {
        match self {
            OptimError::UnsupportedFeature { .. }
            | OptimError::DimensionMismatch { .. }
            | OptimError::InvalidOptions(_) => true,
            OptimError::NonFiniteCost { .. } | OptimError::Problem(_) | OptimError::Io(_) => false,
        }
    }
}

pub type OptimResult<T> = Result<T, OptimError>;

/// A nonlinear program given as a vector of typed features `φ(x)`.
pub trait Nlp {
    fn dimension(&self) -> usize;

    /// One kind per feature, in feature order.
    fn feature_kinds(&self) -> &[FeatureKind];

    /// Feature values and their Jacobian (`features × dimension`).
    fn evaluate(&self, x: &DVector<f64>) -> OptimResult<(DVector<f64>, DMatrix<f64>)>;

    /// Box bounds `(lower, upper)`; unbounded unless overridden.
    fn bounds(&self) -> (DVector<f64>, DVector<f64>) {
        let n = self.dimension();
        (
            DVector::from_element(n, f64::NEG_INFINITY),
            DVector::from_element(n, f64::INFINITY),
        )
    }

    /// Hessian of the sum of the `Linear` features, if non-zero.
    fn f_hessian(&self, _x: &DVector<f64>) -> OptimResult<Option<DMatrix<f64>>> {
        Ok(None)
    }

    fn initialization(&self) -> DVector<f64> {
        DVector::zeros(self.dimension())
    }
}

fn check_len(what: &'static str, expected: usize, found: usize) -> OptimResult<()> {
    if expected != found {
        return Err(OptimError::DimensionMismatch { what, expected, found });
    }
    Ok(())
}

/// Clip `x` into the bounds of `nlp`.
pub fn bound_clip(nlp: &dyn Nlp, x: &mut DVector<f64>) -> OptimResult<()> {
    let (lo, up) = nlp.bounds();
    check_len("bounds", x.len(), lo.len())?;
    check_len("bounds", x.len(), up.len())?;
    for i in 0..x.len() {
        if lo[i] <= up[i] {
            x[i] = x[i].clamp(lo[i], up[i]);
        }
    }
    Ok(())
}

pub fn check_in_bound(nlp: &dyn Nlp, x: &DVector<f64>) -> OptimResult<bool> {
    let (lo, up) = nlp.bounds();
    check_len("bounds", x.len(), lo.len())?;
    check_len("bounds", x.len(), up.len())?;
    Ok((0..x.len()).all(|i| x[i] >= lo[i] && x[i] <= up[i]))
}

/// Compares the Jacobian of `nlp` at `x` against central differences.
///
/// Returns whether every entry agrees within `tolerance`.
pub fn check_jacobian(nlp: &dyn Nlp, x: &DVector<f64>, tolerance: f64) -> OptimResult<bool> {
    const H: f64 = 1e-6;
    let (phi, jacobian) = nlp.evaluate(x)?;
    check_len("jacobian rows", phi.len(), jacobian.nrows())?;
    check_len("jacobian columns", x.len(), jacobian.ncols())?;

    let mut worst = (0.0, 0, 0);
    let mut shifted = x.clone();
    for j in 0..x.len() {
        shifted[j] = x[j] + H;
        let (up, _) = nlp.evaluate(&shifted)?;
        shifted[j] = x[j] - H;
        let (down, _) = nlp.evaluate(&shifted)?;
        shifted[j] = x[j];
        for i in 0..phi.len() {
            let err = ((up[i] - down[i]) / (2.0 * H) - jacobian[(i, j)]).abs();
            if err > worst.0 {
                worst = (err, i, j);
            }
        }
    }
    if worst.0 > tolerance {
        tracing::warn!(
            "jacobian check failed: error {:e} at feature {} variable {}",
            worst.0,
            worst.1,
            worst.2
        );
        return Ok(false);
    }
    Ok(true)
}

/// Compares the explicit f-Hessian of `nlp` (the Hessian of the sum of its
/// `Linear` features) against central differences of their Jacobian rows.
///
/// A missing f-Hessian counts as zero.
pub fn check_hessian(nlp: &dyn Nlp, x: &DVector<f64>, tolerance: f64) -> OptimResult<bool> {
    const H: f64 = 1e-6;
    let n = x.len();
    check_len("decision variables", nlp.dimension(), n)?;
    let hessian = nlp.f_hessian(x)?.unwrap_or_else(|| DMatrix::zeros(n, n));
    check_len("f-hessian rows", n, hessian.nrows())?;
    check_len("f-hessian columns", n, hessian.ncols())?;

    let kinds = nlp.feature_kinds();
    let linear_gradient = |x: &DVector<f64>| -> OptimResult<DVector<f64>> {
        let (phi, jacobian) = nlp.evaluate(x)?;
        check_len("features", kinds.len(), phi.len())?;
        check_len("jacobian rows", phi.len(), jacobian.nrows())?;
        check_len("jacobian columns", n, jacobian.ncols())?;
        let mut grad = DVector::zeros(n);
        for (i, &kind) in kinds.iter().enumerate() {
            if kind == FeatureKind::Linear {
                grad += jacobian.row(i).transpose();
            }
        }
        Ok(grad)
    };

    let mut worst = (0.0, 0, 0);
    let mut shifted = x.clone();
    for j in 0..n {
        shifted[j] = x[j] + H;
        let up = linear_gradient(&shifted)?;
        shifted[j] = x[j] - H;
        let down = linear_gradient(&shifted)?;
        shifted[j] = x[j];
        for i in 0..n {
            let err = ((up[i] - down[i]) / (2.0 * H) - hessian[(i, j)]).abs();
            if err > worst.0 {
                worst = (err, i, j);
            }
        }
    }
    if worst.0 > tolerance {
        tracing::warn!(
            "f-hessian check failed: error {:e} at entry ({}, {})",
            worst.0,
            worst.1,
            worst.2
        );
        return Ok(false);
    }
    Ok(true)
}
