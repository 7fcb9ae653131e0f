// src/optim/scalarize.rs
//! Turns an unconstrained feature program into one scalar cost
//! `f = Σ_sos φ² + Σ_linear φ` with gradient and Gauss–Newton Hessian.

use nalgebra::{DMatrix, DVector};

use super::{FeatureKind, Nlp, OptimError, OptimResult, check_len};

/// Borrowing view of an [`Nlp`] as a scalar function.
pub struct ScalarizedProblem<'a, P: Nlp + ?Sized> {
    nlp: &'a P,
}

impl<'a, P: Nlp + ?Sized> ScalarizedProblem<'a, P> {
    /// Fails if the program has constraint features.
    pub fn new(nlp: &'a P) -> OptimResult<Self> {
        for (index, &kind) in nlp.feature_kinds().iter().enumerate() {
            check_kind(index, kind)?;
        }
        Ok(Self { nlp })
    }

    pub fn nlp(&self) -> &P {
        self.nlp
    }

    /// Cost at `x`; gradient `Jᵀ c` and Hessian `Jᵀ diag(h) J (+ f-Hessian)`
    /// are computed only when requested.
    pub fn evaluate(
        &self,
        x: &DVector<f64>,
        grad: Option<&mut DVector<f64>>,
        hessian: Option<&mut DMatrix<f64>>,
    ) -> OptimResult<f64> {
        check_len("decision variables", self.nlp.dimension(), x.len())?;
        let (phi, jacobian) = self.nlp.evaluate(x)?;
        let kinds = self.nlp.feature_kinds();
        check_len("features", kinds.len(), phi.len())?;
        check_len("jacobian rows", phi.len(), jacobian.nrows())?;
        check_len("jacobian columns", x.len(), jacobian.ncols())?;

        let mut cost = 0.0;
        let mut coeff = DVector::zeros(phi.len());
        let mut curvature = DVector::zeros(phi.len());
        let mut has_linear = false;
        for (i, &kind) in kinds.iter().enumerate() {
            match kind {
                FeatureKind::SumOfSquares => {
                    cost += phi[i] * phi[i];
                    coeff[i] = 2.0 * phi[i];
                    curvature[i] = 2.0;
                }
                FeatureKind::Linear => {
                    cost += phi[i];
                    coeff[i] = 1.0;
                    has_linear = true;
                }
                FeatureKind::Inequality | FeatureKind::Equality => {
                    return Err(OptimError::UnsupportedFeature { index: i, kind });
                }
            }
        }

        if let Some(grad) = grad {
            *grad = jacobian.tr_mul(&coeff);
        }
        if let Some(hessian) = hessian {
            let mut weighted = jacobian.clone();
            for (i, mut row) in weighted.row_iter_mut().enumerate() {
                row *= curvature[i];
            }
            *hessian = jacobian.tr_mul(&weighted);
            if has_linear {
                if let Some(f_hessian) = self.nlp.f_hessian(x)? {
                    check_len("f-hessian rows", x.len(), f_hessian.nrows())?;
                    check_len("f-hessian columns", x.len(), f_hessian.ncols())?;
                    *hessian += f_hessian;
                }
            }
        }
        Ok(cost)
    }
}

fn check_kind(index: usize, kind: FeatureKind) -> OptimResult<()> {
    match kind {
        FeatureKind::SumOfSquares | FeatureKind::Linear => Ok(()),
        FeatureKind::Inequality | FeatureKind::Equality => {
            Err(OptimError::UnsupportedFeature { index, kind })
        }
    }
}
