// src/optim/descent.rs
//! Normalized steepest descent with multiplicative step adaptation.

use std::fs::File;
use std::io::{BufWriter, Write};

use nalgebra::DVector;

use super::{OptOptions, OptimError, OptimResult};

const STEP_INC: f64 = 1.2;
const STEP_DEC: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct DescentReport {
    /// Cost evaluations, including the initial one
    pub evals: usize,
    pub iterations: usize,
    /// Cost at the returned point
    pub cost: f64,
    /// Stopped on a short step or a zero gradient rather than a budget
    pub converged: bool,
}

/// Minimizes `f` starting from `x`, leaving the best point found in `x`.
///
/// `f(x, grad)` returns the cost and writes the gradient into `grad`. Each
/// iteration tries `y = x − a ĝ` along the normalized gradient; an
/// improvement is accepted and grows `a` by 1.2 (capped at `max_step` when
/// positive), otherwise `a` is halved. Stops when an accepted step is
/// shorter than `stop_tolerance` or a budget runs out.
pub fn grad_descent<F>(x: &mut DVector<f64>, mut f: F, options: &OptOptions) -> OptimResult<DescentReport>
where
    F: FnMut(&DVector<f64>, &mut DVector<f64>) -> OptimResult<f64>,
{
    if !(options.init_step > 0.0) || !options.init_step.is_finite() {
        return Err(OptimError::InvalidOptions(format!(
            "init_step must be positive, got {}",
            options.init_step
        )));
    }

    let mut trace = if options.verbose > 0 {
        Some(BufWriter::new(File::create(&options.trace_path)?))
    } else {
        None
    };

    let n = x.len();
    let mut a = options.init_step;
    let mut grad_x = DVector::zeros(n);
    let mut grad_y = DVector::zeros(n);

    let mut fx = f(x, &mut grad_x)?;
    let mut evals = 1;
    if !fx.is_finite() {
        return Err(OptimError::NonFiniteCost { cost: fx, evals });
    }
    if let Some(out) = trace.as_mut() {
        write_trace(out, 0, fx, a, x)?;
    }

    let mut iterations = 0;
    let mut converged = false;
    let norm = grad_x.norm();
    if norm == 0.0 {
        converged = true;
    } else {
        grad_x /= norm;
    }

    while !converged {
        if options.stop_evals > 0 && evals >= options.stop_evals {
            break;
        }
        if options.stop_iters > 0 && iterations >= options.stop_iters {
            break;
        }
        iterations += 1;

        let y = &*x - &grad_x * a;
        let fy = f(&y, &mut grad_y)?;
        evals += 1;
        if !fy.is_finite() {
            return Err(OptimError::NonFiniteCost { cost: fy, evals });
        }

        let accept = fy <= fx;
        if options.verbose > 1 {
            tracing::debug!(
                "grad_descent {} probing f(y)={} |grad|={} a={} {}",
                evals,
                fy,
                grad_y.norm(),
                a,
                if accept { "ACCEPT" } else { "reject" }
            );
        }

        if accept {
            let step = (&*x - &y).norm();
            *x = y;
            fx = fy;
            a *= STEP_INC;
            if options.max_step > 0.0 && a > options.max_step {
                a = options.max_step;
            }
            if let Some(out) = trace.as_mut() {
                write_trace(out, evals, fx, a, x)?;
            }
            let norm = grad_y.norm();
            if norm == 0.0 || step < options.stop_tolerance {
                converged = true;
            } else {
                grad_x = &grad_y / norm;
            }
        } else {
            a *= STEP_DEC;
        }
    }

    if let Some(mut out) = trace {
        out.flush()?;
    }
    tracing::debug!(
        "grad_descent finished: cost {} after {} evals, converged {}",
        fx,
        evals,
        converged
    );
    Ok(DescentReport {
        evals,
        iterations,
        cost: fx,
        converged,
    })
}

fn write_trace(out: &mut impl Write, evals: usize, cost: f64, step: f64, x: &DVector<f64>) -> std::io::Result<()> {
    write!(out, "{} {} {}", evals, cost, step)?;
    for v in x.iter() {
        write!(out, " {}", v)?;
    }
    writeln!(out)
}
