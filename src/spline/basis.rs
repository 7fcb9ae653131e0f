// src/spline/basis.rs
//! Cox–de Boor recursion for B-spline basis weights and their first two
//! time derivatives.

/// Division that yields 0 for a zero denominator (degenerate knot spans).
#[inline]
pub(crate) fn zdiv(num: f64, den: f64) -> f64 {
    if den == 0.0 { 0.0 } else { num / den }
}

/// Basis weights (and optionally derivatives) at `t`.
///
/// Carries the order-0 to order-`degree` recursion over `n` basis functions
/// supported by `knots`, where `knots.len() == n + degree + 1`. The first
/// function absorbs every `t` before the first knot and the last one every
/// `t` at or after its own knot, so the end of the domain evaluates to the
/// last control point.
///
/// Outputs are resized to `n`; derivative outputs are only touched when
/// requested.
pub(crate) fn cox_de_boor(
    t: f64,
    degree: usize,
    knots: &[f64],
    n: usize,
    b: &mut Vec<f64>,
    mut db: Option<&mut Vec<f64>>,
    mut ddb: Option<&mut Vec<f64>>,
) {
    debug_assert_eq!(knots.len(), n + degree + 1);

    b.clear();
    b.resize(n, 0.0);
    if let Some(db) = db.as_deref_mut() {
        db.clear();
        db.resize(n, 0.0);
    }
    if let Some(ddb) = ddb.as_deref_mut() {
        ddb.clear();
        ddb.resize(n, 0.0);
    }
    if n == 0 {
        return;
    }

    let want_d = db.is_some() || ddb.is_some();
    let want_dd = ddb.is_some();
    let mut d1 = vec![0.0; if want_d { n } else { 0 }];
    let mut d2 = vec![0.0; if want_dd { n } else { 0 }];

    let last = knots.len() - 1;
    let mut b_prev = vec![0.0; n];
    let mut d1_prev = vec![0.0; d1.len()];
    let mut d2_prev = vec![0.0; d2.len()];

    for p in 0..=degree {
        std::mem::swap(b, &mut b_prev);
        std::mem::swap(&mut d1, &mut d1_prev);
        std::mem::swap(&mut d2, &mut d2_prev);
        b.iter_mut().for_each(|v| *v = 0.0);
        d1.iter_mut().for_each(|v| *v = 0.0);
        d2.iter_mut().for_each(|v| *v = 0.0);

        for k in 0..n {
            if p == 0 {
                let inside = (k == 0 && t < knots[0])
                    || (k == n - 1 && t >= knots[k])
                    || (knots[k] <= t && t < knots[k + 1]);
                if inside {
                    b[k] = 1.0;
                }
                continue;
            }

            if k + p < knots.len() {
                let xden = knots[k + p] - knots[k];
                let x = zdiv(t - knots[k], xden);
                b[k] = x * b_prev[k];
                if want_d {
                    d1[k] = zdiv(1.0, xden) * b_prev[k] + x * d1_prev[k];
                }
                if want_dd {
                    d2[k] = zdiv(2.0, xden) * d1_prev[k] + x * d2_prev[k];
                }
            }
            if k + 1 < n && k + p + 1 < knots.len() {
                let yden = knots[k + p + 1] - knots[k + 1];
                let y = zdiv(knots[k + p + 1] - t, yden);
                b[k] += y * b_prev[k + 1];
                if want_d {
                    d1[k] += zdiv(-1.0, yden) * b_prev[k + 1] + y * d1_prev[k + 1];
                }
                if want_dd {
                    d2[k] += zdiv(-2.0, yden) * d1_prev[k + 1] + y * d2_prev[k + 1];
                }
            }
        }

        // outside the domain the clamped end weights are final
        if t < knots[0] || t >= knots[last] {
            break;
        }
    }

    if let Some(db) = db {
        db.copy_from_slice(&d1);
    }
    if let Some(ddb) = ddb {
        ddb.copy_from_slice(&d2);
    }
}
