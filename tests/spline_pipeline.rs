// Integration tests for the spline engines used together

#[cfg(test)]
mod tests {
    use nalgebra::DVector;
    use rand::Rng;
    use trajopt_rs::spline::{CubicSpline, LeapCost, Path, Segment, SegmentFeature, Spline};

    fn random_points(n: usize, dim: usize) -> Vec<DVector<f64>> {
        let mut rng = rand::rng();
        (0..n)
            .map(|_| DVector::from_fn(dim, |_, _| rng.random_range(-5.0..5.0)))
            .collect()
    }

    fn close(a: &DVector<f64>, b: &DVector<f64>, tol: f64) -> bool {
        (a - b).amax() <= tol
    }

    #[test]
    fn test_streamed_appends_match_batch_build() {
        for degree in [2, 3, 4] {
            let points = random_points(9, 3);
            let times: Vec<f64> = (0..9).map(|i| 0.5 * i as f64).collect();
            let batch = Spline::new(degree, &points, &times).unwrap();

            let mut streamed = Spline::new(degree, &points[..5], &times[..5]).unwrap();
            streamed.append(&points[5..7], &[0.5, 1.0]).unwrap();
            streamed.append(&points[7..], &[0.5, 1.0]).unwrap();

            assert_eq!(streamed.knots(), batch.knots(), "degree {}", degree);
            let ts: Vec<f64> = (0..=40).map(|i| 0.1 * i as f64).collect();
            let a = streamed.eval_many(&ts, 1).unwrap();
            let b = batch.eval_many(&ts, 1).unwrap();
            for (x, y) in a.iter().zip(&b) {
                assert!(close(x, y, 1e-12));
            }
        }
    }

    #[test]
    fn test_random_partition_of_unity() {
        let mut rng = rand::rng();
        for degree in 1..=5 {
            let points = random_points(8, 1);
            let times: Vec<f64> = (0..8).map(|i| i as f64 * 0.7).collect();
            let s = Spline::new(degree, &points, &times).unwrap();
            for _ in 0..50 {
                let t = rng.random_range(s.begin()..s.end());
                let b = s.basis(t, 0).unwrap();
                assert!((b.sum() - 1.0).abs() < 1e-12, "degree {} t {}", degree, t);
                assert!(b.iter().all(|&w| w >= -1e-15));
            }
        }
    }

    #[test]
    fn test_velocity_waypoints_feed_hermite_curve() {
        let points = vec![
            DVector::from_row_slice(&[0.0, 0.0]),
            DVector::from_row_slice(&[1.0, 0.5]),
            DVector::from_row_slice(&[2.0, 2.0]),
            DVector::from_row_slice(&[4.0, 2.0]),
        ];
        let vels = vec![
            DVector::from_row_slice(&[0.0, 0.0]),
            DVector::from_row_slice(&[1.0, 1.0]),
            DVector::from_row_slice(&[1.5, 0.0]),
            DVector::from_row_slice(&[0.0, 0.0]),
        ];
        let times = [0.0, 1.0, 2.0, 3.5];

        let mut quadratic = Spline::default();
        quadratic.set_vel(2, &points, &vels, &times).unwrap();
        let hermite = CubicSpline::new(&points, &vels, &times).unwrap();

        // both interpolate position and velocity at interior waypoints
        for i in 1..3 {
            let q = quadratic.eval(times[i], 0).unwrap();
            let h = hermite.eval(times[i], 0).unwrap();
            assert!(close(&q, &h, 1e-12));
            let qv = quadratic.eval(times[i], 1).unwrap();
            let hv = hermite.eval(times[i], 1).unwrap();
            assert!(close(&qv, &hv, 1e-12));
        }
    }

    #[test]
    fn test_leap_cost_bounds_hermite_effort() {
        // the Hermite piece is the minimum-effort curve for its boundary
        // conditions, and its effort equals the squared leap cost
        let x0 = DVector::from_row_slice(&[0.0]);
        let v0 = DVector::from_row_slice(&[0.5]);
        let x1 = DVector::from_row_slice(&[2.0]);
        let v1 = DVector::from_row_slice(&[0.0]);
        let tau = 1.6;
        let hermite = CubicSpline::new(&[x0.clone(), x1.clone()], &[v0.clone(), v1.clone()], &[0.0, tau]).unwrap();
        let segment = Segment { x0: &x0, v0: &v0, x1: &x1, v1: &v1, tau };
        let leap = LeapCost.eval(&segment).unwrap().values.norm_squared();

        // acceleration is linear on the piece, so Simpson's rule is exact
        let acc = |t: f64| hermite.eval(t, 2).unwrap()[0];
        let effort = tau / 6.0 * (acc(0.0).powi(2) + 4.0 * acc(tau / 2.0).powi(2) + acc(tau).powi(2));
        assert!((leap - effort).abs() < 1e-9);
    }

    #[test]
    fn test_path_reshaped_while_followed() {
        let points = random_points(6, 2);
        let mut path = Path::new(&points).unwrap();
        let end = path.position(1.0).unwrap();

        let mut t = 0.0;
        for _ in 0..5 {
            let mut drifted = path.position(t).unwrap();
            drifted[0] += 0.01;
            path.transform_current_becomes_all_follow(&drifted, t).unwrap();
            assert!(close(&path.position(t).unwrap(), &drifted, 1e-12));
            t += 0.15;
        }
        let shifted_end = path.position(1.0).unwrap();
        assert!((shifted_end[0] - end[0] - 0.05).abs() < 1e-12);
        assert!((shifted_end[1] - end[1]).abs() < 1e-12);

        let goal = DVector::from_row_slice(&[10.0, -10.0]);
        path.transform_current_fixed_end_becomes(&goal, 0.0).unwrap();
        assert!(close(&path.position(1.0).unwrap(), &goal, 1e-12));
    }
}
