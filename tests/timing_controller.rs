// Integration tests for the timing controller driven from configuration

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io::Write;
    use std::rc::Rc;

    use nalgebra::DVector;
    use tempfile::tempdir;
    use trajopt_rs::config::{Config, TimingConfig, load_config};
    use trajopt_rs::optim::{Nlp, NlpSolver, OptimResult, SolverOutcome, SolverReturn};
    use trajopt_rs::timing::TimingMpc;

    fn v(values: &[f64]) -> DVector<f64> {
        DVector::from_row_slice(values)
    }

    fn corner() -> Vec<DVector<f64>> {
        vec![v(&[1.0, 0.0]), v(&[1.0, 1.0]), v(&[0.0, 1.0])]
    }

    /// Returns the initial point untouched and records the dual it was given.
    struct EchoSolver {
        seen_duals: Rc<RefCell<Vec<usize>>>,
    }

    impl NlpSolver for EchoSolver {
        fn solve(
            &mut self,
            nlp: &dyn Nlp,
            x_init: &DVector<f64>,
            dual: &DVector<f64>,
        ) -> OptimResult<SolverOutcome> {
            self.seen_duals.borrow_mut().push(dual.len());
            Ok(SolverOutcome {
                x: x_init.clone(),
                dual: DVector::from_element(nlp.feature_kinds().len(), 0.25),
                report: SolverReturn {
                    converged: true,
                    iterations: 0,
                    evals: 0,
                    cost: 0.0,
                },
            })
        }
    }

    #[test]
    fn test_controller_from_config_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("timing.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[optimizer]\nstop_evals = 400\n\n[timing]\ntime_cost = 2.0\nuse_next_waypoint_tangent = true\n\n[simulation]\nwaypoints = [[2.0, 0.0], [2.0, 2.0]]"
        )
        .unwrap();

        let config = load_config(path.to_str().unwrap()).unwrap();
        assert_eq!(config.timing.time_cost, 2.0);
        let waypoints: Vec<_> = config.simulation.waypoints.iter().map(|w| v(w)).collect();
        let mut mpc = TimingMpc::with_config(waypoints, &config).unwrap();
        let report = mpc.solve(&v(&[0.0, 0.0]), &v(&[0.0, 0.0])).unwrap();
        assert!(report.evals <= 400, "evals = {}", report.evals);

        assert_eq!(mpc.durations().len(), 2);
        assert!(mpc.durations().iter().all(|&tau| tau > 0.0));
        // velocity at the first waypoint points at the second
        let vel = &mpc.velocities()[0];
        assert!(vel[0].abs() < 1e-12);
    }

    #[test]
    fn test_config_eval_budget_caps_each_solve() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("budget.toml");
        std::fs::write(&path, "[optimizer]\nstop_evals = 3\nstop_iters = 0\n").unwrap();
        let config = load_config(path.to_str().unwrap()).unwrap();

        let mut mpc = TimingMpc::with_config(corner(), &config).unwrap();
        let x0 = v(&[0.0, 0.0]);
        for _ in 0..3 {
            let report = mpc.solve(&x0, &x0).unwrap();
            assert!(report.evals <= 3, "evals = {}", report.evals);
        }
    }

    #[test]
    fn test_tangent_velocities_stay_on_tangents() {
        let mut config = Config::default();
        config.timing.use_next_waypoint_tangent = true;
        let waypoints = vec![v(&[1.0, 0.0]), v(&[2.0, 1.0]), v(&[2.0, 3.0]), v(&[0.0, 3.0])];
        let mut mpc = TimingMpc::with_config(waypoints, &config).unwrap();
        mpc.solve(&v(&[0.0, 0.0]), &v(&[0.5, 0.0])).unwrap();

        let tangents = mpc.tangents().unwrap().to_vec();
        for (vel, t) in mpc.velocities().iter().zip(&tangents) {
            let cross = vel[0] * t[1] - vel[1] * t[0];
            assert!(cross.abs() < 1e-12);
        }
        assert_eq!(*mpc.velocities().last().unwrap(), DVector::zeros(2));
    }

    #[test]
    fn test_solver_seam_and_dual_warm_start() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let solver = Box::new(EchoSolver {
            seen_duals: seen.clone(),
        });
        let mut mpc = TimingMpc::with_solver(corner(), &TimingConfig::default(), solver).unwrap();
        let x0 = v(&[0.0, 0.0]);
        mpc.solve(&x0, &x0).unwrap();
        // echoed initialization decodes back to the seeded durations
        for &tau in mpc.durations() {
            assert!((tau - 1.0).abs() < 1e-12);
        }
        assert_eq!(mpc.warmstart_dual().len(), 15);
        mpc.solve(&x0, &x0).unwrap();
        assert_eq!(*seen.borrow(), vec![0, 15]);

        // new waypoints drop the dual
        mpc.update_waypoints(&corner(), false).unwrap();
        assert_eq!(mpc.warmstart_dual().len(), 0);
    }

    #[test]
    fn test_receding_horizon_reaches_goal() {
        let mut mpc = TimingMpc::new(corner(), 1.0, 1.0).unwrap();
        let mut x = v(&[0.0, 0.0]);
        let mut vel = v(&[0.0, 0.0]);
        let dt = 0.1;
        let mut phases = vec![mpc.phase()];
        for _ in 0..400 {
            if mpc.done() {
                break;
            }
            mpc.solve(&x, &vel).unwrap();
            let spline = mpc.get_cubic_spline(&x, &vel).unwrap();
            x = spline.eval(dt, 0).unwrap();
            vel = spline.eval(dt, 1).unwrap();
            mpc.update_progress_time(dt).unwrap();
            phases.push(mpc.phase());
        }
        assert!(mpc.done());
        assert!(phases.windows(2).all(|w| w[1] >= w[0]));
        assert!((&x - v(&[0.0, 1.0])).amax() < 1e-6);
    }
}
