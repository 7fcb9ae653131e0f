// src/timing/mod.rs
//! Receding-horizon timing of a waypoint sequence.
//!
//! [`TimingMpc`] keeps the waypoints still to be passed together with the
//! optimized segment durations and waypoint velocities, re-solves the timing
//! from the current state on demand, and tracks progress along the
//! sequence as a phase index.

pub mod problem;

pub use problem::TimingProblem;

use nalgebra::DVector;
use thiserror::Error;

use crate::config::{Config, TimingConfig};
use crate::optim::{DescentSolver, Nlp, NlpSolver, OptimError, SolverReturn};
use crate::spline::{CubicSpline, SplineError};

#[derive(Debug, Error)]
pub enum TimingError {
    #[error("All waypoints have been passed")]
    Done,
    #[error("No earlier phase to backtrack to")]
    NothingToBacktrack,
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("Spline error: {0}")]
    Spline(#[from] SplineError),
    #[error("Optimization error: {0}")]
    Optim(#[from] OptimError),
}

impl TimingError {
    pub fn is_invalid_input(&self) -> bool {
        match self {
            TimingError::Done
            | TimingError::NothingToBacktrack
            | TimingError::InvalidInput(_)
            | TimingError::DimensionMismatch { .. } => true,
            TimingError::Spline(e) => e.is_invalid_input(),
            TimingError::Optim(e) => e.is_invalid_input(),
        }
    }
}

pub type TimingResult<T> = Result<T, TimingError>;

/// Controller state saved when a phase is passed.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktrackEntry {
    pub phase: usize,
    pub durations: Vec<f64>,
    pub velocities: Vec<DVector<f64>>,
}

pub struct TimingMpc {
    waypoints: Vec<DVector<f64>>,
    /// Direction toward the next waypoint, for every waypoint but the last
    tangents: Option<Vec<DVector<f64>>>,
    /// Velocity at each waypoint; the last one stays zero
    velocities: Vec<DVector<f64>>,
    /// Duration of the segment ending at each waypoint
    durations: Vec<f64>,
    warmstart_dual: DVector<f64>,
    phase: usize,
    backtracking_table: Vec<BacktrackEntry>,
    config: TimingConfig,
    solver: Box<dyn NlpSolver>,
}

impl std::fmt::Debug for TimingMpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimingMpc")
            .field("phase", &self.phase)
            .field("n_phases", &self.waypoints.len())
            .field("durations", &self.durations)
            .field("backtracking_entries", &self.backtracking_table.len())
            .field("never_done", &self.config.never_done)
            .finish()
    }
}

impl TimingMpc {
    /// Controller with default settings and the given cost weights.
    pub fn new(waypoints: Vec<DVector<f64>>, time_cost: f64, ctrl_cost: f64) -> TimingResult<Self> {
        let mut config = Config::default();
        config.timing.time_cost = time_cost;
        config.timing.ctrl_cost = ctrl_cost;
        Self::with_config(waypoints, &config)
    }

    /// Controller using the `[timing]` settings, solved by gradient descent
    /// under the `[optimizer]` options and budgets.
    pub fn with_config(waypoints: Vec<DVector<f64>>, config: &Config) -> TimingResult<Self> {
        config.optimizer.validate().map_err(TimingError::InvalidInput)?;
        Self::with_solver(
            waypoints,
            &config.timing,
            Box::new(DescentSolver::new(config.optimizer.clone())),
        )
    }

    /// Controller driven by an external solver.
    pub fn with_solver(
        waypoints: Vec<DVector<f64>>,
        config: &TimingConfig,
        solver: Box<dyn NlpSolver>,
    ) -> TimingResult<Self> {
        config.validate().map_err(TimingError::InvalidInput)?;
        check_waypoint_dims(&waypoints)?;
        let n = waypoints.len();
        let dim = waypoints[0].len();
        let tangents = if config.use_next_waypoint_tangent {
            Some(next_waypoint_tangents(&waypoints))
        } else {
            None
        };
        Ok(Self {
            waypoints,
            tangents,
            velocities: vec![DVector::zeros(dim); n],
            durations: vec![config.init_duration; n],
            warmstart_dual: DVector::zeros(0),
            phase: 0,
            backtracking_table: Vec::new(),
            config: config.clone(),
            solver,
        })
    }

    pub fn config(&self) -> &TimingConfig {
        &self.config
    }

    pub fn n_phases(&self) -> usize {
        self.waypoints.len()
    }

    pub fn phase(&self) -> usize {
        self.phase
    }

    pub fn done(&self) -> bool {
        !self.config.never_done && self.phase >= self.waypoints.len()
    }

    pub fn waypoints(&self) -> &[DVector<f64>] {
        &self.waypoints[self.phase.min(self.waypoints.len())..]
    }

    /// Remaining segment durations, from the current phase on.
    pub fn durations(&self) -> &[f64] {
        &self.durations[self.phase.min(self.durations.len())..]
    }

    /// Cumulative arrival times of the remaining waypoints.
    pub fn times(&self) -> Vec<f64> {
        self.durations()
            .iter()
            .scan(0.0, |acc, tau| {
                *acc += tau;
                Some(*acc)
            })
            .collect()
    }

    /// Velocities at the remaining waypoints, ending with the rest velocity.
    pub fn velocities(&self) -> &[DVector<f64>] {
        &self.velocities[self.phase.min(self.velocities.len())..]
    }

    pub fn tangents(&self) -> Option<&[DVector<f64>]> {
        self.tangents.as_deref()
    }

    pub fn warmstart_dual(&self) -> &DVector<f64> {
        &self.warmstart_dual
    }

    pub fn backtracking_entries(&self) -> usize {
        self.backtracking_table.len()
    }

    fn dim(&self) -> usize {
        self.waypoints[0].len()
    }

    /// Optimize the timing of the remaining waypoints from state `(x0, v0)`.
    pub fn solve(&mut self, x0: &DVector<f64>, v0: &DVector<f64>) -> TimingResult<SolverReturn> {
        if self.done() || self.phase >= self.waypoints.len() {
            return Err(TimingError::Done);
        }
        let n = self.waypoints.len();
        let tangents = self.tangents.as_ref().map(|t| &t[self.phase..n - 1]);
        let mut problem = TimingProblem::new(
            x0,
            v0,
            &self.waypoints[self.phase..],
            tangents,
            &self.config,
        )?;
        problem.set_initialization(&self.durations[self.phase..], &self.velocities[self.phase..])?;

        let x_init = problem.initialization();
        let outcome = self.solver.solve(&problem, &x_init, &self.warmstart_dual)?;
        let (durations, velocities) = problem.decode(&outcome.x)?;

        self.durations[self.phase..].copy_from_slice(&durations);
        for (slot, v) in self.velocities[self.phase..].iter_mut().zip(velocities) {
            *slot = v;
        }
        self.warmstart_dual = outcome.dual;
        tracing::info!(
            "timing solve at phase {}/{}: cost {:.4}, remaining time {:.3}s, {} evals",
            self.phase,
            n,
            outcome.report.cost,
            self.durations().iter().sum::<f64>(),
            outcome.report.evals
        );
        Ok(outcome.report)
    }

    /// Consume `elapsed` seconds of the plan, passing as many waypoints as
    /// that covers. Returns whether the phase advanced.
    pub fn update_progress_time(&mut self, elapsed: f64) -> TimingResult<bool> {
        if !elapsed.is_finite() || elapsed < 0.0 {
            return Err(TimingError::InvalidInput(format!(
                "elapsed time must be finite and >= 0, got {}",
                elapsed
            )));
        }
        let n = self.waypoints.len();
        let mut remaining = elapsed;
        let mut advanced = false;
        while self.phase < n {
            if remaining < self.durations[self.phase] {
                self.durations[self.phase] -= remaining;
                break;
            }
            if self.config.never_done && self.phase + 1 == n {
                self.durations[self.phase] = self.config.min_duration;
                break;
            }
            self.backtracking_table.push(BacktrackEntry {
                phase: self.phase,
                durations: self.durations.clone(),
                velocities: self.velocities.clone(),
            });
            remaining -= self.durations[self.phase];
            self.phase += 1;
            advanced = true;
            tracing::debug!("timing phase advanced to {}/{}", self.phase, n);
        }
        Ok(advanced)
    }

    /// Return to the state saved when the most recent phase was passed.
    pub fn update_backtrack(&mut self) -> TimingResult<()> {
        let entry = self
            .backtracking_table
            .pop()
            .ok_or(TimingError::NothingToBacktrack)?;
        tracing::warn!("timing backtrack from phase {} to {}", self.phase, entry.phase);
        self.phase = entry.phase;
        self.durations = entry.durations;
        self.velocities = entry.velocities;
        Ok(())
    }

    /// Replace the waypoints from the current phase on.
    ///
    /// Durations of surviving indices are kept as a warm start, new ones get
    /// `init_duration`. With `derive_tangents` every waypoint velocity is
    /// constrained toward the next waypoint, otherwise velocities are free.
    pub fn update_waypoints(&mut self, waypoints: &[DVector<f64>], derive_tangents: bool) -> TimingResult<()> {
        if waypoints.is_empty() {
            return Err(TimingError::InvalidInput("no waypoints given".to_string()));
        }
        let dim = self.dim();
        if let Some(w) = waypoints.iter().find(|w| w.len() != dim) {
            return Err(TimingError::DimensionMismatch {
                expected: dim,
                found: w.len(),
            });
        }
        let phase = self.phase.min(self.waypoints.len());
        self.waypoints.truncate(phase);
        self.waypoints.extend(waypoints.iter().cloned());
        let n = self.waypoints.len();

        self.durations.resize(n, self.config.init_duration);
        for tau in &mut self.durations[phase..] {
            *tau = tau.max(self.config.min_duration);
        }
        self.velocities.resize(n, DVector::zeros(dim));
        self.velocities[n - 1] = DVector::zeros(dim);

        self.tangents = derive_tangents.then(|| next_waypoint_tangents(&self.waypoints));
        self.backtracking_table.clear();
        self.warmstart_dual = DVector::zeros(0);
        self.phase = phase;
        tracing::debug!("timing waypoints updated: {} phases, phase {}", n, phase);
        Ok(())
    }

    /// Jump to phase `target` (at most the number of waypoints).
    pub fn update_set_phase(&mut self, target: usize) -> TimingResult<()> {
        let n = self.waypoints.len();
        if target > n {
            return Err(TimingError::InvalidInput(format!(
                "phase {} beyond {} waypoints",
                target, n
            )));
        }
        self.phase = target;
        for tau in &mut self.durations[target..] {
            *tau = tau.max(self.config.min_duration);
        }
        tracing::debug!("timing phase set to {}/{}", target, n);
        Ok(())
    }

    /// Piecewise cubic from `(x0, v0)` through the remaining waypoints at
    /// the optimized times, starting at time 0.
    pub fn get_cubic_spline(&self, x0: &DVector<f64>, v0: &DVector<f64>) -> TimingResult<CubicSpline> {
        let mut spline = CubicSpline::default();
        self.get_cubic_spline_into(&mut spline, x0, v0)?;
        Ok(spline)
    }

    pub fn get_cubic_spline_into(
        &self,
        spline: &mut CubicSpline,
        x0: &DVector<f64>,
        v0: &DVector<f64>,
    ) -> TimingResult<()> {
        if self.phase >= self.waypoints.len() {
            return Err(TimingError::Done);
        }
        let mut points = Vec::with_capacity(self.waypoints.len() - self.phase + 1);
        points.push(x0.clone());
        points.extend(self.waypoints().iter().cloned());

        let mut velocities = Vec::with_capacity(points.len());
        velocities.push(v0.clone());
        velocities.extend(self.velocities().iter().cloned());

        let mut times = Vec::with_capacity(points.len());
        times.push(0.0);
        times.extend(self.times());

        spline.set(&points, &velocities, &times)?;
        Ok(())
    }
}

fn check_waypoint_dims(waypoints: &[DVector<f64>]) -> TimingResult<()> {
    let first = waypoints
        .first()
        .ok_or_else(|| TimingError::InvalidInput("no waypoints given".to_string()))?;
    if let Some(w) = waypoints.iter().find(|w| w.len() != first.len()) {
        return Err(TimingError::DimensionMismatch {
            expected: first.len(),
            found: w.len(),
        });
    }
    Ok(())
}

/// Unit vector from each waypoint toward the next one (zero when they
/// coincide).
fn next_waypoint_tangents(waypoints: &[DVector<f64>]) -> Vec<DVector<f64>> {
    waypoints
        .windows(2)
        .map(|w| {
            let diff = &w[1] - &w[0];
            let norm = diff.norm();
            if norm > 0.0 { diff / norm } else { diff }
        })
        .collect()
}
