//! Closed-loop run of the timing controller against a simulated agent.
//!
//! Each control period the controller re-solves from the measured state,
//! the agent follows the resulting cubic for one period, a bounded
//! tracking error is added, and the elapsed time is fed back as progress.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use csv::Writer;
use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use thiserror::Error;
use trajopt_rs::config::Config;
use trajopt_rs::spline::{CubicSpline, SplineError};
use trajopt_rs::timing::{TimingError, TimingMpc};

#[derive(Debug, Error)]
pub enum SimError {
    #[error("Timing error: {0}")]
    Timing(#[from] TimingError),
    #[error("Spline error: {0}")]
    Spline(#[from] SplineError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step: usize,
    pub time: f64,
    pub phase: usize,
    pub cost: f64,
    pub evals: usize,
    /// Planned time to the last waypoint
    pub remaining: f64,
    pub position: Vec<f64>,
    pub velocity: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub records: Vec<StepRecord>,
    pub finished: bool,
    pub final_phase: usize,
    pub elapsed: f64,
}

pub fn build_controller(config: &Config) -> Result<TimingMpc, SimError> {
    let waypoints = config
        .simulation
        .waypoints
        .iter()
        .map(|w| DVector::from_row_slice(w))
        .collect();
    Ok(TimingMpc::with_config(waypoints, config)?)
}

/// Runs until every waypoint is passed or `max_time` is used up.
pub fn run_closed_loop(config: &Config) -> Result<RunSummary, SimError> {
    let sim = &config.simulation;
    let mut mpc = build_controller(config)?;
    let mut rng = StdRng::seed_from_u64(sim.seed);
    let mut x = DVector::from_row_slice(&sim.start);
    let mut v = DVector::zeros(x.len());
    let mut spline = CubicSpline::default();
    let mut records = Vec::new();
    let mut time = 0.0;
    let mut step = 0;

    tracing::info!(
        "closed loop: {} waypoints, period {}s, limit {}s",
        mpc.n_phases(),
        sim.control_period,
        sim.max_time
    );
    while !mpc.done() && time < sim.max_time {
        let report = mpc.solve(&x, &v)?;
        mpc.get_cubic_spline_into(&mut spline, &x, &v)?;
        records.push(StepRecord {
            step,
            time,
            phase: mpc.phase(),
            cost: report.cost,
            evals: report.evals,
            remaining: spline.end(),
            position: x.iter().copied().collect(),
            velocity: v.iter().copied().collect(),
        });

        let dt = sim.control_period;
        x = spline.eval(dt, 0)?;
        v = spline.eval(dt, 1)?;
        if sim.tracking_noise > 0.0 {
            x.apply(|xi| *xi += sim.tracking_noise * rng.random_range(-1.0..=1.0));
        }
        if mpc.update_progress_time(dt)? {
            tracing::debug!("t={:.3}: phase {}", time + dt, mpc.phase());
        }
        time += dt;
        step += 1;
    }

    let finished = mpc.done();
    if !finished {
        tracing::warn!("closed loop stopped at {:.3}s in phase {}", time, mpc.phase());
    }
    Ok(RunSummary {
        records,
        finished,
        final_phase: mpc.phase(),
        elapsed: time,
    })
}

/// Solves once from the configured start and samples the plan.
pub fn sample_plan(config: &Config, samples: usize) -> Result<Vec<StepRecord>, SimError> {
    let mut mpc = build_controller(config)?;
    let x0 = DVector::from_row_slice(&config.simulation.start);
    let v0 = DVector::zeros(x0.len());
    let report = mpc.solve(&x0, &v0)?;
    let spline = mpc.get_cubic_spline(&x0, &v0)?;
    let samples = samples.max(2);
    let end = spline.end();
    (0..samples)
        .map(|i| {
            let t = end * i as f64 / (samples - 1) as f64;
            let x = spline.eval(t, 0)?;
            let v = spline.eval(t, 1)?;
            Ok(StepRecord {
                step: i,
                time: t,
                phase: spline.breakpoints().partition_point(|&b| b < t),
                cost: report.cost,
                evals: report.evals,
                remaining: end - t,
                position: x.iter().copied().collect(),
                velocity: v.iter().copied().collect(),
            })
        })
        .collect()
}

pub fn write_csv(path: &Path, records: &[StepRecord]) -> Result<(), SimError> {
    let mut wtr = Writer::from_path(path)?;
    let dim = records.first().map_or(0, |r| r.position.len());
    let mut header: Vec<String> = ["step", "time", "phase", "cost", "evals", "remaining"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    header.extend((0..dim).map(|i| format!("x{}", i)));
    header.extend((0..dim).map(|i| format!("v{}", i)));
    wtr.write_record(&header)?;
    for r in records {
        let mut row = vec![
            r.step.to_string(),
            r.time.to_string(),
            r.phase.to_string(),
            r.cost.to_string(),
            r.evals.to_string(),
            r.remaining.to_string(),
        ];
        row.extend(r.position.iter().map(|x| x.to_string()));
        row.extend(r.velocity.iter().map(|v| v.to_string()));
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_jsonl(path: &Path, records: &[StepRecord]) -> Result<(), SimError> {
    let mut file = File::create(path)?;
    for r in records {
        writeln!(file, "{}", serde_json::to_string(r)?)?;
    }
    Ok(())
}
