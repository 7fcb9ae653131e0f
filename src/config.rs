//! # Optimizer, Timing and Simulation Configuration
//!
//! This module defines the serde configuration structs shared by the
//! library and the `trajopt_sim` harness.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [optimizer]
//! stop_tolerance = 1e-4
//! stop_evals = 2000
//! max_step = 0.5
//!
//! [timing]
//! time_cost = 1.0
//! ctrl_cost = 0.1
//! never_done = false
//! use_next_waypoint_tangent = true
//!
//! [simulation]
//! start = [0.0, 0.0]
//! waypoints = [[1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]
//! control_period = 0.05
//! ```
//!
//! - Every section and field is optional; missing values take the defaults
//!   below.
//! - `load_config` parses and validates in one step.
//!
//! ## Example: Rust Usage
//!
//! ```rust
//! use trajopt_rs::config::Config;
//! let config: Config = toml::from_str("[timing]\nctrl_cost = 0.5").unwrap();
//! assert_eq!(config.timing.ctrl_cost, 0.5);
//! assert!(config.validate().is_ok());
//! ```

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// True when the file contents are at fault rather than the filesystem.
    pub fn is_invalid_input(&self) -> bool {
        !matches!(self, ConfigError::Io(_))
    }
}

/// Main configuration struct: optimizer options, timing controller and the
/// closed-loop simulation scenario.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub optimizer: OptOptions,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.optimizer.validate().map_err(ConfigError::Invalid)?;
        self.timing.validate().map_err(ConfigError::Invalid)?;
        self.simulation.validate().map_err(ConfigError::Invalid)?;
        Ok(())
    }
}

/// Options of the gradient descent optimizer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OptOptions {
    /// 0: silent, 1: trace file, 2: also log every trial step
    #[serde(default)]
    pub verbose: u32,
    /// Stop once an accepted step is shorter than this
    #[serde(default = "default_stop_tolerance")]
    pub stop_tolerance: f64,
    /// Budget of cost evaluations (0 = unlimited)
    #[serde(default = "default_stop_evals")]
    pub stop_evals: usize,
    /// Budget of iterations (0 = unlimited)
    #[serde(default = "default_stop_iters")]
    pub stop_iters: usize,
    #[serde(default = "default_init_step")]
    pub init_step: f64,
    /// Cap on the step length (<= 0 means uncapped)
    #[serde(default = "default_max_step")]
    pub max_step: f64,
    /// Trace file written when `verbose > 0`
    #[serde(default = "default_trace_path")]
    pub trace_path: String,
}

impl Default for OptOptions {
    fn default() -> Self {
        Self {
            verbose: 0,
            stop_tolerance: default_stop_tolerance(),
            stop_evals: default_stop_evals(),
            stop_iters: default_stop_iters(),
            init_step: default_init_step(),
            max_step: default_max_step(),
            trace_path: default_trace_path(),
        }
    }
}

impl OptOptions {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.stop_tolerance > 0.0) {
            return Err("optimizer.stop_tolerance must be > 0".to_string());
        }
        if self.stop_evals == 0 && self.stop_iters == 0 {
            return Err("optimizer needs stop_evals or stop_iters > 0".to_string());
        }
        if !(self.init_step > 0.0) || !self.init_step.is_finite() {
            return Err("optimizer.init_step must be a positive number".to_string());
        }
        if !self.max_step.is_finite() {
            return Err("optimizer.max_step must be finite".to_string());
        }
        if self.verbose > 0 && self.trace_path.is_empty() {
            return Err("optimizer.trace_path must be set when verbose > 0".to_string());
        }
        Ok(())
    }
}

/// Weights and limits of the waypoint timing controller.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimingConfig {
    /// Weight of total duration
    #[serde(default = "default_time_cost")]
    pub time_cost: f64,
    /// Weight of integrated squared acceleration
    #[serde(default = "default_ctrl_cost")]
    pub ctrl_cost: f64,
    /// Hold the last phase instead of finishing
    #[serde(default)]
    pub never_done: bool,
    /// Constrain waypoint velocities to the direction of the next waypoint
    #[serde(default)]
    pub use_next_waypoint_tangent: bool,
    /// Duration given to new segments (s)
    #[serde(default = "default_init_duration")]
    pub init_duration: f64,
    /// Lower bound for durations entering the optimizer (s)
    #[serde(default = "default_min_duration")]
    pub min_duration: f64,
    /// Per-axis velocity limit; needs a constrained solver
    #[serde(default)]
    pub max_vel: Option<f64>,
    /// Per-axis acceleration limit; needs a constrained solver
    #[serde(default)]
    pub max_acc: Option<f64>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            time_cost: default_time_cost(),
            ctrl_cost: default_ctrl_cost(),
            never_done: false,
            use_next_waypoint_tangent: false,
            init_duration: default_init_duration(),
            min_duration: default_min_duration(),
            max_vel: None,
            max_acc: None,
        }
    }
}

impl TimingConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.time_cost >= 0.0) || !self.time_cost.is_finite() {
            return Err("timing.time_cost must be >= 0".to_string());
        }
        if !(self.ctrl_cost >= 0.0) || !self.ctrl_cost.is_finite() {
            return Err("timing.ctrl_cost must be >= 0".to_string());
        }
        if !(self.min_duration > 0.0) {
            return Err("timing.min_duration must be > 0".to_string());
        }
        if !(self.init_duration >= self.min_duration) || !self.init_duration.is_finite() {
            return Err("timing.init_duration must be >= min_duration".to_string());
        }
        for (name, limit) in [("max_vel", self.max_vel), ("max_acc", self.max_acc)] {
            if let Some(limit) = limit {
                if !(limit > 0.0) {
                    return Err(format!("timing.{} must be > 0", name));
                }
            }
        }
        Ok(())
    }
}

/// Closed-loop scenario run by the simulation harness.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    /// Initial position
    #[serde(default = "default_start")]
    pub start: Vec<f64>,
    #[serde(default = "default_waypoints")]
    pub waypoints: Vec<Vec<f64>>,
    /// Controller period (s)
    #[serde(default = "default_control_period")]
    pub control_period: f64,
    /// Simulated time limit (s)
    #[serde(default = "default_max_time")]
    pub max_time: f64,
    /// Bound of the uniform position error added each period
    #[serde(default)]
    pub tracking_noise: f64,
    #[serde(default)]
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            start: default_start(),
            waypoints: default_waypoints(),
            control_period: default_control_period(),
            max_time: default_max_time(),
            tracking_noise: 0.0,
            seed: 0,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.start.is_empty() {
            return Err("simulation.start must not be empty".to_string());
        }
        if self.waypoints.is_empty() {
            return Err("simulation.waypoints must not be empty".to_string());
        }
        if let Some(i) = self.waypoints.iter().position(|w| w.len() != self.start.len()) {
            return Err(format!(
                "simulation.waypoints[{}] has dimension {}, start has {}",
                i,
                self.waypoints[i].len(),
                self.start.len()
            ));
        }
        if !(self.control_period > 0.0) {
            return Err("simulation.control_period must be > 0".to_string());
        }
        if !(self.max_time > 0.0) {
            return Err("simulation.max_time must be > 0".to_string());
        }
        if !(self.tracking_noise >= 0.0) {
            return Err("simulation.tracking_noise must be >= 0".to_string());
        }
        Ok(())
    }
}

// Default value functions
fn default_stop_tolerance() -> f64 {
    1e-3
}
fn default_stop_evals() -> usize {
    1000
}
fn default_stop_iters() -> usize {
    1000
}
fn default_init_step() -> f64 {
    1.0
}
fn default_max_step() -> f64 {
    0.5
}
fn default_trace_path() -> String {
    "z.opt".to_string()
}
fn default_time_cost() -> f64 {
    1.0
}
fn default_ctrl_cost() -> f64 {
    1.0
}
fn default_init_duration() -> f64 {
    1.0
}
fn default_min_duration() -> f64 {
    1e-2
}
fn default_start() -> Vec<f64> {
    vec![0.0, 0.0]
}
fn default_waypoints() -> Vec<Vec<f64>> {
    vec![vec![1.0, 0.0], vec![1.0, 1.0], vec![0.0, 1.0]]
}
fn default_control_period() -> f64 {
    0.05
}
fn default_max_time() -> f64 {
    30.0
}

pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let config: Config = match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                return Err(ConfigError::Toml(e));
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            return Err(ConfigError::Io(e));
        }
    };
    if let Err(e) = config.validate() {
        tracing::error!("Rejected config '{}': {}", path, e);
        return Err(e);
    }
    Ok(config)
}
