// src/lib.rs - Trajectory library root
//! Spline representations and a small optimization stack for timing a
//! moving agent through a sequence of waypoints.
//!
//! - [`spline`]: clamped B-splines, piecewise cubic Hermite curves, an
//!   online-adjustable path and the per-segment cost/limit features.
//! - [`optim`]: feature programs, their scalarization and a gradient
//!   descent solver.
//! - [`timing`]: the receding-horizon timing controller.
//! - [`config`]: TOML configuration.

pub mod config;
pub mod optim;
pub mod spline;
pub mod timing;

pub use config::{Config, ConfigError, load_config};
pub use spline::{CubicSpline, Path, Spline, SplineError};
pub use timing::{TimingError, TimingMpc};
