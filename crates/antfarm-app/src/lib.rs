//! Application plumbing for the ant simulator: match configuration loading
//! and the simulation control surface.

pub mod config;
pub mod control;

pub use config::{ConfigError, MatchConfig, PlayerFiles};
pub use control::{ControlError, ControlHandle, SharedWorld};
