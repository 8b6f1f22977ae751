//! Configuration module for Meridian.
//!
//! Handles planner and execution settings and environment variable expansion.

mod settings;

pub use settings::{expand_env_vars, ExecutionSettings, PlannerSettings, Settings, SettingsError};
