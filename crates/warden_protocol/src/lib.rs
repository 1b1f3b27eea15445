//! Shared types for the Warden command execution service.
//!
//! This crate holds everything the other crates agree on: the command
//! whitelist configuration model, job lifecycle enums, canonical defaults,
//! and home-directory resolution. It carries no behaviour beyond parsing
//! and validation so that every other crate can depend on it freely.

pub mod config;
pub mod defaults;
pub mod paths;
pub mod types;

pub use config::{
    CommandPattern, CompiledPattern, ConfigError, EnvPolicy, QueueConfig, WardenConfig,
    WorkingDirRestriction,
};
pub use types::{JobStatus, LoadBand, OperationType};
