pub mod commands;
pub mod device_config;
pub mod error;
pub mod sources;
pub mod targets;
pub mod telemetry;
