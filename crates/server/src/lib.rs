pub mod api;
pub mod config;
pub mod error;
pub mod gateway_factory;
pub mod state_factory;
pub mod telemetry;
