//! # Stratus Server
//!
//! Host process for the statistics pipeline: loads configuration, installs
//! logging, connects the coordination service, lock backend and store, then
//! hands control to [`stratus_core::Statistic`] until Ctrl-C.

pub mod cli;
pub mod telemetry;
pub mod wiring;
