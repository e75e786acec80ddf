//! Shared functionality between the operator and the runner.
#![warn(missing_docs)]

pub mod telemetry;
