//! Acquisition module
//!
//! Downloads outstanding items one at a time, validates the payloads and
//! moves them into the output directory, stopping early when too many items
//! fail in a row.

mod circuit_breaker;
mod engine;
mod models;

pub use circuit_breaker::{BreakerAction, CircuitBreaker};
pub use engine::AcquisitionEngine;
pub use models::{
    AcquisitionError, AcquisitionErrorType, AcquisitionReport, RunOutcome, Strategy,
};
