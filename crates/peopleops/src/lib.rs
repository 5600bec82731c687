//! HR operations workflows backing the people-operations web application.
//!
//! The crate currently hosts the external performance-evaluation engine (single-use review
//! links, anti-abuse checks, scoring) and the employee directory adapter it consumes.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
