//! # adios
//!
//! Adaptive-deadline block I/O scheduling.
//!
//! This is the workspace root crate that re-exports the scheduler core.
//! For direct usage, depend on the individual sub-crates:
//!
//! - [`adios-core`] - the scheduler: latency models, deadline index,
//!   double-buffered batch dispatch, knob surface
//! - `adios-sim` - workload simulator (`adios-sim` binary)
//!
//! [`adios-core`]: adios_core

#![deny(missing_docs)]
#![deny(clippy::panic)]
#![warn(clippy::all, clippy::pedantic)]

pub use adios_core::*;
