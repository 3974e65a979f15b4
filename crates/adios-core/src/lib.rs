//! Adaptive-deadline block I/O scheduling.
//!
//! This crate orders pending storage requests so each is served before
//! an adaptive per-request deadline. A per-operation latency model
//! learns the device's fixed overhead and per-KiB cost from completed
//! requests; insertions use the model to pick deadlines, and a
//! double-buffered batch dispatcher drains the deadline index under
//! per-operation batch caps and a global predicted-latency window.
//!
//! # Example
//!
//! ```
//! use adios_core::{NoMerge, OpType, RequestDesc, Scheduler};
//!
//! let sched = Scheduler::new();
//!
//! let rq = sched.prepare_request(&RequestDesc {
//!     op: OpType::Read,
//!     sync: true,
//!     mergeable: false,
//!     start_time_ns: 0,
//!     total_bytes: 4096,
//! });
//! sched.insert_request(rq, false, &NoMerge);
//!
//! let next = sched.dispatch_request(&NoMerge).unwrap();
//! assert_eq!(next, rq);
//!
//! sched.start_io(rq, 10_000);
//! sched.completed_request(rq, 25_000);
//! sched.finish_request(rq);
//! ```

#![deny(missing_docs)]
#![deny(clippy::panic)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod attrs;
mod batch;
pub mod config;
mod error;
pub mod model;
mod optype;
mod request;
mod sched;
mod timer;
mod tree;

pub use config::SchedulerConfig;
pub use error::{Error, Result};
pub use model::LatencyModel;
pub use optype::{OpType, OP_TYPES};
pub use request::{MergeKind, RequestDesc, RequestId};
pub use sched::{BioDesc, BioMergeOutcome, MergeHost, NoMerge, RequestSnapshot, Scheduler};

/// Scheduler version string, surfaced through the `adios_version`
/// attribute.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
