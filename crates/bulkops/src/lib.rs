//! # bulkops
//!
//! Apply a unit of work across a contiguous range of resource IDs.
//!
//! ## Core Concepts
//!
//! - **IdRange**: an inclusive span of IDs, validated against a maximum span
//! - **Operation**: the unit of work, any `Fn(Id) -> Result<(), E>`
//! - **Filtered**: decorator that skips IDs which do not exist or are in the
//!   wrong running state
//! - **BulkEngine**: runs an operation sequentially, with retry rounds, or on
//!   a bounded worker pool
//! - **RunResult**: counters plus a write-once outcome per ID
//!
//! ## Example
//!
//! ```
//! use bulkops::{BulkEngine, BulkOptions, IdRange};
//!
//! let engine = BulkEngine::new(BulkOptions::default());
//! let start_vm = |id: u32| if id % 2 == 0 { Ok(()) } else { Err("locked") };
//!
//! let result = engine.run(IdRange::new(100, 103), &start_vm).unwrap();
//! assert_eq!(result.succeeded(), 2);
//! assert_eq!(result.failed(), 2);
//! ```

pub mod context;
pub mod engine;
pub mod error;
pub mod operation;
pub mod outcome;
mod parallel;
pub mod range;
pub mod report;
pub mod state;

pub use context::{BulkProgress, NoProgress};
pub use engine::{BulkEngine, BulkOptions, DEFAULT_RETRY_DELAY, RetryRun};
pub use error::{Error, ErrorCategory, Result};
pub use operation::{Filtered, Operation, StateFilter, StateProbe, filter};
pub use outcome::{Outcome, OutcomeMap, RunCounters, RunRecorder, RunResult, SkipReason};
pub use range::{DEFAULT_MAX_SPAN, Id, IdRange};
pub use report::{ReportFormat, format_duration, render, write_report};
pub use state::BulkSavedState;
