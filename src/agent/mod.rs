//! Reporting agent
//!
//! The agent samples host metrics on a poll interval and ships them to the
//! server on a report interval.
//!
//! ## Message Flow
//!
//! ```text
//! poll tick   → HostSampler::poll    (refresh gauges, PollCount += 1)
//! report tick → ReporterActor::report (drain PollCount, POST /updates/)
//!                   │ batch rejected
//!                   └→ POST /update/ per metric, at most `rate_limit` in flight
//!     ↑
//!     └─── Commands (PollNow, ReportNow, Shutdown)
//! ```

pub mod collector;
pub mod reporter;

pub use collector::HostSampler;
pub use reporter::{ReporterActor, ReporterCommand, ReporterHandle};
