//! Multi-model dispatch core.
//!
//! Sends one task (instructions plus gathered context) to several model
//! backends at once and collects the results:
//!
//! - [`admission`]: global concurrency limiter plus per-model token buckets
//! - [`dispatch`]: one task per model, joined before the run advances
//! - [`classify`]: maps backend failures onto a fixed [`ErrorCategory`] set
//! - [`aggregate`]: the partial-success policy and exit codes
//! - [`synthesis`]: optional extra call combining successful outputs
//! - [`orchestrator`]: the run state machine tying it together
//!
//! I/O lives behind traits ([`ModelCaller`], [`ContextGatherer`],
//! [`OutputWriter`], [`AuditLogger`], [`SummaryReporter`]) so the core has
//! no HTTP or filesystem dependencies of its own.

pub mod admission;
pub mod aggregate;
pub mod audit;
pub mod caller;
pub mod classify;
pub mod context;
pub mod dispatch;
pub mod errors;
pub mod job;
pub mod orchestrator;
pub mod output;
pub mod prompt;
pub mod synthesis;

pub use admission::{AdmissionError, ConcurrencyLimiter, RateLimiter, Ticket};
pub use aggregate::{aggregate, RunStatus};
pub use audit::{AuditEvent, AuditLogger, AuditRecord, MemoryAuditLogger, NoopAuditLogger};
pub use caller::{CallContext, ModelCaller};
pub use classify::{classify, ClassifiedError, ErrorCategory};
pub use context::{ContextFile, ContextGatherer, ContextStats, GatherError, GatheredContext};
pub use dispatch::Dispatcher;
pub use errors::{ModelError, RunError, TransportKind};
pub use job::{ModelJob, ModelOutcome};
pub use orchestrator::{
    Orchestrator, RunConfig, RunReport, RunState, SavedOutput, SummaryReporter, SynthesisReport,
};
pub use output::{OutputWriter, WriteError};
pub use synthesis::{SkipReason, SynthesisPolicy};
