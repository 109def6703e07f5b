//! Orchestration hub.
//!
//! # Data Flow
//! ```text
//! dispatch(capability, arguments):
//!     → registry.rs resolve owner (unknown → Validation)
//!     → cache lookup when the capability is cacheable (hit → return)
//!     → Retry(Breaker(timeout(worker.invoke)))
//!     → metrics: dependency call per attempt, worker request per dispatch
//!     → cache write on success
//!
//! run_plan(branches):
//!     → started event
//!     → every branch: timeout(dispatch) → Available / Unavailable
//!     → branch-settled event per branch (any order)
//!     → COMPLETE / PARTIAL / FAILED event
//! ```
//!
//! # Design Decisions
//! - One breaker per worker id, created lazily
//! - Settle-all: branch failures are data, never errors
//! - Events are fire-and-forget, with no replay for late subscribers

pub mod dispatch;
pub mod events;
pub mod plan;

pub use dispatch::{DispatchOutcome, Orchestrator};
pub use events::{EventBus, EventType, ProgressEvent};
pub use plan::{CompositePlan, PlanBranch, PlanRequest, PlanSection, PlanStatus, SectionResult};
