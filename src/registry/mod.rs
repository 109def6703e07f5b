//! Worker registry subsystem.
//!
//! # Data Flow
//! ```text
//! Registration (local HandlerWorker or remote Registration payload)
//!     → registry.rs validate (ids, capability ownership, handlers)
//!     → new snapshot published (ArcSwap)
//!
//! Dispatch:
//!     capability → registry.resolve → RegisteredWorker → Worker::invoke
//!                                                          ├─ HandlerWorker (closure)
//!                                                          └─ HttpWorker (POST endpoint)
//! ```
//!
//! # Design Decisions
//! - Handlers are resolved by capability name at registration, not at call time
//! - Reads never lock; writes are rare and copy the snapshot

pub mod descriptor;
pub mod http_worker;
#[allow(clippy::module_inception)]
pub mod registry;
pub mod worker;

pub use descriptor::{AgentStatus, Capability, CapabilitySpec, Registration, WorkerDescriptor, WorkerHealth};
pub use http_worker::HttpWorker;
pub use registry::{RegisteredWorker, WorkerRegistry};
pub use worker::{HandlerWorker, Worker};
