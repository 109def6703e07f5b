//! Worker health subsystem.
//!
//! # Data Flow
//! ```text
//! Worker heartbeat (POST /api/workers/{id}/heartbeat):
//!     → heartbeat.rs writes heartbeat:{id} with TTL
//!
//! Monitor tick / on-demand check (monitor.rs):
//!     → read each heartbeat record
//!     → stale beyond grace → Unhealthy, silent beyond eviction → deregistered
//!     → optional active probe
//!     → state.rs quorum → Healthy / Degraded / Unhealthy
//! ```
//!
//! # Design Decisions
//! - Health lives on the descriptor (atomics), no registry rewrite per tick
//! - Store outages fall back to the last heartbeat seen by this instance
//! - Health transitions are logged once, not every tick

pub mod heartbeat;
pub mod monitor;
pub mod state;

pub use heartbeat::{heartbeat_key, HeartbeatRecord, HeartbeatTracker};
pub use monitor::{HealthMonitor, HealthReport};
pub use state::{classify, SystemHealth};
