//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → server stops accepting and drains in-flight requests
//!             → health monitor and cache sweeper leave their loops
//!             → progress sockets receive a close frame
//! ```
//!
//! # Design Decisions
//! - One broadcast channel for every long-running task
//! - A second signal forces exit

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::{spawn_signal_handler, wait_for_signal};
