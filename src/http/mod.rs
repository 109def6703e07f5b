//! HTTP surface.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (request id, trace, timeout, body limit)
//!     → handlers.rs (health, metrics, dispatch, plan, workers)
//!         → Orchestrator
//!     → response.rs (envelope, error → status)
//!
//! GET /ws
//!     → websocket.rs (progress events out, status requests in)
//! ```

pub mod handlers;
pub mod response;
pub mod server;
pub mod websocket;

pub use response::{ApiError, Envelope, ErrorBody};
pub use server::{AppState, HttpServer, X_REQUEST_ID};
