//! Tideway: resilient orchestration of unreliable workers.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌──────────────────────────────────────────────────────────┐
//!                  │                        TIDEWAY                           │
//!                  │                                                          │
//!   HTTP / WS      │  ┌─────────┐    ┌──────────────┐    ┌──────────────┐    │
//!   ───────────────┼─▶│  http   │───▶│ orchestrator │───▶│   registry   │    │
//!                  │  │ server  │    │ dispatch/plan│    │   workers    │────┼──▶ Workers
//!                  │  └─────────┘    └──────┬───────┘    └──────────────┘    │
//!                  │       ▲                │                                 │
//!                  │       │ events         ▼                                 │
//!                  │  ┌─────────┐    ┌──────────────┐    ┌──────────────┐    │
//!                  │  │websocket│    │  resilience  │    │    cache     │    │
//!                  │  └─────────┘    │ retry/breaker│    │ local+shared │    │
//!                  │                 └──────────────┘    └──────────────┘    │
//!                  │                                                          │
//!                  │  ┌────────────────────────────────────────────────────┐ │
//!                  │  │ config │ health │ observability │ lifecycle │ error │ │
//!                  │  └────────────────────────────────────────────────────┘ │
//!                  └──────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod orchestrator;
pub mod registry;
pub mod resilience;

pub use config::schema::OrchestratorConfig;
pub use error::{ServiceError, ServiceResult};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use orchestrator::Orchestrator;
