//! HTTP surface for tally.
//!
//! Serves the Prometheus text exposition of every series this replica
//! owns, plus liveness, readiness (non-empty ring), and a small JSON view
//! of the ring.

pub mod config;
pub mod error;
pub mod handler;
pub mod router;
pub mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use router::{build_router, AppState};
pub use server::TallyServer;
