//! Logging and the management surface.
//!
//! Two concerns live here: one-shot `tracing` initialization from the
//! logging config, and the shared [`BridgeState`] the supervisor updates and
//! the management HTTP endpoint reports.

pub mod error;
pub mod http;
pub mod logging;
pub mod state;

pub use error::{ObservabilityError, Result};
pub use http::serve_monitoring;
pub use logging::init_tracing;
pub use state::{BridgePhase, BridgeState, StatusSnapshot};
