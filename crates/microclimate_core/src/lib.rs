//! Microclimate Core
//!
//! Tracks the build and run state of projects hosted by a remote Microclimate
//! development server, and drives debugger attachment to those projects.
//! Provides structured config, error handling, a remote probe abstraction,
//! per-application state trackers and the registry that reconciles them
//! against the server's project list.

pub mod config;
pub mod error;
pub mod probe;
pub mod client;
pub mod debug;
pub mod ops;
pub mod registry;
pub mod tracker;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::McConfig;
pub use error::McError;
pub use client::McClient;
pub use debug::{DebugAttachNegotiator, DebugServices, DebugSession, LaunchManager};
pub use probe::{HttpProbe, ProbeResponse, RemoteProbe};
pub use registry::{ConnectionRegistry, ReconcileReport};
pub use tracker::ApplicationStateTracker;

/// Result type alias using McError
pub type Result<T> = std::result::Result<T, McError>;
