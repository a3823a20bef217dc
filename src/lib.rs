// Comment Streams - threaded comments on wiki pages over two storage backends

// Core types and primitives
pub mod core;

// Comment and reply value objects
pub mod entities;

// Lifecycle hooks and permission checks
pub mod framework;

// Database pools, caching and host collaborators
pub mod infrastructure;

// Comment store contract, backends, votes and watches
pub mod store;

// Ordering and client payloads
pub mod presentation;

// Common utilities
pub mod config;
pub mod error;
pub mod logging;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult};
pub use store::{build_store, CommentStore, HostServices};
