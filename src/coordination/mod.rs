//! Coordination: the single piece of cross-cutting runtime infrastructure
//! the core needs — graceful shutdown of the worker pool and HTTP server.

pub mod shutdown;

pub use shutdown::{GracefulShutdown, ShutdownSignal};
