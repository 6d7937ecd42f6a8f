//! Shared utilities: promise-memoized caches, signal handling, tracing setup.

pub mod memo;
pub mod sig_down;
pub mod telemetry;

pub use memo::MemoMap;
pub use sig_down::SigDown;
pub use telemetry::Telemetry;
