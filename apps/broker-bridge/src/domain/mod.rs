//! Domain Layer - Core broker types and pure business rules.
//!
//! Nothing in here performs I/O. Types are shared by the application
//! services and serialized directly on the HTTP surface.

/// Instrument descriptors and symbol resolution.
pub mod contract;

/// Order requests, validation and status.
pub mod order;

/// Quote snapshots and market data preferences.
pub mod quote;

/// Session descriptor and connection state.
pub mod session;
