//! Application Layer - Services and port definitions.
//!
//! Services depend only on the port traits; concrete adapters are injected
//! by the binaries.

/// Port interfaces for the broker gateway and process control.
pub mod ports;

/// Session, market data, order and watchdog services.
pub mod services;
