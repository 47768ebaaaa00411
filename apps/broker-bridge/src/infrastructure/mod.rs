//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the HTTP surface and process-wide
//! observability setup.

/// TWS socket API client (broker ports).
pub mod tws;

/// HTTP request surface and auth gate.
pub mod http;

/// Gateway restart adapters (process control port).
pub mod process;

/// Configuration loading.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing setup.
pub mod telemetry;
