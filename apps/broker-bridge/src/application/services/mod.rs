//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `SessionManager`: Owns the broker session of record
//! - `MarketDataService`: Snapshot and streaming quotes
//! - `OrderExecutionService`: Order validation, placement and tracking
//! - `AccountService`: Managed accounts and positions
//! - `HealthWatchdog`: Independent gateway liveness check

mod account;
mod ladder;
mod market_data;
mod orders;
mod poll;
mod session;
mod watchdog;

#[cfg(test)]
pub(crate) mod fakes;

pub use account::{AccountService, AccountStatus};
pub use ladder::{ClientIdLadder, LadderConfig, Rung};
pub use market_data::{DEFAULT_QUOTE_POLL_INTERVAL, MarketDataService};
pub use orders::{OrderConfig, OrderExecutionService};
pub use poll::{Polled, Probe, poll_with_timeout};
pub use session::{SessionConfig, SessionManager};
pub use watchdog::{HealthWatchdog, TickOutcome, WatchdogConfig, WatchdogHealth, WatchdogRecord};
