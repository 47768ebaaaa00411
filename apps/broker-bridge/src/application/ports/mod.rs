//! Port Interfaces
//!
//! Contracts that infrastructure adapters implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `BrokerGateway`: opens sessions against the broker gateway process
//! - `BrokerConnection`: one live session (market data, orders, accounts)
//! - `ProcessControl`: restarts the broker gateway process

mod broker_port;
mod process_control_port;

pub use broker_port::{
    BrokerConnection, BrokerGateway, BrokerOrder, BrokerOrderKind, GatewayError,
    MarketDataTicket, RequestId,
};
pub use process_control_port::{ProcessControl, ProcessControlError};
