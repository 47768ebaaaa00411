//! TWS Socket API Adapter
//!
//! Broker port implementation speaking the TWS / IB Gateway socket protocol
//! (server version 100 framing).

pub mod codec;
pub mod messages;

mod client;

pub use client::{TwsConnection, TwsGateway};
