//! Logical channels multiplexed over the single socket.
//!
//! - [`ChannelRegistry`]: which channels have handlers and how far each has been read
//! - [`Router`]: turns inbound frames into handler calls
//! - [`Client`]: the public facade tying both to a connection

pub mod client;
pub mod registry;
pub mod router;

pub use client::Client;
pub use registry::{ChannelRegistry, Handler, Subscription};
pub use router::Router;
