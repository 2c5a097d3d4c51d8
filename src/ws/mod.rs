//! Connection machinery: one socket, its timers, and the policies around it.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: handle to the task that owns the socket. Every timer,
//!   the circuit breaker, the reconnection policy and the outbound queue live on that
//!   task, so none of them need locking.
//! - [`FrameHandler`]: what the task calls with inbound frames and on every (re)open.
//! - [`HealthProbe`]: external check that revives a connection after reconnection gave up.

pub mod circuit_breaker;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod health;
pub(crate) mod keepalive;
pub mod listeners;
pub mod queue;
pub(crate) mod reconnect;
pub(crate) mod task;
pub mod traits;

pub use circuit_breaker::BreakerState;
pub use connection::{ConnectionManager, ConnectionState, ConnectionStatus, Diagnostics};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
#[cfg(feature = "health-check")]
pub use health::HttpHealthProbe;
pub use listeners::ListenerHandle;
pub use traits::*;
