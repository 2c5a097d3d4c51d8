#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod channels;
pub mod error;
pub mod protocol;
pub(crate) mod serde_helpers;
pub mod types;
pub mod ws;

use crate::error::Error;

pub use channels::{Client, Subscription};
pub use protocol::response::{Event, EventKind};
pub use ws::config::Config;
pub use ws::endpoint::Endpoint;

pub type Result<T> = std::result::Result<T, Error>;
