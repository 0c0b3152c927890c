#![deny(unsafe_code)]

//! In-process relay implementing the transport, presence and identity contracts.

pub mod relay;
pub mod responder;

pub use relay::{Relay, RelayClient};
pub use responder::AutoResponder;
