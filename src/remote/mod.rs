//! Client side of the state HTTP endpoints.

mod api_types;
mod client;
mod error;
mod types;

pub use client::{HttpTransport, StateTransport};
pub use error::TransportError;
pub use types::{Credential, PushOptions, RemoteState};
