//! # fitcha-shared
//!
//! Domain types, realtime protocol frames, constants, and error types shared
//! by the network layer and the client containers.

pub mod constants;
pub mod error;
pub mod messaging;
pub mod protocol;
pub mod session;
pub mod social;
pub mod types;

pub use error::{RemoteError, SendError, ValidationError};
