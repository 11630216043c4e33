//! WebSocket gateway: post-upgrade handshake, frame crypto, wire codec,
//! per-connection dispatch, and the accept loop that ties them together.

pub mod admission;
pub mod connection;
pub mod crypto;
pub mod error;
pub mod server;
pub mod wire;

pub use error::GatewayError;
pub use server::{Gateway, GatewayState};
