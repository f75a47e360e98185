//! Transport Layer
//!
//! - **`envelope`**: the JSON envelope wrapped around every payload.
//! - **`channel`**: `ReplicaChannel`, a named handle onto the shared multiplexer.
//! - **`multiplexer`**: routes named channels over one broadcast connection.
//! - **`memory`**: an in-process broadcast hub for tests and simulation.

pub mod channel;
pub mod envelope;
pub mod memory;
pub mod multiplexer;

pub use channel::*;
pub use envelope::*;
pub use memory::*;
pub use multiplexer::*;

use crate::error::Result;

/// Outbound half of a broadcast connection.
///
/// Delivery is at-least-once and unordered; the multiplexer never waits on it.
/// The inbound half is the owner of the connection calling
/// [`Multiplexer::on_receive`], [`Multiplexer::on_peer_joined`] and
/// [`Multiplexer::on_peer_left`].
pub trait Transport: Send + Sync {
    /// Multicast `payload` to every current member under `channel`.
    fn send(&self, channel: &str, payload: Vec<u8>) -> Result<()>;
}
