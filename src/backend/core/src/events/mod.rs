//! Stopwatch Events and Replay
//!
//! - **`event`**: `Event` and `EventKind`, totally ordered points on the shared timeline.
//! - **`aggregate`**: The `Aggregate` trait and the `WatchValue` replay state machine.
//! - **`watch`**: `WatchModel`, an event log plus base snapshot replayed into a live value.

pub mod aggregate;
pub mod event;
pub mod watch;

pub use aggregate::*;
pub use event::*;
pub use watch::*;
