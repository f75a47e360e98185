//! Replicated containers.
//!
//! - **`set`**: `AddOnlySet` (grow-only set) and `AddOnlySortedSet` (the event log).
//! - **`high_score`**: `HighScore`, a max-register keyed on a float score.
//! - **`latest`**: `Latest`, a last-writer-wins register stamped on the shared timeline.
//! - **`translator`**: pluggable wire encoding for container values.
//! - **`notify`**: ordered change notification to subscribers and listeners.
//!
//! Every container owns its value behind a `parking_lot::Mutex`, registers a
//! weak reference of itself with the multiplexer on construction, and
//! broadcasts a delta for each local mutation that changed its value.

pub mod high_score;
pub mod latest;
pub mod notify;
pub mod set;
pub mod translator;

pub use high_score::*;
pub use latest::*;
pub use notify::*;
pub use set::*;
pub use translator::*;

use serde_json::Value;

use crate::error::Result;

/// The face a container shows to the multiplexer.
///
/// Deltas and snapshots share one encoding: merging a delta and merging a
/// full snapshot are the same operation for every container here.
pub trait Replicated: Send + Sync {
    /// Channel this container is registered on.
    fn channel_name(&self) -> &str;

    /// Encode the full current value for catch-up.
    fn encoded_snapshot(&self) -> Result<Value>;

    /// Decode and merge a remote value. Returns whether the local value changed.
    ///
    /// A decode failure must leave the container untouched.
    fn merge_encoded(&self, value: &Value) -> Result<bool>;
}
