#![allow(clippy::result_large_err)]
//! # lapsync Core
//!
//! Stopwatches shared between peers without a server.
//!
//! ## Architecture
//!
//! - **Merge**: sorted-sequence set algebra every container merges through
//! - **CRDT**: grow-only sets, a max-score register and a last-writer-wins register
//! - **Transport**: many named channels multiplexed over one broadcast connection
//! - **Clock**: per-session offset mapping local time onto a shared timeline
//! - **Events**: the event-sourced stopwatch (`WatchModel`) and its reducer
//! - **Board**: a fixed set of named watches with marks and a local selection
//! - **Persistence**: checkpoints that survive restarts
//! - **Telemetry**: structured logging and Prometheus metrics

pub mod board;
pub mod clock;
pub mod config;
pub mod crdt;
pub mod error;
pub mod events;
pub mod inhibit;
pub mod merge;
pub mod persistence;
pub mod telemetry;
pub mod transport;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, Result, SyncError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::board::{format_seconds, Board, RECENT_MARKS};
    pub use crate::clock::{ClockOffset, ManualClock, SystemClock, WallClock};
    pub use crate::config::Config;
    pub use crate::crdt::{
        AddOnlySet, AddOnlySortedSet, HighScore, Latest, ListenerHandle, Replicated, Scored,
        Stamped, Subscription, Translator,
    };
    pub use crate::error::{ErrorCode, ErrorContext, Result, SyncError};
    pub use crate::events::{Event, EventKind, WatchModel, WatchState, WatchValue};
    pub use crate::inhibit::{InhibitGuard, LogPowerHook, PowerHook, SuspendInhibitor};
    pub use crate::merge::{MergeFlags, Comparator};
    pub use crate::persistence::{Checkpoint, JsonFilePersistence, MemoryPersistence, Persistence};
    pub use crate::telemetry::{init_telemetry, TelemetryConfig, TelemetryHandle};
    pub use crate::transport::{
        CatchUpOutcome, Delivery, HubConfig, MemoryHub, Multiplexer, PeerId, ReplicaChannel,
        Transport,
    };
}
