//! Checkpoint synchronization.
//!
//! Consumed time flows one way, from the session timer to the Quota Store.
//! Reports are cumulative, so a lost write is repaired by the next one.

pub mod checkpoint;
pub mod types;

pub use checkpoint::CheckpointSync;
pub use types::{elapsed_minutes, Checkpoint, CheckpointReason, SyncStatus};
