mod engine;

pub use engine::{SessionTimer, TickOutcome, DEFAULT_CHECKPOINT_INTERVAL_SECS};
