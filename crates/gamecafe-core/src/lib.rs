//! # Gamecafe Core Library
//!
//! Core logic for a gaming-cafe quota timer: each user holds a balance of
//! gaming minutes, a client-side countdown consumes it, and consumption is
//! written back to an authoritative Quota Store.
//!
//! The CLI binary and the quota server are thin layers over this crate.
//!
//! ## Architecture
//!
//! - **Session Timer**: a tick-driven countdown; the caller invokes `tick()`
//!   once per second
//! - **Checkpoint Synchronizer**: fire-and-forget usage writes on the tokio
//!   runtime
//! - **Quota Reconciler**: derives the countdown from the store at login,
//!   purchase and expiry
//! - **Quota Store**: SQLite ledger behind an HTTP API, plus its client
//!
//! ## Key Components
//!
//! - [`SessionTimer`]: countdown state machine
//! - [`QuotaReconciler`]: session lifecycle against the store
//! - [`QuotaStore`]: async store contract ([`HttpQuotaStore`], [`LocalQuotaStore`])
//! - [`QuotaService`]: authoritative store operations
//! - [`Config`]: TOML configuration

pub mod auth;
pub mod error;
pub mod events;
pub mod quota;
pub mod reconciler;
pub mod session;
pub mod storage;
pub mod sync;
pub mod timer;

pub use auth::{IssuedToken, TokenAuthority, TokenClaims};
pub use error::{AuthError, ConfigError, CoreError, DatabaseError, QuotaError, SessionError};
pub use events::Event;
pub use quota::{
    HttpQuotaStore, LocalQuotaStore, QuotaLedger, QuotaService, QuotaStore, UserQuota,
    DEFAULT_REGISTRATION_BONUS_MINUTES,
};
pub use reconciler::{QuotaReconciler, ReconcilerConfig, SessionPhase};
pub use session::SessionContext;
pub use storage::{Config, Database};
pub use sync::{Checkpoint, CheckpointReason, CheckpointSync, SyncStatus};
pub use timer::{SessionTimer, TickOutcome};
