//! # Herald Engine
//!
//! Bulk remote operations for a bot admin: push one message to every user or
//! channel, or ban/unban one user across every moderated channel, without
//! tripping the remote API's rate limits.
//!
//! ## Architecture
//! ```text
//! Broadcaster / ChannelModerator
//!   ├── RunRegistry.start(kind) ── one RunHandle per kind, else AlreadyRunning
//!   ├── BatchExecutor: windows of N targets, all in flight, delay between
//!   │     └── per target: RateGate.acquire → remote call → classify
//!   │           ├── 429 → wait retry_after, same target again
//!   │           ├── 401/403/404 → permanent failure
//!   │           └── other → unknown failure
//!   ├── after each window: ProgressReporter edits the status message
//!   ├── SummaryBuilder: operator text + audit text + PNG chart
//!   └── DeferredScheduler: timed, gated deletions, outliving the run
//! ```

pub mod batch;
pub mod broadcast;
pub mod cache;
pub mod chart;
pub mod deferred;
pub mod membership;
pub mod moderation;
pub mod progress;
pub mod rate_gate;
pub mod retry;
pub mod run_state;
pub mod store;
pub mod summary;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::{BatchExecutor, BatchReport, RunOutcome};
pub use broadcast::{BroadcastRequest, BroadcastSettings, Broadcaster};
pub use cache::TargetCache;
pub use deferred::{DeferredAction, DeferredOutcome, DeferredScheduler};
pub use membership::{MembershipEvent, MembershipTracker};
pub use moderation::{ChannelModerator, ModerationAction, ModerationReport, ModerationSettings};
pub use progress::ProgressReporter;
pub use rate_gate::RateGate;
pub use retry::{Disposition, ErrorKind, classify};
pub use run_state::{CancelOutcome, RunRegistry, RunSnapshot, RunStatus};
pub use store::{JsonRepository, TrackedChannel};
pub use summary::Summary;
