//! # BadgeFlow Scheduler
//!
//! Executes scheduled community automations: badge awarders that scan recent
//! content, and generative automations that publish posts from an external
//! service.
//!
//! ## Design Principles
//! - One atomic `try_begin_run` per record; no in-process locks between workers
//! - Explicit `RunContext` (time, sub-community), nothing ambient
//! - Every external call bounded by a timeout
//! - Failures come back as outcomes and mark the record failed, never panic
//!
//! ## Architecture
//! ```text
//! Runner (tokio interval)
//!   └── due automations ─ buffer_unordered(max_concurrent_runs)
//!         ├── try_begin_run ─ false → AlreadyRunning
//!         ├── ContentBadge     ┐
//!         ├── FirstPostBadge   ├─ window → filters → oracle → achievement
//!         ├── ThreadBadge      ┘
//!         ├── Generative* → AdapterRegistry → generate → publish
//!         └── complete_run | fail_run (next_run_at from cadence)
//! ```

pub mod awarders;
pub mod cadence;
pub mod calls;
pub mod context;
pub mod filters;
pub mod generative;
pub mod persistence;
pub mod runner;
pub mod state;
pub mod window;

#[cfg(test)]
pub(crate) mod testing;

pub use awarders::{AwardOutcome, BadgeAwarder};
pub use context::{RunContext, Services};
pub use generative::{AdapterRegistry, GenerativeExecutor, GenerativeOutcome};
pub use persistence::SqliteStore;
pub use runner::{AutomationRunner, RunReport, spawn_runner};
pub use state::{RunState, compute_next_run_time};
