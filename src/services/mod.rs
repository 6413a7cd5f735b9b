pub mod audit;
pub mod conversation;
pub mod crisis;
pub mod prompt;
pub mod retention;

pub use crisis::{CrisisDetector, CrisisMatch};
pub use retention::{days_after, run_retention_sweep, spawn_retention_task, SweepError};
