//! Bulk uploads: validation, the in-flight ledger, task scheduling, thumbnail
//! follow-ups and cancellation.

pub mod coordinator;
pub mod guard;
pub mod ledger;
pub mod queue;
pub mod thumbnail;
pub mod validate;

pub use coordinator::{ConflictResolution, UploadCoordinator, UploadSnapshot};
pub use guard::UnloadGuard;
pub use ledger::{AttemptStatus, UploadRow};
