use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::coordinator::UploadCoordinator;
use crate::error::ErrorType;
use crate::model::{RequestStatus, ResourceId, ResourceStatus};
use crate::shared::lock;
use crate::status::Slot;

impl UploadCoordinator {
    /// Force every in-flight upload to `failed`, empty the ledger and stop the
    /// running transfers. Returns how many uploads were cancelled; calling it
    /// again, or after the batch settled, does nothing and returns 0.
    pub fn cancel_all(&self) -> usize {
        let mut ledger = lock(&self.ledger);
        let cancelled = ledger.fail_all();
        if cancelled.is_empty() {
            return 0;
        }

        for entry in &cancelled {
            self.registry
                .transition(&ResourceId::Transient(entry.transient_id), ResourceStatus::Failed);
            tracing::debug!(transient_id = %entry.transient_id, name = %entry.input.name, "upload cancelled");
        }
        let previous = std::mem::replace(&mut *lock(&self.epoch), CancellationToken::new());
        previous.cancel();

        self.status.push_error(
            ErrorType::Add,
            format!("{} upload(s) cancelled before completion", cancelled.len()),
        );
        self.status.set(Slot::Adding, RequestStatus::Failed);
        self.batch_tx.send_replace(ledger.status());
        tracing::warn!(count = cancelled.len(), "cancelled in-flight uploads");
        cancelled.len()
    }
}

/// Shutdown hook the host calls when the page (or process) goes away.
///
/// The hook may fire more than once; after the first call there is nothing left
/// to cancel. Dropping the guard fires it too.
pub struct UnloadGuard {
    coordinator: Arc<UploadCoordinator>,
}

impl UnloadGuard {
    pub fn new(coordinator: Arc<UploadCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Mark in-flight uploads failed. Returns true when uploads were still
    /// running, i.e. the host should ask the user to confirm leaving.
    pub fn on_unload(&self) -> bool {
        let cancelled = self.coordinator.cancel_all();
        if cancelled > 0 {
            tracing::info!(cancelled, "unload interrupted uploads");
        }
        cancelled > 0
    }
}

impl Drop for UnloadGuard {
    fn drop(&mut self) {
        self.on_unload();
    }
}
