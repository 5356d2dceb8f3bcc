use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ErrorType};
use crate::model::RequestStatus;
use crate::shared::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Loading,
    Adding,
    Deleting,
    Updating,
    Saving,
    Usage,
    Downloading,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub error_type: ErrorType,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Read-only view of the aggregator handed to the view layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub loading_status: RequestStatus,
    pub adding_status: RequestStatus,
    pub deleting_status: RequestStatus,
    pub updating_status: RequestStatus,
    pub saving_status: RequestStatus,
    pub usage_status: RequestStatus,
    pub downloading_status: RequestStatus,
    pub errors: BTreeMap<ErrorType, Vec<ErrorRecord>>,
    pub is_error_modal_open: bool,
}

impl StatusSnapshot {
    fn slot_mut(&mut self, slot: Slot) -> &mut RequestStatus {
        match slot {
            Slot::Loading => &mut self.loading_status,
            Slot::Adding => &mut self.adding_status,
            Slot::Deleting => &mut self.deleting_status,
            Slot::Updating => &mut self.updating_status,
            Slot::Saving => &mut self.saving_status,
            Slot::Usage => &mut self.usage_status,
            Slot::Downloading => &mut self.downloading_status,
        }
    }

    pub fn slot(&self, slot: Slot) -> RequestStatus {
        match slot {
            Slot::Loading => self.loading_status,
            Slot::Adding => self.adding_status,
            Slot::Deleting => self.deleting_status,
            Slot::Updating => self.updating_status,
            Slot::Saving => self.saving_status,
            Slot::Usage => self.usage_status,
            Slot::Downloading => self.downloading_status,
        }
    }
}

/// Process-wide status and error state for one page session.
#[derive(Debug, Default)]
pub struct StatusBoard {
    inner: Mutex<StatusSnapshot>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, slot: Slot, status: RequestStatus) {
        *lock(&self.inner).slot_mut(slot) = status;
    }

    pub fn get(&self, slot: Slot) -> RequestStatus {
        lock(&self.inner).slot(slot)
    }

    pub fn push_error(&self, error_type: ErrorType, message: impl Into<String>) {
        let record = ErrorRecord {
            error_type,
            message: message.into(),
            at: Utc::now(),
        };
        lock(&self.inner)
            .errors
            .entry(error_type)
            .or_default()
            .push(record);
    }

    /// Settle `slot` after a failed remote call. A permission failure becomes
    /// `denied` and records nothing; anything else is `failed` plus an error entry.
    pub fn fail(&self, slot: Slot, error_type: ErrorType, err: &ApiError) -> RequestStatus {
        if err.is_permission() {
            self.set(slot, RequestStatus::Denied);
            return RequestStatus::Denied;
        }
        let mut inner = lock(&self.inner);
        *inner.slot_mut(slot) = RequestStatus::Failed;
        inner
            .errors
            .entry(error_type)
            .or_default()
            .push(ErrorRecord {
                error_type,
                message: err.to_string(),
                at: Utc::now(),
            });
        RequestStatus::Failed
    }

    /// Clear only the entry for `error_type`.
    pub fn reset_errors(&self, error_type: ErrorType) {
        lock(&self.inner).errors.remove(&error_type);
    }

    pub fn errors(&self, error_type: ErrorType) -> Vec<ErrorRecord> {
        lock(&self.inner)
            .errors
            .get(&error_type)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_error_modal_open(&self, open: bool) {
        lock(&self.inner).is_error_modal_open = open;
    }

    pub fn is_error_modal_open(&self) -> bool {
        lock(&self.inner).is_error_modal_open
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        lock(&self.inner).clone()
    }
}
