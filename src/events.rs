//! Typed progress and completion events.
//!
//! Every phase reports upward through one [`EventQueue`] that the
//! orchestration layer drains after each call or tick. Phase completion is
//! carried by a result struct per phase.

use crate::identifier::ResourceId;
use std::collections::VecDeque;
use std::path::PathBuf;

// =============================================================================
// Phase Results
// =============================================================================

/// Outcome of fetching the target manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestUpdateResult {
    Updated { path: PathBuf, uri: String },
    Failed { uri: String, reason: String },
}

/// Outcome of an integrity verification pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyComplete {
    /// True if every recorded resource matched its bytes on disk.
    pub ok: bool,
    pub verified_count: usize,
    pub failed_count: usize,
}

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CheckComplete {
    pub moved_count: usize,
    pub removed_count: usize,
    pub update_count: usize,
    pub update_total_length: u64,
    pub update_total_compressed_length: u64,
}

/// Outcome of applying a resource pack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyComplete {
    pub path: PathBuf,
    /// False if any entry failed verification.
    pub ok: bool,
    pub applied_count: usize,
}

/// Outcome of a group update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateComplete {
    pub group: String,
    /// False if any resource in the group exhausted its retries.
    pub ok: bool,
}

// =============================================================================
// Events
// =============================================================================

/// Everything the engine reports upward.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ManifestUpdate(ManifestUpdateResult),

    VerifyStart { count: usize, total_length: u64 },
    VerifySuccess { id: ResourceId, length: u32 },
    VerifyFailure { id: ResourceId, reason: String },
    VerifyComplete(VerifyComplete),

    CheckComplete(CheckComplete),

    ApplyStart { path: PathBuf, count: usize, total_length: u64 },
    ApplySuccess { id: ResourceId, length: u32, compressed_length: u32 },
    ApplyFailure { id: ResourceId, reason: String },
    ApplyComplete(ApplyComplete),

    UpdateStart { id: ResourceId, uri: String, retry_count: u32 },
    UpdateProgress { id: ResourceId, current_length: u64 },
    UpdateSuccess { id: ResourceId, length: u32, compressed_length: u32 },
    UpdateFailure {
        id: ResourceId,
        uri: String,
        retry_count: u32,
        max_retries: u32,
        reason: String,
    },
    UpdateComplete(UpdateComplete),
}

/// FIFO of pending events.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<Event>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        self.events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Removes and returns all pending events in emission order.
    pub fn drain(&mut self) -> Vec<Event> {
        self.events.drain(..).collect()
    }
}
