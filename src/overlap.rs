//! Interval-overlap conflict detection for resource time slots.
//!
//! Pure functions over caller-supplied snapshots: nothing here locks,
//! persists, or reads engine state.

use std::fmt;

use ulid::Ulid;

use crate::model::{ResourceAllocation, ResourceId, TimeInterval};

/// A candidate interval collides with an interval already held by another record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlapError {
    pub candidate: TimeInterval,
    pub conflicting: TimeInterval,
}

impl OverlapError {
    pub fn resource(&self) -> &ResourceId {
        &self.candidate.resource_id
    }

    /// The job card that already holds the slot.
    pub fn conflicting_record(&self) -> Ulid {
        self.conflicting.record_id
    }
}

impl fmt::Display for OverlapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} is already booked in [{}, {}) by job card {}",
            self.candidate.resource_id,
            self.conflicting.span.start,
            self.conflicting.span.end,
            self.conflicting.record_id
        )
    }
}

impl std::error::Error for OverlapError {}

/// Fail on the first interval in `existing` that books the candidate's
/// resource during any part of the candidate's span.
///
/// Zero-duration candidates always pass. Intervals on other resources are
/// ignored. The caller decides what `existing` holds, including whether the
/// candidate's own record is excluded.
pub fn check<'a>(
    candidate: &TimeInterval,
    existing: impl IntoIterator<Item = &'a TimeInterval>,
) -> Result<(), OverlapError> {
    if candidate.span.is_empty() {
        return Ok(());
    }
    for other in existing {
        if other.resource_id == candidate.resource_id && other.span.overlaps(&candidate.span) {
            return Err(OverlapError {
                candidate: candidate.clone(),
                conflicting: other.clone(),
            });
        }
    }
    Ok(())
}

/// Indexed variant of [`check`] against one resource's allocation.
/// Only intervals intersecting the candidate are scanned, and intervals
/// owned by the candidate's record are skipped.
pub fn check_allocation(
    candidate: &TimeInterval,
    allocation: &ResourceAllocation,
) -> Result<(), OverlapError> {
    if allocation.resource_id != candidate.resource_id {
        return Ok(());
    }
    check(
        candidate,
        allocation
            .overlapping(&candidate.span)
            .filter(|i| i.record_id != candidate.record_id),
    )
}
