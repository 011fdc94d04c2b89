use crate::limits::*;
use crate::model::*;
use crate::overlap::check_allocation;

use super::{AllocationGuard, EngineError};

pub(crate) fn validate_name(name: &str, what: &'static str) -> Result<(), EngineError> {
    if name.is_empty() {
        return Err(EngineError::LimitExceeded(what));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

/// Check ordering and range of one time log. `row` is 1-based.
pub(crate) fn validate_span(row: usize, span: &Span) -> Result<(), EngineError> {
    if span.start > span.end {
        return Err(EngineError::InvalidTimeLog {
            row,
            reason: "from time must not be after to time",
        });
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("time log too long"));
    }
    Ok(())
}

/// Validate every time log of a card and resolve each to the resource it books.
pub(crate) fn resolve_intervals(card: &JobCard) -> Result<Vec<TimeInterval>, EngineError> {
    if card.time_logs.len() > MAX_TIME_LOGS_PER_JOB_CARD {
        return Err(EngineError::LimitExceeded("too many time logs on job card"));
    }
    if let Some(ref w) = card.workstation {
        validate_name(w, "empty workstation name")?;
    }
    let mut intervals = Vec::with_capacity(card.time_logs.len());
    for (i, log) in card.time_logs.iter().enumerate() {
        let row = i + 1;
        validate_span(row, &log.span())?;
        if log.completed_qty > MAX_QTY {
            return Err(EngineError::LimitExceeded("completed qty too large"));
        }
        if let Some(ref e) = log.employee {
            validate_name(e, "empty employee name")?;
        }
        let resource_id = log
            .resource(card.workstation.as_deref())
            .ok_or(EngineError::MissingResource { row })?;
        intervals.push(TimeInterval {
            resource_id,
            record_id: card.id,
            span: log.span(),
        });
    }
    Ok(intervals)
}

/// The card must still point at the operation row it was created for, and
/// that row must exist on its work order with the same operation.
pub(crate) fn check_operation(card: &JobCard, work_order: &WorkOrder) -> Result<(), EngineError> {
    match work_order.operation(card.operation_id) {
        Some(op) if card.operation_id == card.operation_row && op.operation == card.operation => Ok(()),
        _ => Err(EngineError::OperationMismatch {
            job_card: card.id,
            operation_id: card.operation_id,
            work_order: work_order.id,
        }),
    }
}

pub(crate) fn check_quantity(card: &JobCard) -> Result<(), EngineError> {
    let completed = card.total_completed_qty();
    if completed > card.for_quantity {
        return Err(EngineError::QuantityExceeded {
            for_quantity: card.for_quantity,
            completed,
        });
    }
    Ok(())
}

/// Quantity rules that only apply when finalizing a card.
pub(crate) fn check_submittable(card: &JobCard) -> Result<(), EngineError> {
    if card.time_logs.is_empty() {
        return Err(EngineError::NoTimeLogs(card.id));
    }
    let completed = card.total_completed_qty();
    if completed == 0 || completed != card.for_quantity {
        return Err(EngineError::QuantityMismatch {
            for_quantity: card.for_quantity,
            completed,
        });
    }
    Ok(())
}

/// Check each candidate against the locked allocation of its resource.
/// `guards` must cover every resource the candidates book.
pub(crate) fn check_no_overlap(
    candidates: &[TimeInterval],
    guards: &[AllocationGuard],
) -> Result<(), EngineError> {
    for candidate in candidates {
        for guard in guards {
            if let Err(e) = check_allocation(candidate, guard) {
                metrics::counter!(
                    crate::observability::OVERLAP_REJECTIONS_TOTAL,
                    "resource_kind" => candidate.resource_id.kind()
                )
                .increment(1);
                return Err(e.into());
            }
        }
    }
    Ok(())
}
