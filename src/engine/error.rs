use ulid::Ulid;

use crate::model::Qty;
use crate::overlap::OverlapError;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    WorkstationExists(String),
    UnknownWorkstation(String),
    Overlap(OverlapError),
    OperationMismatch {
        job_card: Ulid,
        operation_id: Ulid,
        work_order: Ulid,
    },
    /// `row` is 1-based, matching how time logs are numbered to users.
    InvalidTimeLog {
        row: usize,
        reason: &'static str,
    },
    MissingResource {
        row: usize,
    },
    InvalidQuantity(&'static str),
    QuantityExceeded {
        for_quantity: Qty,
        completed: Qty,
    },
    QuantityMismatch {
        for_quantity: Qty,
        completed: Qty,
    },
    NoTimeLogs(Ulid),
    NotDraft(Ulid),
    NotSubmitted(Ulid),
    NotDeletable(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::WorkstationExists(_) => "workstation_exists",
            EngineError::UnknownWorkstation(_) => "unknown_workstation",
            EngineError::Overlap(_) => "overlap",
            EngineError::OperationMismatch { .. } => "operation_mismatch",
            EngineError::InvalidTimeLog { .. } => "invalid_time_log",
            EngineError::MissingResource { .. } => "missing_resource",
            EngineError::InvalidQuantity(_) => "invalid_quantity",
            EngineError::QuantityExceeded { .. } => "quantity_exceeded",
            EngineError::QuantityMismatch { .. } => "quantity_mismatch",
            EngineError::NoTimeLogs(_) => "no_time_logs",
            EngineError::NotDraft(_) => "not_draft",
            EngineError::NotSubmitted(_) => "not_submitted",
            EngineError::NotDeletable(_) => "not_deletable",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "wal_error",
        }
    }
}

impl From<OverlapError> for EngineError {
    fn from(e: OverlapError) -> Self {
        EngineError::Overlap(e)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::WorkstationExists(name) => {
                write!(f, "workstation already exists: {name}")
            }
            EngineError::UnknownWorkstation(name) => write!(f, "unknown workstation: {name}"),
            EngineError::Overlap(e) => write!(f, "time log overlaps: {e}"),
            EngineError::OperationMismatch {
                job_card,
                operation_id,
                work_order,
            } => write!(
                f,
                "job card {job_card}: operation {operation_id} does not belong to work order {work_order}"
            ),
            EngineError::InvalidTimeLog { row, reason } => write!(f, "row #{row}: {reason}"),
            EngineError::MissingResource { row } => {
                write!(f, "row #{row}: time log needs an employee or a workstation")
            }
            EngineError::InvalidQuantity(msg) => write!(f, "invalid quantity: {msg}"),
            EngineError::QuantityExceeded {
                for_quantity,
                completed,
            } => write!(
                f,
                "completed qty {completed} exceeds qty to manufacture {for_quantity}"
            ),
            EngineError::QuantityMismatch {
                for_quantity,
                completed,
            } => write!(
                f,
                "completed qty {completed} must equal qty to manufacture {for_quantity}"
            ),
            EngineError::NoTimeLogs(id) => write!(f, "job card {id} has no time logs"),
            EngineError::NotDraft(id) => write!(f, "job card {id} is not a draft"),
            EngineError::NotSubmitted(id) => write!(f, "job card {id} is not submitted"),
            EngineError::NotDeletable(id) => {
                write!(f, "job card {id} is submitted; cancel it before deleting")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Overlap(e) => Some(e),
            _ => None,
        }
    }
}
