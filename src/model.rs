use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Whole units of the produced item.
pub type Qty = u64;

const MS_PER_MINUTE: f64 = 60_000.0;

/// Half-open interval `[start, end)`. `start == end` is a zero-duration span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start <= end, "Span start must not be after end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Strict intersection. Touching endpoints do not overlap and a
    /// zero-duration span overlaps nothing, itself included.
    pub fn overlaps(&self, other: &Span) -> bool {
        !self.is_empty() && !other.is_empty() && self.start < other.end && other.start < self.end
    }
}

/// The entity whose time must not be double-booked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceId {
    Employee(String),
    Workstation(String),
}

impl ResourceId {
    pub fn kind(&self) -> &'static str {
        match self {
            ResourceId::Employee(_) => "employee",
            ResourceId::Workstation(_) => "workstation",
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::Employee(name) => write!(f, "employee {name}"),
            ResourceId::Workstation(name) => write!(f, "workstation {name}"),
        }
    }
}

/// A span of a resource's time, owned by one job card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub resource_id: ResourceId,
    pub record_id: Ulid,
    pub span: Span,
}

/// Every persisted interval of one resource across all job cards,
/// sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct ResourceAllocation {
    pub resource_id: ResourceId,
    pub intervals: Vec<TimeInterval>,
}

impl ResourceAllocation {
    pub fn new(resource_id: ResourceId) -> Self {
        Self {
            resource_id,
            intervals: Vec::new(),
        }
    }

    /// Insert interval maintaining sort order by span.start.
    pub fn insert_interval(&mut self, interval: TimeInterval) {
        let pos = self
            .intervals
            .binary_search_by_key(&interval.span.start, |i| i.span.start)
            .unwrap_or_else(|e| e);
        self.intervals.insert(pos, interval);
    }

    /// Drop every interval owned by `record_id`. Returns how many were removed.
    pub fn remove_record(&mut self, record_id: Ulid) -> usize {
        let before = self.intervals.len();
        self.intervals.retain(|i| i.record_id != record_id);
        before - self.intervals.len()
    }

    /// Swap a record's intervals on this resource for a new set.
    /// Intervals for other resources are ignored.
    pub fn replace_record<'a>(
        &mut self,
        record_id: Ulid,
        intervals: impl IntoIterator<Item = &'a TimeInterval>,
    ) {
        self.remove_record(record_id);
        for interval in intervals {
            if interval.resource_id == self.resource_id {
                self.insert_interval(interval.clone());
            }
        }
    }

    /// Return only intervals whose span intersects the query window.
    /// Uses binary search to skip intervals starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &TimeInterval> {
        let right_bound = self
            .intervals
            .partition_point(|i| i.span.start < query.end);
        self.intervals[..right_bound]
            .iter()
            .filter(move |i| i.span.end > query.start)
    }

    /// The allocation as seen by `record_id`: everything except its own rows.
    pub fn excluding(&self, record_id: Ulid) -> impl Iterator<Item = &TimeInterval> {
        self.intervals.iter().filter(move |i| i.record_id != record_id)
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }
}

// ── Job cards ────────────────────────────────────────────────────

/// One row of work logged against a job card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeLog {
    pub id: Ulid,
    pub from_time: Ms,
    pub to_time: Ms,
    pub employee: Option<String>,
    pub completed_qty: Qty,
}

impl TimeLog {
    pub fn new(from_time: Ms, to_time: Ms, employee: Option<String>, completed_qty: Qty) -> Self {
        Self {
            id: Ulid::new(),
            from_time,
            to_time,
            employee,
            completed_qty,
        }
    }

    /// Raw span, not checked for ordering. Validate before indexing.
    pub fn span(&self) -> Span {
        Span {
            start: self.from_time,
            end: self.to_time,
        }
    }

    pub fn time_in_mins(&self) -> f64 {
        (self.to_time - self.from_time).max(0) as f64 / MS_PER_MINUTE
    }

    /// The employee if one is logged, else the job card's workstation.
    pub fn resource(&self, workstation: Option<&str>) -> Option<ResourceId> {
        match (&self.employee, workstation) {
            (Some(e), _) => Some(ResourceId::Employee(e.clone())),
            (None, Some(w)) => Some(ResourceId::Workstation(w.to_string())),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocStatus {
    Draft,
    Submitted,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobCardStatus {
    Open,
    WorkInProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCard {
    pub id: Ulid,
    pub work_order_id: Ulid,
    /// Operation row the card was created for. Never changes.
    pub operation_row: Ulid,
    /// Operation row as last saved. Must equal `operation_row`.
    pub operation_id: Ulid,
    /// Operation name copied from the row at creation.
    pub operation: String,
    pub workstation: Option<String>,
    pub for_quantity: Qty,
    pub time_logs: Vec<TimeLog>,
    pub docstatus: DocStatus,
}

impl JobCard {
    pub fn status(&self) -> JobCardStatus {
        match self.docstatus {
            DocStatus::Cancelled => JobCardStatus::Cancelled,
            DocStatus::Submitted => JobCardStatus::Completed,
            DocStatus::Draft if self.time_logs.is_empty() => JobCardStatus::Open,
            DocStatus::Draft => JobCardStatus::WorkInProgress,
        }
    }

    /// Saturates, so absurd row quantities can never wrap into range.
    pub fn total_completed_qty(&self) -> Qty {
        self.time_logs
            .iter()
            .fold(0, |acc: Qty, l| acc.saturating_add(l.completed_qty))
    }

    pub fn total_time_in_mins(&self) -> f64 {
        self.time_logs.iter().map(|l| l.time_in_mins()).sum()
    }

    /// Overwrite the editable fields.
    pub fn apply_update(&mut self, update: &JobCardUpdate) {
        self.operation_id = update.operation_id;
        self.workstation = update.workstation.clone();
        self.time_logs = update.time_logs.clone();
    }

    /// The card's time logs as resource intervals. Rows with no
    /// resolvable resource are skipped.
    pub fn intervals(&self) -> Vec<TimeInterval> {
        self.time_logs
            .iter()
            .filter_map(|log| {
                log.resource(self.workstation.as_deref()).map(|resource_id| TimeInterval {
                    resource_id,
                    record_id: self.id,
                    span: log.span(),
                })
            })
            .collect()
    }

    /// Distinct resources the card's time logs book, sorted.
    pub fn resources(&self) -> Vec<ResourceId> {
        let mut ids: Vec<ResourceId> = self.intervals().into_iter().map(|i| i.resource_id).collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// The editable part of a draft job card, as sent on save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCardUpdate {
    pub operation_id: Ulid,
    pub workstation: Option<String>,
    pub time_logs: Vec<TimeLog>,
}

impl From<&JobCard> for JobCardUpdate {
    fn from(card: &JobCard) -> Self {
        Self {
            operation_id: card.operation_id,
            workstation: card.workstation.clone(),
            time_logs: card.time_logs.clone(),
        }
    }
}

// ── Work orders ──────────────────────────────────────────────────

/// Operation row as given when creating a work order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRow {
    pub id: Ulid,
    pub operation: String,
    pub workstation: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    Pending,
    WorkInProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkOrderOperation {
    pub id: Ulid,
    pub operation: String,
    pub workstation: Option<String>,
    pub completed_qty: Qty,
    pub actual_start_time: Option<Ms>,
    pub actual_end_time: Option<Ms>,
    pub actual_operation_time_mins: f64,
    pub status: OperationStatus,
}

impl From<&OperationRow> for WorkOrderOperation {
    fn from(row: &OperationRow) -> Self {
        Self {
            id: row.id,
            operation: row.operation.clone(),
            workstation: row.workstation.clone(),
            completed_qty: 0,
            actual_start_time: None,
            actual_end_time: None,
            actual_operation_time_mins: 0.0,
            status: OperationStatus::Pending,
        }
    }
}

/// What one submitted job card contributes to its operation row.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub operation_id: Ulid,
    pub completed_qty: Qty,
    pub from_time: Option<Ms>,
    pub to_time: Option<Ms>,
    pub time_in_mins: f64,
}

impl From<&JobCard> for Completion {
    fn from(card: &JobCard) -> Self {
        Self {
            operation_id: card.operation_id,
            completed_qty: card.total_completed_qty(),
            from_time: card.time_logs.iter().map(|l| l.from_time).min(),
            to_time: card.time_logs.iter().map(|l| l.to_time).max(),
            time_in_mins: card.total_time_in_mins(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkOrder {
    pub id: Ulid,
    pub production_item: String,
    pub qty: Qty,
    pub operations: Vec<WorkOrderOperation>,
    /// Submitted job card → its contribution. Rebuilt on replay.
    #[serde(skip)]
    pub completions: HashMap<Ulid, Completion>,
}

impl WorkOrder {
    pub fn new(id: Ulid, production_item: String, qty: Qty, rows: &[OperationRow]) -> Self {
        Self {
            id,
            production_item,
            qty,
            operations: rows.iter().map(WorkOrderOperation::from).collect(),
            completions: HashMap::new(),
        }
    }

    pub fn operation(&self, operation_id: Ulid) -> Option<&WorkOrderOperation> {
        self.operations.iter().find(|op| op.id == operation_id)
    }

    /// Record (or replace) a submitted card's contribution.
    pub fn record_completion(&mut self, card: &JobCard) {
        let previous = self.completions.insert(card.id, Completion::from(card));
        if let Some(prev) = previous
            && prev.operation_id != card.operation_id
        {
            self.recompute(prev.operation_id);
        }
        self.recompute(card.operation_id);
    }

    pub fn clear_completion(&mut self, card_id: Ulid) {
        if let Some(prev) = self.completions.remove(&card_id) {
            self.recompute(prev.operation_id);
        }
    }

    /// Rebuild one operation row's aggregates from scratch.
    fn recompute(&mut self, operation_id: Ulid) {
        let qty = self.qty;
        let contributions: Vec<&Completion> = self
            .completions
            .values()
            .filter(|c| c.operation_id == operation_id)
            .collect();
        let completed_qty = contributions
            .iter()
            .fold(0, |acc: Qty, c| acc.saturating_add(c.completed_qty));
        let start = contributions.iter().filter_map(|c| c.from_time).min();
        let end = contributions.iter().filter_map(|c| c.to_time).max();
        let mins: f64 = contributions.iter().map(|c| c.time_in_mins).sum();

        let Some(op) = self.operations.iter_mut().find(|op| op.id == operation_id) else {
            return;
        };
        op.completed_qty = completed_qty;
        op.actual_start_time = start;
        op.actual_end_time = end;
        op.actual_operation_time_mins = mins;
        op.status = if completed_qty == 0 {
            OperationStatus::Pending
        } else if completed_qty >= qty {
            OperationStatus::Completed
        } else {
            OperationStatus::WorkInProgress
        };
    }
}

/// The event types, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    WorkstationCreated {
        name: String,
    },
    WorkOrderCreated {
        id: Ulid,
        production_item: String,
        qty: Qty,
        operations: Vec<OperationRow>,
    },
    JobCardCreated {
        id: Ulid,
        work_order_id: Ulid,
        operation_id: Ulid,
        operation: String,
        workstation: Option<String>,
        for_quantity: Qty,
    },
    JobCardSaved {
        id: Ulid,
        update: JobCardUpdate,
    },
    JobCardSubmitted {
        id: Ulid,
    },
    JobCardCancelled {
        id: Ulid,
    },
    JobCardDeleted {
        id: Ulid,
    },
}
