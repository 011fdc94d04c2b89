use crate::model::{Ms, Qty};

/// Max length of workstation, employee, operation and item names.
pub const MAX_NAME_LEN: usize = 140;

pub const MAX_OPERATIONS_PER_WORK_ORDER: usize = 256;

pub const MAX_TIME_LOGS_PER_JOB_CARD: usize = 1024;

/// Upper bound on a work order quantity.
pub const MAX_QTY: Qty = 1_000_000_000;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;

/// 9999-12-31T23:59:59.999Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;

/// A single time log may not span more than 31 days.
pub const MAX_SPAN_DURATION_MS: Ms = 31 * 24 * 3_600_000;
