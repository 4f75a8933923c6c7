//! Optimistic concurrency for queue and ticket mutations.
//!
//! Callers pass the `updatedAt` they last saw. A mismatch is rejected before
//! the mutation runs; otherwise the mutation is applied to a copy whose
//! `updated_at` is advanced past the stored value. Stores then write the copy
//! with a compare-and-swap on the previous `updated_at`.

use chrono::{DateTime, Utc};

use shared_utils::time::{advance_timestamp, truncate_micros};

use crate::error::QueueError;
use crate::models::{Queue, QueueTicket};

pub trait Versioned: Clone {
    fn updated_at(&self) -> DateTime<Utc>;
    fn set_updated_at(&mut self, at: DateTime<Utc>);
}

impl Versioned for Queue {
    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn set_updated_at(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

impl Versioned for QueueTicket {
    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn set_updated_at(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

pub fn check_version<T: Versioned>(
    entity: &T,
    expected_updated_at: Option<DateTime<Utc>>,
) -> Result<(), QueueError> {
    match expected_updated_at {
        Some(expected) if truncate_micros(expected) != truncate_micros(entity.updated_at()) => {
            Err(QueueError::OptimisticLockConflict {
                expected,
                actual: entity.updated_at(),
            })
        }
        _ => Ok(()),
    }
}

pub fn check_and_apply<T, F>(
    entity: &T,
    expected_updated_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    mutation: F,
) -> Result<T, QueueError>
where
    T: Versioned,
    F: FnOnce(&mut T) -> Result<(), QueueError>,
{
    check_version(entity, expected_updated_at)?;

    let mut next = entity.clone();
    mutation(&mut next)?;
    next.set_updated_at(advance_timestamp(entity.updated_at(), now));
    Ok(next)
}
