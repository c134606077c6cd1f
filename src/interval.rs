//! Call intervals in epoch seconds

use crate::error::InvalidIntervalError;

/// The span of one call, inclusive at both ends
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallInterval {
    pub id: String,
    pub start_epoch: i64,
    pub end_epoch: i64,
}

impl CallInterval {
    /// Create an interval; ordering is checked by [`CallInterval::validate`]
    pub fn new(id: impl Into<String>, start_epoch: i64, end_epoch: i64) -> Self {
        Self {
            id: id.into(),
            start_epoch,
            end_epoch,
        }
    }

    /// Reject intervals whose end precedes their start
    pub fn validate(&self) -> Result<(), InvalidIntervalError> {
        if self.end_epoch < self.start_epoch {
            return Err(InvalidIntervalError {
                id: self.id.clone(),
                start_epoch: self.start_epoch,
                end_epoch: self.end_epoch,
            });
        }
        Ok(())
    }

    /// Call duration in seconds (end minus start)
    pub fn duration_secs(&self) -> i64 {
        self.end_epoch - self.start_epoch
    }

    pub fn is_zero_duration(&self) -> bool {
        self.start_epoch == self.end_epoch
    }
}
