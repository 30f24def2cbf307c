//! Transaction identifiers for MBAP exchanges.

use std::sync::{Mutex, PoisonError};

use crate::LinkError;

pub const DEFAULT_MAX_TRANSACTION_ID: u16 = 65534;

/// A shared, internally locked transaction id counter.
///
/// Ids run from 1 to `max` and wrap back to 1; 0 is never produced because
/// a zero id means "don't care" during response matching. One sequence is
/// usually shared by every transaction on a connection.
#[derive(Debug)]
pub struct TransactionIdSequence {
    max: u16,
    current: Mutex<u16>,
}

impl TransactionIdSequence {
    pub fn new() -> Self {
        Self {
            max: DEFAULT_MAX_TRANSACTION_ID,
            current: Mutex::new(1),
        }
    }

    pub fn with_max(max: u16) -> Result<Self, LinkError> {
        if max == 0 {
            return Err(LinkError::Config(
                "maximum transaction id must be at least 1".into(),
            ));
        }
        Ok(Self {
            max,
            current: Mutex::new(1),
        })
    }

    pub fn max(&self) -> u16 {
        self.max
    }

    /// The id the next request will carry.
    pub fn current(&self) -> u16 {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves to the next id and returns it.
    pub fn advance(&self) -> u16 {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        *current = if *current >= self.max { 1 } else { *current + 1 };
        *current
    }
}

impl Default for TransactionIdSequence {
    fn default() -> Self {
        Self::new()
    }
}
