//! Per-request deadline shared by every collaborator call.

use std::{future::Future, time::Duration};
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("deadline exceeded during {operation}")]
pub struct DeadlineExceeded {
    pub operation: &'static str,
}

/// Absolute point in time by which a request must have finished talking to
/// its dependencies. Futures that miss it are dropped, which releases the
/// connection they held.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self(Instant::now() + budget)
    }

    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Run `fut` until completion or until the deadline passes. A deadline
    /// that has already passed does not poll `fut` at all.
    pub async fn run<F, T>(&self, operation: &'static str, fut: F) -> Result<T, DeadlineExceeded>
    where
        F: Future<Output = T>,
    {
        if self.is_expired() {
            return Err(DeadlineExceeded { operation });
        }
        tokio::time::timeout_at(self.0, fut)
            .await
            .map_err(|_| DeadlineExceeded { operation })
    }
}
