use std::time::Duration;

use alloy_primitives::B256;
use tokio::time::{Instant, sleep};

use super::{LifecycleError, Stage};
use crate::config::DEFAULT_INCLUSION_TIMEOUT;
use crate::provider::{BundlerProvider, Outcome};

/// Handle on an operation the bundler accepted.
#[derive(Debug)]
pub struct SubmittedUserOperation<'b, B: ?Sized> {
    user_op_hash:  B256,
    bundler:       &'b B,
    poll_interval: Duration,
}

impl<'b, B: BundlerProvider + ?Sized> SubmittedUserOperation<'b, B> {
    pub fn new(user_op_hash: B256, bundler: &'b B, poll_interval: Duration) -> Self {
        Self { user_op_hash, bundler, poll_interval }
    }

    pub fn user_op_hash(&self) -> B256 {
        self.user_op_hash
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub async fn included(&self) -> Result<Outcome, LifecycleError> {
        self.included_within(DEFAULT_INCLUSION_TIMEOUT).await
    }

    /// Poll for the receipt until it appears or `timeout` elapses. A reverted
    /// operation is `Outcome::IncludedButFailed`, not an error.
    pub async fn included_within(&self, timeout: Duration) -> Result<Outcome, LifecycleError> {
        let started = Instant::now();
        let deadline = started + timeout;
        loop {
            let receipt = self
                .bundler
                .user_operation_receipt(self.user_op_hash)
                .await
                .map_err(LifecycleError::provider(Stage::Inclusion))?;
            if let Some(receipt) = receipt {
                let outcome = Outcome::from_receipt(receipt);
                tracing::info!(
                    user_op_hash = %self.user_op_hash,
                    tx_hash = %outcome.transaction_hash(),
                    success = outcome.success(),
                    waited_ms = started.elapsed().as_millis() as u64,
                    "User operation included"
                );
                return Ok(outcome);
            }

            let now = Instant::now();
            if now >= deadline {
                let waited = now - started;
                tracing::warn!(user_op_hash = %self.user_op_hash, ?waited, "Gave up waiting for inclusion");
                return Err(LifecycleError::OperationTimeout { user_op_hash: self.user_op_hash, waited });
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}
