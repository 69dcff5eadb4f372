//! Once a topology is removed everywhere, its consumer group offsets for the source partitions
//! can be deleted so that a later topology with the same name starts from scratch. Other
//! instances of the application may still have the partitions assigned when the first delete
//! is issued, in which case the group coordinator rejects it; the reset keeps retrying on a
//! fixed backoff until every instance has processed the removal, or the node shuts down.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use backoff::retry::{Retry, RetryError};
use backoff::strategy::fixed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::topology::TopicPartition;

/// How the group coordinator rejected an offset deletion.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DeleteOffsetsError {
    /// The group still has an active member subscribed to one of the topics.
    #[error("Group Subscribed To Topic - {0}")]
    GroupSubscribedToTopic(String),

    /// The group does not exist anymore, so there is nothing left to delete.
    #[error("Group Id Not Found - {0}")]
    GroupIdNotFound(String),

    #[error("{0}")]
    Other(String),
}

/// Client for the cluster's group coordinator.
#[async_trait]
pub trait OffsetDeletionClient: Send + Sync {
    /// Deletes the committed offsets of `group_id` for every partition in `partitions`.
    async fn delete_committed_offsets(
        &self,
        group_id: &str,
        partitions: &BTreeSet<TopicPartition>,
    ) -> std::result::Result<(), DeleteOffsetsError>;
}

/// How a removal's offset reset ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    /// No reset was requested, or the node owned none of the topology's source partitions.
    Skipped,
    /// The committed offsets were deleted.
    Deleted,
    /// The group was already gone, either deleted or reset by another instance.
    GroupNotFound,
}

/// Drives the offset reset of one removal.
pub(crate) struct OffsetResetCoordinator {
    client: Arc<dyn OffsetDeletionClient>,
    group_id: String,
    backoff: Duration,
    timeout: Option<Duration>,
    cancellation_token: CancellationToken,
}

impl OffsetResetCoordinator {
    pub(crate) fn new(
        client: Arc<dyn OffsetDeletionClient>,
        group_id: String,
        backoff: Duration,
        timeout: Option<Duration>,
        cancellation_token: CancellationToken,
    ) -> Self {
        OffsetResetCoordinator {
            client,
            group_id,
            backoff,
            timeout,
            cancellation_token,
        }
    }

    /// Waits for the registry to unregister the topology, then deletes the committed offsets of
    /// `partitions`. Never deletes anything if unregistration fails.
    pub(crate) async fn run(
        self,
        topology: &str,
        unregistered: impl Future<Output = Result<()>>,
        partitions: BTreeSet<TopicPartition>,
    ) -> Result<ResetOutcome> {
        let unregistered = tokio::select! {
            biased;
            _ = self.cancellation_token.cancelled() => Err(cancelled(topology)),
            result = unregistered => result,
        };
        unregistered?;

        info!(
            topology,
            group_id = %self.group_id,
            partitions = ?partitions,
            "Resetting offsets for removed topology"
        );

        let attempts = Arc::new(AtomicUsize::new(0));
        let operation = {
            let client = Arc::clone(&self.client);
            let group_id = self.group_id.clone();
            let partitions = Arc::new(partitions);
            let topology = topology.to_string();
            let attempts = Arc::clone(&attempts);
            move || {
                let client = Arc::clone(&client);
                let group_id = group_id.clone();
                let partitions = Arc::clone(&partitions);
                let topology = topology.clone();
                let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
                async move {
                    delete_offsets(client.as_ref(), &group_id, &partitions, &topology, attempt)
                        .await
                }
            }
        };

        let retry = Retry::new(
            fixed::Interval::from(self.backoff),
            operation,
            |e: &Error| matches!(e, Error::OffsetResetConflict(_)),
        )
        .with_cancellation(self.cancellation_token.clone());

        let result = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, retry).await.map_err(|_| {
                Error::OffsetResetFatal(format!(
                    "Timed out after {timeout:?} resetting offsets for NamedTopology {topology}"
                ))
            })?,
            None => retry.await,
        };

        let attempts = attempts.load(Ordering::Relaxed);
        match result {
            Ok(outcome) => {
                info!(topology, ?outcome, attempts, "Offset reset completed");
                Ok(outcome)
            }
            Err(RetryError::Cancelled) => {
                warn!(topology, attempts, "Offset reset abandoned, node is shutting down");
                Err(cancelled(topology))
            }
            Err(RetryError::Failed(e)) => {
                error!(topology, attempts, ?e, "Offset reset failed");
                Err(e)
            }
        }
    }
}

fn cancelled(topology: &str) -> Error {
    Error::OffsetResetCancelled(format!(
        "Offsets of NamedTopology {topology} were not reset before the node shut down"
    ))
}

/// One attempt. Maps the coordinator's answer onto what the retry loop should do next.
async fn delete_offsets(
    client: &dyn OffsetDeletionClient,
    group_id: &str,
    partitions: &BTreeSet<TopicPartition>,
    topology: &str,
    attempt: usize,
) -> Result<ResetOutcome> {
    debug!(topology, attempt, "Deleting committed offsets");
    match client.delete_committed_offsets(group_id, partitions).await {
        Ok(()) => Ok(ResetOutcome::Deleted),
        Err(DeleteOffsetsError::GroupSubscribedToTopic(reason)) => {
            debug!(
                topology,
                attempt,
                %reason,
                "Group is still subscribed to a source topic, will retry"
            );
            Err(Error::OffsetResetConflict(reason))
        }
        Err(DeleteOffsetsError::GroupIdNotFound(reason)) => {
            debug!(
                topology,
                %reason,
                "The offsets have been reset by another client or the group has been deleted, no need to retry further"
            );
            Ok(ResetOutcome::GroupNotFound)
        }
        Err(DeleteOffsetsError::Other(reason)) => Err(Error::OffsetResetFatal(format!(
            "Failed to delete committed offsets of group {group_id} for NamedTopology {topology}: {reason}"
        ))),
    }
}
