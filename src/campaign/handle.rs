//! Background campaigns.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{CampaignController, CampaignError, CampaignRequest, CampaignSummary};
use crate::client::CacheClient;
use crate::directory::CacheDirectory;
use crate::telemetry::TelemetryRecorder;

/// A campaign running on its own tokio task.
#[derive(Debug)]
pub struct CampaignHandle {
    id: Uuid,
    cancel: CancellationToken,
    task: JoinHandle<Result<CampaignSummary, CampaignError>>,
}

impl CampaignHandle {
    /// Spawns `request` on the current runtime.
    #[must_use]
    pub fn spawn<D, C, T>(
        controller: Arc<CampaignController<D, C, T>>,
        request: CampaignRequest,
    ) -> Self
    where
        D: CacheDirectory + 'static,
        C: CacheClient + 'static,
        T: TelemetryRecorder + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move { controller.run(request, &token).await });
        Self {
            id: Uuid::new_v4(),
            cancel,
            task,
        }
    }

    /// Identifier assigned at spawn time.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Requests cancellation. A scheduled wait ends immediately; a running
    /// pass stops accepting instance results.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns `true` once the task has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the campaign to end.
    ///
    /// # Errors
    ///
    /// Returns the campaign's own [`CampaignError`], or
    /// [`CampaignError::TaskFailed`] when the task panicked.
    pub async fn join(self) -> Result<CampaignSummary, CampaignError> {
        self.task
            .await
            .map_err(|err| CampaignError::TaskFailed(err.to_string()))?
    }
}
