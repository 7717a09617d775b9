use async_trait::async_trait;
use mr_common::ContentRef;
use mr_remote::{CampaignDraft, RemoteError};

/// Turns a queued subject into the campaign to send for it.
///
/// Implemented by the application, which knows how to render its objects.
/// Return `RemoteError::Permanent` when the subject can never be sent
/// (deleted, unpublished); transient variants retry later.
#[async_trait]
pub trait CampaignBuilder: Send + Sync {
    async fn build(&self, content_ref: &ContentRef) -> Result<CampaignDraft, RemoteError>;
}
