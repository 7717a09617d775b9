use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use mr_common::naming::normalize_keys;
use mr_common::Lazy;

use crate::warning::WarningHandle;
use crate::Result;

/// Everything the service needs to create a campaign
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignDraft {
    pub list_id: String,
    pub subject: String,
    pub from_name: String,
    pub from_email: String,
    pub html: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignInfo {
    pub id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_time: Option<DateTime<Utc>>,
    /// Remaining service attributes, keys in snake_case
    #[serde(default)]
    pub details: Value,
}

impl CampaignInfo {
    pub fn is_sent(&self) -> bool {
        self.status == "sent"
    }

    /// Rewrite the service's camelCase detail keys to snake_case
    pub fn normalized(mut self) -> Self {
        self.details = normalize_keys(self.details);
        self
    }

    /// Browse detail attributes, resolving each on first access
    pub fn attributes(&self) -> Lazy<Value> {
        Lazy::new(self.details.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListMember {
    pub email: String,
    pub status: String,
}

/// Capability set of the remote campaign service.
///
/// Implementations speak the service's wire protocol. Every call gets the
/// warning handle of the proxy scope it runs in.
#[async_trait]
pub trait CampaignService: Send + Sync {
    /// Create a campaign and return its remote id
    async fn create_campaign(&self, draft: &CampaignDraft, warnings: &WarningHandle) -> Result<String>;

    async fn send_campaign(&self, campaign_id: &str, warnings: &WarningHandle) -> Result<()>;

    async fn cancel_campaign(&self, campaign_id: &str, warnings: &WarningHandle) -> Result<()>;

    async fn campaign_info(&self, campaign_id: &str, warnings: &WarningHandle) -> Result<CampaignInfo>;

    async fn list_members(&self, list_id: &str, warnings: &WarningHandle) -> Result<Vec<ListMember>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalized_details_browse_lazily() {
        let info = CampaignInfo {
            id: "c1".to_string(),
            status: "sent".to_string(),
            send_time: None,
            details: json!({"emailsSent": 120, "listId": "L1"}),
        }
        .normalized();

        assert!(info.is_sent());
        let attributes = info.attributes();
        assert_eq!(attributes.get("emails_sent"), Some(json!(120)));
        assert!(attributes.is_resolved("emails_sent"));
        assert!(!attributes.is_resolved("list_id"));
        assert_eq!(attributes.get("emailsSent"), None);
    }
}
