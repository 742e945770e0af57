//! Wire types for the onboarding-progress endpoint.
//!
//! `GET /brands/{brandId}/onboarding-progress` answers with an envelope;
//! `success: false` or a missing `data` field is a logical failure even on
//! HTTP 200. Older in-flight jobs predate the staged payload shape and emit
//! only the legacy boolean flags, so every staged field stays optional.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize)]
pub struct ProgressEnvelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<ProgressPayload>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ProgressEnvelope {
    /// The server-supplied failure message, preferring `error` over
    /// `message`.
    pub fn failure_message(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "server reported failure".to_string())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload {
    #[serde(default)]
    pub stages: Option<StageSet>,
    // Legacy shape
    #[serde(default)]
    pub total_queries: Option<u64>,
    #[serde(default)]
    pub completed_queries: Option<u64>,
    #[serde(default)]
    pub scoring_complete: Option<bool>,
    #[serde(default)]
    pub analysis_complete: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StageSet {
    #[serde(default)]
    pub collection: Option<Stage>,
    #[serde(default)]
    pub scoring: Option<Stage>,
    #[serde(default)]
    pub recommendations: Option<Stage>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub completed: Option<u64>,
    #[serde(default)]
    pub status: StageStatus,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Active,
    Completed,
}
