use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    Pending,
    Running,
    Done,
}

impl ReviewStatus {
    pub fn progress(self) -> u8 {
        match self {
            ReviewStatus::Pending => 0,
            ReviewStatus::Running => 42,
            ReviewStatus::Done => 100,
        }
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ReviewStatus::Pending => "PENDING",
            ReviewStatus::Running => "RUNNING",
            ReviewStatus::Done => "DONE",
        };
        f.pad(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    pub message_id: Value,
    pub content: Option<String>,
    pub username: Option<String>,
    pub user_id: Value,
    pub sent_at: Option<String>,
    pub count_value: Value,
    pub is_fulfilled: Value,
    pub text_value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriterionBreakdown {
    pub criterion_id: Value,
    pub criterion_name: String,
    pub score: u8,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelReviewRow {
    pub id: Value,
    pub channel_id: Value,
    pub channel_name: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub status: ReviewStatus,
    pub approved: bool,
    pub summary_text: String,
    pub aggregate_score: Option<u8>,
    pub breakdown: Vec<CriterionBreakdown>,
    pub message_count: usize,
    pub dirty: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CriterionSummary {
    pub criterion_name: String,
    pub channel_count: usize,
    pub avg_score: f64,
    pub evidence_count: usize,
}
