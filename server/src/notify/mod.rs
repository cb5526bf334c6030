pub mod router;
pub mod slack;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{db_core::prelude::PriorityTier, error::AppResult};

/// Immediate notification about one urgent email.
#[derive(Debug, Clone, PartialEq)]
pub struct UrgentAlert {
    pub channel: String,
    pub subject: String,
    pub from: String,
    pub summary: String,
    pub urgency_score: f64,
    pub priority_tier: PriorityTier,
    pub action_items: Vec<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub draft_reply: Option<String>,
    pub gmail_link: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DigestEntry {
    pub row_id: i32,
    pub subject: String,
    pub from: String,
    pub summary: String,
    pub urgency_score: f64,
    pub priority_tier: PriorityTier,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Digest {
    pub channel: String,
    pub entries: Vec<DigestEntry>,
}

/// Delivery side of notifications. The live implementation posts to
/// Slack; tests substitute a recording one.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send_urgent(&self, alert: &UrgentAlert) -> AppResult<()>;
    async fn send_digest(&self, digest: &Digest) -> AppResult<()>;
}
