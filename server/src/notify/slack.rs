use anyhow::anyhow;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    db_core::prelude::PriorityTier,
    error::{AppError, AppResult},
    HttpClient,
};

use super::{Digest, DigestEntry, NotificationSink, UrgentAlert};

const SLACK_POST_MESSAGE: &str = "https://slack.com/api/chat.postMessage";

fn priority_emoji(tier: PriorityTier) -> &'static str {
    match tier {
        PriorityTier::Urgent => ":red_circle:",
        PriorityTier::High => ":large_orange_circle:",
        PriorityTier::Medium => ":large_yellow_circle:",
        PriorityTier::Low => ":large_green_circle:",
    }
}

pub struct SlackClient {
    http_client: HttpClient,
    bot_token: String,
}

#[derive(Debug, Deserialize)]
struct SlackApiResponse {
    ok: bool,
    error: Option<String>,
}

impl SlackClient {
    pub fn from_env(http_client: HttpClient) -> AppResult<Self> {
        let bot_token = std::env::var("SLACK_BOT_TOKEN")
            .map_err(|_| AppError::Internal(anyhow!("SLACK_BOT_TOKEN is not set")))?;

        Ok(SlackClient {
            http_client,
            bot_token,
        })
    }

    async fn post_message(&self, body: Value) -> AppResult<()> {
        let resp = self
            .http_client
            .post(SLACK_POST_MESSAGE)
            .bearer_auth(&self.bot_token)
            .json(&body)
            .send()
            .await?
            .json::<SlackApiResponse>()
            .await?;

        if !resp.ok {
            return Err(AppError::Internal(anyhow!(
                "Slack API error: {}",
                resp.error.unwrap_or_else(|| "unknown".to_string())
            )));
        }

        Ok(())
    }
}

fn urgent_alert_blocks(alert: &UrgentAlert) -> Value {
    let mut blocks = vec![
        json!({
            "type": "header",
            "text": {
                "type": "plain_text",
                "text": format!("{} Urgent email ({:.1}/10)", priority_emoji(alert.priority_tier), alert.urgency_score),
                "emoji": true
            }
        }),
        json!({
            "type": "section",
            "fields": [
                { "type": "mrkdwn", "text": format!("*From:*\n{}", alert.from) },
                { "type": "mrkdwn", "text": format!("*Subject:*\n{}", alert.subject) }
            ]
        }),
        json!({
            "type": "section",
            "text": { "type": "mrkdwn", "text": alert.summary }
        }),
    ];

    if let Some(deadline) = alert.deadline {
        blocks.push(json!({
            "type": "section",
            "text": {
                "type": "mrkdwn",
                "text": format!("*Deadline:* {}", deadline.format("%Y-%m-%d %H:%M UTC"))
            }
        }));
    }

    if !alert.action_items.is_empty() {
        let items = alert
            .action_items
            .iter()
            .map(|item| format!("• {item}"))
            .collect::<Vec<_>>()
            .join("\n");
        blocks.push(json!({
            "type": "section",
            "text": { "type": "mrkdwn", "text": format!("*Action items:*\n{items}") }
        }));
    }

    if let Some(draft) = &alert.draft_reply {
        blocks.push(json!({
            "type": "section",
            "text": { "type": "mrkdwn", "text": format!("*Suggested reply:*\n>{}", draft.replace('\n', "\n>")) }
        }));
    }

    blocks.push(json!({
        "type": "actions",
        "elements": [{
            "type": "button",
            "text": { "type": "plain_text", "text": "Open in Gmail", "emoji": true },
            "url": alert.gmail_link
        }]
    }));

    Value::Array(blocks)
}

/// One line per email, highest urgency first.
fn digest_text(entries: &[DigestEntry]) -> String {
    let mut sorted = entries.to_vec();
    sorted.sort_by(|a, b| {
        b.urgency_score
            .partial_cmp(&a.urgency_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let lines = sorted
        .iter()
        .map(|e| {
            format!(
                "{} *{:.1}* — {} (from {}): {}",
                priority_emoji(e.priority_tier),
                e.urgency_score,
                e.subject,
                e.from,
                e.summary
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        ":mailbox: *Email digest* — {} message{}\n{}",
        entries.len(),
        if entries.len() == 1 { "" } else { "s" },
        lines
    )
}

#[async_trait]
impl NotificationSink for SlackClient {
    async fn send_urgent(&self, alert: &UrgentAlert) -> AppResult<()> {
        let body = json!({
            "channel": alert.channel,
            "text": format!("Urgent email: {}", alert.subject),
            "blocks": urgent_alert_blocks(alert),
        });

        self.post_message(body).await
    }

    async fn send_digest(&self, digest: &Digest) -> AppResult<()> {
        if digest.entries.is_empty() {
            return Ok(());
        }

        let body = json!({
            "channel": digest.channel,
            "text": digest_text(&digest.entries),
        });

        self.post_message(body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(row_id: i32, score: f64, tier: PriorityTier, subject: &str) -> DigestEntry {
        DigestEntry {
            row_id,
            subject: subject.to_string(),
            from: "someone@example.com".to_string(),
            summary: "a summary".to_string(),
            urgency_score: score,
            priority_tier: tier,
        }
    }

    #[test]
    fn test_digest_text_sorted_by_score() {
        let entries = vec![
            entry(1, 4.0, PriorityTier::Medium, "medium one"),
            entry(2, 5.9, PriorityTier::Medium, "nearly high"),
            entry(3, 1.2, PriorityTier::Low, "low one"),
        ];

        let text = digest_text(&entries);
        let nearly = text.find("nearly high").unwrap();
        let medium = text.find("medium one").unwrap();
        let low = text.find("low one").unwrap();
        assert!(nearly < medium);
        assert!(medium < low);
        assert!(text.contains("3 messages"));
    }

    #[test]
    fn test_digest_text_singular() {
        let entries = vec![entry(1, 2.0, PriorityTier::Low, "only")];
        let text = digest_text(&entries);
        assert!(text.contains("1 message\n"));
    }

    #[test]
    fn test_urgent_alert_blocks() {
        let alert = UrgentAlert {
            channel: "#general".to_string(),
            subject: "Server down".to_string(),
            from: "ops@corp.com".to_string(),
            summary: "Production is down.".to_string(),
            urgency_score: 9.2,
            priority_tier: PriorityTier::Urgent,
            action_items: vec!["Restart service".to_string()],
            deadline: None,
            draft_reply: Some("On it.".to_string()),
            gmail_link: "https://mail.google.com/mail/u/0/#all/abc123".to_string(),
        };

        let blocks = urgent_alert_blocks(&alert);
        let rendered = blocks.to_string();
        assert!(rendered.contains("9.2/10"));
        assert!(rendered.contains("Server down"));
        assert!(rendered.contains("Restart service"));
        assert!(rendered.contains("Suggested reply"));
        assert!(rendered.contains(":red_circle:"));
        assert!(rendered.contains("Open in Gmail"));
        assert!(rendered.contains("#all/abc123"));
        // No deadline block when there is no deadline
        assert!(!rendered.contains("Deadline"));
    }

    #[test]
    fn test_priority_emoji_covers_all_tiers() {
        assert_eq!(priority_emoji(PriorityTier::Urgent), ":red_circle:");
        assert_eq!(priority_emoji(PriorityTier::High), ":large_orange_circle:");
        assert_eq!(priority_emoji(PriorityTier::Medium), ":large_yellow_circle:");
        assert_eq!(priority_emoji(PriorityTier::Low), ":large_green_circle:");
    }
}
