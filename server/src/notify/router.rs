use chrono::{DateTime, NaiveTime, Utc};

use crate::{
    db_core::prelude::{user_preference, PriorityTier},
    error::AppResult,
};

use super::{Digest, DigestEntry, NotificationSink, UrgentAlert};

/// One processed email, ready to be routed.
#[derive(Debug, Clone)]
pub struct RoutedEmail {
    pub row_id: i32,
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Immediate alert delivered.
    Notified,
    /// Scored urgent, but delivery was suppressed or failed.
    UrgentUndelivered,
    /// Queued for the batch digest.
    Batched,
    /// Below threshold with the digest disabled.
    Skipped,
}

/// Splits processed emails between immediate alerts and the batched
/// digest according to one user's preferences. Collects digest entries
/// over a cycle; `flush` delivers them.
pub struct NotificationRouter<'a> {
    sink: Option<&'a dyn NotificationSink>,
    channel: String,
    urgency_threshold: f64,
    quiet_hours: Option<(NaiveTime, NaiveTime)>,
    digest_enabled: bool,
    pending: Vec<DigestEntry>,
}

impl<'a> NotificationRouter<'a> {
    pub fn from_preferences(
        sink: Option<&'a dyn NotificationSink>,
        prefs: &user_preference::Model,
    ) -> Self {
        let quiet_hours = parse_quiet_hours(
            prefs.quiet_hours_start.as_deref(),
            prefs.quiet_hours_end.as_deref(),
        );

        NotificationRouter {
            sink,
            channel: prefs.slack_channel.clone(),
            urgency_threshold: prefs.urgency_threshold,
            quiet_hours,
            digest_enabled: prefs.enable_batch_digest,
            pending: Vec::new(),
        }
    }

    pub fn is_urgent(&self, urgency_score: f64) -> bool {
        urgency_score >= self.urgency_threshold
    }

    pub async fn route(&mut self, email: RoutedEmail, now: NaiveTime) -> RouteOutcome {
        if self.is_urgent(email.urgency_score) {
            if let Some((start, end)) = self.quiet_hours {
                if within_quiet_hours(now, start, end) {
                    tracing::debug!(
                        "Suppressing urgent alert for row {} during quiet hours",
                        email.row_id
                    );
                    return RouteOutcome::UrgentUndelivered;
                }
            }

            let Some(sink) = self.sink else {
                return RouteOutcome::UrgentUndelivered;
            };

            let alert = UrgentAlert {
                channel: self.channel.clone(),
                subject: email.subject,
                from: email.from,
                summary: email.summary,
                urgency_score: email.urgency_score,
                priority_tier: email.priority_tier,
                action_items: email.action_items,
                deadline: email.deadline,
                draft_reply: email.draft_reply,
                gmail_link: email.gmail_link,
            };

            return match sink.send_urgent(&alert).await {
                Ok(()) => RouteOutcome::Notified,
                Err(e) => {
                    tracing::warn!("Failed to deliver urgent alert: {:?}", e);
                    RouteOutcome::UrgentUndelivered
                }
            };
        }

        if !self.digest_enabled {
            return RouteOutcome::Skipped;
        }

        self.pending.push(DigestEntry {
            row_id: email.row_id,
            subject: email.subject,
            from: email.from,
            summary: email.summary,
            urgency_score: email.urgency_score,
            priority_tier: email.priority_tier,
        });

        RouteOutcome::Batched
    }

    /// Delivers the collected digest. Returns the row ids it covered;
    /// empty when there was nothing to send or delivery failed.
    pub async fn flush(&mut self) -> AppResult<Vec<i32>> {
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }

        let Some(sink) = self.sink else {
            self.pending.clear();
            return Ok(Vec::new());
        };

        let digest = Digest {
            channel: self.channel.clone(),
            entries: std::mem::take(&mut self.pending),
        };

        match sink.send_digest(&digest).await {
            Ok(()) => Ok(digest.entries.iter().map(|e| e.row_id).collect()),
            Err(e) => {
                tracing::warn!("Failed to deliver digest: {:?}", e);
                Ok(Vec::new())
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

fn parse_quiet_hours(
    start: Option<&str>,
    end: Option<&str>,
) -> Option<(NaiveTime, NaiveTime)> {
    let start = NaiveTime::parse_from_str(start?, "%H:%M").ok()?;
    let end = NaiveTime::parse_from_str(end?, "%H:%M").ok()?;
    Some((start, end))
}

/// Half-open window [start, end). A start later than the end means the
/// window crosses midnight.
pub fn within_quiet_hours(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        now >= start && now < end
    } else {
        now >= start || now < end
    }
}
