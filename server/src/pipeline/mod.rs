use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use crate::{
    classify::{classify_email, generate_draft_reply, provider::ClassificationProvider},
    db_core::prelude::*,
    email::{client::EmailClient, fetched_message::FetchedMessage, Mailbox},
    error::{AppError, AppResult},
    model::{
        processed_email::ProcessedEmailCtrl,
        user::{UserCtrl, UserWithGmailAccess},
        user_preference::UserPreferenceCtrl,
    },
    notify::{
        router::{NotificationRouter, RouteOutcome, RoutedEmail},
        NotificationSink,
    },
    scoring::{calculate_urgency_score, is_reply_or_forward, priority_tier_for_score, ScoreInput},
    server_config::cfg,
    HttpClient,
};

/// What one processing cycle did for one user.
#[derive(Debug, Default, Clone, Serialize)]
pub struct UserCycleReport {
    pub email: String,
    /// Messages fetched from the mailbox this cycle.
    pub processed: usize,
    pub urgent: usize,
    pub batched: usize,
    pub skipped_duplicates: usize,
    /// The user's grant became unusable; processing stopped for them.
    pub connection_invalid: bool,
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub started_at: chrono::DateTime<Utc>,
    pub total_processed: usize,
    pub total_urgent: usize,
    pub total_batched: usize,
    pub users: Vec<UserCycleReport>,
    pub errors: usize,
}

/// Builds the mailbox for one user. Live runs construct an authorized
/// Gmail client; tests substitute canned mailboxes.
#[async_trait]
pub trait MailboxFactory: Send + Sync {
    async fn mailbox_for(&self, user: &UserWithGmailAccess) -> AppResult<Box<dyn Mailbox>>;
}

pub struct GmailMailboxFactory {
    http_client: HttpClient,
    conn: DatabaseConnection,
}

impl GmailMailboxFactory {
    pub fn new(http_client: HttpClient, conn: DatabaseConnection) -> Self {
        GmailMailboxFactory { http_client, conn }
    }
}

#[async_trait]
impl MailboxFactory for GmailMailboxFactory {
    async fn mailbox_for(&self, user: &UserWithGmailAccess) -> AppResult<Box<dyn Mailbox>> {
        let client =
            EmailClient::new(self.http_client.clone(), self.conn.clone(), user.clone()).await?;

        Ok(Box::new(client))
    }
}

/// Orchestrates a full triage cycle: fetch, classify, score, persist,
/// notify. One instance is shared by the scheduler and the trigger route.
pub struct Pipeline {
    conn: DatabaseConnection,
    mailboxes: Arc<dyn MailboxFactory>,
    provider: Arc<dyn ClassificationProvider>,
    sink: Option<Arc<dyn NotificationSink>>,
}

impl Pipeline {
    pub fn new(
        conn: DatabaseConnection,
        mailboxes: Arc<dyn MailboxFactory>,
        provider: Arc<dyn ClassificationProvider>,
        sink: Option<Arc<dyn NotificationSink>>,
    ) -> Self {
        Pipeline {
            conn,
            mailboxes,
            provider,
            sink,
        }
    }

    /// Processes every user with a usable Gmail grant. A failure for one
    /// user never stops the others.
    pub async fn run_cycle(&self) -> AppResult<RunSummary> {
        let users = UserCtrl::all_with_gmail_access(&self.conn).await?;
        tracing::info!("Starting processing cycle for {} users", users.len());

        let mut summary = RunSummary {
            started_at: Utc::now(),
            total_processed: 0,
            total_urgent: 0,
            total_batched: 0,
            users: Vec::with_capacity(users.len()),
            errors: 0,
        };
        for user in users {
            match self.process_user(&user).await {
                Ok(report) => summary.users.push(report),
                Err(AppError::ConnectionInvalid) => {
                    tracing::warn!("Connection invalid for {}, skipping until re-auth", user.email);
                    summary.users.push(UserCycleReport {
                        email: user.email.clone(),
                        connection_invalid: true,
                        ..Default::default()
                    });
                }
                Err(e) => {
                    tracing::error!("Cycle failed for {}: {:?}", user.email, e);
                    summary.errors += 1;
                }
            }
        }

        summary.total_processed = summary.users.iter().map(|u| u.processed).sum();
        summary.total_urgent = summary.users.iter().map(|u| u.urgent).sum();
        summary.total_batched = summary.users.iter().map(|u| u.batched).sum();

        Ok(summary)
    }

    async fn process_user(&self, user: &UserWithGmailAccess) -> AppResult<UserCycleReport> {
        let mailbox = self.mailboxes.mailbox_for(user).await?;

        self.process_mailbox(user.id, &user.email, mailbox.as_ref())
            .await
    }

    /// The per-user cycle against any mailbox implementation.
    pub async fn process_mailbox(
        &self,
        user_id: i32,
        email: &str,
        mailbox: &dyn Mailbox,
    ) -> AppResult<UserCycleReport> {
        let prefs = UserPreferenceCtrl::get_or_default(&self.conn, user_id).await?;
        let mut router = NotificationRouter::from_preferences(self.sink.as_deref(), &prefs);

        let messages = mailbox.fetch_unprocessed(cfg.processing.page_size).await?;

        let mut report = UserCycleReport {
            email: email.to_string(),
            processed: messages.len(),
            ..Default::default()
        };

        for msg in &messages {
            if ProcessedEmailCtrl::exists(&self.conn, user_id, &msg.id).await? {
                // Seen before but still unlabeled remotely. Heal the label
                // so the next fetch skips it.
                report.skipped_duplicates += 1;
                if let Err(e) = mailbox.mark_processed(&msg.id).await {
                    tracing::warn!("Could not mark duplicate {} processed: {:?}", msg.id, e);
                }
                continue;
            }

            let classification = classify_email(self.provider.as_ref(), msg).await;

            let now = Utc::now();
            let score_input = ScoreInput {
                base_score: classification.base_score,
                subject: &msg.subject,
                body: &msg.body,
                sender_category: classification.sender_category,
                deadline: classification.deadline,
                is_follow_up: is_reply_or_forward(&msg.subject),
                custom_keywords: &prefs.custom_urgent_keywords,
                now,
            };
            let urgency_score = calculate_urgency_score(&score_input);
            let priority_tier = priority_tier_for_score(urgency_score);

            let draft_reply = if urgency_score >= cfg.processing.draft_reply_min_score {
                generate_draft_reply(self.provider.as_ref(), msg, &classification).await
            } else {
                None
            };

            let active_model = processed_email::ActiveModel {
                id: ActiveValue::NotSet,
                user_id: ActiveValue::Set(user_id),
                gmail_message_id: ActiveValue::Set(msg.id.clone()),
                thread_id: ActiveValue::Set(msg.thread_id.clone()),
                from_address: ActiveValue::Set(msg.from_address.clone()),
                from_name: ActiveValue::Set(msg.from_name.clone()),
                subject: ActiveValue::Set(msg.subject.clone()),
                body: ActiveValue::Set(msg.body.clone()),
                snippet: ActiveValue::Set(msg.snippet.clone()),
                received_at: ActiveValue::Set(msg.received_at),
                sender_category: ActiveValue::Set(classification.sender_category),
                message_category: ActiveValue::Set(classification.message_category),
                priority_tier: ActiveValue::Set(priority_tier),
                urgency_score: ActiveValue::Set(urgency_score),
                summary: ActiveValue::Set(classification.summary.clone()),
                draft_reply: ActiveValue::Set(draft_reply.clone()),
                action_items: ActiveValue::Set(classification.action_items.clone()),
                deadline_detected: ActiveValue::Set(
                    classification.deadline.map(|d| d.fixed_offset()),
                ),
                processed_at: ActiveValue::Set(now.into()),
                notification_sent: ActiveValue::Set(false),
                notification_sent_at: ActiveValue::Set(None),
                dismissed: ActiveValue::Set(false),
            };

            let Some(row_id) = ProcessedEmailCtrl::insert(&self.conn, active_model).await? else {
                report.skipped_duplicates += 1;
                if let Err(e) = mailbox.mark_processed(&msg.id).await {
                    tracing::warn!("Could not mark duplicate {} processed: {:?}", msg.id, e);
                }
                continue;
            };

            let routed = RoutedEmail {
                row_id,
                subject: msg.subject.clone(),
                from: msg
                    .from_name
                    .clone()
                    .unwrap_or_else(|| msg.from_address.clone()),
                summary: classification.summary.clone(),
                urgency_score,
                priority_tier,
                action_items: classification.action_items.clone(),
                deadline: classification.deadline,
                draft_reply,
                gmail_link: msg.deep_link(),
            };

            match router.route(routed, now.time()).await {
                RouteOutcome::Notified => {
                    report.urgent += 1;
                    ProcessedEmailCtrl::mark_notification_sent(&self.conn, &[row_id]).await?;
                }
                RouteOutcome::UrgentUndelivered => {
                    report.urgent += 1;
                }
                RouteOutcome::Batched => {
                    report.batched += 1;
                }
                RouteOutcome::Skipped => {}
            }

            // Label remotely only after the row is persisted; a crash in
            // between re-processes the message rather than losing it.
            if let Err(e) = mailbox.mark_processed(&msg.id).await {
                tracing::warn!("Could not mark {} processed: {:?}", msg.id, e);
            }
        }

        let digest_row_ids = router.flush().await?;
        ProcessedEmailCtrl::mark_notification_sent(&self.conn, &digest_row_ids).await?;

        tracing::info!(
            "Cycle for {}: {} processed, {} urgent, {} batched, {} duplicates",
            email,
            report.processed,
            report.urgent,
            report.batched,
            report.skipped_duplicates
        );

        Ok(report)
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult, Value};

    use super::*;
    use crate::classify::provider::StubProvider;
    use crate::notify::{Digest, UrgentAlert};

    struct StubMailbox {
        messages: Vec<FetchedMessage>,
        marked: Mutex<Vec<String>>,
    }

    /// Keyed on the user's address: one revoked grant, one unreachable
    /// mailbox, empty inboxes for everyone else.
    struct StubMailboxFactory;

    #[async_trait]
    impl MailboxFactory for StubMailboxFactory {
        async fn mailbox_for(&self, user: &UserWithGmailAccess) -> AppResult<Box<dyn Mailbox>> {
            match user.email.as_str() {
                "revoked@example.com" => Err(AppError::ConnectionInvalid),
                "broken@example.com" => Err(anyhow::anyhow!("gmail unreachable").into()),
                _ => Ok(Box::new(StubMailbox {
                    messages: vec![],
                    marked: Mutex::new(Vec::new()),
                })),
            }
        }
    }

    #[async_trait]
    impl Mailbox for StubMailbox {
        async fn fetch_unprocessed(&self, _max_results: u32) -> AppResult<Vec<FetchedMessage>> {
            Ok(self.messages.clone())
        }

        async fn mark_processed(&self, message_id: &str) -> AppResult<()> {
            self.marked.lock().unwrap().push(message_id.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        urgent: Mutex<Vec<UrgentAlert>>,
        digests: Mutex<Vec<Digest>>,
    }

    #[async_trait]
    impl crate::notify::NotificationSink for RecordingSink {
        async fn send_urgent(&self, alert: &UrgentAlert) -> AppResult<()> {
            self.urgent.lock().unwrap().push(alert.clone());
            Ok(())
        }

        async fn send_digest(&self, digest: &Digest) -> AppResult<()> {
            self.digests.lock().unwrap().push(digest.clone());
            Ok(())
        }
    }

    fn message(id: &str, subject: &str, body: &str) -> FetchedMessage {
        FetchedMessage {
            id: id.to_string(),
            thread_id: Some(format!("t-{id}")),
            from_address: "sender@example.com".to_string(),
            from_name: Some("Sender".to_string()),
            subject: subject.to_string(),
            snippet: None,
            body: body.to_string(),
            received_at: Utc::now().fixed_offset(),
        }
    }

    fn prefs_row() -> user_preference::Model {
        let now = Utc::now().into();
        user_preference::Model {
            id: 1,
            user_id: 1,
            urgency_threshold: 6.0,
            digest_frequency_minutes: 30,
            quiet_hours_start: None,
            quiet_hours_end: None,
            slack_channel: "#alerts".to_string(),
            custom_urgent_keywords: vec![],
            enable_batch_digest: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn returning_id(id: i32) -> BTreeMap<&'static str, Value> {
        BTreeMap::from([("id", Value::Int(Some(id)))])
    }

    fn user_row(id: i32, email: &str) -> BTreeMap<&'static str, Value> {
        BTreeMap::from([
            ("id", Value::Int(Some(id))),
            ("email", Value::String(Some(Box::new(email.to_string())))),
            ("token_id", Value::Int(Some(id * 10))),
            ("access_token", Value::String(Some(Box::new("enc".to_string())))),
            ("refresh_token", Value::String(None)),
            ("expires_at", Value::ChronoDateTimeWithTimeZone(None)),
        ])
    }

    #[tokio::test]
    async fn test_full_cycle_routes_and_persists() {
        let conn = MockDatabase::new(DatabaseBackend::Postgres)
            // preferences lookup
            .append_query_results([vec![prefs_row()]])
            // dedup check for message 1: unseen
            .append_query_results([Vec::<processed_email::Model>::new()])
            // insert message 1
            .append_query_results([vec![returning_id(101)]])
            // dedup check for message 2: unseen
            .append_query_results([Vec::<processed_email::Model>::new()])
            // insert message 2
            .append_query_results([vec![returning_id(102)]])
            .append_exec_results([
                // mark message 1 notified
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                },
                // mark digest rows notified
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                },
            ])
            .into_connection();

        let provider = Arc::new(StubProvider {
            classify_responses: vec![
                (
                    "URGENT: server down".to_string(),
                    r#"{"sender_category":"MANAGER","message_category":"TASK","summary":"The API server is down.","action_items":["Restart the API server"],"deadline":null,"base_score":9}"#.to_string(),
                ),
                (
                    "Weekly notes".to_string(),
                    r#"{"sender_category":"PEER","message_category":"INFO","summary":"Weekly team notes.","action_items":[],"deadline":null,"base_score":1}"#.to_string(),
                ),
            ],
            draft_reply: "Thanks, I'm on it.".to_string(),
        });
        let sink = Arc::new(RecordingSink::default());

        let pipeline = Pipeline::new(
            conn,
            Arc::new(StubMailboxFactory),
            provider,
            Some(sink.clone() as Arc<dyn NotificationSink>),
        );

        let mailbox = StubMailbox {
            messages: vec![
                message("m1", "URGENT: server down", "please look immediately"),
                message("m2", "Weekly notes", "nothing special here"),
            ],
            marked: Mutex::new(Vec::new()),
        };

        let report = pipeline
            .process_mailbox(1, "user@example.com", &mailbox)
            .await
            .unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.urgent, 1);
        assert_eq!(report.batched, 1);
        assert_eq!(report.skipped_duplicates, 0);
        assert!(!report.connection_invalid);

        // 9.0*0.4 + 8*0.2 + 8*0.2 = 6.8, above the 6.0 threshold
        let urgent = sink.urgent.lock().unwrap();
        assert_eq!(urgent.len(), 1);
        assert_eq!(urgent[0].subject, "URGENT: server down");
        assert_eq!(urgent[0].urgency_score, 6.8);
        assert_eq!(urgent[0].priority_tier, PriorityTier::High);
        // 6.8 is above the draft threshold, so the alert carries a draft
        assert_eq!(urgent[0].draft_reply.as_deref(), Some("Thanks, I'm on it."));

        // The peer email scored 1.0 and went to the digest without a draft
        let digests = sink.digests.lock().unwrap();
        assert_eq!(digests.len(), 1);
        assert_eq!(digests[0].entries.len(), 1);
        assert_eq!(digests[0].entries[0].subject, "Weekly notes");
        assert_eq!(digests[0].entries[0].urgency_score, 1.0);

        // Both messages were labeled processed remotely
        let marked = mailbox.marked.lock().unwrap();
        assert_eq!(*marked, vec!["m1".to_string(), "m2".to_string()]);
    }

    #[tokio::test]
    async fn test_duplicate_message_skipped_but_relabeled() {
        let existing = processed_email::Model {
            id: 55,
            user_id: 1,
            gmail_message_id: "m1".to_string(),
            thread_id: None,
            from_address: "sender@example.com".to_string(),
            from_name: None,
            subject: "old".to_string(),
            body: "old body".to_string(),
            snippet: None,
            received_at: Utc::now().into(),
            sender_category: SenderCategory::Other,
            message_category: MessageCategory::Info,
            priority_tier: PriorityTier::Low,
            urgency_score: 1.0,
            summary: "old".to_string(),
            draft_reply: None,
            action_items: vec![],
            deadline_detected: None,
            processed_at: Utc::now().into(),
            notification_sent: false,
            notification_sent_at: None,
            dismissed: false,
        };

        let conn = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![prefs_row()]])
            // dedup check finds the earlier row
            .append_query_results([vec![existing]])
            .into_connection();

        let provider = Arc::new(StubProvider {
            classify_responses: vec![],
            draft_reply: String::new(),
        });

        let pipeline = Pipeline::new(conn, Arc::new(StubMailboxFactory), provider, None);

        let mailbox = StubMailbox {
            messages: vec![message("m1", "anything", "anything")],
            marked: Mutex::new(Vec::new()),
        };

        let report = pipeline
            .process_mailbox(1, "user@example.com", &mailbox)
            .await
            .unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.skipped_duplicates, 1);
        assert_eq!(report.urgent, 0);
        assert_eq!(report.batched, 0);

        // The remote label is healed even though nothing was re-stored
        assert_eq!(*mailbox.marked.lock().unwrap(), vec!["m1".to_string()]);
    }

    #[tokio::test]
    async fn test_run_cycle_continues_past_invalid_and_failed_users() {
        let conn = MockDatabase::new(DatabaseBackend::Postgres)
            // users with a usable gmail grant
            .append_query_results([vec![
                user_row(1, "revoked@example.com"),
                user_row(2, "broken@example.com"),
                user_row(3, "ok@example.com"),
            ]])
            // preferences lookup for the one user that gets processed
            .append_query_results([vec![prefs_row()]])
            .into_connection();

        let provider = Arc::new(StubProvider {
            classify_responses: vec![],
            draft_reply: String::new(),
        });

        let pipeline = Pipeline::new(conn, Arc::new(StubMailboxFactory), provider, None);

        let summary = pipeline.run_cycle().await.unwrap();

        // The revoked user is reported, not dropped; the broken one counts
        // as an error; the healthy one still ran.
        assert_eq!(summary.users.len(), 2);
        assert_eq!(summary.errors, 1);

        let revoked = &summary.users[0];
        assert_eq!(revoked.email, "revoked@example.com");
        assert!(revoked.connection_invalid);
        assert_eq!(revoked.processed, 0);
        assert_eq!(revoked.urgent, 0);
        assert_eq!(revoked.batched, 0);

        let healthy = &summary.users[1];
        assert_eq!(healthy.email, "ok@example.com");
        assert!(!healthy.connection_invalid);
        assert_eq!(healthy.processed, 0);

        assert_eq!(summary.total_processed, 0);
        assert_eq!(summary.total_urgent, 0);
        assert_eq!(summary.total_batched, 0);
    }
}
