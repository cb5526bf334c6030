use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use google_gmail1::api::{Label, ListLabelsResponse, ListMessagesResponse, Message};
use leaky_bucket::RateLimiter;
use serde_json::json;
use tokio::sync::{OnceCell, RwLock};

use crate::{
    db_core::prelude::*,
    email::{fetched_message::FetchedMessage, Mailbox},
    error::{AppError, AppResult},
    model::{oauth_token::OauthTokenCtrl, user::UserWithGmailAccess},
    server_config::cfg,
    HttpClient,
};

/// Gmail API quota units per call type
struct GmailApiQuota {
    messages_list: usize,
    messages_get: usize,
    messages_modify: usize,
    labels_list: usize,
    labels_create: usize,
}

const GMAIL_API_QUOTA: GmailApiQuota = GmailApiQuota {
    messages_list: 5,
    messages_get: 5,
    messages_modify: 5,
    labels_list: 1,
    labels_create: 5,
};

macro_rules! gmail_url {
    ($($params:expr),*) => {
        {
            const GMAIL_ENDPOINT: &str = "https://www.googleapis.com/gmail/v1/users/me";
            let list_params = vec![$($params),*];
            let path = list_params.join("/");
            format!("{}/{}", GMAIL_ENDPOINT, path)
        }
    };
}

/// Authorized Gmail client for one user. The access token lives behind a
/// lock so a mid-cycle refresh is picked up by subsequent requests.
pub struct EmailClient {
    http_client: HttpClient,
    conn: DatabaseConnection,
    user: UserWithGmailAccess,
    access_token: Arc<RwLock<String>>,
    rate_limiter: Arc<RateLimiter>,
    processed_label_id: OnceCell<String>,
}

impl EmailClient {
    pub async fn new(
        http_client: HttpClient,
        conn: DatabaseConnection,
        user: UserWithGmailAccess,
    ) -> AppResult<EmailClient> {
        let rate_limiter = Arc::new(
            RateLimiter::builder()
                .initial(cfg.gmail_limits.quota_units_per_sec)
                .interval(Duration::from_millis(cfg.gmail_limits.refill_interval_ms as u64))
                .refill(cfg.gmail_limits.refill_amount)
                .build(),
        );

        let access_token =
            OauthTokenCtrl::get_refreshed_access_token(&http_client, &conn, &user).await?;

        Ok(EmailClient {
            http_client,
            conn,
            user,
            access_token: Arc::new(RwLock::new(access_token)),
            rate_limiter,
            processed_label_id: OnceCell::new(),
        })
    }

    /// Sends the request, refreshing the access token and retrying once
    /// when Gmail rejects it. A second rejection flags the grant invalid.
    async fn send_authorized<F>(&self, build: F) -> AppResult<reqwest::Response>
    where
        F: Fn(&str) -> reqwest::RequestBuilder,
    {
        let token = self.access_token.read().await.clone();
        let resp = build(&token).send().await?;

        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        let Some(refresh_token) = self.user.refresh_token()? else {
            OauthTokenCtrl::mark_invalid(&self.conn, self.user.token_id).await?;
            return Err(AppError::ConnectionInvalid);
        };

        let new_token = OauthTokenCtrl::force_refresh(
            &self.http_client,
            &self.conn,
            self.user.token_id,
            &self.user.email,
            &refresh_token,
        )
        .await?;
        *self.access_token.write().await = new_token.clone();

        let resp = build(&new_token).send().await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!(
                "Refreshed token still rejected for {}. Flagging invalid",
                self.user.email
            );
            OauthTokenCtrl::mark_invalid(&self.conn, self.user.token_id).await?;
            return Err(AppError::ConnectionInvalid);
        }

        Ok(resp)
    }

    async fn get_message_by_id(&self, message_id: &str) -> AppResult<Message> {
        self.rate_limiter
            .acquire(GMAIL_API_QUOTA.messages_get)
            .await;

        let url = gmail_url!("messages", message_id);
        let resp = self
            .send_authorized(|token| {
                self.http_client
                    .get(&url)
                    .bearer_auth(token)
                    .query(&[("format", "full")])
            })
            .await?;

        Ok(resp.json::<Message>().await?)
    }

    /// Resolves the processed label's id, creating the label on first use.
    async fn ensure_processed_label(&self) -> AppResult<&String> {
        self.processed_label_id
            .get_or_try_init(|| async {
                let label_name = &cfg.processing.processed_label;

                if let Some(id) = self.find_label_id(label_name).await? {
                    return Ok(id);
                }

                match self.create_label(label_name).await {
                    Ok(id) => Ok(id),
                    // 409: another cycle created it between list and create
                    Err(AppError::BadRequest(_)) | Err(AppError::Internal(_)) => self
                        .find_label_id(label_name)
                        .await?
                        .ok_or_else(|| {
                            AppError::Internal(anyhow::anyhow!(
                                "Label {} missing after create",
                                label_name
                            ))
                        }),
                    Err(e) => Err(e),
                }
            })
            .await
    }

    async fn find_label_id(&self, label_name: &str) -> AppResult<Option<String>> {
        self.rate_limiter.acquire(GMAIL_API_QUOTA.labels_list).await;

        let url = gmail_url!("labels");
        let resp = self
            .send_authorized(|token| self.http_client.get(&url).bearer_auth(token))
            .await?;
        let data = resp.json::<ListLabelsResponse>().await?;

        let id = data
            .labels
            .unwrap_or_default()
            .into_iter()
            .find(|l| l.name.as_deref() == Some(label_name))
            .and_then(|l| l.id);

        Ok(id)
    }

    async fn create_label(&self, label_name: &str) -> AppResult<String> {
        self.rate_limiter
            .acquire(GMAIL_API_QUOTA.labels_create)
            .await;

        let label = Label {
            name: Some(label_name.to_string()),
            type_: Some("user".to_string()),
            message_list_visibility: Some("hide".to_string()),
            label_list_visibility: Some("labelHide".to_string()),
            ..Default::default()
        };

        let url = gmail_url!("labels");
        let resp = self
            .send_authorized(|token| self.http_client.post(&url).bearer_auth(token).json(&label))
            .await?;
        let data = resp.json::<serde_json::Value>().await?;

        if let Some(error) = data.get("error") {
            return Err(AppError::Internal(anyhow::anyhow!(
                "Error creating label {}: {:?}",
                label_name,
                error
            )));
        }

        let created: Label = serde_json::from_value(data)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Bad label response: {e}")))?;

        created
            .id
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Created label has no id")))
    }
}

#[async_trait]
impl Mailbox for EmailClient {
    async fn fetch_unprocessed(&self, max_results: u32) -> AppResult<Vec<FetchedMessage>> {
        self.rate_limiter
            .acquire(GMAIL_API_QUOTA.messages_list)
            .await;

        let query = format!("is:unread -label:{}", cfg.processing.processed_label);
        let url = gmail_url!("messages");
        let list_query = [
            ("q".to_string(), query),
            ("maxResults".to_string(), max_results.to_string()),
        ];

        let resp = self
            .send_authorized(|token| {
                self.http_client
                    .get(&url)
                    .bearer_auth(token)
                    .query(&list_query)
            })
            .await?;
        let data = resp.json::<ListMessagesResponse>().await?;

        let ids = data
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.id)
            .collect::<Vec<_>>();

        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_message_by_id(&id).await {
                Ok(msg) => match FetchedMessage::from_gmail_message(&msg) {
                    Ok(fetched) => messages.push(fetched),
                    Err(e) => {
                        tracing::warn!("Skipping unparseable message {}: {:?}", id, e);
                    }
                },
                Err(AppError::ConnectionInvalid) => return Err(AppError::ConnectionInvalid),
                Err(e) => {
                    tracing::warn!("Skipping message {} after fetch error: {:?}", id, e);
                }
            }
        }

        // Gmail lists newest first. Process oldest first.
        messages.reverse();

        Ok(messages)
    }

    async fn mark_processed(&self, message_id: &str) -> AppResult<()> {
        let label_id = self.ensure_processed_label().await?.clone();

        self.rate_limiter
            .acquire(GMAIL_API_QUOTA.messages_modify)
            .await;

        let url = gmail_url!("messages", message_id, "modify");
        let resp = self
            .send_authorized(|token| {
                self.http_client.post(&url).bearer_auth(token).json(&json!({
                    "addLabelIds": [label_id],
                    "removeLabelIds": ["UNREAD"]
                }))
            })
            .await?;
        let data = resp.json::<serde_json::Value>().await?;

        if data.get("error").is_some() {
            return Err(AppError::Internal(anyhow::anyhow!(
                "Error labelling message {}: {:?}",
                message_id,
                data
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_gmail_url() {
        let url = gmail_url!("messages");
        assert_eq!(url, "https://www.googleapis.com/gmail/v1/users/me/messages");
        let url = gmail_url!("messages", "123", "modify");
        assert_eq!(
            url,
            "https://www.googleapis.com/gmail/v1/users/me/messages/123/modify"
        );
    }
}
