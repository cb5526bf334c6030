use anyhow::{anyhow, Context};
use lib_utils::crypt;

use crate::{db_core::prelude::*, error::AppResult, util::check_expired};

pub struct UserCtrl;

impl UserCtrl {
    /// All users holding a Gmail grant that has not been flagged invalid.
    /// These are the accounts each processing cycle visits.
    pub async fn all_with_gmail_access(
        conn: &DatabaseConnection,
    ) -> AppResult<Vec<UserWithGmailAccess>> {
        let users = User::find()
            .join(JoinType::InnerJoin, user::Relation::OauthToken.def())
            .filter(oauth_token::Column::Provider.eq(Provider::Gmail))
            .filter(oauth_token::Column::IsInvalid.eq(false))
            .column_as(oauth_token::Column::Id, "token_id")
            .column_as(oauth_token::Column::AccessToken, "access_token")
            .column_as(oauth_token::Column::RefreshToken, "refresh_token")
            .column_as(oauth_token::Column::ExpiresAt, "expires_at")
            .into_model::<UserWithGmailAccess>()
            .all(conn)
            .await
            .context("Error fetching users with gmail access")?;

        Ok(users)
    }
}

/// User row joined with its Gmail token row. Token columns stay encrypted
/// until accessed through the decrypting getters.
#[derive(FromQueryResult, Clone, Debug)]
pub struct UserWithGmailAccess {
    pub id: i32,
    pub email: String,
    pub token_id: i32,
    access_token: String,
    refresh_token: Option<String>,
    pub expires_at: Option<DateTimeWithTimeZone>,
}

impl UserWithGmailAccess {
    pub fn access_token(&self) -> AppResult<String> {
        let decoded = crypt::decrypt(&self.access_token)
            .map_err(|e| anyhow!("Failed to decrypt access token for {}: {:?}", self.email, e))?;

        Ok(decoded)
    }

    pub fn refresh_token(&self) -> AppResult<Option<String>> {
        let Some(encrypted) = self.refresh_token.as_deref() else {
            return Ok(None);
        };
        let decoded = crypt::decrypt(encrypted)
            .map_err(|e| anyhow!("Failed to decrypt refresh token for {}: {:?}", self.email, e))?;

        Ok(Some(decoded))
    }

    /// Missing expiry is treated as expired so the token is refreshed
    /// before first use.
    pub fn access_is_expired(&self) -> bool {
        self.expires_at.map_or(true, check_expired)
    }

    #[cfg(any(test, feature = "mock"))]
    pub fn new_for_test(
        id: i32,
        email: &str,
        token_id: i32,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<DateTimeWithTimeZone>,
    ) -> Self {
        UserWithGmailAccess {
            id,
            email: email.to_string(),
            token_id,
            access_token: access_token.to_string(),
            refresh_token: refresh_token.map(|t| t.to_string()),
            expires_at,
        }
    }
}
