use anyhow::{anyhow, Context};
use chrono::DateTime;
use lib_utils::crypt;

use crate::{
    db_core::prelude::*,
    error::{AppError, AppResult},
    model::response::{GoogleTokenErrorResponse, GoogleTokenResponseOrError},
    model::user::UserWithGmailAccess,
    server_config::GoogleOauthConfig,
    HttpClient,
};

enum TokenExchangeError {
    /// Google reports the grant as expired or revoked. Retrying is
    /// pointless until the user re-authorizes.
    InvalidGrant,
    Other(AppError),
}

pub struct OauthTokenCtrl;

impl OauthTokenCtrl {
    /// Returns a usable access token for the user, refreshing it against
    /// Google first when the stored one is expired or about to expire.
    pub async fn get_refreshed_access_token(
        http_client: &HttpClient,
        conn: &DatabaseConnection,
        user: &UserWithGmailAccess,
    ) -> AppResult<String> {
        if !user.access_is_expired() {
            return user.access_token();
        }

        let Some(refresh_token) = user.refresh_token()? else {
            tracing::info!(
                "User {} has an expired access token and no refresh token. Flagging invalid",
                user.email
            );
            Self::mark_invalid(conn, user.token_id).await?;
            return Err(AppError::ConnectionInvalid);
        };

        Self::refresh(http_client, conn, user.token_id, &user.email, &refresh_token).await
    }

    /// Refreshes unconditionally. Used when the API rejects a token that
    /// looked valid by its recorded expiry.
    pub async fn force_refresh(
        http_client: &HttpClient,
        conn: &DatabaseConnection,
        token_id: i32,
        email: &str,
        refresh_token: &str,
    ) -> AppResult<String> {
        Self::refresh(http_client, conn, token_id, email, refresh_token).await
    }

    async fn refresh(
        http_client: &HttpClient,
        conn: &DatabaseConnection,
        token_id: i32,
        email: &str,
        refresh_token: &str,
    ) -> AppResult<String> {
        match Self::exchange_refresh_token(http_client, refresh_token).await {
            Ok((access_token, expires_in)) => {
                Self::store_access_token(conn, token_id, &access_token, expires_in).await?;
                Ok(access_token)
            }
            Err(TokenExchangeError::InvalidGrant) => {
                tracing::info!(
                    "User {} refresh token expired or revoked. Flagging invalid",
                    email
                );
                Self::mark_invalid(conn, token_id).await?;
                Err(AppError::ConnectionInvalid)
            }
            Err(TokenExchangeError::Other(e)) => Err(e),
        }
    }

    async fn exchange_refresh_token(
        http_client: &HttpClient,
        refresh_token: &str,
    ) -> Result<(String, i64), TokenExchangeError> {
        let oauth = GoogleOauthConfig::from_env()
            .map_err(|e| TokenExchangeError::Other(anyhow!("Oauth config: {e}").into()))?;

        let params = [
            ("client_id", oauth.client_id.as_str()),
            ("client_secret", oauth.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let resp = http_client
            .post(&oauth.token_uri)
            .form(&params)
            .send()
            .await
            .map_err(|e| TokenExchangeError::Other(e.into()))?
            .json::<GoogleTokenResponseOrError>()
            .await
            .map_err(|e| TokenExchangeError::Other(e.into()))?;

        match resp {
            GoogleTokenResponseOrError::Response(resp) => {
                Ok((resp.access_token, resp.expires_in as i64))
            }
            GoogleTokenResponseOrError::Error(GoogleTokenErrorResponse { error, .. })
                if error == "invalid_grant" =>
            {
                Err(TokenExchangeError::InvalidGrant)
            }
            GoogleTokenResponseOrError::Error(err) => Err(TokenExchangeError::Other(
                anyhow!("Token refresh error: {:?}", err).into(),
            )),
        }
    }

    pub async fn store_access_token(
        conn: &DatabaseConnection,
        token_id: i32,
        access_token: &str,
        expires_in: i64,
    ) -> AppResult<()> {
        let enc_access_token = crypt::encrypt(access_token)?;
        let expires_at: DateTimeWithTimeZone =
            DateTime::from(chrono::Utc::now() + chrono::Duration::seconds(expires_in));

        OauthToken::update_many()
            .col_expr(oauth_token::Column::AccessToken, Expr::value(enc_access_token))
            .col_expr(oauth_token::Column::ExpiresAt, Expr::value(Some(expires_at)))
            .col_expr(oauth_token::Column::IsInvalid, Expr::value(false))
            .col_expr(
                oauth_token::Column::UpdatedAt,
                Expr::value(DateTimeWithTimeZone::from(chrono::Utc::now())),
            )
            .filter(oauth_token::Column::Id.eq(token_id))
            .exec(conn)
            .await
            .context("Error storing refreshed access token")?;

        Ok(())
    }

    pub async fn mark_invalid(conn: &DatabaseConnection, token_id: i32) -> AppResult<()> {
        OauthToken::update_many()
            .col_expr(oauth_token::Column::IsInvalid, Expr::value(true))
            .col_expr(
                oauth_token::Column::UpdatedAt,
                Expr::value(DateTimeWithTimeZone::from(chrono::Utc::now())),
            )
            .filter(oauth_token::Column::Id.eq(token_id))
            .exec(conn)
            .await
            .context(format!("Error flagging token {} invalid", token_id))?;

        Ok(())
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    use super::*;

    #[tokio::test]
    async fn test_expired_token_without_refresh_flags_invalid() {
        let conn = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();
        let http_client = reqwest::Client::new();

        // No expiry recorded and no refresh token: the grant is unusable
        let user = UserWithGmailAccess::new_for_test(1, "u@example.com", 10, "enc", None, None);

        let result = OauthTokenCtrl::get_refreshed_access_token(&http_client, &conn, &user).await;
        assert!(matches!(result, Err(AppError::ConnectionInvalid)));
    }
}
