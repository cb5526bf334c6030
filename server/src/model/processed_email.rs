use anyhow::Context;
use num_traits::FromPrimitive;

use crate::{
    db_core::prelude::*,
    error::{extract_database_error_code, AppResult, DatabaseErrorCode},
};

pub struct ProcessedEmailCtrl;

impl ProcessedEmailCtrl {
    pub async fn exists(
        conn: &DatabaseConnection,
        user_id: i32,
        gmail_message_id: &str,
    ) -> AppResult<bool> {
        let existing = ProcessedEmail::find()
            .filter(processed_email::Column::UserId.eq(user_id))
            .filter(processed_email::Column::GmailMessageId.eq(gmail_message_id))
            .one(conn)
            .await
            .context("Error checking for processed email")?;

        Ok(existing.is_some())
    }

    /// Inserts the row, returning its id. A unique violation on
    /// (user_id, gmail_message_id) means a concurrent cycle got there
    /// first and is reported as `None`.
    pub async fn insert(
        conn: &DatabaseConnection,
        active_model: processed_email::ActiveModel,
    ) -> AppResult<Option<i32>> {
        let insert_result = ProcessedEmail::insert(active_model).exec(conn).await;

        match insert_result {
            Ok(res) => Ok(Some(res.last_insert_id)),
            Err(e) => match extract_database_error_code(&e).and_then(DatabaseErrorCode::from_u32)
            {
                Some(DatabaseErrorCode::UniqueViolation) => Ok(None),
                _ => Err(e).context("Error inserting processed email")?,
            },
        }
    }

    pub async fn mark_notification_sent(
        conn: &DatabaseConnection,
        ids: &[i32],
    ) -> AppResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        ProcessedEmail::update_many()
            .col_expr(processed_email::Column::NotificationSent, Expr::value(true))
            .col_expr(
                processed_email::Column::NotificationSentAt,
                Expr::value(Some(DateTimeWithTimeZone::from(chrono::Utc::now()))),
            )
            .filter(processed_email::Column::Id.is_in(ids.to_vec()))
            .exec(conn)
            .await
            .context("Error marking notifications sent")?;

        Ok(())
    }

    pub async fn dismiss(conn: &DatabaseConnection, id: i32) -> AppResult<()> {
        ProcessedEmail::update_many()
            .col_expr(processed_email::Column::Dismissed, Expr::value(true))
            .filter(processed_email::Column::Id.eq(id))
            .exec(conn)
            .await
            .context("Error dismissing processed email")?;

        Ok(())
    }
}
