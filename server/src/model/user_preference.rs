use anyhow::Context;
use num_traits::FromPrimitive;

use crate::{
    db_core::prelude::*,
    error::{extract_database_error_code, AppResult, DatabaseErrorCode},
    server_config::cfg,
};

pub struct UserPreferenceCtrl;

impl UserPreferenceCtrl {
    /// Fetches the user's preferences, materializing a row from the
    /// configured defaults on first access.
    pub async fn get_or_default(
        conn: &DatabaseConnection,
        user_id: i32,
    ) -> AppResult<user_preference::Model> {
        if let Some(prefs) = Self::get(conn, user_id).await? {
            return Ok(prefs);
        }

        let now = chrono::Utc::now().into();
        let active_model = user_preference::ActiveModel {
            id: ActiveValue::NotSet,
            user_id: ActiveValue::Set(user_id),
            urgency_threshold: ActiveValue::Set(cfg.defaults.urgency_threshold),
            digest_frequency_minutes: ActiveValue::Set(cfg.defaults.digest_frequency_minutes),
            quiet_hours_start: ActiveValue::Set(None),
            quiet_hours_end: ActiveValue::Set(None),
            slack_channel: ActiveValue::Set(cfg.defaults.slack_channel.clone()),
            custom_urgent_keywords: ActiveValue::Set(cfg.defaults.custom_urgent_keywords.clone()),
            enable_batch_digest: ActiveValue::Set(true),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
        };

        let insert_result = UserPreference::insert(active_model).exec(conn).await;

        match insert_result {
            Ok(_) => {}
            Err(e) => match extract_database_error_code(&e).and_then(DatabaseErrorCode::from_u32)
            {
                // Another cycle materialized the row first
                Some(DatabaseErrorCode::UniqueViolation) => {}
                _ => Err(e).context("Error creating default preferences")?,
            },
        }

        let prefs = Self::get(conn, user_id)
            .await?
            .context("Preferences missing after insert")?;

        Ok(prefs)
    }

    async fn get(
        conn: &DatabaseConnection,
        user_id: i32,
    ) -> AppResult<Option<user_preference::Model>> {
        let prefs = UserPreference::find()
            .filter(user_preference::Column::UserId.eq(user_id))
            .one(conn)
            .await
            .context("Error fetching user preferences")?;

        Ok(prefs)
    }

    pub async fn update_threshold(
        conn: &DatabaseConnection,
        user_id: i32,
        urgency_threshold: f64,
    ) -> AppResult<()> {
        UserPreference::update_many()
            .col_expr(
                user_preference::Column::UrgencyThreshold,
                Expr::value(urgency_threshold),
            )
            .col_expr(
                user_preference::Column::UpdatedAt,
                Expr::value(DateTimeWithTimeZone::from(chrono::Utc::now())),
            )
            .filter(user_preference::Column::UserId.eq(user_id))
            .exec(conn)
            .await
            .context("Error updating urgency threshold")?;

        Ok(())
    }
}
