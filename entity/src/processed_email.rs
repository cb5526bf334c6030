use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::sea_orm_active_enums::{MessageCategory, PriorityTier, SenderCategory};

/// One row per classified mailbox message, unique per (user_id, gmail_message_id).
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "processed_email")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: i32,
    pub gmail_message_id: String,
    pub thread_id: Option<String>,
    pub from_address: String,
    pub from_name: Option<String>,
    pub subject: String,
    #[sea_orm(column_type = "Text")]
    pub body: String,
    pub snippet: Option<String>,
    pub received_at: DateTimeWithTimeZone,
    pub sender_category: SenderCategory,
    pub message_category: MessageCategory,
    pub priority_tier: PriorityTier,
    #[sea_orm(column_type = "Double")]
    pub urgency_score: f64,
    #[sea_orm(column_type = "Text")]
    pub summary: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub draft_reply: Option<String>,
    pub action_items: Vec<String>,
    pub deadline_detected: Option<DateTimeWithTimeZone>,
    pub processed_at: DateTimeWithTimeZone,
    pub notification_sent: bool,
    pub notification_sent_at: Option<DateTimeWithTimeZone>,
    pub dismissed: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
