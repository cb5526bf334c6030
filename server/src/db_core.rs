pub mod prelude {
    pub use entity::prelude::*;
    pub use entity::sea_orm_active_enums::{
        MessageCategory, PriorityTier, Provider, SenderCategory,
    };
    pub use entity::{oauth_token, processed_email, user, user_preference};
    pub use sea_orm::{
        entity::*, error::*, query::*, DatabaseConnection, DbBackend, FromQueryResult,
        InsertResult,
    };
    pub use sea_orm::prelude::{DateTimeWithTimeZone, Expr};
}
