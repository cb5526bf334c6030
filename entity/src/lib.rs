pub mod prelude;

pub mod oauth_token;
pub mod processed_email;
pub mod sea_orm_active_enums;
pub mod user;
pub mod user_preference;
