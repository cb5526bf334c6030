pub use super::oauth_token::Entity as OauthToken;
pub use super::processed_email::Entity as ProcessedEmail;
pub use super::user::Entity as User;
pub use super::user_preference::Entity as UserPreference;
