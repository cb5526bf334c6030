pub mod oauth_token;
pub mod processed_email;
pub mod response;
pub mod user;
pub mod user_preference;
