use chrono::{Duration, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;

// Refresh this far ahead of the recorded expiry so a token never dies
// mid-fetch.
const EXPIRY_MARGIN_SECS: i64 = 5 * 60;

pub fn check_expired(expires_at: DateTimeWithTimeZone) -> bool {
    let now_with_margin = Utc::now().fixed_offset() + Duration::seconds(EXPIRY_MARGIN_SECS);
    now_with_margin > expires_at.fixed_offset()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_expired() {
        let past = Utc::now().fixed_offset() - Duration::hours(1);
        assert!(check_expired(past));

        // Inside the refresh margin counts as expired
        let soon = Utc::now().fixed_offset() + Duration::seconds(60);
        assert!(check_expired(soon));

        let later = Utc::now().fixed_offset() + Duration::hours(1);
        assert!(!check_expired(later));
    }
}
