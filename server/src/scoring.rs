//! Urgency scoring for classified emails.
//!
//! Combines the classifier's base score with keyword detection, sender
//! weighting, deadline proximity, and a reply/forward bonus into a single
//! 0–10 score. Pure function of its inputs; the reference clock is passed
//! in by the caller.

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::db_core::prelude::SenderCategory;

const RE_TIER_URGENT_STR: &str = r"\b(urgent|asap|immediately|critical)\b";
const RE_TIER_DEADLINE_STR: &str = r"\b(deadline|due today|due tomorrow|eod|end of day)\b";
const RE_TIER_SOON_STR: &str = r"\b(this week|soon|follow up|reminder)\b";
const RE_TIER_RELAXED_STR: &str = r"\b(when you can|no rush)\b";
const RE_REPLY_OR_FORWARD_STR: &str = r"(?i)^\s*(re:|fwd?:)";

lazy_static::lazy_static!(
    static ref RE_TIER_URGENT: Regex = Regex::new(RE_TIER_URGENT_STR).unwrap();
    static ref RE_TIER_DEADLINE: Regex = Regex::new(RE_TIER_DEADLINE_STR).unwrap();
    static ref RE_TIER_SOON: Regex = Regex::new(RE_TIER_SOON_STR).unwrap();
    static ref RE_TIER_RELAXED: Regex = Regex::new(RE_TIER_RELAXED_STR).unwrap();
    static ref RE_REPLY_OR_FORWARD: Regex = Regex::new(RE_REPLY_OR_FORWARD_STR).unwrap();
);

const WEIGHT_BASE: f64 = 0.40;
const WEIGHT_KEYWORD: f64 = 0.20;
const WEIGHT_SENDER: f64 = 0.20;
const WEIGHT_DEADLINE: f64 = 0.15;
const WEIGHT_FOLLOW_UP: f64 = 0.05;

#[derive(Debug, Clone)]
pub struct ScoreInput<'a> {
    /// Base score from the classifier, clamped to [0, 10] before weighting.
    pub base_score: f64,
    pub subject: &'a str,
    pub body: &'a str,
    pub sender_category: SenderCategory,
    pub deadline: Option<DateTime<Utc>>,
    pub is_follow_up: bool,
    /// User-supplied keywords; a match counts as the highest keyword tier.
    pub custom_keywords: &'a [String],
    pub now: DateTime<Utc>,
}

/// Weighted sum of the five urgency signals, clamped to [0, 10] and rounded
/// to one decimal place.
pub fn calculate_urgency_score(input: &ScoreInput) -> f64 {
    let text = format!("{} {}", input.subject, input.body).to_lowercase();

    let base = input.base_score.clamp(0.0, 10.0) * WEIGHT_BASE;
    let keyword = keyword_tier(&text, input.custom_keywords) * WEIGHT_KEYWORD;
    let sender = sender_weight(input.sender_category) * WEIGHT_SENDER;
    let deadline = deadline_proximity(input.deadline, input.now) * WEIGHT_DEADLINE;
    let follow_up = (if input.is_follow_up { 2.0 } else { 0.0 }) * WEIGHT_FOLLOW_UP;

    let total = base + keyword + sender + deadline + follow_up;

    round_to_tenth(total.clamp(0.0, 10.0))
}

/// True when the subject marks the message as a reply or forward.
pub fn is_reply_or_forward(subject: &str) -> bool {
    RE_REPLY_OR_FORWARD.is_match(subject)
}

/// Coarse display tier derived from the final score.
pub fn priority_tier_for_score(score: f64) -> crate::db_core::prelude::PriorityTier {
    use crate::db_core::prelude::PriorityTier;
    match score {
        s if s >= 8.0 => PriorityTier::Urgent,
        s if s >= 6.0 => PriorityTier::High,
        s if s >= 4.0 => PriorityTier::Medium,
        _ => PriorityTier::Low,
    }
}

/// Highest matching keyword tier; tiers never sum. Text must already be
/// lowercased.
fn keyword_tier(text: &str, custom_keywords: &[String]) -> f64 {
    let custom_hit = custom_keywords.iter().any(|kw| {
        let kw = kw.trim().to_lowercase();
        if kw.is_empty() {
            return false;
        }
        // Word-boundary match, same as the built-in tiers
        Regex::new(&format!(r"\b{}\b", regex::escape(&kw)))
            .map(|re| re.is_match(text))
            .unwrap_or(false)
    });

    if custom_hit || RE_TIER_URGENT.is_match(text) {
        8.0
    } else if RE_TIER_DEADLINE.is_match(text) {
        7.0
    } else if RE_TIER_SOON.is_match(text) {
        5.0
    } else if RE_TIER_RELAXED.is_match(text) {
        2.0
    } else {
        0.0
    }
}

fn sender_weight(category: SenderCategory) -> f64 {
    match category {
        SenderCategory::Professor => 8.0,
        SenderCategory::Manager => 8.0,
        SenderCategory::Recruiter => 7.0,
        SenderCategory::Peer => 3.0,
        SenderCategory::Other => 5.0,
    }
}

/// Deadline bucket points: a passed deadline scores maximum, approaching
/// deadlines step down as the window widens, absence contributes zero.
fn deadline_proximity(deadline: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(deadline) = deadline else {
        return 0.0;
    };

    if deadline <= now {
        return 10.0;
    }

    let hours_until = (deadline - now).num_seconds() as f64 / 3600.0;
    match hours_until {
        h if h < 6.0 => 10.0,
        h if h < 24.0 => 9.0,
        h if h < 48.0 => 7.0,
        h if h < 72.0 => 5.0,
        h if h < 24.0 * 7.0 => 3.0,
        _ => 1.0,
    }
}

fn round_to_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
