pub mod provider;

use chrono::{DateTime, NaiveDate, Utc};
use indoc::formatdoc;
use sea_orm::{ActiveEnum, Iterable};
use serde::Deserialize;

use crate::{
    db_core::prelude::{MessageCategory, SenderCategory},
    email::fetched_message::FetchedMessage,
    server_config::cfg,
};
use provider::{ClassificationProvider, GenerateRequest};

const FALLBACK_BASE_SCORE: f64 = 3.0;

/// What the language model extracted from one email. Always well-formed:
/// unusable model output degrades field by field to neutral defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub sender_category: SenderCategory,
    pub message_category: MessageCategory,
    pub summary: String,
    pub action_items: Vec<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub base_score: f64,
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    sender_category: Option<String>,
    message_category: Option<String>,
    summary: Option<String>,
    action_items: Option<Vec<String>>,
    deadline: Option<String>,
    base_score: Option<f64>,
}

fn system_prompt() -> String {
    let sender_categories = SenderCategory::iter()
        .map(|v| v.to_value())
        .collect::<Vec<_>>()
        .join(", ");
    let message_categories = MessageCategory::iter()
        .map(|v| v.to_value())
        .collect::<Vec<_>>()
        .join(", ");

    formatdoc! {r#"
        You are an assistant that triages emails for a busy professional.
        Classify the email between the tags and respond with only a JSON object with these keys:
        sender_category: one of [{sender_categories}]
        message_category: one of [{message_categories}]
        summary: one sentence describing what the email wants
        action_items: array of short strings, empty if none
        deadline: ISO 8601 datetime if the email names one, otherwise null
        base_score: number from 0 to 10 for how urgent the content itself is
        Do not provide explanations or any text outside the JSON object."#}
}

pub async fn classify_email(
    provider: &dyn ClassificationProvider,
    msg: &FetchedMessage,
) -> Classification {
    let user_prompt = formatdoc! {r#"
        Classify the following email.
        <from>{from}</from>
        <subject>{subject}</subject>
        <body>{body}</body>"#,
        from = msg.from_address,
        subject = msg.subject,
        body = msg.truncated_body(cfg.classifier.body_char_budget),
    };

    let request = GenerateRequest {
        system: Some(system_prompt()),
        user: user_prompt,
        temperature: cfg.classifier.temperature,
    };

    match provider.generate(request).await {
        Ok(raw) => parse_classification(&raw, &msg.subject),
        Err(e) => {
            tracing::warn!(
                "Classification call failed for message {}: {:?}. Using fallback",
                msg.id,
                e
            );
            fallback_classification(&msg.subject)
        }
    }
}

/// Parses model output, tolerating prose around the JSON object. Each
/// unusable field falls back independently.
pub fn parse_classification(raw: &str, subject: &str) -> Classification {
    let json_slice = match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => return fallback_classification(subject),
    };

    let parsed: RawClassification = match serde_json::from_str(json_slice) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!("Could not parse classification JSON: {e}");
            return fallback_classification(subject);
        }
    };

    let sender_category = parsed
        .sender_category
        .and_then(|s| SenderCategory::try_from_value(&s.trim().to_uppercase()).ok())
        .unwrap_or(SenderCategory::Other);

    let message_category = parsed
        .message_category
        .and_then(|s| MessageCategory::try_from_value(&s.trim().to_uppercase()).ok())
        .unwrap_or(MessageCategory::Info);

    let summary = parsed
        .summary
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| subject.to_string());

    let action_items = parsed
        .action_items
        .unwrap_or_default()
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect();

    let deadline = parsed.deadline.as_deref().and_then(parse_deadline);

    let base_score = parsed
        .base_score
        .map(|s| s.clamp(0.0, 10.0))
        .unwrap_or(FALLBACK_BASE_SCORE);

    Classification {
        sender_category,
        message_category,
        summary,
        action_items,
        deadline,
        base_score,
    }
}

pub fn fallback_classification(subject: &str) -> Classification {
    Classification {
        sender_category: SenderCategory::Other,
        message_category: MessageCategory::Info,
        summary: subject.to_string(),
        action_items: Vec::new(),
        deadline: None,
        base_score: FALLBACK_BASE_SCORE,
    }
}

fn parse_deadline(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("null") || raw.eq_ignore_ascii_case("none") {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    // Date-only deadlines count until end of day
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(23, 59, 59).map(|dt| dt.and_utc());
    }

    tracing::warn!("Unparseable deadline from model: {raw}");
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
enum ReplyTone {
    Formal,
    Enthusiastic,
    Casual,
    Professional,
}

fn reply_tone(sender_category: SenderCategory) -> ReplyTone {
    match sender_category {
        SenderCategory::Professor | SenderCategory::Manager => ReplyTone::Formal,
        SenderCategory::Recruiter => ReplyTone::Enthusiastic,
        SenderCategory::Peer => ReplyTone::Casual,
        SenderCategory::Other => ReplyTone::Professional,
    }
}

/// Drafts a reply suggestion. Best effort: a failed or empty generation
/// yields no draft rather than an error.
pub async fn generate_draft_reply(
    provider: &dyn ClassificationProvider,
    msg: &FetchedMessage,
    classification: &Classification,
) -> Option<String> {
    let tone = reply_tone(classification.sender_category);
    let sender = msg.from_name.as_deref().unwrap_or(&msg.from_address);

    let user_prompt = formatdoc! {r#"
        Write a {tone} reply to the email below, under 150 words.
        Address the sender by name where one is given and answer what they asked.
        Do not invent commitments or dates that are not in the email.
        Respond with only the reply body, no subject line.
        The email is from {sender}.
        <subject>{subject}</subject>
        <body>{body}</body>"#,
        subject = msg.subject,
        body = msg.truncated_body(cfg.classifier.body_char_budget),
    };

    let request = GenerateRequest {
        system: None,
        user: user_prompt,
        temperature: cfg.classifier.draft_temperature,
    };

    match provider.generate(request).await {
        Ok(text) => {
            let text = text.trim();
            if text.is_empty() {
                None
            } else {
                Some(text.to_string())
            }
        }
        Err(e) => {
            tracing::warn!("Draft generation failed for message {}: {:?}", msg.id, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_parse_classification_full() {
        let raw = r#"{
            "sender_category": "PROFESSOR",
            "message_category": "SUBMISSION",
            "summary": "Final report is due soon.",
            "action_items": ["Submit report", "Email confirmation"],
            "deadline": "2026-09-01T17:00:00Z",
            "base_score": 8.5
        }"#;

        let c = parse_classification(raw, "subject");
        assert_eq!(c.sender_category, SenderCategory::Professor);
        assert_eq!(c.message_category, MessageCategory::Submission);
        assert_eq!(c.summary, "Final report is due soon.");
        assert_eq!(c.action_items, vec!["Submit report", "Email confirmation"]);
        assert_eq!(
            c.deadline,
            Some(Utc.with_ymd_and_hms(2026, 9, 1, 17, 0, 0).unwrap())
        );
        assert_eq!(c.base_score, 8.5);
    }

    #[test]
    fn test_parse_classification_with_surrounding_prose() {
        let raw = concat!(
            "Here is the classification you asked for:\n",
            r#"{"sender_category": "manager", "message_category": "task", "summary": "Do the thing", "action_items": [], "deadline": null, "base_score": 6}"#,
            "\nLet me know if you need anything else."
        );

        let c = parse_classification(raw, "subject");
        assert_eq!(c.sender_category, SenderCategory::Manager);
        assert_eq!(c.message_category, MessageCategory::Task);
        assert_eq!(c.base_score, 6.0);
    }

    #[test]
    fn test_parse_classification_unknown_enum_values() {
        let raw = r#"{
            "sender_category": "ALIEN",
            "message_category": "PARTY",
            "summary": "Something",
            "action_items": [],
            "deadline": null,
            "base_score": 5
        }"#;

        let c = parse_classification(raw, "subject");
        assert_eq!(c.sender_category, SenderCategory::Other);
        assert_eq!(c.message_category, MessageCategory::Info);
        assert_eq!(c.base_score, 5.0);
    }

    #[test]
    fn test_parse_classification_missing_fields() {
        let c = parse_classification(r#"{"sender_category": "PEER"}"#, "the subject line");
        assert_eq!(c.sender_category, SenderCategory::Peer);
        assert_eq!(c.message_category, MessageCategory::Info);
        assert_eq!(c.summary, "the subject line");
        assert!(c.action_items.is_empty());
        assert_eq!(c.deadline, None);
        assert_eq!(c.base_score, FALLBACK_BASE_SCORE);
    }

    #[test]
    fn test_parse_classification_not_json() {
        let c = parse_classification("I could not classify this email.", "fallback subject");
        assert_eq!(c, fallback_classification("fallback subject"));
    }

    #[test]
    fn test_base_score_clamped() {
        let c = parse_classification(r#"{"base_score": 42}"#, "s");
        assert_eq!(c.base_score, 10.0);

        let c = parse_classification(r#"{"base_score": -3}"#, "s");
        assert_eq!(c.base_score, 0.0);
    }

    #[test]
    fn test_parse_deadline_formats() {
        assert_eq!(
            parse_deadline("2026-09-01T12:00:00+02:00"),
            Some(Utc.with_ymd_and_hms(2026, 9, 1, 10, 0, 0).unwrap())
        );
        assert_eq!(
            parse_deadline("2026-09-01"),
            Some(Utc.with_ymd_and_hms(2026, 9, 1, 23, 59, 59).unwrap())
        );
        assert_eq!(parse_deadline("null"), None);
        assert_eq!(parse_deadline(""), None);
        assert_eq!(parse_deadline("next Tuesday-ish"), None);
    }

    #[test]
    fn test_empty_summary_falls_back_to_subject() {
        let c = parse_classification(r#"{"summary": "   "}"#, "real subject");
        assert_eq!(c.summary, "real subject");
    }

    #[test]
    fn test_reply_tones() {
        assert_eq!(reply_tone(SenderCategory::Professor), ReplyTone::Formal);
        assert_eq!(reply_tone(SenderCategory::Manager), ReplyTone::Formal);
        assert_eq!(reply_tone(SenderCategory::Recruiter), ReplyTone::Enthusiastic);
        assert_eq!(reply_tone(SenderCategory::Peer), ReplyTone::Casual);
        assert_eq!(reply_tone(SenderCategory::Other), ReplyTone::Professional);

        assert_eq!(ReplyTone::Formal.to_string(), "formal");
        assert_eq!(ReplyTone::Enthusiastic.to_string(), "enthusiastic");
    }

    #[test]
    fn test_system_prompt_lists_categories() {
        let prompt = system_prompt();
        for v in SenderCategory::iter() {
            assert!(prompt.contains(&v.to_value()));
        }
        for v in MessageCategory::iter() {
            assert!(prompt.contains(&v.to_value()));
        }
    }
}
