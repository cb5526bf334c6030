use anyhow::Context;
use chrono::{DateTime, Utc};
use google_gmail1::api::{Message, MessagePart};
use lazy_static::lazy_static;
use regex::Regex;
use sea_orm::prelude::DateTimeWithTimeZone;

// `Display Name <addr@example.com>` with optional quotes around the name
const RE_FROM_HEADER_STR: &str = r#"^\s*"?([^"<]*?)"?\s*<([^>]+)>\s*$"#;
const RE_WHITESPACE_STR: &str = r"[\r\t]+";
const RE_LONG_SPACE_STR: &str = r" {2,}";

lazy_static! {
    static ref RE_FROM_HEADER: Regex = Regex::new(RE_FROM_HEADER_STR).unwrap();
    static ref RE_WHITESPACE: Regex = Regex::new(RE_WHITESPACE_STR).unwrap();
    static ref RE_LONG_SPACE: Regex = Regex::new(RE_LONG_SPACE_STR).unwrap();
}

/// A Gmail message reduced to the fields the triage pipeline works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    pub id: String,
    pub thread_id: Option<String>,
    pub from_address: String,
    pub from_name: Option<String>,
    pub subject: String,
    pub snippet: Option<String>,
    pub body: String,
    pub received_at: DateTimeWithTimeZone,
}

impl FetchedMessage {
    /// Builds from a `format=full` Gmail API message. Fails only when the
    /// message carries no id or payload at all; missing headers degrade to
    /// empty fields.
    pub fn from_gmail_message(msg: &Message) -> anyhow::Result<Self> {
        let id = msg.id.clone().context("Message has no id")?;
        let payload = msg
            .payload
            .as_ref()
            .context(format!("Message {} has no payload", id))?;

        let from_header = find_header(payload, "From").unwrap_or_default();
        let (from_name, from_address) = parse_from_header(&from_header);
        let subject = find_header(payload, "Subject").unwrap_or_default();

        let body = extract_body(payload).unwrap_or_default();

        let received_at = msg
            .internal_date
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now)
            .fixed_offset();

        Ok(FetchedMessage {
            id,
            thread_id: msg.thread_id.clone(),
            from_address,
            from_name,
            subject,
            snippet: msg.snippet.clone(),
            body,
            received_at,
        })
    }

    /// Body capped to `max_chars`, never splitting a char boundary.
    pub fn truncated_body(&self, max_chars: usize) -> &str {
        match self.body.char_indices().nth(max_chars) {
            Some((idx, _)) => &self.body[..idx],
            None => &self.body,
        }
    }

    /// Web Gmail URL opening this message.
    pub fn deep_link(&self) -> String {
        format!("https://mail.google.com/mail/u/0/#all/{}", self.id)
    }
}

fn find_header(payload: &MessagePart, name: &str) -> Option<String> {
    payload.headers.as_ref().and_then(|headers| {
        headers
            .iter()
            .find(|h| h.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(name)))
            .and_then(|h| h.value.clone())
    })
}

/// Splits a From header into display name and address. A bare address
/// yields no name.
pub fn parse_from_header(raw: &str) -> (Option<String>, String) {
    if let Some(caps) = RE_FROM_HEADER.captures(raw) {
        let name = caps
            .get(1)
            .map(|m| m.as_str().trim().to_string())
            .filter(|n| !n.is_empty());
        let address = caps
            .get(2)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();
        (name, address)
    } else {
        (None, raw.trim().to_string())
    }
}

/// Prefers a text/plain part anywhere in the MIME tree, falling back to
/// text/html rendered to text.
fn extract_body(payload: &MessagePart) -> Option<String> {
    if let Some(text) = find_part_data(payload, "text/plain") {
        return Some(clean_text(&text));
    }

    if let Some(html) = find_part_data(payload, "text/html") {
        let text: String = html2text::from_read(html.as_bytes(), 400);
        return Some(clean_text(&text));
    }

    None
}

fn find_part_data(part: &MessagePart, mime_type: &str) -> Option<String> {
    if part.mime_type.as_deref() == Some(mime_type) {
        if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_ref()) {
            return Some(String::from_utf8_lossy(data).to_string());
        }
    }

    part.parts
        .as_ref()?
        .iter()
        .find_map(|p| find_part_data(p, mime_type))
}

fn clean_text(text: &str) -> String {
    let t = RE_WHITESPACE.replace_all(text, " ");
    let t = RE_LONG_SPACE.replace_all(&t, " ");
    t.trim().to_string()
}
