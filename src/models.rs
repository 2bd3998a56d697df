//! Tool inputs and transient mail entities
//!
//! Input types are annotated with `JsonSchema` for automatic tool schema
//! generation. Entities are created per operation and never persisted.

use std::fmt;

use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Sentinel for absent sender, recipient, and date headers
pub const UNKNOWN: &str = "Unknown";
/// Sentinel for an absent subject header
pub const NO_SUBJECT: &str = "No Subject";

/// Mailbox view a read operation runs against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Folder {
    /// The account inbox
    #[default]
    Inbox,
    /// The provider's sent-items mailbox
    Sent,
}

/// Header fields of one message
///
/// Rendered as one report row: `id | sender | date | subject`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSummary {
    /// Protocol-assigned identifier (IMAP UID)
    pub id: String,
    /// From header, or [`UNKNOWN`]
    pub sender: String,
    /// Date header, or [`UNKNOWN`]
    pub date: String,
    /// Subject header, or [`NO_SUBJECT`]
    pub subject: String,
}

impl fmt::Display for MessageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | {} | {} | {}",
            self.id, self.sender, self.date, self.subject
        )
    }
}

/// Full message: summary fields plus recipient and decoded body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContent {
    pub summary: MessageSummary,
    /// To header, or [`UNKNOWN`]
    pub to: String,
    /// Decoded body; plain text preferred over HTML
    pub content: String,
}

impl fmt::Display for MessageContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "From: {}\nTo: {}\nDate: {}\nSubject: {}\n\nContent:\n{}",
            self.summary.sender, self.to, self.summary.date, self.summary.subject, self.content
        )
    }
}

/// Outcome of counting one day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayCount {
    /// Number of messages found
    Count(usize),
    /// The day's search exceeded its deadline
    TimedOut,
}

impl fmt::Display for DayCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(n) => write!(f, "{n}"),
            Self::TimedOut => f.write_str("Timeout"),
        }
    }
}

/// Message count for one calendar day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: DayCount,
}

/// Input: search messages by date range and keyword
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchEmailsInput {
    /// First day to include (YYYY-MM-DD); defaults to 7 days ago
    pub start_date: Option<String>,
    /// Last day to include (YYYY-MM-DD); defaults to today
    pub end_date: Option<String>,
    /// Text matched against subject or body
    pub keyword: Option<String>,
    /// Mailbox to search: `inbox` (default) or `sent`
    #[serde(default)]
    pub folder: Folder,
}

/// Input: fetch one full message
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetEmailContentInput {
    /// Identifier from a `search_emails` result
    pub email_id: String,
    /// Mailbox holding the message: `inbox` (default) or `sent`
    #[serde(default)]
    pub folder: Folder,
}

/// Input: count messages per day
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CountDailyEmailsInput {
    /// First day to count (YYYY-MM-DD)
    pub start_date: String,
    /// Last day to count (YYYY-MM-DD)
    pub end_date: String,
}

/// Input: send a plain-text message
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SendEmailInput {
    /// Recipient addresses
    pub to: Vec<String>,
    /// Subject line
    pub subject: String,
    /// Plain-text body
    pub content: String,
    /// Carbon-copy addresses
    #[serde(default)]
    pub cc: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{
        DailyCount, DayCount, Folder, MessageContent, MessageSummary, SearchEmailsInput,
    };

    fn summary() -> MessageSummary {
        MessageSummary {
            id: "42".to_owned(),
            sender: "alice@example.com".to_owned(),
            date: "Fri, 5 Jan 2024 10:00:00 +0000".to_owned(),
            subject: "Invoice".to_owned(),
        }
    }

    #[test]
    fn summary_renders_as_table_row() {
        assert_eq!(
            summary().to_string(),
            "42 | alice@example.com | Fri, 5 Jan 2024 10:00:00 +0000 | Invoice"
        );
    }

    #[test]
    fn content_renders_headers_then_body() {
        let content = MessageContent {
            summary: summary(),
            to: "bob@example.com".to_owned(),
            content: "Please pay.".to_owned(),
        };
        let text = content.to_string();
        assert!(text.starts_with("From: alice@example.com\nTo: bob@example.com\n"));
        assert!(text.ends_with("\n\nContent:\nPlease pay."));
    }

    #[test]
    fn timed_out_day_renders_marker() {
        let day = DailyCount {
            date: NaiveDate::from_ymd_opt(2024, 1, 5).expect("valid date"),
            count: DayCount::TimedOut,
        };
        assert_eq!(day.count.to_string(), "Timeout");
        assert_eq!(DayCount::Count(0).to_string(), "0");
    }

    #[test]
    fn folder_defaults_to_inbox_and_parses_lowercase() {
        let input: SearchEmailsInput =
            serde_json::from_str(r#"{"keyword":"invoice"}"#).expect("valid input");
        assert_eq!(input.folder, Folder::Inbox);

        let input: SearchEmailsInput =
            serde_json::from_str(r#"{"folder":"sent"}"#).expect("valid input");
        assert_eq!(input.folder, Folder::Sent);

        serde_json::from_str::<SearchEmailsInput>(r#"{"folder":"archive"}"#)
            .expect_err("unknown folder must fail");
    }
}
