//! Message parsing and MIME body selection
//!
//! Parses RFC822 messages using `mailparse` into [`MessageSummary`] and
//! [`MessageContent`]. Absent headers resolve to sentinels; undecodable
//! bytes fail with `Decode` so callers can treat them per message.

use mailparse::{DispositionType, MailHeader, MailHeaderMap, ParsedMail};

use crate::errors::{AppError, AppResult};
use crate::models::{MessageContent, MessageSummary, NO_SUBJECT, UNKNOWN};

/// Parse header fields into a summary
///
/// `raw` may be a full message or only its header block.
///
/// # Errors
///
/// - `Decode` if the header block cannot be parsed
pub fn parse_summary(id: &str, raw: &[u8]) -> AppResult<MessageSummary> {
    let (headers, _) = mailparse::parse_headers(raw)
        .map_err(|e| AppError::Decode(format!("failed to parse headers of message {id}: {e}")))?;
    Ok(summary_from_headers(id, &headers))
}

/// Parse a full message into headers plus decoded body
///
/// # Errors
///
/// - `Decode` if the message structure or the selected body part cannot be
///   decoded
pub fn parse_content(id: &str, raw: &[u8]) -> AppResult<MessageContent> {
    let parsed = mailparse::parse_mail(raw)
        .map_err(|e| AppError::Decode(format!("failed to parse message {id}: {e}")))?;

    let content = select_body(&parsed)
        .map_err(|e| AppError::Decode(format!("failed to decode body of message {id}: {e}")))?;

    Ok(MessageContent {
        summary: summary_from_headers(id, &parsed.headers),
        to: header_or(&parsed.headers, "To", UNKNOWN),
        content,
    })
}

fn summary_from_headers(id: &str, headers: &[MailHeader<'_>]) -> MessageSummary {
    MessageSummary {
        id: id.to_owned(),
        sender: header_or(headers, "From", UNKNOWN),
        date: header_or(headers, "Date", UNKNOWN),
        subject: header_or(headers, "Subject", NO_SUBJECT),
    }
}

/// First value of a header (case-insensitive), or `sentinel` if absent or blank
fn header_or(headers: &[MailHeader<'_>], key: &str, sentinel: &str) -> String {
    headers
        .get_first_value(key)
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| sentinel.to_owned())
}

/// Pick and decode the body text
///
/// Multipart messages take the first `text/plain` part in document order and
/// fall back to the first `text/html` part. Single-part messages decode their
/// own payload. A multipart message with neither yields an empty body.
fn select_body(mail: &ParsedMail<'_>) -> Result<String, mailparse::MailParseError> {
    if mail.subparts.is_empty() {
        return mail.get_body();
    }

    let mut first_html = None;
    if let Some(plain) = find_text_part(mail, &mut first_html) {
        return plain.get_body();
    }
    match first_html {
        Some(html) => html.get_body(),
        None => Ok(String::new()),
    }
}

/// Depth-first walk returning the first inline `text/plain` leaf
///
/// Records the first inline `text/html` leaf seen along the way.
fn find_text_part<'m, 'a>(
    part: &'m ParsedMail<'a>,
    first_html: &mut Option<&'m ParsedMail<'a>>,
) -> Option<&'m ParsedMail<'a>> {
    if part.subparts.is_empty() {
        if is_attachment(part) {
            return None;
        }
        return match part.ctype.mimetype.to_ascii_lowercase().as_str() {
            "text/plain" => Some(part),
            "text/html" => {
                if first_html.is_none() {
                    *first_html = Some(part);
                }
                None
            }
            _ => None,
        };
    }

    part.subparts
        .iter()
        .find_map(|sub| find_text_part(sub, first_html))
}

/// Whether a leaf part is an attachment rather than body content
fn is_attachment(part: &ParsedMail<'_>) -> bool {
    let disp = part.get_content_disposition();
    disp.disposition == DispositionType::Attachment
        || disp.params.contains_key("filename")
        || part.ctype.params.contains_key("name")
}

#[cfg(test)]
mod tests {
    use super::{parse_content, parse_summary};
    use crate::errors::AppError;

    #[test]
    fn parses_simple_plain_text_message() {
        let raw = b"From: sender@example.com\r\nTo: user@example.com\r\nSubject: Hi\r\nDate: Wed, 1 Jan 2025 00:00:00 +0000\r\n\r\nHello there";
        let parsed = parse_content("7", raw).expect("parse should succeed");

        assert_eq!(parsed.summary.id, "7");
        assert_eq!(parsed.summary.subject, "Hi");
        assert_eq!(parsed.summary.sender, "sender@example.com");
        assert_eq!(parsed.summary.date, "Wed, 1 Jan 2025 00:00:00 +0000");
        assert_eq!(parsed.to, "user@example.com");
        assert_eq!(parsed.content, "Hello there");
    }

    #[test]
    fn absent_headers_resolve_to_sentinels() {
        let raw = b"X-Mailer: test\r\n\r\nbody";
        let summary = parse_summary("1", raw).expect("parse should succeed");
        assert_eq!(summary.sender, "Unknown");
        assert_eq!(summary.date, "Unknown");
        assert_eq!(summary.subject, "No Subject");

        let content = parse_content("1", raw).expect("parse should succeed");
        assert_eq!(content.to, "Unknown");
    }

    #[test]
    fn summary_parses_header_only_fetch() {
        let raw = b"Subject: =?UTF-8?B?SGVsbG8gV29ybGQ=?=\r\nFrom: a@example.com\r\n\r\n";
        let summary = parse_summary("9", raw).expect("parse should succeed");
        assert_eq!(summary.subject, "Hello World");
        assert_eq!(summary.sender, "a@example.com");
    }

    #[test]
    fn multipart_prefers_plain_text_over_earlier_html() {
        let raw = concat!(
            "From: a@example.com\r\n",
            "Subject: Both\r\n",
            "MIME-Version: 1.0\r\n",
            "Content-Type: multipart/alternative; boundary=\"b1\"\r\n",
            "\r\n",
            "--b1\r\n",
            "Content-Type: text/html; charset=utf-8\r\n",
            "\r\n",
            "<p>html body</p>\r\n",
            "--b1\r\n",
            "Content-Type: text/plain; charset=utf-8\r\n",
            "\r\n",
            "plain body\r\n",
            "--b1--\r\n",
        );
        let parsed = parse_content("3", raw.as_bytes()).expect("parse should succeed");
        assert_eq!(parsed.content.trim_end(), "plain body");
    }

    #[test]
    fn multipart_with_only_html_uses_decoded_html() {
        let raw = concat!(
            "From: a@example.com\r\n",
            "Subject: Html\r\n",
            "MIME-Version: 1.0\r\n",
            "Content-Type: multipart/mixed; boundary=\"b2\"\r\n",
            "\r\n",
            "--b2\r\n",
            "Content-Type: text/html; charset=utf-8\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "PGI+SGVsbG88L2I+\r\n",
            "--b2--\r\n",
        );
        let parsed = parse_content("4", raw.as_bytes()).expect("parse should succeed");
        assert_eq!(parsed.content, "<b>Hello</b>");
    }

    #[test]
    fn nested_multipart_is_walked_in_document_order() {
        let raw = concat!(
            "Content-Type: multipart/mixed; boundary=\"outer\"\r\n",
            "\r\n",
            "--outer\r\n",
            "Content-Type: multipart/alternative; boundary=\"inner\"\r\n",
            "\r\n",
            "--inner\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "inner plain\r\n",
            "--inner--\r\n",
            "--outer\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "second plain\r\n",
            "--outer--\r\n",
        );
        let parsed = parse_content("5", raw.as_bytes()).expect("parse should succeed");
        assert_eq!(parsed.content.trim_end(), "inner plain");
    }

    #[test]
    fn text_attachment_is_not_taken_as_body() {
        let raw = concat!(
            "Content-Type: multipart/mixed; boundary=\"b3\"\r\n",
            "\r\n",
            "--b3\r\n",
            "Content-Type: text/plain; name=\"notes.txt\"\r\n",
            "Content-Disposition: attachment; filename=\"notes.txt\"\r\n",
            "\r\n",
            "attached\r\n",
            "--b3\r\n",
            "Content-Type: text/html\r\n",
            "\r\n",
            "<i>inline</i>\r\n",
            "--b3--\r\n",
        );
        let parsed = parse_content("6", raw.as_bytes()).expect("parse should succeed");
        assert_eq!(parsed.content.trim_end(), "<i>inline</i>");
    }

    #[test]
    fn single_part_quoted_printable_is_decoded() {
        let raw = b"Content-Type: text/plain; charset=utf-8\r\nContent-Transfer-Encoding: quoted-printable\r\n\r\ncaf=C3=A9";
        let parsed = parse_content("8", raw).expect("parse should succeed");
        assert_eq!(parsed.content, "caf\u{e9}");
    }

    #[test]
    fn malformed_header_block_fails_with_decode_error() {
        let err = parse_summary("2", b" Subject: overhang\r\n\r\n").expect_err("must fail");
        assert!(matches!(err, AppError::Decode(_)));
    }
}
