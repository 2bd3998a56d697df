//! Text reports for tool results

use std::fmt::Write as _;

use crate::models::{DailyCount, MessageSummary};

/// Report text when a search matches nothing
pub const NO_RESULTS: &str = "No emails found matching the criteria.";

/// Render search results as a table, one row per message in input order
pub fn format_results(messages: &[MessageSummary]) -> String {
    if messages.is_empty() {
        return NO_RESULTS.to_owned();
    }

    let mut out = String::from("Found emails:\n\nID | From | Date | Subject\n");
    out.push_str(&"-".repeat(80));
    out.push('\n');
    for message in messages {
        let _ = writeln!(out, "{message}");
    }
    out.push_str(
        "\nUse get-email-content with an email ID to view the full content of a specific email.",
    );
    out
}

/// Render per-day counts, one row per day in input order
pub fn format_daily_counts(counts: &[DailyCount]) -> String {
    let mut out = String::from("Daily email counts:\n\nDate | Count\n");
    out.push_str(&"-".repeat(30));
    out.push('\n');
    for day in counts {
        let _ = writeln!(out, "{} | {}", day.date.format("%Y-%m-%d"), day.count);
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{NO_RESULTS, format_daily_counts, format_results};
    use crate::models::{DailyCount, DayCount, MessageSummary};

    fn summary(id: u32) -> MessageSummary {
        MessageSummary {
            id: id.to_string(),
            sender: format!("sender{id}@example.com"),
            date: "Mon, 1 Jan 2024 09:00:00 +0000".to_owned(),
            subject: format!("Subject {id}"),
        }
    }

    #[test]
    fn empty_results_render_no_results_message() {
        assert_eq!(format_results(&[]), NO_RESULTS);
    }

    #[test]
    fn one_row_per_message_in_input_order() {
        let messages = [summary(9), summary(2), summary(5)];
        let report = format_results(&messages);

        let rows = report
            .lines()
            .filter(|line| line.contains("@example.com"))
            .collect::<Vec<_>>();
        assert_eq!(rows.len(), 3);
        assert!(rows[0].starts_with("9 | "));
        assert!(rows[1].starts_with("2 | "));
        assert!(rows[2].starts_with("5 | "));
        assert!(report.starts_with("Found emails:\n\nID | From | Date | Subject\n"));
        assert!(report.ends_with("view the full content of a specific email."));
    }

    #[test]
    fn daily_counts_render_values_and_timeout_marker() {
        let day = |d| NaiveDate::from_ymd_opt(2024, 1, d).expect("valid date");
        let counts = [
            DailyCount { date: day(1), count: DayCount::Count(3) },
            DailyCount { date: day(2), count: DayCount::TimedOut },
            DailyCount { date: day(3), count: DayCount::Count(0) },
        ];
        let report = format_daily_counts(&counts);
        assert!(report.contains("2024-01-01 | 3\n2024-01-02 | Timeout\n2024-01-03 | 0\n"));
    }
}
