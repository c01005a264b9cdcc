//! Markdown rendering for transcripts and learning summaries.

use std::fmt::Write;

use chrono::{DateTime, Utc};
use tutor_session::{Message, Role};

use crate::LearningSummary;

/// Renders a conversation as a Markdown document.
///
/// Message content is written as-is since tutor answers are Markdown
/// already. Messages still waiting for their first chunk are left out.
pub struct TranscriptGenerator<'a> {
    title: &'a str,
    messages: &'a [Message],
    generated_at: DateTime<Utc>,
}

impl<'a> TranscriptGenerator<'a> {
    /// Creates a generator stamped with the current time.
    #[must_use]
    pub fn new(title: &'a str, messages: &'a [Message]) -> Self {
        Self {
            title,
            messages,
            generated_at: Utc::now(),
        }
    }

    /// Overrides the export time shown in the footer.
    #[must_use]
    pub const fn generated_at(mut self, at: DateTime<Utc>) -> Self {
        self.generated_at = at;
        self
    }

    /// Generates the complete transcript.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut output = String::new();

        let _ = writeln!(output, "# {}\n", escape_markdown(self.title));
        self.write_summary(&mut output);
        for message in self.messages.iter().filter(|m| !m.pending) {
            Self::write_message(&mut output, message);
        }
        write_footer(&mut output, "Exported", self.generated_at);

        output
    }

    fn write_summary(&self, output: &mut String) {
        let images = self.messages.iter().filter(|m| m.image.is_some()).count();
        let _ = writeln!(output, "| Metric | Value |");
        let _ = writeln!(output, "|--------|-------|");
        let _ = writeln!(output, "| Messages | {} |", self.messages.len());
        let _ = writeln!(output, "| Images | {images} |");
        let _ = writeln!(output);
    }

    fn write_message(output: &mut String, message: &Message) {
        let speaker = match message.role {
            Role::User => "Learner",
            Role::Assistant => "Tutor",
        };
        let _ = writeln!(output, "## {speaker}\n");

        let content = message.content.trim();
        if !content.is_empty() {
            let _ = writeln!(output, "{content}\n");
        }
        if let Some(image) = &message.image {
            let _ = writeln!(
                output,
                "*Image: {} ({})*\n",
                escape_markdown(&image.preview),
                image.mime_type
            );
        }
        if !message.options.is_empty() {
            for choice in &message.options {
                let _ = writeln!(
                    output,
                    "- **{}**: {}",
                    escape_markdown(&choice.label),
                    escape_markdown(&choice.description)
                );
            }
            let _ = writeln!(output);
        }
    }
}

/// Renders a [`LearningSummary`] as Markdown.
pub struct SummaryGenerator<'a> {
    summary: &'a LearningSummary,
    generated_at: DateTime<Utc>,
}

impl<'a> SummaryGenerator<'a> {
    /// Creates a generator stamped with the current time.
    #[must_use]
    pub fn new(summary: &'a LearningSummary) -> Self {
        Self {
            summary,
            generated_at: Utc::now(),
        }
    }

    /// Overrides the time shown in the footer.
    #[must_use]
    pub const fn generated_at(mut self, at: DateTime<Utc>) -> Self {
        self.generated_at = at;
        self
    }

    /// Generates the summary document.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "# Learning Summary\n");

        if self.summary.is_empty() {
            let _ = writeln!(
                output,
                "*No analyses recorded yet. Run mistake detection on an exam page to get started.*\n"
            );
        } else {
            let _ = writeln!(output, "| Metric | Value |");
            let _ = writeln!(output, "|--------|-------|");
            let _ = writeln!(output, "| Analyses | {} |", self.summary.total_analyses);
            let _ = writeln!(output, "| Mistakes detected | {} |", self.summary.total_mistakes);
            let _ = writeln!(output, "| Days | {} |", self.summary.span_days);
            let _ = writeln!(output);

            let _ = writeln!(output, "## Recent Analyses\n");
            if self.summary.recent.is_empty() {
                let _ = writeln!(output, "*No mistakes in the latest analyses. Keep it up!*\n");
            } else {
                for entry in &self.summary.recent {
                    let _ = writeln!(
                        output,
                        "- {}: {} mistake{}",
                        entry.date.format("%Y-%m-%d"),
                        entry.mistakes,
                        if entry.mistakes == 1 { "" } else { "s" }
                    );
                }
                let _ = writeln!(output);
            }
        }

        write_footer(&mut output, "Generated", self.generated_at);
        output
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn write_footer(output: &mut String, verb: &str, at: DateTime<Utc>) {
    let _ = writeln!(output, "---");
    let _ = writeln!(
        output,
        "*{verb} by tutor at {}*",
        at.format("%Y-%m-%d %H:%M:%S UTC")
    );
}

/// Escapes special Markdown characters in text.
fn escape_markdown(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '*' | '_' | '`' | '#' | '[' | ']' | '\\' | '<' | '>' | '|' => {
                result.push('\\');
                result.push(ch);
            }
            '\n' => result.push(' '),
            _ => result.push(ch),
        }
    }
    result
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{NaiveDate, TimeZone};
    use tutor_session::{Choice, IdSource, ImageRef, Message};

    use super::*;
    use crate::DatedCount;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn sample_messages() -> Vec<Message> {
        let ids = IdSource::new();
        let image = ImageRef::new(vec![1, 2, 3], "image/png", "exam_page.png");
        vec![
            Message::user(ids.next_id(), "请分析这张试卷", Some(image)),
            Message::assistant(ids.next_id(), "检测到 1 道错题\n\n1. 题号 3").with_options(vec![
                Choice::new("全部引导", "对所有错题逐一引导"),
            ]),
            Message::user(ids.next_id(), "全部", None),
            Message::placeholder(ids.next_id()),
        ]
    }

    #[test]
    fn test_transcript_snapshot() {
        let messages = sample_messages();
        let markdown = TranscriptGenerator::new("Session 2024-03-01", &messages)
            .generated_at(noon())
            .generate();

        insta::assert_snapshot!(markdown, @r###"
        # Session 2024-03-01

        | Metric | Value |
        |--------|-------|
        | Messages | 4 |
        | Images | 1 |

        ## Learner

        请分析这张试卷

        *Image: exam\_page.png (image/png)*

        ## Tutor

        检测到 1 道错题

        1. 题号 3

        - **全部引导**: 对所有错题逐一引导

        ## Learner

        全部

        ---
        *Exported by tutor at 2024-03-01 12:00:00 UTC*
        "###);
    }

    #[test]
    fn test_transcript_skips_pending() {
        let ids = IdSource::new();
        let messages = vec![Message::placeholder(ids.next_id())];
        let markdown = TranscriptGenerator::new("t", &messages).generate();
        assert!(!markdown.contains("## Tutor"));
    }

    #[test]
    fn test_summary_snapshot() {
        let summary = LearningSummary {
            total_analyses: 3,
            total_mistakes: 5,
            span_days: 4,
            recent: vec![
                DatedCount {
                    date: NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
                    mistakes: 4,
                },
                DatedCount {
                    date: NaiveDate::from_ymd_opt(2024, 2, 27).unwrap(),
                    mistakes: 1,
                },
            ],
        };
        let markdown = SummaryGenerator::new(&summary).generated_at(noon()).generate();

        insta::assert_snapshot!(markdown, @r###"
        # Learning Summary

        | Metric | Value |
        |--------|-------|
        | Analyses | 3 |
        | Mistakes detected | 5 |
        | Days | 4 |

        ## Recent Analyses

        - 2024-02-29: 4 mistakes
        - 2024-02-27: 1 mistake

        ---
        *Generated by tutor at 2024-03-01 12:00:00 UTC*
        "###);
    }

    #[test]
    fn test_empty_summary() {
        let markdown = SummaryGenerator::new(&LearningSummary::default()).generate();
        assert!(markdown.contains("No analyses recorded yet"));
        assert!(!markdown.contains("| Analyses |"));
    }

    #[test]
    fn test_escape_markdown() {
        assert_eq!(escape_markdown("a_b*c"), "a\\_b\\*c");
        assert_eq!(escape_markdown("line1\nline2"), "line1 line2");
    }
}
