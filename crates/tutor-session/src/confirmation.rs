//! Free-text grammar for confirming detected mistakes.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::locale::CommandVocabulary;

/// A list of integers separated by ASCII commas, full-width commas,
/// ideographic commas or whitespace.
static NUMBER_LIST: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^\d[\d,，、\s]*$"));

/// The learner's answer to the confirmation prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// Guide through every detected mistake.
    SelectAll,
    /// Guide through the given 1-based positions, ascending and distinct.
    SelectSubset(Vec<usize>),
    /// Discard the detection and start over.
    Redetect,
    /// Not an answer to the prompt; treat as an ordinary question.
    NoMatch,
}

/// Classifies `text` against `candidates` detected mistakes.
///
/// Rules apply in order: select-all token, number list, redetect token,
/// otherwise no match. A number list with no position in `1..=candidates`
/// is no match.
#[must_use]
pub fn classify(text: &str, candidates: usize, vocabulary: &CommandVocabulary) -> Confirmation {
    let trimmed = text.trim();

    if vocabulary.is_select_all(trimmed) {
        return Confirmation::SelectAll;
    }

    if is_number_list(trimmed) {
        let mut positions: Vec<usize> = trimmed
            .split(|c: char| c == ',' || c == '，' || c == '、' || c.is_whitespace())
            .filter_map(|part| part.parse::<usize>().ok())
            .filter(|n| (1..=candidates).contains(n))
            .collect();
        positions.sort_unstable();
        positions.dedup();
        return if positions.is_empty() {
            Confirmation::NoMatch
        } else {
            Confirmation::SelectSubset(positions)
        };
    }

    if vocabulary.is_redetect(trimmed) {
        return Confirmation::Redetect;
    }

    Confirmation::NoMatch
}

fn is_number_list(text: &str) -> bool {
    match NUMBER_LIST.as_ref() {
        Ok(re) => re.is_match(text),
        Err(_) => false,
    }
}
