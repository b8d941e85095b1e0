//! Clean-up of degenerate model output before it is shown.

/// Runs of one character longer than this are collapsed to one copy.
const MAX_CHAR_RUN: usize = 10;
/// Phrase truncation only applies to outputs with more tokens than this.
const MIN_TOKENS_FOR_PHRASE_CHECK: usize = 40;
/// Prefix phrase lengths (in tokens) that are checked for repetition.
const PHRASE_LENGTHS: std::ops::RangeInclusive<usize> = 2..=7;
/// A prefix phrase occurring more often than this triggers truncation.
const MAX_PHRASE_OCCURRENCES: usize = 3;
/// Tokens kept after the phrase when truncating.
const TOKENS_AFTER_PHRASE: usize = 50;

/// Collapses pathological repetition in generated text.
///
/// First, every run of more than ten identical characters becomes a single
/// character. Then, for outputs over forty tokens, the opening phrase of two
/// to seven tokens is checked; if it occurs more than three times the output
/// is cut to that phrase plus the fifty tokens that follow it. Otherwise the
/// text is returned trimmed. Empty input comes back unchanged.
pub fn sanitize(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let collapsed = collapse_char_runs(text);
    let tokens: Vec<&str> = collapsed.split_whitespace().collect();

    if tokens.len() > MIN_TOKENS_FOR_PHRASE_CHECK {
        let joined = tokens.join(" ");
        for len in PHRASE_LENGTHS {
            let phrase = tokens[..len].join(" ");
            if joined.matches(phrase.as_str()).count() > MAX_PHRASE_OCCURRENCES {
                let end = (len + TOKENS_AFTER_PHRASE).min(tokens.len());
                return format!("{phrase} {}", tokens[len..end].join(" "));
            }
        }
    }

    collapsed.trim().to_string()
}

fn collapse_char_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        let mut run = 1;
        while chars.next_if_eq(&c).is_some() {
            run += 1;
        }
        let keep = if run > MAX_CHAR_RUN { 1 } else { run };
        out.extend(std::iter::repeat(c).take(keep));
    }
    out
}
