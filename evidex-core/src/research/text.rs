//! Small text utilities shared by planning, dedup, ranking and grounding.

use std::collections::HashSet;

const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "also", "among", "an", "and",
    "any", "are", "as", "at", "be", "been", "before", "being", "between", "both", "but", "by",
    "can", "could", "did", "do", "does", "doing", "during", "each", "effect", "effects",
    "evidence", "few", "for", "from", "further", "had", "has", "have", "having", "here", "how",
    "however", "if", "in", "into", "is", "it", "its", "more", "most", "much", "other", "our",
    "over", "patients", "such", "than", "that", "the", "their", "them", "then", "there",
    "these", "they", "this", "those", "through", "to", "under", "until", "upon", "very", "was",
    "were", "what", "when", "where", "which", "while", "who", "whom", "why", "will", "with",
    "within", "without", "would", "versus", "vs",
];

const NEGATION_WORDS: &[&str] = &[
    "not", "no", "never", "neither", "nor", "without", "lack", "lacks", "lacked", "doesn't",
    "don't", "isn't", "aren't", "wasn't", "weren't", "won't", "cannot", "failed", "fails",
];

pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// Lowercase alphanumeric tokens.
pub fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

/// Distinct content words: at least four characters, not a stop word.
pub fn content_words(text: &str) -> HashSet<String> {
    tokens(text)
        .filter(|t| t.chars().count() >= 4 && !is_stop_word(t))
        .collect()
}

/// Case-folded, punctuation-free, whitespace-collapsed title.
pub fn normalize_title(title: &str) -> String {
    tokens(title).collect::<Vec<_>>().join(" ")
}

/// Query stripped of stop words and punctuation, at most `max_terms` terms.
pub fn simplify_query(query: &str, max_terms: usize) -> String {
    let mut seen = HashSet::new();
    tokens(query)
        .filter(|t| !is_stop_word(t))
        .filter(|t| seen.insert(t.clone()))
        .take(max_terms)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split prose into sentences on terminal punctuation followed by whitespace.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        let at_boundary = matches!(c, '.' | '!' | '?' | '\n')
            && chars.peek().is_none_or(|next| next.is_whitespace());
        if at_boundary {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    sentences
}

pub fn has_negation(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .any(|w| NEGATION_WORDS.contains(&w))
}

pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", text[..idx].trim_end()),
        None => text.to_string(),
    }
}

/// First plausible four-digit year (1800-2199) in a loose date string.
pub fn extract_year(date: &str) -> Option<i32> {
    let bytes = date.as_bytes();
    (0..bytes.len().saturating_sub(3)).find_map(|i| {
        let window = &bytes[i..i + 4];
        let bounded_left = i == 0 || !bytes[i - 1].is_ascii_digit();
        let bounded_right = bytes.get(i + 4).is_none_or(|b| !b.is_ascii_digit());
        if bounded_left && bounded_right && window.iter().all(u8::is_ascii_digit) {
            std::str::from_utf8(window)
                .ok()?
                .parse::<i32>()
                .ok()
                .filter(|y| (1800..2200).contains(y))
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_words_filters_short_and_stop_words() {
        let words = content_words("The CO2 gap was higher in septic shock patients.");
        assert!(words.contains("septic"));
        assert!(words.contains("shock"));
        assert!(words.contains("higher"));
        assert!(!words.contains("co2"));
        assert!(!words.contains("patients"));
        assert!(!words.contains("the"));
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(
            normalize_title("  Venous-to-Arterial CO2 Gap: A Review! "),
            "venous to arterial co2 gap a review"
        );
    }

    #[test]
    fn test_simplify_query() {
        assert_eq!(
            simplify_query("What is the arteriovenous CO2 gap in septic shock?", 8),
            "arteriovenous co2 gap septic shock"
        );
        assert_eq!(simplify_query("sepsis sepsis lactate", 8), "sepsis lactate");
        assert_eq!(simplify_query("a b c d e", 2), "b c");
    }

    #[test]
    fn test_split_sentences() {
        let s = split_sentences("First claim. Second claim! Value 3.5 mmHg? Trailing");
        assert_eq!(
            s,
            vec!["First claim.", "Second claim!", "Value 3.5 mmHg?", "Trailing"]
        );
    }

    #[test]
    fn test_has_negation() {
        assert!(has_negation("Lactate did not predict mortality"));
        assert!(has_negation("This isn't supported"));
        assert!(!has_negation("Lactate predicted mortality"));
        assert!(!has_negation("Nothing notable"));
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abcdef", 10), "abcdef");
        assert_eq!(truncate_chars("abc def", 4), "abc…");
        assert_eq!(truncate_chars("ééééé", 2), "éé…");
    }

    #[test]
    fn test_extract_year() {
        assert_eq!(extract_year("2021 Mar 4"), Some(2021));
        assert_eq!(extract_year("2019-07-01"), Some(2019));
        assert_eq!(extract_year("Spring 1998"), Some(1998));
        assert_eq!(extract_year("12345"), None);
        assert_eq!(extract_year("n.d."), None);
    }

    #[test]
    fn test_jaccard() {
        let a: HashSet<String> = ["x", "y"].iter().map(|s| s.to_string()).collect();
        let b: HashSet<String> = ["y", "z"].iter().map(|s| s.to_string()).collect();
        assert!((jaccard(&a, &b) - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(jaccard(&HashSet::new(), &HashSet::new()), 0.0);
    }
}
