//! Search keyword extraction
//!
//! Keywords are computed when a form is written and stored alongside it. Search is a
//! plain membership test against this set, so the rules here define what can be found:
//!
//! - title and description are split on whitespace and words longer than
//!   [`MIN_KEYWORD_WORD_LEN`] characters are kept;
//! - the form number is added whole, never tokenized;
//! - every tag is added whole;
//! - category and line of business are added by display name.
//!
//! Everything is lowercased. There is no stemming or stop-word removal.

use std::collections::BTreeSet;

use crate::constants::MIN_KEYWORD_WORD_LEN;
use crate::models::{FormCategory, LineOfBusiness};

/// Borrowed view of the fields keywords are derived from.
#[derive(Debug, Clone, Copy)]
pub struct KeywordSource<'a> {
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub form_number: &'a str,
    pub tags: &'a [String],
    pub category: FormCategory,
    pub line_of_business: LineOfBusiness,
}

pub fn extract_keywords(source: &KeywordSource<'_>) -> BTreeSet<String> {
    let mut keywords = BTreeSet::new();

    add_words(&mut keywords, source.title);
    add_whole(&mut keywords, source.form_number);
    if let Some(description) = source.description {
        add_words(&mut keywords, description);
    }
    for tag in source.tags {
        add_whole(&mut keywords, tag);
    }
    add_whole(&mut keywords, source.category.as_str());
    add_whole(&mut keywords, source.line_of_business.as_str());

    keywords
}

/// Lowercased whitespace tokens of a search query, blanks removed.
pub fn tokenize_query(text: &str) -> BTreeSet<String> {
    text.split_whitespace().map(|w| w.to_lowercase()).collect()
}

fn add_words(keywords: &mut BTreeSet<String>, text: &str) {
    for word in text.split_whitespace() {
        if word.chars().count() > MIN_KEYWORD_WORD_LEN {
            keywords.insert(word.to_lowercase());
        }
    }
}

fn add_whole(keywords: &mut BTreeSet<String>, value: &str) {
    let value = value.trim();
    if !value.is_empty() {
        keywords.insert(value.to_lowercase());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source<'a>(title: &'a str, description: Option<&'a str>, tags: &'a [String]) -> KeywordSource<'a> {
        KeywordSource {
            title,
            description,
            form_number: "CGL-001",
            tags,
            category: FormCategory::Application,
            line_of_business: LineOfBusiness::Auto,
        }
    }

    #[test]
    fn extracts_title_number_tags_description_and_enums() {
        let tags = vec!["Liability".to_string()];
        let keywords = extract_keywords(&source("The Big CGL Form", Some("ab cd efg"), &tags));

        for expected in [
            "the",
            "big",
            "cgl",
            "form",
            "cgl-001",
            "liability",
            "efg",
            "application",
            "auto",
        ] {
            assert!(keywords.contains(expected), "missing {}", expected);
        }
        assert!(!keywords.contains("ab"));
        assert!(!keywords.contains("cd"));
    }

    #[test]
    fn three_letter_words_are_kept_two_letter_words_dropped() {
        let keywords = extract_keywords(&source("to fix the GL gap", None, &[]));
        assert!(keywords.contains("fix"));
        assert!(keywords.contains("the"));
        assert!(keywords.contains("gap"));
        assert!(!keywords.contains("to"));
        assert!(!keywords.contains("gl"));
    }

    #[test]
    fn short_tags_and_form_numbers_are_kept() {
        let tags = vec!["GL".to_string(), "x".to_string()];
        let mut src = source("Title", None, &tags);
        src.form_number = "A1";
        let keywords = extract_keywords(&src);
        assert!(keywords.contains("gl"));
        assert!(keywords.contains("x"));
        assert!(keywords.contains("a1"));
    }

    #[test]
    fn missing_description_and_tags_contribute_nothing() {
        let keywords = extract_keywords(&source("Notice", None, &[]));
        let expected: BTreeSet<String> = ["notice", "cgl-001", "application", "auto"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(keywords, expected);
    }

    #[test]
    fn multi_word_enum_values_are_added_whole() {
        let mut src = source("Policy Jacket", None, &[]);
        src.line_of_business = LineOfBusiness::GeneralLiability;
        let keywords = extract_keywords(&src);
        assert!(keywords.contains("general liability"));
        assert!(!keywords.contains("general"));
    }

    #[test]
    fn duplicates_collapse() {
        let tags = vec!["Auto".to_string(), "AUTO".to_string()];
        let keywords = extract_keywords(&source("auto Auto", None, &tags));
        assert_eq!(keywords.iter().filter(|k| *k == "auto").count(), 1);
    }

    #[test]
    fn tokenize_query_lowercases_and_splits() {
        let tokens = tokenize_query("  Auto   ENDORSEMENT ");
        assert_eq!(tokens.len(), 2);
        assert!(tokens.contains("auto"));
        assert!(tokens.contains("endorsement"));
        assert!(tokenize_query("   ").is_empty());
    }
}
