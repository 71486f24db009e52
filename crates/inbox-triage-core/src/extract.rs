//! Pattern-based entity extraction from message text.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex_lite::Regex;

use crate::ExtractedInfo;

const MAX_KEY_PHRASES: usize = 5;
const MIN_PHONE_LEN: usize = 10;
const MIN_PHONE_DIGITS: usize = 7;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "your", "yours", "all", "any", "can", "had",
    "her", "was", "one", "our", "out", "has", "have", "been", "being", "his", "how", "its", "may",
    "might", "who", "did", "does", "get", "got", "let", "she", "too", "use", "via", "this",
    "that", "these", "those", "with", "from", "they", "them", "their", "there", "then", "than",
    "what", "when", "where", "which", "while", "will", "would", "could", "should", "shall",
    "into", "onto", "about", "after", "before", "again", "also", "just", "only", "very", "some",
    "such", "were", "here", "each", "other", "more", "most", "over", "under", "both", "because",
    "until", "above", "below", "same", "own", "why", "off", "nor", "yet", "ourselves", "itself",
    "myself", "please", "regards", "thanks", "hello", "dear",
];

struct Patterns {
    email: Regex,
    phone: Regex,
    date_prefix: Regex,
    name: Regex,
    date: Regex,
    url: Regex,
    word: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, regex_lite::Error> {
        Ok(Self {
            email: Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")?,
            phone: Regex::new(r"\+?[0-9()\t -]{10,}")?,
            date_prefix: Regex::new(r"^\d{4}-\d{1,2}-\d{1,2}")?,
            name: Regex::new(
                r"\b(?i:best regards|yours truly|sincerely|regards|sent by|from|by)\b[,:]?\s+([A-Z][a-z]+(?:[ \t]+[A-Z][a-z]+)*)",
            )?,
            date: Regex::new(
                r"\b(?:\d{1,2}[/.-]\d{1,2}[/.-]\d{2,4}|\d{4}[/-]\d{1,2}[/-]\d{1,2}|(?i:jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\.?[ \t]+\d{1,2}(?:st|nd|rd|th)?(?:,?[ \t]+\d{4})?)\b",
            )?,
            url: Regex::new(r#"https?://[^\s<>"']+"#)?,
            word: Regex::new(r"[A-Za-z]+")?,
        })
    }
}

static PATTERNS: Lazy<Option<Patterns>> = Lazy::new(|| match Patterns::compile() {
    Ok(patterns) => Some(patterns),
    Err(err) => {
        tracing::warn!("extraction patterns failed to compile: {err}");
        None
    }
});

fn patterns() -> Option<&'static Patterns> {
    PATTERNS.as_ref()
}

fn push_unique(values: &mut Vec<String>, candidate: &str) {
    if !values.iter().any(|existing| existing == candidate) {
        values.push(candidate.to_string());
    }
}

/// Strip separators and any parenthesis left without a partner at either end.
fn trim_phone(found: &str) -> &str {
    let mut candidate = found;
    loop {
        let trimmed = candidate.trim_matches(|c: char| c.is_whitespace() || c == '-');
        let opens = trimmed.matches('(').count();
        let closes = trimmed.matches(')').count();
        let stripped = trimmed
            .strip_suffix('(')
            .or_else(|| if closes > opens { trimmed.strip_suffix(')') } else { None })
            .or_else(|| trimmed.strip_prefix(')'))
            .or_else(|| if opens > closes { trimmed.strip_prefix('(') } else { None });
        match stripped {
            Some(shorter) => candidate = shorter,
            None => return trimmed,
        }
    }
}

fn phones(patterns: &Patterns, text: &str, info: &mut ExtractedInfo) {
    for found in patterns.phone.find_iter(text) {
        let mut candidate = trim_phone(found.as_str());
        // A leading `YYYY-MM-DD` is a date, possibly followed by a time; only what follows it
        // can still be a number.
        if let Some(date) = patterns.date_prefix.find(candidate) {
            candidate = trim_phone(&candidate[date.end()..]);
        }
        let digits = candidate.chars().filter(char::is_ascii_digit).count();
        if candidate.len() < MIN_PHONE_LEN || digits < MIN_PHONE_DIGITS {
            continue;
        }
        info.phones.insert(candidate.to_string());
    }
}

fn key_phrases(patterns: &Patterns, text: &str) -> Vec<String> {
    let mut first_seen: Vec<String> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();
    for found in patterns.word.find_iter(text) {
        let word = found.as_str().to_ascii_lowercase();
        if word.len() <= 2 || STOP_WORDS.contains(&word.as_str()) {
            continue;
        }
        let count = counts.entry(word.clone()).or_insert(0);
        if *count == 0 {
            first_seen.push(word);
        }
        *count += 1;
    }

    let mut ranked: Vec<(usize, &String)> = first_seen.iter().enumerate().collect();
    ranked.sort_by(|(left_index, left), (right_index, right)| {
        let left_count = counts.get(*left).copied().unwrap_or_default();
        let right_count = counts.get(*right).copied().unwrap_or_default();
        right_count.cmp(&left_count).then(left_index.cmp(right_index))
    });
    ranked.truncate(MAX_KEY_PHRASES);
    ranked.sort_by_key(|(index, _)| *index);
    ranked.into_iter().map(|(_, word)| word.clone()).collect()
}

/// Extract contact details, dates, links and frequent terms from free text.
///
/// Total: text with no matches yields an empty [`ExtractedInfo`].
#[must_use]
pub fn extract(text: &str) -> ExtractedInfo {
    let mut info = ExtractedInfo::default();
    let Some(patterns) = patterns() else {
        return info;
    };

    for found in patterns.email.find_iter(text) {
        info.emails.insert(found.as_str().to_string());
    }

    phones(patterns, text, &mut info);

    for captures in patterns.name.captures_iter(text) {
        if let Some(name) = captures.get(1) {
            info.names.insert(name.as_str().to_string());
        }
    }

    for found in patterns.date.find_iter(text) {
        push_unique(&mut info.dates, found.as_str());
    }

    for found in patterns.url.find_iter(text) {
        let url = found.as_str().trim_end_matches(['.', ',', ')', ';', ':', '!', '?']);
        if url.len() > "https://".len() {
            push_unique(&mut info.urls, url);
        }
    }

    info.key_phrases = key_phrases(patterns, text);
    info
}

/// Phone numbers are stored as found; this collapses internal whitespace runs for display.
#[must_use]
pub fn display_phone(phone: &str) -> String {
    phone.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub trait Extract: Send + Sync {
    fn extract(&self, text: &str) -> ExtractedInfo;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PatternExtractor;

impl Extract for PatternExtractor {
    fn extract(&self, text: &str) -> ExtractedInfo {
        extract(text)
    }
}
