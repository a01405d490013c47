//! Eligibility validation and normalization for crawled videos.
//!
//! Everything here is pure: a raw platform item goes in, a normalized
//! catalog candidate or a typed rejection comes out. The same rules are
//! applied during crawling and when re-validating stored videos against the
//! platform.

use std::collections::HashSet;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::platform::RawItem;

/// Minimum accepted duration in seconds (30 minutes, inclusive).
pub const MIN_DURATION_SECONDS: u32 = 1800;

/// Why a video is not eligible for the catalog.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("video is not public")]
    Private,
    #[error("video is age-restricted")]
    AgeRestricted,
    #[error("video is not embeddable")]
    NotEmbeddable,
    #[error("video is region-restricted")]
    RegionRestricted,
    #[error("title and/or description is not in English")]
    WrongLanguage,
    #[error("video is not fully broadcasted")]
    NotFullyBroadcast,
    #[error("video is too short: {seconds}s (minimum {MIN_DURATION_SECONDS}s)")]
    TooShort { seconds: u32 },
}

/// A validated, normalized catalog candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedItem {
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    /// Space-joined normalized tag tokens; `None` when nothing survives
    /// normalization.
    pub tags: Option<String>,
    pub thumbnails: Value,
    pub duration_seconds: u32,
    pub published_at: DateTime<Utc>,
}

/// Check eligibility rules and normalize the item.
pub fn validate(raw: &RawItem) -> Result<NormalizedItem, ValidationError> {
    if raw.privacy_status == "private" {
        return Err(ValidationError::Private);
    }
    if raw.age_restricted {
        return Err(ValidationError::AgeRestricted);
    }
    if !raw.embeddable {
        return Err(ValidationError::NotEmbeddable);
    }
    if raw.region_restricted {
        return Err(ValidationError::RegionRestricted);
    }
    if let Some(lang) = raw.default_language.as_deref() {
        if !lang.starts_with("en") {
            return Err(ValidationError::WrongLanguage);
        }
    }
    if let Some(broadcast) = raw.live_broadcast.as_deref() {
        if broadcast != "none" {
            return Err(ValidationError::NotFullyBroadcast);
        }
    }

    let seconds = parse_iso8601_duration(&raw.duration);
    if seconds < MIN_DURATION_SECONDS {
        return Err(ValidationError::TooShort { seconds });
    }

    let title = normalize_title(&raw.title);
    let description = raw
        .description
        .as_deref()
        .map(strip_urls)
        .filter(|d| !d.is_empty());

    let tags = if raw.tags.is_empty() {
        None
    } else {
        let mut used = title.to_lowercase();
        if let Some(desc) = &description {
            used.push(' ');
            used.push_str(&desc.to_lowercase());
        }
        let joined = normalize_tags(&raw.tags, &used);
        if joined.is_empty() {
            None
        } else {
            Some(joined)
        }
    };

    Ok(NormalizedItem {
        external_id: raw.id.clone(),
        title,
        description,
        tags,
        thumbnails: raw.thumbnails.clone(),
        duration_seconds: seconds,
        published_at: raw.published_at,
    })
}

/// Separator markers some sources append to titles; everything after the
/// first marker is dropped.
const TITLE_SEPARATORS: &[&str] = &[" I SLICE ", " // ", " | "];

/// Prepositions kept lower-case mid-title.
const PREPOSITIONS: &[&str] = &[
    "at", "by", "for", "in", "of", "off", "the", "and", "or", "nor", "a", "an", "on", "out", "to",
    "up", "as", "but", "per", "via", "vs", "vs.",
];

/// Punctuation that ends a clause; a preposition right after one of these is
/// capitalized like a first word.
const CLAUSE_PUNCTUATION: &[&str] = &[":", ".", "!", "?", "-", "—", "–", "//", "--", "|"];

fn bracket_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\(\[][^\)\]]*[\)\]]").unwrap())
}

fn spaces_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r" +").unwrap())
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"http\S+").unwrap())
}

/// Remove URLs from a description.
fn strip_urls(text: &str) -> String {
    url_re().replace_all(text, "").trim().to_string()
}

/// Normalize a raw title: cut at separator markers, strip bracketed asides,
/// collapse whitespace, drop a trailing "documentary", then apply word-wise
/// title casing.
pub fn normalize_title(title: &str) -> String {
    let mut title = title;
    for sep in TITLE_SEPARATORS {
        if let Some((head, _)) = title.split_once(sep) {
            title = head;
        }
    }
    let title = bracket_re().replace_all(title, "");
    let title = spaces_re().replace_all(title.trim(), " ");

    let mut words: Vec<String> = title.split(' ').map(str::to_string).collect();

    if let Some(last) = words.last() {
        if last.to_lowercase() == "documentary" {
            words.pop();
        }
    }
    words.retain(|w| !w.is_empty());

    let mut cased: Vec<String> = Vec::with_capacity(words.len());
    for (i, word) in words.iter().enumerate() {
        cased.push(case_word(word, i, if i > 0 { Some(&words[i - 1]) } else { None }));
    }
    cased.join(" ")
}

/// Apply title casing to one word, preserving boundary quote characters.
fn case_word(word: &str, index: usize, previous: Option<&str>) -> String {
    let mut word = word;
    let mut leading = "";
    let mut trailing = "";

    if let Some(first) = word.chars().next() {
        if first == '"' || first == '\'' {
            leading = &word[..first.len_utf8()];
            word = &word[first.len_utf8()..];
        }
    }
    if let Some(last) = word.chars().last() {
        if last == '"' || last == '\'' {
            trailing = &word[word.len() - last.len_utf8()..];
            word = &word[..word.len() - last.len_utf8()];
        }
    }

    let after_clause = previous
        .map(|prev| CLAUSE_PUNCTUATION.iter().any(|p| prev.ends_with(p)))
        .unwrap_or(true);

    let lower = word.to_lowercase();
    let cased = if index != 0 && !after_clause && PREPOSITIONS.contains(&lower.as_str()) {
        lower
    } else if word.chars().next().is_some_and(char::is_uppercase) {
        // already capitalized or an acronym
        word.to_string()
    } else {
        capitalize(word)
    };

    format!("{leading}{cased}{trailing}")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Tokens never kept as tags.
const TAG_STOPLIST: &[&str] = &["documentary", "documentaries"];

/// Merge tags into a deduplicated token string, skipping the stoplist and
/// any token already present in `used` (lower-cased title + description).
pub fn normalize_tags(tags: &[String], used: &str) -> String {
    let used_tokens: HashSet<&str> = used.split_whitespace().collect();
    let mut seen: HashSet<String> = TAG_STOPLIST.iter().map(|s| s.to_string()).collect();
    let mut result: Vec<&str> = Vec::new();

    for tag in tags {
        for word in tag.split_whitespace() {
            let lower = word.to_lowercase();
            if seen.contains(&lower) || used_tokens.contains(lower.as_str()) {
                continue;
            }
            seen.insert(lower);
            result.push(word);
        }
    }
    result.join(" ")
}

fn duration_component(re: &Regex, iso: &str) -> u32 {
    re.captures(iso)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Parse an ISO-8601 duration ("PT1H30M5S") into seconds. Missing or
/// unparseable components count as zero.
pub fn parse_iso8601_duration(iso: &str) -> u32 {
    static HOURS: OnceLock<Regex> = OnceLock::new();
    static MINUTES: OnceLock<Regex> = OnceLock::new();
    static SECONDS: OnceLock<Regex> = OnceLock::new();

    let h = duration_component(HOURS.get_or_init(|| Regex::new(r"(\d+)H").unwrap()), iso);
    let m = duration_component(MINUTES.get_or_init(|| Regex::new(r"(\d+)M").unwrap()), iso);
    let s = duration_component(SECONDS.get_or_init(|| Regex::new(r"(\d+)S").unwrap()), iso);

    h * 3600 + m * 60 + s
}

/// Render a duration in seconds as `HH:MM:SS` (hours omitted when zero).
pub fn human_duration(seconds: u32) -> String {
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}
