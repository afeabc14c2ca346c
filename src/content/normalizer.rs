//! Response normalizer. Turns free-form model text into a [`ContentBundle`].
//!
//! The model is asked for strict JSON but routinely wraps it in commentary,
//! fences it in markdown, or ignores the instruction entirely. Parsing is
//! tiered and the first tier that succeeds wins:
//!
//! 1. The balanced `{ ... }` object opened by the first brace in the text (or,
//!    when that brace never closes, one inside a ```` ```json ```` fence).
//! 2. The whole text decoded as JSON.
//! 3. A line-oriented plain-text heuristic, which always produces a bundle.
//!
//! Nothing here returns an error. Blank input yields an empty bundle.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::model::{ContentBundle, PostIdea};

/// Caption inserted by the plain-text tier when no caption could be found.
pub const PLACEHOLDER_CAPTION: &str = "Try this caption: Amazing results with #yourproduct";
/// Idea inserted by the plain-text tier when no idea could be found.
pub const PLACEHOLDER_IDEA_TITLE: &str = "Quick Post Idea";
pub const PLACEHOLDER_IDEA_DESCRIPTION: &str = "Share a photo with a short tip.";

const MAX_PLAIN_TEXT_CAPTIONS: usize = 10;
const MAX_PLAIN_TEXT_IDEAS: usize = 3;
const IDEA_TITLE_MAX_CHARS: usize = 40;

const FILLER_PREFIXES: &[&str] = &["sure", "here"];
const HASHTAG_TRAILING_PUNCTUATION: &[char] = &[',', '.', ';', ':'];
const JSON_FENCE: &str = "```json";
const FENCE: &str = "```";

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r?\n[ \t]*\r?\n").expect("paragraph regex is valid"));

/// Which tier produced a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// Input was absent or blank.
    Empty,
    /// A JSON object embedded in surrounding text.
    EmbeddedJson,
    /// The entire text was JSON.
    WholeJson,
    /// Plain-text heuristic.
    PlainText,
}

/// A bundle together with the tier that produced it.
#[derive(Debug, Clone)]
pub struct NormalizedResponse {
    pub bundle: ContentBundle,
    pub source: ResponseSource,
}

/// Parse raw model text into a bundle. Never fails.
pub fn parse(raw: Option<&str>) -> ContentBundle {
    normalize_response(raw).bundle
}

/// Parse raw model text, also reporting which tier succeeded.
pub fn normalize_response(raw: Option<&str>) -> NormalizedResponse {
    let text = match raw {
        Some(t) if !t.trim().is_empty() => t,
        _ => {
            return NormalizedResponse {
                bundle: ContentBundle::empty(),
                source: ResponseSource::Empty,
            };
        }
    };

    if let Some(candidate) = embedded_json_candidate(text) {
        match decode_bundle(candidate) {
            Ok(bundle) => {
                debug!(len = candidate.len(), "Parsed embedded JSON object");
                return NormalizedResponse {
                    bundle,
                    source: ResponseSource::EmbeddedJson,
                };
            }
            Err(e) => debug!(error = %e, "Embedded JSON candidate rejected"),
        }
    }

    if let Ok(bundle) = decode_bundle(text.trim()) {
        debug!("Parsed whole response as JSON");
        return NormalizedResponse {
            bundle,
            source: ResponseSource::WholeJson,
        };
    }

    debug!(len = text.len(), "Falling back to plain-text parsing");
    NormalizedResponse {
        bundle: parse_plain_text(text),
        source: ResponseSource::PlainText,
    }
}

// ── Tier 1: embedded object extraction ──────────────────────────────

/// The single tier-1 candidate: the object opened by the first `{`.
///
/// Only when that brace never closes is the body of a ```` ```json ```` fence
/// searched instead.
fn embedded_json_candidate(text: &str) -> Option<&str> {
    if let Some(object) = first_balanced_object(text) {
        return Some(object);
    }
    let body = fenced_json_body(text)?;
    first_balanced_object(body)
}

/// Body of the first ```` ```json ```` fence, if the fence is closed.
fn fenced_json_body(text: &str) -> Option<&str> {
    let start = text.find(JSON_FENCE)? + JSON_FENCE.len();
    let rest = &text[start..];
    let end = rest.find(FENCE)?;
    Some(&rest[..end])
}

fn first_balanced_object(text: &str) -> Option<&str> {
    let open = text.find('{')?;
    let close = matching_brace(text, open)?;
    Some(&text[open..=close])
}

/// Byte index of the `}` closing the `{` at `open`.
///
/// Braces inside JSON string literals are not counted. Quotes before `open`
/// are prose and play no part.
fn matching_brace(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    // All tracked delimiters are ASCII, so byte scanning is UTF-8 safe.
    for (i, &b) in text.as_bytes().iter().enumerate().skip(open) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

// ── Tiers 1 & 2: JSON lift ──────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
enum LiftError {
    #[error("invalid JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("top-level JSON value is not an object")]
    NotAnObject,
}

/// Shape a bundle field may take in the model's JSON.
#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum FieldShape {
    /// Absent or `null`.
    #[default]
    Missing,
    Text(String),
    List(Vec<Value>),
    Other(Value),
}

#[derive(Debug, Deserialize)]
struct RawBundle {
    #[serde(default)]
    captions: FieldShape,
    #[serde(default)]
    hashtags: FieldShape,
    #[serde(default)]
    ideas: FieldShape,
    #[serde(default)]
    posts: FieldShape,
}

fn decode_bundle(json: &str) -> Result<ContentBundle, LiftError> {
    let value: Value = serde_json::from_str(json)?;
    lift_bundle(value)
}

fn lift_bundle(value: Value) -> Result<ContentBundle, LiftError> {
    if !value.is_object() {
        return Err(LiftError::NotAnObject);
    }
    let raw: RawBundle = serde_json::from_value(value)?;

    let mut captions = match raw.captions {
        FieldShape::List(items) => texts(&items),
        FieldShape::Text(s) => non_blank_lines(&s),
        _ => Vec::new(),
    };
    if captions.is_empty() {
        if let FieldShape::List(items) = raw.posts {
            captions = texts(&items);
        }
    }

    let hashtags = match raw.hashtags {
        // Bare tokens get a `#` here too, so every hashtag carries the prefix.
        FieldShape::List(items) => texts(&items).iter().map(|t| normalize_hashtag(t)).collect(),
        FieldShape::Text(s) => s
            .split([',', '\n'])
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(normalize_hashtag)
            .collect(),
        _ => Vec::new(),
    };

    let ideas = match raw.ideas {
        FieldShape::List(items) => items.iter().filter_map(idea_from_object).collect(),
        FieldShape::Text(s) => ideas_from_paragraphs(&s),
        _ => Vec::new(),
    };

    Ok(ContentBundle {
        captions,
        hashtags,
        ideas,
    })
}

/// Text of a scalar JSON value. Containers and `null` have none.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Trimmed, non-blank text values of the list elements.
fn texts(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(scalar_text)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn non_blank_lines(s: &str) -> Vec<String> {
    s.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Keep `#tag` as-is, turn `some tag` into `#sometag`.
fn normalize_hashtag(token: &str) -> String {
    if token.starts_with('#') {
        token.to_string()
    } else {
        let compact: String = token.chars().filter(|c| !c.is_whitespace()).collect();
        format!("#{compact}")
    }
}

fn idea_from_object(item: &Value) -> Option<PostIdea> {
    let obj = item.as_object()?;
    let field = |key: &str| obj.get(key).and_then(scalar_text);
    Some(PostIdea {
        title: field("title").unwrap_or_default(),
        description: field("description").unwrap_or_default(),
        image_idea: field("imageIdea")
            .or_else(|| field("image_idea"))
            .unwrap_or_default(),
    })
}

fn ideas_from_paragraphs(s: &str) -> Vec<PostIdea> {
    PARAGRAPH_BREAK
        .split(s)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            let title = p.lines().next().unwrap_or_default().trim();
            PostIdea::new(title, p, "")
        })
        .collect()
}

// ── Tier 3: plain text ──────────────────────────────────────────────

fn parse_plain_text(text: &str) -> ContentBundle {
    let mut captions = Vec::new();
    let mut hashtags = Vec::new();

    for line in text.lines() {
        let t = line.trim();
        if t.is_empty() || is_filler(t) {
            continue;
        }
        if t.starts_with('#') || t.contains(" #") {
            hashtags.extend(t.split_whitespace().filter_map(clean_hashtag));
            continue;
        }
        if captions.len() >= MAX_PLAIN_TEXT_CAPTIONS {
            continue;
        }
        let caption = strip_bullet(t);
        if !caption.is_empty() {
            captions.push(caption.to_string());
        }
    }

    // Recover tags buried mid-sentence.
    for tag in text.split_whitespace().filter_map(clean_hashtag) {
        if !hashtags.contains(&tag) {
            hashtags.push(tag);
        }
    }

    let mut ideas: Vec<PostIdea> = text
        .lines()
        .map(str::trim)
        .filter(|t| starts_with_ignore_case(t, "idea") || t.contains(':'))
        .take(MAX_PLAIN_TEXT_IDEAS)
        .map(|t| PostIdea::new(truncate_title(t), t, ""))
        .collect();

    if captions.is_empty() {
        captions.push(PLACEHOLDER_CAPTION.to_string());
    }
    if ideas.is_empty() {
        ideas.push(PostIdea::new(
            PLACEHOLDER_IDEA_TITLE,
            PLACEHOLDER_IDEA_DESCRIPTION,
            "",
        ));
    }

    ContentBundle {
        captions,
        hashtags,
        ideas,
    }
}

fn is_filler(line: &str) -> bool {
    let lower = line.to_lowercase();
    FILLER_PREFIXES.iter().any(|p| lower.starts_with(p))
}

fn strip_bullet(line: &str) -> &str {
    match line.strip_prefix(|c: char| c == '-' || c == '*') {
        Some(rest) => rest.trim_start(),
        None => line,
    }
}

fn clean_hashtag(token: &str) -> Option<String> {
    if !token.starts_with('#') {
        return None;
    }
    let tag = token.trim_end_matches(HASHTAG_TRAILING_PUNCTUATION);
    (tag.len() > 1).then(|| tag.to_string())
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

fn truncate_title(line: &str) -> String {
    if line.chars().count() > IDEA_TITLE_MAX_CHARS {
        let head: String = line.chars().take(IDEA_TITLE_MAX_CHARS).collect();
        format!("{head}...")
    } else {
        line.to_string()
    }
}
