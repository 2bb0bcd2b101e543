//! Output shaping for chat transports: markdown stripping, whitespace
//! collapsing and length-bounded truncation on word/sentence boundaries.
//!
//! All lengths are counted in `char`s so a cut never lands inside a UTF-8
//! sequence.

use once_cell::sync::Lazy;
use regex::Regex;

pub const ELLIPSIS: &str = "...";

/// Fraction of the limit a soft boundary must reach to be used.
pub const DEFAULT_BOUNDARY_FRACTION: f32 = 0.8;

static HEADER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]{0,3}#{1,6}[ \t]+").unwrap());
static FENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```[A-Za-z0-9_+-]*").unwrap());
static BOLD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*|__").unwrap());
static UNDERSCORE_EM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(^|\s)_([^_\s][^_]*?)_").unwrap());
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

#[derive(Debug, Clone)]
pub struct SanitizerConfig {
    /// Application-level reply limit, in characters.
    pub max_length: usize,
    pub boundary_fraction: f32,
    /// Remove markdown emphasis, code spans and headers.
    pub strip_markdown: bool,
    /// Prefer the first sentence or clause over a word-boundary cut.
    pub terse: bool,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            max_length: 399,
            boundary_fraction: DEFAULT_BOUNDARY_FRACTION,
            strip_markdown: false,
            terse: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Sanitizer {
    config: SanitizerConfig,
}

impl Sanitizer {
    pub fn new(config: SanitizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SanitizerConfig {
        &self.config
    }

    pub fn max_length(&self) -> usize {
        self.config.max_length
    }

    /// Full pipeline applied to raw model output.
    pub fn sanitize(&self, raw: &str) -> String {
        let text = if self.config.strip_markdown {
            strip_markdown(raw)
        } else {
            collapse_whitespace(raw)
        };

        if self.config.terse {
            truncate_terse(&text, self.config.max_length, self.config.boundary_fraction)
        } else {
            truncate_with(&text, self.config.max_length, self.config.boundary_fraction)
        }
    }
}

/// Trims and collapses every whitespace run to a single space.
pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RE.replace_all(text.trim(), " ").into_owned()
}

/// Removes emphasis markers, code-span backticks and header markers, then
/// collapses whitespace.
pub fn strip_markdown(text: &str) -> String {
    let text = HEADER_RE.replace_all(text, "");
    let text = FENCE_RE.replace_all(&text, "");
    let text = BOLD_RE.replace_all(&text, "");
    let text = UNDERSCORE_EM_RE.replace_all(&text, "$1$2");
    let text = text.replace(['*', '`'], "");
    collapse_whitespace(&text)
}

/// [`truncate_with`] using the default boundary fraction.
pub fn truncate(text: &str, max_length: usize) -> String {
    truncate_with(text, max_length, DEFAULT_BOUNDARY_FRACTION)
}

/// Bounds `text` to `max_length` characters.
///
/// Text already within the bound is returned unchanged. Otherwise the text is
/// cut at `max_length - 3`, and the nearest sentence end (or failing that the
/// nearest whitespace) before the cut is used if it lies beyond
/// `fraction * max_length`. The result always ends in [`ELLIPSIS`].
pub fn truncate_with(text: &str, max_length: usize, fraction: f32) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_length {
        return text.to_string();
    }

    let marker = ELLIPSIS.chars().count();
    if max_length <= marker {
        return chars[..max_length].iter().collect();
    }

    let head = &chars[..max_length - marker];
    let threshold = (max_length as f32 * fraction) as usize;

    let sentence = head
        .iter()
        .rposition(|c| matches!(c, '.' | '!' | '?'))
        .map(|idx| idx + 1);
    let space = head.iter().rposition(|c| c.is_whitespace());

    let keep = [sentence, space]
        .into_iter()
        .flatten()
        .find(|&keep| keep > threshold)
        .unwrap_or(head.len());

    let kept: String = head[..keep].iter().collect();
    format!("{}{}", kept.trim_end(), ELLIPSIS)
}

/// Truncation for terse output: the first complete sentence if it fits, else
/// the first clause (up to a comma) with an ellipsis, else [`truncate_with`].
pub fn truncate_terse(text: &str, max_length: usize, fraction: f32) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_length {
        return text.to_string();
    }

    let sentence_end = chars.iter().enumerate().position(|(i, c)| {
        matches!(c, '.' | '!' | '?') && chars.get(i + 1).is_none_or(|next| next.is_whitespace())
    });
    if let Some(end) = sentence_end {
        if end < max_length {
            return chars[..=end].iter().collect();
        }
    }

    let marker = ELLIPSIS.chars().count();
    if let Some(comma) = chars.iter().position(|c| *c == ',') {
        if comma > 0 && comma + marker <= max_length {
            let clause: String = chars[..comma].iter().collect();
            return format!("{}{}", clause.trim_end(), ELLIPSIS);
        }
    }

    truncate_with(text, max_length, fraction)
}
