//! Extract a parsable artifact from a raw, possibly prose-wrapped model response.
//!
//! Pipeline: skip leading prose up to the first code-like line, drop fence
//! markers, cut trailing prose, parse. On parse failure, drop prose-looking
//! lines and parse again. If that still fails, return [`FALLBACK_ARTIFACT`].

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::core::fallback::FALLBACK_ARTIFACT;
use crate::core::rules::ArtifactRules;
use crate::core::script::{LexError, check_nesting, script_blocks};

static CODE_ENTRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^\s*(",
        r"(?i:<!doctype\b|<html\b|<head\b|<body\b|<script\b|<canvas\b|<style\b|<meta\b)",
        r"|(async\s+)?function\b|const\b|let\b|var\b|class\b|import\b|export\b",
        r")",
    ))
    .unwrap()
});

const CODE_PUNCTUATION: &[char] = &[';', '{', '}', '(', ')', '[', ']', '<', '>', '='];

/// How the normalizer arrived at its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizeRoute {
    /// Standard cleaning produced a parsable document.
    Clean,
    /// The aggressive prose filter was needed.
    Aggressive,
    /// Nothing parsable could be recovered.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub code: String,
    pub route: NormalizeRoute,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("document does not begin with a start marker")]
    MissingStart,
    #[error("document has no end marker")]
    MissingEnd,
    #[error("document has no script element")]
    NoScript,
    #[error("script {index}: {source}")]
    Script { index: usize, source: LexError },
}

pub fn normalize(raw: &str, rules: &ArtifactRules) -> Normalized {
    let cleaned = clean(raw, rules);
    if parse_document(&cleaned, rules).is_ok() {
        return Normalized {
            code: cleaned,
            route: NormalizeRoute::Clean,
        };
    }

    let filtered = drop_prose_lines(&cleaned);
    let filtered = trim_trailing_prose(&filtered, rules);
    if parse_document(&filtered, rules).is_ok() {
        return Normalized {
            code: filtered,
            route: NormalizeRoute::Aggressive,
        };
    }

    Normalized {
        code: FALLBACK_ARTIFACT.to_string(),
        route: NormalizeRoute::Fallback,
    }
}

/// Local parse check: wrapper markers, at least one script element, and
/// correctly nested delimiters in every inline script.
pub fn parse_document(text: &str, rules: &ArtifactRules) -> Result<(), ParseError> {
    let trimmed = text.trim();
    if !rules.starts_document(trimmed) {
        return Err(ParseError::MissingStart);
    }
    if rules.end_of_document(trimmed).is_none() {
        return Err(ParseError::MissingEnd);
    }
    let blocks = script_blocks(trimmed);
    if blocks.is_empty() {
        return Err(ParseError::NoScript);
    }
    for (index, block) in blocks.iter().enumerate() {
        if block.is_external() {
            continue;
        }
        check_nesting(&block.body).map_err(|source| ParseError::Script { index, source })?;
    }
    Ok(())
}

fn clean(raw: &str, rules: &ArtifactRules) -> String {
    let lines: Vec<&str> = raw.lines().collect();
    let start = lines
        .iter()
        .position(|line| CODE_ENTRY_RE.is_match(line))
        .unwrap_or(0);
    let kept: Vec<&str> = lines[start..]
        .iter()
        .copied()
        .filter(|line| !is_fence(line))
        .collect();
    trim_trailing_prose(&kept.join("\n"), rules)
}

fn is_fence(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

/// Cut everything after the final end marker, or, without one, trailing
/// lines that do not end like code.
fn trim_trailing_prose(text: &str, rules: &ArtifactRules) -> String {
    if let Some(end) = rules.end_of_document(text) {
        return text[..end].trim().to_string();
    }
    let lines: Vec<&str> = text.lines().collect();
    let last_code = lines
        .iter()
        .rposition(|line| ends_like_code(line))
        .map_or(0, |idx| idx + 1);
    lines[..last_code].join("\n").trim().to_string()
}

fn ends_like_code(line: &str) -> bool {
    line.trim_end()
        .chars()
        .last()
        .is_some_and(|c| matches!(c, ';' | '{' | '}' | '>' | ')' | ']' | ','))
}

fn drop_prose_lines(text: &str) -> String {
    text.lines()
        .filter(|line| !looks_like_prose(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A line reads as prose when it is sentence-like and carries no code punctuation.
fn looks_like_prose(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return false;
    }
    if trimmed.starts_with("# ") || trimmed.starts_with("## ") || trimmed.starts_with("* ") {
        return true;
    }
    if trimmed.contains(CODE_PUNCTUATION) {
        return false;
    }
    let starts_with_letter = trimmed.chars().next().is_some_and(char::is_alphabetic);
    starts_with_letter && trimmed.split_whitespace().count() >= 3
}
