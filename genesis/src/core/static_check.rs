//! Pure-text structural validation of an artifact.

use crate::core::rules::ArtifactRules;
use crate::core::script::{declares_function, strip_line_comment};

/// Result of [`check_static`]. `ok` is true iff `errors` is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticCheck {
    pub ok: bool,
    pub errors: Vec<String>,
}

/// Verify length, wrapper markers, library reference, entry points and
/// delimiter balance. Every violation appends one named error.
pub fn check_static(artifact: &str, rules: &ArtifactRules) -> StaticCheck {
    let mut errors = Vec::new();
    let trimmed = artifact.trim();

    let length = trimmed.chars().count();
    if length < rules.min_length {
        errors.push(format!(
            "artifact too short: {length} characters (minimum {})",
            rules.min_length
        ));
    }

    if !rules.starts_document(trimmed) {
        errors.push(format!(
            "missing document start marker (expected one of: {})",
            rules.start_markers.join(", ")
        ));
    }

    if rules.end_of_document(trimmed).is_none() {
        errors.push(format!("missing document end marker {}", rules.end_marker));
    }

    if !rules.references_library(trimmed) {
        let name = rules
            .library_markers
            .first()
            .map(String::as_str)
            .unwrap_or("runtime library");
        errors.push(format!("missing library reference ({name})"));
    }

    for entry in &rules.entry_points {
        if !declares_function(trimmed, entry) {
            errors.push(format!("missing entry point {entry}()"));
        }
    }

    errors.extend(balance_errors(trimmed));

    StaticCheck {
        ok: errors.is_empty(),
        errors,
    }
}

/// Running open-minus-close counters for `()`, `[]` and `{}`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DelimiterBalance {
    pub parens: i64,
    pub brackets: i64,
    pub braces: i64,
}

/// Count delimiters over the whole text, skipping single-line comments.
pub fn delimiter_balance(text: &str) -> DelimiterBalance {
    let mut balance = DelimiterBalance::default();
    for line in text.lines() {
        for c in strip_line_comment(line).chars() {
            match c {
                '(' => balance.parens += 1,
                ')' => balance.parens -= 1,
                '[' => balance.brackets += 1,
                ']' => balance.brackets -= 1,
                '{' => balance.braces += 1,
                '}' => balance.braces -= 1,
                _ => {}
            }
        }
    }
    balance
}

fn balance_errors(text: &str) -> Vec<String> {
    let balance = delimiter_balance(text);
    [
        ("parentheses", balance.parens, '(', ')'),
        ("square brackets", balance.brackets, '[', ']'),
        ("curly braces", balance.braces, '{', '}'),
    ]
    .into_iter()
    .filter(|(_, count, _, _)| *count != 0)
    .map(|(name, count, open, close)| {
        if count > 0 {
            format!("unbalanced {name}: {count} more '{open}' than '{close}'")
        } else {
            format!("unbalanced {name}: {} more '{close}' than '{open}'", -count)
        }
    })
    .collect()
}
