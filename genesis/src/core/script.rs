//! Lexical helpers over embedded script text.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

static SCRIPT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b([^>]*)>(.*?)</script\s*>").unwrap()
});

/// One `<script>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptBlock {
    pub attrs: String,
    pub body: String,
}

impl ScriptBlock {
    /// True for `<script src=...>` elements that load external code.
    pub fn is_external(&self) -> bool {
        self.attrs.to_ascii_lowercase().contains("src=")
    }
}

pub fn script_blocks(document: &str) -> Vec<ScriptBlock> {
    SCRIPT_RE
        .captures_iter(document)
        .map(|caps| ScriptBlock {
            attrs: caps[1].to_string(),
            body: caps[2].to_string(),
        })
        .collect()
}

/// Concatenated bodies of all inline (non-`src`) scripts.
pub fn inline_script(document: &str) -> String {
    script_blocks(document)
        .into_iter()
        .filter(|block| !block.is_external())
        .map(|block| block.body)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Portion of `line` before a `//` comment.
///
/// A `//` directly preceded by `:` is treated as part of a URL scheme.
pub fn strip_line_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'/' && bytes[i + 1] == b'/' && (i == 0 || bytes[i - 1] != b':') {
            return &line[..i];
        }
        i += 1;
    }
    line
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
    #[error("line {line}: unexpected '{found}'")]
    UnexpectedClose { found: char, line: usize },
    #[error("line {line}: '{open}' is never closed")]
    Unclosed { open: char, line: usize },
    #[error("line {line}: unterminated string literal")]
    UnterminatedString { line: usize },
    #[error("line {line}: unterminated block comment")]
    UnterminatedComment { line: usize },
}

/// Check that brackets, braces and parentheses nest correctly.
///
/// String, template literal and comment contents are skipped. Template
/// substitutions are treated as opaque string content.
pub fn check_nesting(source: &str) -> Result<(), LexError> {
    let chars: Vec<char> = source.chars().collect();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut line = 1usize;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => line += 1,
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let start = line;
                i += 2;
                loop {
                    match chars.get(i) {
                        None => return Err(LexError::UnterminatedComment { line: start }),
                        Some('*') if chars.get(i + 1) == Some(&'/') => {
                            i += 1;
                            break;
                        }
                        Some('\n') => line += 1,
                        Some(_) => {}
                    }
                    i += 1;
                }
            }
            '"' | '\'' | '`' => {
                let start = line;
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(LexError::UnterminatedString { line: start }),
                        Some('\\') => i += 1,
                        Some(&q) if q == c => break,
                        Some('\n') if c != '`' => {
                            return Err(LexError::UnterminatedString { line: start });
                        }
                        Some('\n') => line += 1,
                        Some(_) => {}
                    }
                    i += 1;
                }
            }
            '(' | '[' | '{' => stack.push((c, line)),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((open, _)) if open == expected => {}
                    _ => return Err(LexError::UnexpectedClose { found: c, line }),
                }
            }
            _ => {}
        }
        i += 1;
    }

    match stack.pop() {
        Some((open, line)) => Err(LexError::Unclosed { open, line }),
        None => Ok(()),
    }
}

/// Body of `function name(...) { ... }` without the outer braces.
pub fn function_body<'a>(source: &'a str, name: &str) -> Option<&'a str> {
    let pattern = format!(r"\bfunction\s+{}\s*\([^)]*\)\s*\{{", regex::escape(name));
    let re = Regex::new(&pattern).ok()?;
    let found = re.find(source)?;
    let open = found.end();
    let mut depth = 1usize;
    for (offset, c) in source[open..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&source[open..open + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// True if `source` declares `function name(`.
pub fn declares_function(source: &str, name: &str) -> bool {
    let pattern = format!(r"\bfunction\s+{}\s*\(", regex::escape(name));
    Regex::new(&pattern).is_ok_and(|re| re.is_match(source))
}
