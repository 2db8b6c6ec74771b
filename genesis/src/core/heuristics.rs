//! Script heuristics used when no headless environment is available.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::rules::ArtifactRules;
use crate::core::script::{function_body, strip_line_comment};

/// Keywords that are never valid twice in a row.
const UNREPEATABLE_KEYWORDS: &[&str] = &[
    "let", "const", "var", "function", "return", "new", "class", "typeof",
];

static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z_$][\w$]*").unwrap());
static NULL_MEMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(undefined|null)\s*(\.\s*\w+|\()").unwrap()
});
static UNBOUNDED_LOOP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bwhile\s*\(\s*true\s*\)|\bfor\s*\(\s*;\s*;\s*\)").unwrap()
});
static SURFACE_SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(width|height)\b").unwrap());
static ALLOCATION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bnew\s+\w").unwrap());

/// Allocations per frame above which a warning is raised.
pub const FRAME_ALLOCATION_LIMIT: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeuristicFindings {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Scan inline script text for common generation defects.
pub fn analyze_script(script: &str, rules: &ArtifactRules) -> HeuristicFindings {
    let mut findings = HeuristicFindings::default();

    for (idx, raw_line) in script.lines().enumerate() {
        let line = strip_line_comment(raw_line);
        let line_no = idx + 1;

        for keyword in repeated_keywords(line) {
            let message = format!("duplicate keyword '{keyword} {keyword}' on line {line_no}");
            findings.errors.push(message);
        }
        if let Some(caps) = NULL_MEMBER_RE.captures(line) {
            let message = format!("'{}' is dereferenced on line {line_no}", &caps[1]);
            findings.errors.push(message);
        }
        if UNBOUNDED_LOOP_RE.is_match(line) {
            let message = format!("unbounded loop on line {line_no} may freeze the page");
            findings.warnings.push(message);
        }
    }

    let code: String = script
        .lines()
        .map(strip_line_comment)
        .collect::<Vec<_>>()
        .join("\n");

    let surface = &rules.surface_call;
    if !surface.is_empty() && !code.contains(&format!("{surface}(")) {
        let message = format!("missing {surface}() call: no drawing surface is created");
        findings.errors.push(message);
        if SURFACE_SIZE_RE.is_match(&code) {
            let message = "width/height referenced but no canvas is created";
            findings.errors.push(message.to_string());
        }
    }

    if let Some(body) = function_body(&code, &rules.frame_entry_point) {
        let allocations = ALLOCATION_RE.find_iter(body).count();
        if allocations > FRAME_ALLOCATION_LIMIT {
            findings.warnings.push(format!(
                "{allocations} allocations with 'new' inside {}() run every frame",
                rules.frame_entry_point
            ));
        }
    }

    findings
}

/// Keywords written twice back to back on `line`. Pairs may overlap, so
/// `const let let` reports `let`.
fn repeated_keywords(line: &str) -> Vec<&str> {
    let mut repeated = Vec::new();
    let mut previous: Option<regex::Match<'_>> = None;
    for word in WORD_RE.find_iter(line) {
        if let Some(prev) = previous
            && prev.as_str() == word.as_str()
            && UNREPEATABLE_KEYWORDS.contains(&word.as_str())
            && line[prev.end()..word.start()].trim().is_empty()
        {
            repeated.push(word.as_str());
        }
        previous = Some(word);
    }
    repeated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fallback::FALLBACK_ARTIFACT;
    use crate::core::script::inline_script;

    fn rules() -> ArtifactRules {
        ArtifactRules::default()
    }

    #[test]
    fn clean_script_has_no_findings() {
        let findings = analyze_script(&inline_script(FALLBACK_ARTIFACT), &rules());
        assert_eq!(findings, HeuristicFindings::default());
    }

    #[test]
    fn duplicate_keyword_is_an_error_with_line() {
        let script = "function setup() {\n  createCanvas(400, 400);\n  let let x = 1;\n}";
        let findings = analyze_script(script, &rules());
        assert_eq!(
            findings.errors,
            vec!["duplicate keyword 'let let' on line 3".to_string()]
        );
    }

    #[test]
    fn repeated_keyword_after_another_keyword_is_flagged() {
        let script = "createCanvas(1, 1);\nconst let let x = 1;";
        let findings = analyze_script(script, &rules());
        assert_eq!(
            findings.errors,
            vec!["duplicate keyword 'let let' on line 2".to_string()]
        );
    }

    #[test]
    fn keywords_split_by_punctuation_are_not_flagged() {
        let script = "createCanvas(1, 1);\nlet t = typeof(typeof y);\nreturn (return_value);";
        assert!(analyze_script(script, &rules()).errors.is_empty());
    }

    #[test]
    fn distinct_keywords_are_not_flagged() {
        let script = "createCanvas(1, 1);\nreturn new Thing();\nconst typeofValue = typeof x;";
        assert!(analyze_script(script, &rules()).errors.is_empty());
    }

    #[test]
    fn null_member_access_is_an_error() {
        let script = "createCanvas(1, 1);\nlet v = undefined.length;";
        let findings = analyze_script(script, &rules());
        assert_eq!(findings.errors.len(), 1);
        assert!(findings.errors[0].contains("line 2"));
    }

    #[test]
    fn missing_canvas_with_size_reference() {
        let script = "function setup() {}\nfunction draw() { rect(0, 0, width, height); }";
        let findings = analyze_script(script, &rules());
        assert_eq!(findings.errors.len(), 2);
        let first = &findings.errors[0];
        assert!(first.starts_with("missing createCanvas() call"));
    }

    #[test]
    fn loop_and_allocation_smells_are_warnings() {
        let script = concat!(
            "function setup() { createCanvas(1, 1); while (true) { } }\n",
            "function draw() {\n",
            "  let a = new A(); let b = new B(); let c = new C();\n",
            "  let d = new D(); let e = new E(); let f = new F();\n",
            "}",
        );
        let findings = analyze_script(script, &rules());
        assert!(findings.errors.is_empty(), "{:?}", findings.errors);
        assert_eq!(findings.warnings.len(), 2);
        assert!(findings.warnings[0].starts_with("unbounded loop on line 1"));
        assert!(findings.warnings[1].starts_with("6 allocations"));
    }

    #[test]
    fn commented_out_code_is_ignored() {
        let script = "createCanvas(1, 1);\n// let let x = 1; while (true) {}";
        let findings = analyze_script(script, &rules());
        assert_eq!(findings, HeuristicFindings::default());
    }
}
