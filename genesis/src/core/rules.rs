//! Structural profile an artifact must satisfy.
//!
//! Defaults describe a single-file HTML document that embeds a p5.js sketch.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ArtifactRules {
    /// Minimum number of characters after trimming.
    pub min_length: usize,
    /// The artifact must begin with one of these (ASCII case-insensitive).
    pub start_markers: Vec<String>,
    /// The artifact must contain this closing marker.
    pub end_marker: String,
    /// At least one of these must appear to reference the runtime library.
    pub library_markers: Vec<String>,
    /// Function names the runtime calls; each needs a `function name(` signature.
    pub entry_points: Vec<String>,
    /// Entry point invoked once per frame.
    pub frame_entry_point: String,
    /// Global the runtime library defines once loaded.
    pub runtime_global: String,
    /// Call that creates the drawing surface.
    pub surface_call: String,
}

impl Default for ArtifactRules {
    fn default() -> Self {
        Self {
            min_length: 100,
            start_markers: vec!["<!DOCTYPE html>".to_string(), "<html".to_string()],
            end_marker: "</html>".to_string(),
            library_markers: vec!["p5.js".to_string(), "p5.min.js".to_string()],
            entry_points: vec!["setup".to_string(), "draw".to_string()],
            frame_entry_point: "draw".to_string(),
            runtime_global: "p5".to_string(),
            surface_call: "createCanvas".to_string(),
        }
    }
}

impl ArtifactRules {
    /// True if `text` (already trimmed) begins with a start marker.
    pub fn starts_document(&self, text: &str) -> bool {
        self.start_markers.iter().any(|marker| {
            text.len() >= marker.len()
                && text.as_bytes()[..marker.len()].eq_ignore_ascii_case(marker.as_bytes())
        })
    }

    /// Byte offset just past the last end marker (ASCII case-insensitive).
    pub fn end_of_document(&self, text: &str) -> Option<usize> {
        let marker = self.end_marker.to_ascii_lowercase();
        if marker.is_empty() {
            return None;
        }
        text.to_ascii_lowercase()
            .rfind(&marker)
            .map(|start| start + marker.len())
    }

    pub fn references_library(&self, text: &str) -> bool {
        self.library_markers
            .iter()
            .any(|marker| text.contains(marker.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_marker_match_ignores_case() {
        let rules = ArtifactRules::default();
        assert!(rules.starts_document("<!doctype html>\n<html>"));
        assert!(rules.starts_document("<HTML lang=\"en\">"));
        assert!(!rules.starts_document("Here is your game: <html>"));
    }

    #[test]
    fn end_of_document_points_past_last_marker() {
        let rules = ArtifactRules::default();
        let text = "<html></html>\nThat's it!";
        let end = rules.end_of_document(text).expect("marker");
        assert_eq!(&text[..end], "<html></html>");
    }
}
