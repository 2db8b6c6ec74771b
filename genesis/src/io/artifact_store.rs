//! Persisted session outputs under `<output_dir>/<slug>-<short id>/`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, instrument};

pub const DESIGN_FILE: &str = "DESIGN.md";
pub const PLAN_FILE: &str = "PLAN.md";
pub const ARTIFACT_FILE: &str = "game.html";
pub const README_FILE: &str = "README.md";

const SLUG_MAX_LEN: usize = 40;

/// Output locations for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub dir: PathBuf,
}

impl ArtifactPaths {
    pub fn new(output_dir: &Path, request: &str, session_id: &str) -> Self {
        let short_id: String = session_id.chars().filter(|c| *c != '-').take(8).collect();
        Self {
            dir: output_dir.join(format!("{}-{short_id}", slug(request))),
        }
    }

    pub fn design(&self) -> PathBuf {
        self.dir.join(DESIGN_FILE)
    }

    pub fn plan(&self) -> PathBuf {
        self.dir.join(PLAN_FILE)
    }

    pub fn artifact(&self) -> PathBuf {
        self.dir.join(ARTIFACT_FILE)
    }

    pub fn readme(&self) -> PathBuf {
        self.dir.join(README_FILE)
    }
}

/// Lowercase ASCII words joined by `-`, bounded in length.
pub fn slug(request: &str) -> String {
    let mut slug = String::new();
    for word in request
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
    {
        let word = word.to_ascii_lowercase();
        let sep = usize::from(!slug.is_empty());
        if slug.len() + sep + word.len() > SLUG_MAX_LEN {
            break;
        }
        if sep == 1 {
            slug.push('-');
        }
        slug.push_str(&word);
    }
    if slug.is_empty() {
        "game".to_string()
    } else {
        slug
    }
}

/// Write the architect's design and plan.
#[instrument(skip_all, fields(dir = %paths.dir.display()))]
pub async fn write_planning(paths: &ArtifactPaths, design: &str, plan: &str) -> Result<()> {
    write_atomic(&paths.design(), design).await?;
    write_atomic(&paths.plan(), plan).await?;
    debug!("planning documents written");
    Ok(())
}

/// Summary written next to a completed artifact.
#[derive(Debug, Clone)]
pub struct CompletionSummary<'a> {
    pub request: &'a str,
    pub session_id: &'a str,
    pub debug_cycles: u32,
    pub library: &'a str,
}

/// Write the final artifact and its README. Returns the artifact path.
#[instrument(skip_all, fields(dir = %paths.dir.display()))]
pub async fn write_final(
    paths: &ArtifactPaths,
    artifact: &str,
    summary: &CompletionSummary<'_>,
) -> Result<PathBuf> {
    let artifact_path = paths.artifact();
    write_atomic(&artifact_path, artifact).await?;
    write_atomic(&paths.readme(), &render_readme(summary)).await?;
    debug!(path = %artifact_path.display(), "final artifact written");
    Ok(artifact_path)
}

fn render_readme(summary: &CompletionSummary<'_>) -> String {
    format!(
        "# {request}\n\n\
         Open `{ARTIFACT_FILE}` in a web browser to play.\n\n\
         ## Generation Summary\n\n\
         - Request: {request}\n\
         - Session: {session}\n\
         - Repair cycles: {cycles}\n\
         - Runtime library: {library}\n\n\
         ## Files\n\n\
         - `{DESIGN_FILE}`: game design\n\
         - `{PLAN_FILE}`: implementation plan\n\
         - `{ARTIFACT_FILE}`: validated game\n",
        request = summary.request.trim(),
        session = summary.session_id,
        cycles = summary.debug_cycles,
        library = summary.library,
    )
}

async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("output path missing parent {}", path.display()))?;
    tokio::fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, contents)
        .await
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// A completed session directory found under the output dir.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredGame {
    pub name: String,
    pub artifact: PathBuf,
}

/// Session directories that contain a final artifact, sorted by name.
pub async fn list_games(output_dir: &Path) -> Result<Vec<StoredGame>> {
    let mut games = Vec::new();
    let mut entries = match tokio::fs::read_dir(output_dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(games),
        Err(err) => {
            return Err(err).with_context(|| format!("read {}", output_dir.display()));
        }
    };
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("read {}", output_dir.display()))?
    {
        let artifact = entry.path().join(ARTIFACT_FILE);
        if tokio::fs::try_exists(&artifact).await.unwrap_or(false) {
            games.push(StoredGame {
                name: entry.file_name().to_string_lossy().into_owned(),
                artifact,
            });
        }
    }
    games.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(games)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_is_bounded_and_ascii() {
        assert_eq!(slug("Bouncing Ball!"), "bouncing-ball");
        assert_eq!(slug("  ¿¡ "), "game");
        let long = slug(&"asteroid ".repeat(20));
        assert!(long.len() <= 40);
        assert!(long.starts_with("asteroid-asteroid"));
    }

    #[test]
    fn paths_use_short_session_id() {
        let paths = ArtifactPaths::new(
            Path::new("out"),
            "space race",
            "1b4e28ba-2fa1-11d2-883f-0016d3cca427",
        );
        assert_eq!(paths.dir, PathBuf::from("out/space-race-1b4e28ba"));
        assert_eq!(
            paths.artifact(),
            PathBuf::from("out/space-race-1b4e28ba/game.html")
        );
    }

    #[tokio::test]
    async fn writes_planning_and_final_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ArtifactPaths::new(temp.path(), "pong", "abcdef12-0000");
        write_planning(&paths, "design", "plan")
            .await
            .expect("planning");
        assert!(list_games(temp.path()).await.expect("list").is_empty());

        let summary = CompletionSummary {
            request: "pong",
            session_id: "abcdef12-0000",
            debug_cycles: 2,
            library: "p5.js",
        };
        let path = write_final(&paths, "<html></html>", &summary)
            .await
            .expect("final");
        assert_eq!(
            std::fs::read_to_string(&path).expect("read"),
            "<html></html>"
        );
        let readme = std::fs::read_to_string(paths.readme()).expect("readme");
        assert!(readme.contains("Repair cycles: 2"));
        assert_eq!(
            std::fs::read_to_string(paths.design()).expect("design"),
            "design"
        );

        let games = list_games(temp.path()).await.expect("list");
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].name, "pong-abcdef12");
    }

    #[tokio::test]
    async fn missing_output_dir_lists_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let games = list_games(&temp.path().join("missing"))
            .await
            .expect("list");
        assert!(games.is_empty());
    }
}
