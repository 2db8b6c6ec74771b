//! Known-good minimal artifact.
//!
//! Used when a model response cannot be turned into a parsable document and
//! as the placeholder output of artifact-producing roles during a total
//! backend outage.

pub const FALLBACK_ARTIFACT: &str = include_str!("../../assets/fallback_artifact.html");
