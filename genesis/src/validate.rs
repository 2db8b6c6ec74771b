//! Static and dynamic validation of an artifact.
//!
//! The static tier always runs. The dynamic tier runs only when the static
//! tier passes: inside the headless environment when one is available,
//! otherwise as script heuristics.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::heuristics::analyze_script;
use crate::core::rules::ArtifactRules;
use crate::core::script::inline_script;
use crate::core::static_check::check_static;
use crate::core::types::{Diagnostic, Tier, ValidationReport, ValidationTiers};
use crate::io::config::GenesisConfig;
use crate::io::environment::{ExecutionEnvironment, Page, environment_from_config};

/// Checks for a drawing surface in the loaded document.
pub const CANVAS_CHECK: &str = "document.querySelector('canvas') !== null";

pub fn global_check(name: &str) -> String {
    format!("typeof window[{name:?}] !== 'undefined'")
}

pub fn entry_point_check(name: &str) -> String {
    format!("typeof window[{name:?}] === 'function'")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicMode {
    /// Loaded and executed inside the headless environment.
    Browser,
    /// Environment absent or broken; script heuristics were used.
    Heuristic,
}

/// Result of one dynamic pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicCheck {
    pub ok: bool,
    pub console_errors: Vec<String>,
    pub runtime_errors: Vec<String>,
    pub warnings: Vec<String>,
    pub mode: DynamicMode,
}

impl DynamicCheck {
    fn new(
        console_errors: Vec<String>,
        runtime_errors: Vec<String>,
        warnings: Vec<String>,
        mode: DynamicMode,
    ) -> Self {
        Self {
            ok: console_errors.is_empty() && runtime_errors.is_empty(),
            console_errors,
            runtime_errors,
            warnings,
            mode,
        }
    }
}

pub struct DynamicValidator {
    env: Arc<dyn ExecutionEnvironment>,
    available: bool,
    rules: ArtifactRules,
    settle: Duration,
    watchdog: Duration,
}

impl DynamicValidator {
    /// Environment availability is read once here and cached.
    pub fn new(
        env: Arc<dyn ExecutionEnvironment>,
        rules: ArtifactRules,
        settle: Duration,
        watchdog: Duration,
    ) -> Self {
        let available = env.available();
        Self {
            env,
            available,
            rules,
            settle,
            watchdog,
        }
    }

    pub fn available(&self) -> bool {
        self.available
    }

    #[instrument(skip_all, fields(browser = self.available))]
    pub async fn check(&self, artifact: &str) -> DynamicCheck {
        if !self.available {
            return self.heuristic_check(
                artifact,
                "no headless environment available; used script heuristics".to_string(),
            );
        }

        match tokio::time::timeout(self.watchdog, self.browser_check(artifact)).await {
            Ok(Ok(check)) => check,
            Ok(Err(err)) => {
                warn!(
                    error = format!("{err:#}"),
                    "headless check failed; using heuristics"
                );
                self.heuristic_check(
                    artifact,
                    format!("headless check failed ({err:#}); used script heuristics"),
                )
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.watchdog.as_secs(),
                    "headless check timed out"
                );
                DynamicCheck::new(
                    Vec::new(),
                    vec![format!(
                        "headless check timed out after {}s",
                        self.watchdog.as_secs()
                    )],
                    Vec::new(),
                    DynamicMode::Browser,
                )
            }
        }
    }

    fn heuristic_check(&self, artifact: &str, notice: String) -> DynamicCheck {
        let findings = analyze_script(&inline_script(artifact), &self.rules);
        let mut warnings = vec![notice];
        warnings.extend(findings.warnings);
        DynamicCheck::new(
            Vec::new(),
            findings.errors,
            warnings,
            DynamicMode::Heuristic,
        )
    }

    async fn browser_check(&self, artifact: &str) -> Result<DynamicCheck> {
        let file = tempfile::Builder::new()
            .prefix("genesis-")
            .suffix(".html")
            .tempfile()
            .context("create temp artifact")?;
        tokio::fs::write(file.path(), artifact)
            .await
            .context("write temp artifact")?;

        let mut page = self.env.open(file.path()).await?;
        let inspected = self.inspect(page.as_mut()).await;
        if let Err(err) = page.close().await {
            debug!(error = %err, "closing headless page failed");
        }
        inspected
    }

    async fn inspect(&self, page: &mut dyn Page) -> Result<DynamicCheck> {
        tokio::time::sleep(self.settle).await;
        let diagnostics = page.drain().await.context("collect page diagnostics")?;

        let mut runtime_errors = diagnostics.page_errors;
        if !is_true(&page.evaluate(CANVAS_CHECK).await?) {
            runtime_errors.push("no canvas element exists after load".to_string());
        }
        let global = &self.rules.runtime_global;
        if !global.is_empty() && !is_true(&page.evaluate(&global_check(global)).await?) {
            runtime_errors.push(format!("runtime global '{global}' is not defined"));
        }
        for entry in &self.rules.entry_points {
            if !is_true(&page.evaluate(&entry_point_check(entry)).await?) {
                runtime_errors.push(format!("entry point {entry}() is not a function"));
            }
        }

        Ok(DynamicCheck::new(
            diagnostics.console_errors,
            runtime_errors,
            Vec::new(),
            DynamicMode::Browser,
        ))
    }
}

fn is_true(value: &Value) -> bool {
    value.as_bool().unwrap_or(false)
}

/// Runs the enabled tiers and assembles a [`ValidationReport`].
pub struct Validator {
    rules: ArtifactRules,
    dynamic: Option<DynamicValidator>,
}

impl Validator {
    pub fn new(rules: ArtifactRules, dynamic: Option<DynamicValidator>) -> Self {
        Self { rules, dynamic }
    }

    pub fn from_config(cfg: &GenesisConfig) -> Self {
        Self::with_environment(cfg, environment_from_config(&cfg.validation))
    }

    /// Use `env` for the dynamic tier when it is enabled in `cfg`.
    pub fn with_environment(cfg: &GenesisConfig, env: Arc<dyn ExecutionEnvironment>) -> Self {
        let dynamic = cfg.validation.dynamic.then(|| {
            DynamicValidator::new(
                env,
                cfg.artifact.clone(),
                Duration::from_millis(cfg.validation.settle_ms),
                cfg.phase_timeout(),
            )
        });
        Self::new(cfg.artifact.clone(), dynamic)
    }

    pub fn rules(&self) -> &ArtifactRules {
        &self.rules
    }

    #[instrument(skip_all, fields(chars = artifact.len()))]
    pub async fn validate(&self, artifact: &str) -> ValidationReport {
        let mut tiers = ValidationTiers {
            static_ran: true,
            ..ValidationTiers::default()
        };
        let static_check = check_static(artifact, &self.rules);
        let mut errors: Vec<Diagnostic> = static_check
            .errors
            .into_iter()
            .map(|message| Diagnostic::new(Tier::Static, message))
            .collect();
        let mut warnings = Vec::new();

        if let Some(dynamic) = self.dynamic.as_ref().filter(|_| errors.is_empty()) {
            let check = dynamic.check(artifact).await;
            tiers.dynamic_ran = true;
            tiers.browser = check.mode == DynamicMode::Browser;
            errors.extend(check.console_errors.into_iter().map(|message| {
                Diagnostic::new(Tier::Dynamic, format!("console error: {message}"))
            }));
            errors.extend(
                check
                    .runtime_errors
                    .into_iter()
                    .map(|message| Diagnostic::new(Tier::Dynamic, message)),
            );
            warnings.extend(
                check
                    .warnings
                    .into_iter()
                    .map(|message| Diagnostic::new(Tier::Dynamic, message)),
            );
        }

        let report = ValidationReport::new(errors, warnings, tiers);
        debug!(
            success = report.success(),
            errors = report.errors().len(),
            warnings = report.warnings().len(),
            "validation finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fallback::FALLBACK_ARTIFACT;
    use crate::io::environment::NullEnvironment;
    use crate::test_support::ScriptedEnvironment;

    fn dynamic(env: Arc<dyn ExecutionEnvironment>) -> DynamicValidator {
        DynamicValidator::new(
            env,
            ArtifactRules::default(),
            Duration::from_millis(2000),
            Duration::from_secs(10),
        )
    }

    fn validator(env: Arc<dyn ExecutionEnvironment>) -> Validator {
        Validator::new(ArtifactRules::default(), Some(dynamic(env)))
    }

    #[tokio::test]
    async fn absent_environment_passes_clean_artifact_with_notice() {
        let check = dynamic(Arc::new(NullEnvironment))
            .check(FALLBACK_ARTIFACT)
            .await;
        assert!(check.ok);
        assert_eq!(check.mode, DynamicMode::Heuristic);
        assert!(check.warnings[0].contains("no headless environment"));
    }

    #[tokio::test]
    async fn absent_environment_flags_duplicate_keyword() {
        let artifact = FALLBACK_ARTIFACT.replace("let ball;", "let let ball;");
        let check = dynamic(Arc::new(NullEnvironment)).check(&artifact).await;
        assert!(!check.ok);
        assert_eq!(check.runtime_errors.len(), 1);
        let first = &check.runtime_errors[0];
        assert!(first.starts_with("duplicate keyword 'let let'"));
    }

    #[tokio::test(start_paused = true)]
    async fn browser_check_collects_console_errors_and_assertions() {
        let env = ScriptedEnvironment::passing()
            .with_console_error("Uncaught ReferenceError: foo is not defined")
            .with_value(&entry_point_check("draw"), Value::Bool(false));
        let check = dynamic(Arc::new(env)).check(FALLBACK_ARTIFACT).await;

        assert_eq!(check.mode, DynamicMode::Browser);
        assert!(!check.ok);
        assert_eq!(
            check.console_errors,
            vec!["Uncaught ReferenceError: foo is not defined".to_string()]
        );
        assert_eq!(
            check.runtime_errors,
            vec!["entry point draw() is not a function".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn uncaught_page_error_fails_browser_check() {
        let env =
            ScriptedEnvironment::passing().with_page_error("Uncaught TypeError: x is undefined");
        let report = validator(Arc::new(env)).validate(FALLBACK_ARTIFACT).await;

        assert!(!report.success());
        assert!(report.tiers().browser);
        assert_eq!(
            report.error_messages(),
            vec!["Uncaught TypeError: x is undefined".to_string()]
        );
        assert!(report.errors().iter().all(|d| d.tier == Tier::Dynamic));
    }

    #[tokio::test(start_paused = true)]
    async fn browser_check_waits_for_settle_window() {
        let env = Arc::new(ScriptedEnvironment::passing());
        let started = tokio::time::Instant::now();
        let check = dynamic(env.clone()).check(FALLBACK_ARTIFACT).await;
        assert!(check.ok, "{check:?}");
        assert!(started.elapsed() >= Duration::from_millis(2000));
        assert_eq!(env.opened(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_environment_becomes_runtime_error() {
        let env = ScriptedEnvironment::passing().hanging(Duration::from_secs(600));
        let check = dynamic(Arc::new(env)).check(FALLBACK_ARTIFACT).await;
        assert!(!check.ok);
        assert_eq!(
            check.runtime_errors,
            vec!["headless check timed out after 10s".to_string()]
        );
    }

    #[tokio::test]
    async fn broken_environment_degrades_to_heuristics() {
        let env = ScriptedEnvironment::passing().failing_open();
        let check = dynamic(Arc::new(env)).check(FALLBACK_ARTIFACT).await;
        assert!(check.ok);
        assert_eq!(check.mode, DynamicMode::Heuristic);
        assert!(check.warnings[0].starts_with("headless check failed"));
    }

    #[tokio::test]
    async fn availability_is_cached_at_construction() {
        let env = Arc::new(ScriptedEnvironment::passing());
        let validator = dynamic(env.clone());
        env.set_available(false);
        assert!(validator.available());
    }

    #[tokio::test]
    async fn static_failure_skips_dynamic_tier() {
        let env = Arc::new(ScriptedEnvironment::passing());
        let artifact = FALLBACK_ARTIFACT.replace("function draw()", "function render()");
        let report = validator(env.clone()).validate(&artifact).await;

        assert!(!report.success());
        assert_eq!(
            report.error_messages(),
            vec!["missing entry point draw()".to_string()]
        );
        assert!(report.tiers().static_ran);
        assert!(!report.tiers().dynamic_ran);
        assert_eq!(env.opened(), 0);
    }

    #[tokio::test]
    async fn static_result_is_independent_of_environment() {
        let artifact = FALLBACK_ARTIFACT.replace("function setup()", "function init()");
        let with_env = validator(Arc::new(ScriptedEnvironment::passing()))
            .validate(&artifact)
            .await;
        let without_env = validator(Arc::new(NullEnvironment))
            .validate(&artifact)
            .await;
        assert_eq!(with_env.errors(), without_env.errors());
    }

    #[tokio::test(start_paused = true)]
    async fn passing_report_records_tiers() {
        let report = validator(Arc::new(ScriptedEnvironment::passing()))
            .validate(FALLBACK_ARTIFACT)
            .await;
        assert!(report.success());
        assert!(report.tiers().dynamic_ran);
        assert!(report.tiers().browser);

        let report = Validator::new(ArtifactRules::default(), None)
            .validate(FALLBACK_ARTIFACT)
            .await;
        assert!(report.success());
        assert!(!report.tiers().dynamic_ran);
    }
}
