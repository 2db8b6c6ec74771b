//! Role prompt rendering.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::rules::ArtifactRules;
use crate::core::types::TaskKind;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const DESIGN_TEMPLATE: &str = include_str!("prompts/architect_design.md");
const PLAN_TEMPLATE: &str = include_str!("prompts/architect_plan.md");
const ENGINEER_TEMPLATE: &str = include_str!("prompts/engineer.md");
const DEBUGGER_TEMPLATE: &str = include_str!("prompts/debugger.md");
const PLACEHOLDER_DESIGN_TEMPLATE: &str = include_str!("prompts/placeholder_design.md");
const PLACEHOLDER_PLAN_TEMPLATE: &str = include_str!("prompts/placeholder_plan.md");

/// Everything a role may see. Each template picks the fields it needs.
#[derive(Debug, Clone, Default)]
pub struct RoleContext<'a> {
    pub request: &'a str,
    pub design: Option<&'a str>,
    pub plan: Option<&'a str>,
    pub artifact: Option<&'a str>,
    pub diagnostics: &'a [String],
}

/// Instructions and context for one role call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

/// Template engine wrapper around minijinja.
pub struct RolePrompts {
    env: Environment<'static>,
    rules: ArtifactRules,
}

impl RolePrompts {
    pub fn new(rules: ArtifactRules) -> Result<Self> {
        let mut env = Environment::new();
        for (name, source) in [
            ("system", SYSTEM_TEMPLATE),
            ("design", DESIGN_TEMPLATE),
            ("plan", PLAN_TEMPLATE),
            ("implement", ENGINEER_TEMPLATE),
            ("repair", DEBUGGER_TEMPLATE),
            ("placeholder_design", PLACEHOLDER_DESIGN_TEMPLATE),
            ("placeholder_plan", PLACEHOLDER_PLAN_TEMPLATE),
        ] {
            env.add_template(name, source)
                .with_context(|| format!("load {name} template"))?;
        }
        Ok(Self { env, rules })
    }

    fn library(&self) -> &str {
        self.rules
            .library_markers
            .first()
            .map_or("the runtime library", String::as_str)
    }

    pub fn render(&self, kind: TaskKind, ctx: &RoleContext<'_>) -> Result<RenderedPrompt> {
        let system = self
            .env
            .get_template("system")?
            .render(context! {
                role => kind.role().id(),
                library => self.library(),
                entry_points => &self.rules.entry_points,
                surface_call => &self.rules.surface_call,
            })
            .context("render system prompt")?;

        let template = self.env.get_template(kind.as_str())?;
        // The repair template only receives the artifact and its diagnostics.
        let user = match kind {
            TaskKind::Repair => template.render(context! {
                artifact => ctx.artifact.unwrap_or_default().trim(),
                diagnostics => ctx.diagnostics,
            }),
            _ => template.render(context! {
                request => ctx.request.trim(),
                design => ctx.design.map(str::trim),
                plan => ctx.plan.map(str::trim),
                library => self.library(),
                entry_points => &self.rules.entry_points,
                surface_call => &self.rules.surface_call,
                end_marker => &self.rules.end_marker,
            }),
        }
        .with_context(|| format!("render {} prompt", kind.as_str()))?;

        Ok(RenderedPrompt { system, user })
    }

    /// Deterministic design and plan documents used when no backend can serve.
    pub fn placeholder(&self, kind: TaskKind, request: &str) -> Result<String> {
        let name = match kind {
            TaskKind::Design => "placeholder_design",
            TaskKind::Plan => "placeholder_plan",
            TaskKind::Implement | TaskKind::Repair => {
                return Ok(crate::core::fallback::FALLBACK_ARTIFACT.to_string());
            }
        };
        let rendered = self.env.get_template(name)?.render(context! {
            request => request.trim(),
            library => self.library(),
            entry_points => &self.rules.entry_points,
        })?;
        Ok(rendered)
    }
}
