//! Per-role worker briefs rendered from the context snapshot.

use anyhow::{Context, Result};
use minijinja::Environment;
use tracing::debug;

use crate::core::context::Snapshot;
use crate::core::stage::Role;

const DATASET_PARTIAL: &str = include_str!("briefs/_dataset.md");
const PLANNER_TEMPLATE: &str = include_str!("briefs/planner.md");
const DRAFTER_TEMPLATE: &str = include_str!("briefs/drafter.md");
const REVIEWER_TEMPLATE: &str = include_str!("briefs/reviewer.md");
const REVISER_TEMPLATE: &str = include_str!("briefs/reviser.md");
const FINALIZER_TEMPLATE: &str = include_str!("briefs/finalizer.md");

/// Template engine wrapper around minijinja.
pub struct BriefRenderer {
    env: Environment<'static>,
}

impl BriefRenderer {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("_dataset", DATASET_PARTIAL)
            .context("dataset partial")?;
        for role in Role::ALL {
            env.add_template(role.as_str(), template_for(role))
                .with_context(|| format!("{role} brief template"))?;
        }
        Ok(Self { env })
    }

    /// Render the brief for `role`. Every snapshot field is a template variable.
    pub fn render(&self, role: Role, snapshot: &Snapshot) -> Result<String> {
        let template = self.env.get_template(role.as_str())?;
        let rendered = template
            .render(snapshot.fields())
            .with_context(|| format!("render {role} brief"))?;
        debug!(%role, bytes = rendered.len(), "rendered brief");
        Ok(rendered)
    }
}

fn template_for(role: Role) -> &'static str {
    match role {
        Role::Planner => PLANNER_TEMPLATE,
        Role::Drafter => DRAFTER_TEMPLATE,
        Role::Reviewer => REVIEWER_TEMPLATE,
        Role::Reviser => REVISER_TEMPLATE,
        Role::Finalizer => FINALIZER_TEMPLATE,
    }
}
