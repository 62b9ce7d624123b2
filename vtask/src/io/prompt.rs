//! Dispatch prompt rendering.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::task::Task;

const DISPATCH_TEMPLATE: &str = include_str!("prompts/dispatch.md");

/// Render the fixed dispatch prompt for `task`.
///
/// With `commit`, the agent is told to close the task through `vtask done --commit`.
pub fn render_dispatch_prompt(task: &Task, commit: bool) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("dispatch", DISPATCH_TEMPLATE)
        .context("load dispatch template")?;
    let template = env.get_template("dispatch")?;
    let rendered = template
        .render(context! {
            id => task.id.as_str(),
            content => task.content.trim(),
            after => task.after.as_deref(),
            commit => commit,
        })
        .with_context(|| format!("render prompt for {}", task.id))?;
    Ok(rendered)
}
