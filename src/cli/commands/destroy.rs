//! Destroy command
//!
//! Removes everything recorded in state, dependents first.

use super::{CommandContext, Runnable};
use anyhow::Result;
use clap::Parser;
use serde_json::json;
use vulnstack::plan::Planner;
use vulnstack::topology::Outputs;

/// Arguments for the destroy command
#[derive(Parser, Debug, Clone)]
pub struct DestroyArgs {
    /// Destroy without asking
    #[arg(long)]
    pub auto_approve: bool,
}

impl DestroyArgs {
    /// Execute the destroy command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let mut session = ctx.session().await?;
        let plan = Planner::new().plan_destroy(&session.state, Outputs::default())?;

        if plan.is_empty() {
            if ctx.output.is_json() {
                ctx.output.json(&json!({ "type": "destroy", "deleted": 0 }));
            } else {
                ctx.output.success("Nothing to destroy.");
            }
            return Ok(0);
        }

        ctx.render_plan(&plan);

        let confirmed = ctx.confirm_destruction(plan.actions.len(), self.auto_approve)?;
        let stats = session
            .reconciler
            .destroy(&plan, &mut session.state, confirmed)
            .await?;

        if ctx.output.is_json() {
            ctx.output
                .json(&json!({ "type": "destroy", "deleted": stats.deleted }));
        } else {
            ctx.output.success(&format!(
                "\nDestroy complete! Resources: {} destroyed.",
                stats.deleted
            ));
            ctx.output.elapsed();
        }
        Ok(0)
    }
}

#[async_trait::async_trait(?Send)]
impl Runnable for DestroyArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.execute(ctx).await
    }
}
