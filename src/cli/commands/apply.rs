//! Apply command
//!
//! Plans, asks for confirmation when the plan destroys anything, then
//! converges live infrastructure and prints the outputs.

use super::{CommandContext, Runnable};
use anyhow::Result;
use clap::Parser;
use serde_json::json;

/// Arguments for the apply command
#[derive(Parser, Debug, Clone)]
pub struct ApplyArgs {
    /// Apply destructive changes without asking
    #[arg(long)]
    pub auto_approve: bool,
}

impl ApplyArgs {
    /// Execute the apply command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let decl = ctx.declaration()?;
        let mut session = ctx.session().await?;
        let plan = session.reconciler.plan(&decl, &session.state)?;

        ctx.render_plan(&plan);

        let confirmed = ctx.confirm_destruction(plan.destructive_ids().len(), self.auto_approve)?;
        let stats = session
            .reconciler
            .apply(&decl, &plan, &mut session.state, confirmed)
            .await?;

        if ctx.output.is_json() {
            ctx.output.json(&json!({
                "type": "apply",
                "stats": stats,
                "outputs": session.state.outputs,
            }));
        } else {
            ctx.output
                .success(&format!("\nApply complete! Resources: {}.", stats));
            ctx.output.key_values("Outputs", &decl.outputs.entries());
            ctx.output.elapsed();
        }
        Ok(0)
    }
}

#[async_trait::async_trait(?Send)]
impl Runnable for ApplyArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.execute(ctx).await
    }
}
