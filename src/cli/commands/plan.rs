//! Plan command
//!
//! Shows what `apply` (or `destroy`, with `--destroy`) would do.

use super::{CommandContext, Runnable};
use anyhow::Result;
use clap::Parser;
use vulnstack::plan::Planner;
use vulnstack::topology::Outputs;

/// Arguments for the plan command
#[derive(Parser, Debug, Clone)]
pub struct PlanArgs {
    /// Plan the destruction of everything recorded in state
    #[arg(long)]
    pub destroy: bool,

    /// Exit with status 2 when the plan contains changes
    #[arg(long)]
    pub detailed_exitcode: bool,
}

impl PlanArgs {
    /// Execute the plan command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let plan = if self.destroy {
            let session = ctx.session().await?;
            Planner::new().plan_destroy(&session.state, Outputs::default())?
        } else {
            let decl = ctx.declaration()?;
            let session = ctx.session().await?;
            session.reconciler.plan(&decl, &session.state)?
        };

        ctx.render_plan(&plan);

        if self.detailed_exitcode && !plan.is_empty() {
            return Ok(2);
        }
        Ok(0)
    }
}

#[async_trait::async_trait(?Send)]
impl Runnable for PlanArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.execute(ctx).await
    }
}
