//! Validate command
//!
//! Resolves variables, builds the declaration, checks it against policy
//! and orders it. Touches neither state nor the cloud.

use super::{CommandContext, Runnable};
use anyhow::Result;
use clap::Parser;
use serde_json::json;
use vulnstack::graph::ResourceGraph;

/// Arguments for the validate command
#[derive(Parser, Debug, Clone)]
pub struct ValidateArgs {}

impl ValidateArgs {
    /// Execute the validate command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let decl = ctx.declaration()?;
        let graph = ResourceGraph::from_declaration(&decl)?;
        let order = graph.execution_order()?;
        let waves = graph.waves()?;

        tracing::debug!(resources = order.len(), waves = waves.len(), "declaration ordered");

        if ctx.output.is_json() {
            ctx.output.json(&json!({
                "type": "validate",
                "valid": true,
                "resources": decl.len(),
                "dependencies": graph.edge_count(),
                "waves": waves.len(),
            }));
        } else {
            ctx.output.success(&format!(
                "The configuration is valid: {} resources, {} dependencies, {} waves.",
                decl.len(),
                graph.edge_count(),
                waves.len()
            ));
        }
        Ok(0)
    }
}

#[async_trait::async_trait(?Send)]
impl Runnable for ValidateArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.execute(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_takes_no_arguments() {
        assert!(ValidateArgs::try_parse_from(["validate"]).is_ok());
        assert!(ValidateArgs::try_parse_from(["validate", "extra"]).is_err());
    }
}
