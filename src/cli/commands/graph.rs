//! Graph command
//!
//! Prints the dependency graph of the declaration (or of recorded state)
//! as DOT or as the waves the engine would run.

use super::{CommandContext, Runnable};
use anyhow::Result;
use clap::{Parser, ValueEnum};
use serde_json::json;
use vulnstack::graph::ResourceGraph;

/// Graph rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    /// Graphviz DOT
    Dot,
    /// Numbered waves of resources that can run concurrently
    Waves,
}

/// Arguments for the graph command
#[derive(Parser, Debug, Clone)]
pub struct GraphArgs {
    /// Output format
    #[arg(long, value_enum, default_value = "waves")]
    pub format: GraphFormat,

    /// Graph the dependencies recorded in state instead of the declaration
    #[arg(long)]
    pub recorded: bool,
}

impl GraphArgs {
    /// Execute the graph command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let graph = if self.recorded {
            let state = ctx.load_state()?;
            ResourceGraph::from_state(&state)
        } else {
            ResourceGraph::from_declaration(&ctx.declaration()?)?
        };

        let waves = graph.waves()?;

        if ctx.output.is_json() {
            ctx.output.json(&json!({
                "type": "graph",
                "nodes": graph.node_count(),
                "edges": graph.edge_count(),
                "waves": waves,
            }));
            return Ok(0);
        }

        match self.format {
            GraphFormat::Dot => ctx.output.text(&graph.to_dot()),
            GraphFormat::Waves => {
                for (i, wave) in waves.iter().enumerate() {
                    let items: Vec<String> = wave.iter().map(ToString::to_string).collect();
                    ctx.output.list(&format!("Wave {}", i + 1), &items);
                }
            }
        }
        Ok(0)
    }
}

#[async_trait::async_trait(?Send)]
impl Runnable for GraphArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.execute(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_args_defaults() {
        let args = GraphArgs::try_parse_from(["graph"]).unwrap();
        assert_eq!(args.format, GraphFormat::Waves);
        assert!(!args.recorded);
    }

    #[test]
    fn test_graph_dot_format() {
        let args = GraphArgs::try_parse_from(["graph", "--format", "dot", "--recorded"]).unwrap();
        assert_eq!(args.format, GraphFormat::Dot);
        assert!(args.recorded);
    }

    #[test]
    fn test_graph_rejects_unknown_format() {
        assert!(GraphArgs::try_parse_from(["graph", "--format", "svg"]).is_err());
    }
}
