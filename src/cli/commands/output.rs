//! Output command
//!
//! Prints the output values recorded by the last apply. Reads the state
//! file only; no variables or credentials are needed.

use super::{CommandContext, Runnable};
use anyhow::{bail, Result};
use clap::Parser;
use serde_json::json;

/// Arguments for the output command
#[derive(Parser, Debug, Clone)]
pub struct OutputArgs {
    /// Output to print (all when omitted)
    pub name: Option<String>,

    /// Print the bare value, for use in scripts
    #[arg(long, requires = "name")]
    pub raw: bool,
}

impl OutputArgs {
    /// Execute the output command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let state = ctx.load_state()?;

        if state.outputs.is_empty() {
            ctx.output
                .warning("No outputs recorded. Run `vulnstack apply` first.");
            return Ok(0);
        }

        match &self.name {
            Some(name) => {
                let Some(value) = state.outputs.get(name) else {
                    bail!("Output '{}' not found", name);
                };
                if ctx.output.is_json() {
                    ctx.output.json(&json!({ name.as_str(): value }));
                } else if self.raw {
                    println!("{}", value);
                } else {
                    ctx.output.key_values("", &[(name.as_str(), value.as_str())]);
                }
            }
            None => {
                if ctx.output.is_json() {
                    ctx.output.json(&state.outputs);
                } else {
                    let pairs: Vec<(&str, &str)> = state
                        .outputs
                        .iter()
                        .map(|(k, v)| (k.as_str(), v.as_str()))
                        .collect();
                    ctx.output.key_values("", &pairs);
                }
            }
        }
        Ok(0)
    }
}

#[async_trait::async_trait(?Send)]
impl Runnable for OutputArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.execute(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_args_parsing() {
        let args = OutputArgs::try_parse_from(["output", "db_connection_command", "--raw"]).unwrap();
        assert_eq!(args.name.as_deref(), Some("db_connection_command"));
        assert!(args.raw);
    }

    #[test]
    fn test_raw_requires_name() {
        assert!(OutputArgs::try_parse_from(["output", "--raw"]).is_err());
    }
}
