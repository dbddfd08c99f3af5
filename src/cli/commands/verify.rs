//! Verify command
//!
//! Confirms the archive table answers queries and prints the route an
//! operator takes to reach the database. With `--truncate` the archive is
//! emptied first, after confirmation.

use super::{CommandContext, Runnable};
use anyhow::Result;
use clap::Parser;
use serde_json::json;
use vulnstack::error::Error;
use vulnstack::provider::TableRef;
use vulnstack::topology::declare;

/// Arguments for the verify command
#[derive(Parser, Debug, Clone)]
pub struct VerifyArgs {
    /// Remove every row of the archive table before checking it
    #[arg(long)]
    pub truncate: bool,

    /// Truncate without asking
    #[arg(long, requires = "truncate")]
    pub auto_approve: bool,
}

impl VerifyArgs {
    /// Execute the verify command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let vars = ctx.variables()?;
        let decl = declare(&vars)?;
        let table = TableRef::archive(&vars.project_id);
        let verifier = ctx.verifier()?;

        let truncated_rows = if self.truncate {
            let confirmed = self.auto_approve || self.confirm_truncate(ctx, &table)?;
            Some(verifier.truncate(&table, confirmed).await?)
        } else {
            None
        };

        let mut report = verifier.report(&table, &decl.outputs).await?;
        report.truncated_rows = truncated_rows;

        if ctx.output.is_json() {
            let mut doc = json!({ "type": "verify" });
            if let (Some(doc), Ok(serde_json::Value::Object(fields))) =
                (doc.as_object_mut(), serde_json::to_value(&report))
            {
                doc.extend(fields);
            }
            ctx.output.json(&doc);
            return Ok(0);
        }

        ctx.output.section("Archive table");
        if let Some(rows) = report.truncated_rows {
            ctx.output
                .info(&format!("Truncated {} ({} rows removed)", table, rows));
        }
        let rows = report.warehouse.row_count.to_string();
        ctx.output.key_values(
            "",
            &[
                ("table", report.warehouse.table.as_str()),
                ("connection_status", "SUCCESS"),
                ("row_count", rows.as_str()),
            ],
        );

        ctx.output.section("Database");
        ctx.output.list(
            "No public address; open the tunnel, then connect from a second shell",
            &[
                report.database.iap_tunnel_command.clone(),
                report.database.db_connection_command.clone(),
                report.database.check_query.clone(),
            ],
        );
        ctx.output.success("\nVerification complete!");
        Ok(0)
    }

    /// Ask before truncating. Declining cancels; with no terminal the
    /// verifier refuses on its own.
    fn confirm_truncate(&self, ctx: &CommandContext, table: &TableRef) -> Result<bool> {
        match ctx.confirm(&format!("This removes every row of {}. Continue?", table))? {
            Some(true) => Ok(true),
            Some(false) => Err(Error::Cancelled.into()),
            None => Ok(false),
        }
    }
}

#[async_trait::async_trait(?Send)]
impl Runnable for VerifyArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.execute(ctx).await
    }
}
