//! Human-readable plan rendering.
//!
//! ```text
//!   + network/vuln-vpc
//!   ~ database_instance/vuln-consolidation-primary
//!       cpu_count: 2 -> 4
//! -/+ archive_table/raw_scan_logs (schema cannot be changed in place)
//!       schema: [...] -> [...] (forces replacement)
//!
//! Plan: 1 to add, 1 to change, 1 to destroy.
//! ```

use colored::Colorize;
use serde_json::Value;
use similar::{ChangeTag, TextDiff};

use super::{ActionKind, AttributeChange, Plan, PlannedAction};
use crate::policy::access_critical;

const SENSITIVE_PLACEHOLDER: &str = "(sensitive value)";

/// Renders plans for terminals.
#[derive(Debug, Clone)]
pub struct PlanFormatter {
    use_color: bool,
}

impl PlanFormatter {
    pub fn new(use_color: bool) -> Self {
        Self { use_color }
    }

    /// Render a full plan, ending with the summary line.
    pub fn render(&self, plan: &Plan) -> String {
        let mut out = String::new();

        if plan.is_empty() {
            out.push_str("No changes. Live infrastructure matches the declaration.\n");
            return out;
        }

        for action in &plan.actions {
            self.render_action(&mut out, action);
        }

        out.push('\n');
        out.push_str(&self.summary_line(plan));
        out.push('\n');
        out
    }

    /// `Plan: X to add, Y to change, Z to destroy.`
    pub fn summary_line(&self, plan: &Plan) -> String {
        let s = plan.summary();
        let line = format!(
            "Plan: {} to add, {} to change, {} to destroy.",
            s.add, s.change, s.destroy
        );
        if self.use_color {
            line.bold().to_string()
        } else {
            line
        }
    }

    fn render_action(&self, out: &mut String, action: &PlannedAction) {
        let symbol = format!("{:>3}", action.kind.symbol());
        let symbol = if self.use_color {
            match action.kind {
                ActionKind::Create => symbol.green().to_string(),
                ActionKind::Update => symbol.yellow().to_string(),
                ActionKind::Replace => symbol.magenta().to_string(),
                ActionKind::Delete => symbol.red().to_string(),
            }
        } else {
            symbol
        };

        let mut header = format!("{} {}", symbol, action.id);
        if let Some(reason) = &action.reason {
            header.push_str(&format!(" ({})", reason));
        }
        out.push_str(&header);
        out.push('\n');

        if action.deletion_protected {
            out.push_str(&self.warning("      blocked: deletion protection is enabled"));
            out.push('\n');
        }
        if action.kind == ActionKind::Delete && access_critical(&action.id) {
            out.push_str(&self.warning("      note: removing this revokes access to the environment"));
            out.push('\n');
        }

        for change in &action.changes {
            self.render_change(out, change);
        }
    }

    fn render_change(&self, out: &mut String, change: &AttributeChange) {
        let suffix = if change.forces_replacement {
            " (forces replacement)"
        } else {
            ""
        };

        if change.sensitive {
            out.push_str(&format!(
                "      {}: {} -> {}{}\n",
                change.path, SENSITIVE_PLACEHOLDER, SENSITIVE_PLACEHOLDER, suffix
            ));
            return;
        }

        match (&change.old, &change.new) {
            (Some(Value::String(old)), Some(Value::String(new)))
                if old.contains('\n') || new.contains('\n') =>
            {
                out.push_str(&format!("      {}:{}\n", change.path, suffix));
                self.render_text_diff(out, old, new);
            }
            (old, new) => {
                out.push_str(&format!(
                    "      {}: {} -> {}{}\n",
                    change.path,
                    render_value(old.as_ref()),
                    render_value(new.as_ref()),
                    suffix
                ));
            }
        }
    }

    fn render_text_diff(&self, out: &mut String, old: &str, new: &str) {
        let diff = TextDiff::from_lines(old, new);
        for change in diff.iter_all_changes() {
            let (sign, line) = match change.tag() {
                ChangeTag::Delete => ("-", change.value()),
                ChangeTag::Insert => ("+", change.value()),
                ChangeTag::Equal => (" ", change.value()),
            };
            let line = format!("        {} {}", sign, line.trim_end_matches('\n'));
            let line = match (self.use_color, change.tag()) {
                (true, ChangeTag::Delete) => line.red().to_string(),
                (true, ChangeTag::Insert) => line.green().to_string(),
                _ => line,
            };
            out.push_str(&line);
            out.push('\n');
        }
    }

    fn warning(&self, text: &str) -> String {
        if self.use_color {
            text.yellow().bold().to_string()
        } else {
            text.to_string()
        }
    }
}

fn render_value(value: Option<&Value>) -> String {
    match value {
        None => "(absent)".to_string(),
        Some(v) => serde_json::to_string(v).unwrap_or_else(|_| v.to_string()),
    }
}
