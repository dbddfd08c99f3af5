//! Change planning.
//!
//! The [`Planner`] compares a [`Declaration`] with the [`AppliedState`] and
//! produces a [`Plan`]: one [`PlannedAction`] per resource that needs to
//! change. Resources that already match are listed as unchanged.
//!
//! Classification per resource:
//!
//! | Declared | Recorded | Attribute diff | Action |
//! |----------|----------|----------------|--------|
//! | yes | no | | `Create` |
//! | yes | yes | none | unchanged |
//! | yes | yes | only in-place changes | `Update` |
//! | yes | yes | any replacing change | `Replace` |
//! | no | yes | | `Delete` |
//!
//! Replacing a resource also replaces everything that structurally
//! references it (network -> subnet -> VM); identity and explicit edges do
//! not cascade.

pub mod diff;
pub mod formatter;

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::graph::ResourceGraph;
use crate::resources::ResourceId;
use crate::state::AppliedState;
use crate::topology::{Declaration, Outputs};

pub use diff::{diff_attributes, AttributeChange};
pub use formatter::PlanFormatter;

/// What will happen to one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Create,
    Update,
    Replace,
    Delete,
}

impl ActionKind {
    /// Whether the action destroys a live object.
    pub fn is_destructive(self) -> bool {
        matches!(self, Self::Replace | Self::Delete)
    }

    /// Symbol used in human output.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Replace => "-/+",
            Self::Delete => "-",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update in-place",
            Self::Replace => "replace",
            Self::Delete => "destroy",
        };
        f.write_str(s)
    }
}

/// A single planned change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedAction {
    pub id: ResourceId,
    pub kind: ActionKind,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<AttributeChange>,
    /// Why a replace or delete happens, when not obvious from `changes`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// The object to be destroyed has deletion protection enabled.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deletion_protected: bool,
}

impl PlannedAction {
    fn new(id: ResourceId, kind: ActionKind) -> Self {
        Self {
            id,
            kind,
            changes: Vec::new(),
            reason: None,
            deletion_protected: false,
        }
    }
}

/// Counts of planned actions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub add: usize,
    pub change: usize,
    pub destroy: usize,
    pub unchanged: usize,
}

/// The changes needed to converge live state to the declaration.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    /// Create/update/replace actions in dependency order, then deletions.
    pub actions: Vec<PlannedAction>,
    pub unchanged: Vec<ResourceId>,
    pub outputs: Outputs,
}

impl Plan {
    /// Whether applying this plan would do nothing.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn action(&self, id: &ResourceId) -> Option<&PlannedAction> {
        self.actions.iter().find(|a| &a.id == id)
    }

    /// Resources the plan destroys (deletes and replacements).
    pub fn destructive_ids(&self) -> Vec<ResourceId> {
        self.actions
            .iter()
            .filter(|a| a.kind.is_destructive())
            .map(|a| a.id.clone())
            .collect()
    }

    /// Destructive actions blocked by deletion protection.
    pub fn protected_ids(&self) -> Vec<ResourceId> {
        self.actions
            .iter()
            .filter(|a| a.kind.is_destructive() && a.deletion_protected)
            .map(|a| a.id.clone())
            .collect()
    }

    pub fn of_kind(&self, kind: ActionKind) -> impl Iterator<Item = &PlannedAction> {
        self.actions.iter().filter(move |a| a.kind == kind)
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary {
            unchanged: self.unchanged.len(),
            ..Default::default()
        };
        for action in &self.actions {
            match action.kind {
                ActionKind::Create => summary.add += 1,
                ActionKind::Update => summary.change += 1,
                ActionKind::Replace => {
                    summary.add += 1;
                    summary.destroy += 1;
                }
                ActionKind::Delete => summary.destroy += 1,
            }
        }
        summary
    }
}

/// Builds plans.
#[derive(Debug, Default)]
pub struct Planner;

impl Planner {
    pub fn new() -> Self {
        Self
    }

    /// Plan the convergence of `state` to `decl`.
    #[instrument(skip_all, fields(declared = decl.len(), recorded = state.len()))]
    pub fn plan(&self, decl: &Declaration, state: &AppliedState) -> Result<Plan> {
        let graph = ResourceGraph::from_declaration(decl)?;
        let order = graph.execution_order()?;

        let mut actions: BTreeMap<ResourceId, PlannedAction> = BTreeMap::new();
        let mut unchanged = Vec::new();

        for id in &order {
            let Some(resource) = decl.get(id) else { continue };
            match state.get(id) {
                None => {
                    actions.insert(id.clone(), PlannedAction::new(id.clone(), ActionKind::Create));
                }
                Some(record) => {
                    let changes = diff_attributes(&resource.spec, &record.attributes);
                    if changes.is_empty() {
                        unchanged.push(id.clone());
                        continue;
                    }
                    let kind = if changes.iter().any(|c| c.forces_replacement) {
                        ActionKind::Replace
                    } else {
                        ActionKind::Update
                    };
                    let mut action = PlannedAction::new(id.clone(), kind);
                    if kind == ActionKind::Replace {
                        let forcing: Vec<&str> = changes
                            .iter()
                            .filter(|c| c.forces_replacement)
                            .map(|c| c.path.as_str())
                            .collect();
                        action.reason = Some(format!("{} cannot be changed in place", forcing.join(", ")));
                    }
                    action.changes = changes;
                    actions.insert(id.clone(), action);
                }
            }
        }

        // Cascade replacements along structural references.
        let replaced: Vec<ResourceId> = order
            .iter()
            .filter(|id| actions.get(*id).is_some_and(|a| a.kind == ActionKind::Replace))
            .cloned()
            .collect();
        for root in &replaced {
            for dependent in graph.reference_dependents(root) {
                if !state.contains(&dependent) {
                    continue;
                }
                let entry = actions
                    .entry(dependent.clone())
                    .or_insert_with(|| PlannedAction::new(dependent.clone(), ActionKind::Update));
                if entry.kind != ActionKind::Replace {
                    debug!(resource = %dependent, cause = %root, "replacement cascades");
                    entry.kind = ActionKind::Replace;
                    entry.reason = Some(format!("replacement of {}", root));
                    unchanged.retain(|u| u != &dependent);
                }
            }
        }

        let mut ordered: Vec<PlannedAction> = order
            .iter()
            .filter_map(|id| actions.remove(id))
            .collect();

        // Deletions in reverse recorded dependency order.
        let recorded = ResourceGraph::from_state(state);
        let mut delete_order = recorded.execution_order()?;
        delete_order.reverse();
        for id in delete_order {
            if decl.contains(&id) {
                continue;
            }
            let mut action = PlannedAction::new(id.clone(), ActionKind::Delete);
            action.reason = Some("no longer declared".to_string());
            ordered.push(action);
        }

        // Protection of the live object is what blocks its deletion.
        for action in &mut ordered {
            if action.kind.is_destructive() {
                action.deletion_protected = state.get(&action.id).is_some_and(|r| r.deletion_protected());
            }
        }

        let plan = Plan {
            actions: ordered,
            unchanged,
            outputs: decl.outputs.clone(),
        };
        let summary = plan.summary();
        debug!(
            add = summary.add,
            change = summary.change,
            destroy = summary.destroy,
            "plan computed"
        );
        Ok(plan)
    }

    /// Plan the destruction of everything recorded in `state`.
    pub fn plan_destroy(&self, state: &AppliedState, outputs: Outputs) -> Result<Plan> {
        let graph = ResourceGraph::from_state(state);
        let mut order = graph.execution_order()?;
        order.reverse();

        let actions = order
            .into_iter()
            .map(|id| {
                let mut action = PlannedAction::new(id.clone(), ActionKind::Delete);
                action.deletion_protected = state.get(&id).is_some_and(|r| r.deletion_protected());
                action
            })
            .collect();

        Ok(Plan {
            actions,
            unchanged: Vec::new(),
            outputs,
        })
    }
}
