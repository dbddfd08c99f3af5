//! Subcommands module for the vulnstack CLI
//!
//! This module contains all the subcommand implementations plus the context
//! they share: configuration, variable resolution, provider selection and
//! output.

pub mod apply;
pub mod destroy;
pub mod graph;
pub mod output;
pub mod plan;
pub mod validate;
pub mod verify;

use crate::cli::output::OutputFormatter;
use crate::cli::{Cli, ProviderKind};
use anyhow::Result;
use is_terminal::IsTerminal;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vulnstack::config::Config;
use vulnstack::engine::{Reconciler, ReconcilerOptions};
use vulnstack::error::Error;
use vulnstack::plan::{Plan, PlanFormatter};
use vulnstack::policy;
use vulnstack::provider::{CloudProvider, SimulatedCloud, Warehouse};
use vulnstack::secrets::{NoLogRegistry, SensitiveString};
use vulnstack::state::{AppliedState, JsonStateFile, StatePersistence};
use vulnstack::topology::{declare, Declaration};
use vulnstack::variables::{VariableInputs, Variables};
use vulnstack::verify::Verifier;

/// Common context shared between commands
pub struct CommandContext {
    /// Configuration
    pub config: Config,
    /// Output formatter
    pub output: OutputFormatter,
    /// Control plane to use
    pub provider: ProviderKind,
    /// Refresh recorded resources before planning
    pub refresh: bool,
    /// Variables file
    pub var_file: Option<PathBuf>,
    /// Project from the command line
    pub project_id: Option<String>,
    /// Region from the command line
    pub region: Option<String>,
    /// Values scrubbed from provider messages
    no_log: Arc<NoLogRegistry>,
}

/// A loaded state plus the reconciler that owns its store.
pub struct Session {
    pub reconciler: Reconciler,
    pub state: AppliedState,
}

impl CommandContext {
    /// Create a new command context from CLI arguments
    pub fn new(cli: &Cli, mut config: Config) -> Self {
        if let Some(state) = &cli.state {
            config.state.path = state.clone();
        }
        if cli.no_color {
            config.output.color = false;
        }
        let output = OutputFormatter::new(config.output.color, cli.is_json(), cli.verbosity());

        Self {
            config,
            output,
            provider: cli.provider,
            refresh: cli.refresh,
            var_file: cli.var_file.clone(),
            project_id: cli.project_id.clone(),
            region: cli.region.clone(),
            no_log: Arc::new(NoLogRegistry::new()),
        }
    }

    /// Resolve variables: file, then environment, then flags.
    ///
    /// A missing password is prompted for when a terminal is attached.
    pub fn variables(&self) -> Result<Variables> {
        let mut inputs = match &self.var_file {
            Some(path) => VariableInputs::from_file(path)?,
            None => VariableInputs::default(),
        };
        inputs = inputs.merge(VariableInputs::from_env()).merge(VariableInputs {
            project_id: self.project_id.clone(),
            region: self.region.clone(),
            db_password: None,
        });

        if inputs.needs_password() && std::io::stdin().is_terminal() && !self.output.is_json() {
            self.output.flush();
            let password = dialoguer::Password::new()
                .with_prompt("Database password (db_password)")
                .interact()?;
            inputs.db_password = Some(SensitiveString::new(password));
        }

        Ok(inputs.resolve()?)
    }

    /// Build the declaration and check it against policy.
    pub fn declaration(&self) -> Result<Declaration> {
        let vars = self.variables()?;
        let decl = declare(&vars)?;
        policy::check(&decl)?;
        Ok(decl)
    }

    fn cloud(&self, state: &AppliedState) -> Result<Arc<dyn CloudProvider>> {
        match self.provider {
            ProviderKind::Simulated => Ok(Arc::new(self.simulated(state))),
            ProviderKind::Gcp => Ok(Arc::new(self.gcp()?)),
        }
    }

    fn warehouse(&self, state: &AppliedState) -> Result<Arc<dyn Warehouse>> {
        match self.provider {
            ProviderKind::Simulated => Ok(Arc::new(self.simulated(state))),
            ProviderKind::Gcp => Ok(Arc::new(self.gcp()?)),
        }
    }

    fn simulated(&self, state: &AppliedState) -> SimulatedCloud {
        self.output.warning(&format!(
            "using the simulated cloud; state goes to {}",
            self.state_path().display()
        ));
        SimulatedCloud::from_state(state)
    }

    #[cfg(feature = "gcp")]
    fn gcp(&self) -> Result<vulnstack::provider::GcpRestProvider> {
        let provider =
            vulnstack::provider::GcpRestProvider::new(self.config.gcp.clone(), &self.config.execution)
                .map_err(|e| Error::Config(format!("GCP provider: {}", e)))?;
        Ok(provider)
    }

    #[cfg(not(feature = "gcp"))]
    fn gcp(&self) -> Result<SimulatedCloud> {
        Err(Error::Config("built without the gcp feature; use --provider simulated".to_string()).into())
    }

    /// State file this run reads and writes.
    ///
    /// Simulated runs never touch the real state file; they keep their own
    /// next to it.
    pub fn state_path(&self) -> PathBuf {
        match self.provider {
            ProviderKind::Simulated => simulated_state_path(&self.config.state.path),
            ProviderKind::Gcp => self.config.state.path.clone(),
        }
    }

    /// Load the recorded state.
    ///
    /// A simulated run without a state of its own starts from the real one,
    /// read-only.
    pub fn load_state(&self) -> Result<AppliedState> {
        let own = JsonStateFile::new(self.state_path()).load().map_err(Error::from)?;
        let state = match (own, self.provider) {
            (Some(state), _) => state,
            (None, ProviderKind::Simulated) => JsonStateFile::new(&self.config.state.path)
                .load()
                .map_err(Error::from)?
                .unwrap_or_default(),
            (None, ProviderKind::Gcp) => AppliedState::default(),
        };
        Ok(state)
    }

    /// Load state, build the reconciler and refresh if asked to.
    pub async fn session(&self) -> Result<Session> {
        let store: Arc<dyn StatePersistence> = Arc::new(JsonStateFile::new(self.state_path()));
        let mut state = self.load_state()?;
        self.output
            .info(&format!("state: {} ({} resources)", store.location(), state.len()));

        let reconciler = Reconciler::new(
            self.cloud(&state)?,
            store,
            ReconcilerOptions::from_config(&self.config),
        )
        .with_no_log(self.no_log.clone());

        if self.refresh {
            for id in reconciler.refresh(&mut state).await? {
                self.output
                    .warning(&format!("{} no longer exists and will be recreated", id));
            }
        }

        Ok(Session { reconciler, state })
    }

    /// A verifier against the selected warehouse.
    pub fn verifier(&self) -> Result<Verifier> {
        let state = self.load_state()?;
        let verifier = Verifier::new(
            self.warehouse(&state)?,
            ReconcilerOptions::from_config(&self.config),
        )
        .with_no_log(self.no_log.clone());
        Ok(verifier)
    }

    /// Ask for confirmation; `None` when nobody can be asked.
    pub fn confirm(&self, prompt: &str) -> Result<Option<bool>> {
        if !std::io::stdin().is_terminal() || self.output.is_json() {
            return Ok(None);
        }
        self.output.flush();
        let answer = dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()?;
        Ok(Some(answer))
    }

    /// Confirmation for a plan that destroys `count` resources.
    ///
    /// Declining interactively cancels; with no terminal the engine
    /// refuses the destructive plan itself.
    pub fn confirm_destruction(&self, count: usize, auto_approve: bool) -> Result<bool> {
        if auto_approve || count == 0 {
            return Ok(true);
        }
        match self.confirm(&format!("This destroys {} resource(s). Continue?", count))? {
            Some(true) => Ok(true),
            Some(false) => Err(Error::Cancelled.into()),
            None => Ok(false),
        }
    }

    /// Print a plan in the selected format.
    pub fn render_plan(&self, plan: &Plan) {
        if self.output.is_json() {
            self.output.json(&json!({
                "type": "plan",
                "summary": plan.summary(),
                "actions": redacted_actions(plan),
            }));
        } else {
            self.output
                .text(&PlanFormatter::new(self.output.use_color()).render(plan));
        }
    }
}

/// `state.json` -> `state.simulated.json`, in the same directory.
fn simulated_state_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "vulnstack".to_string());
    path.with_file_name(format!("{}.simulated.json", stem))
}

/// Plan actions with sensitive values masked.
fn redacted_actions(plan: &Plan) -> Vec<serde_json::Value> {
    plan.actions
        .iter()
        .map(|action| {
            let mut action = action.clone();
            for change in action.changes.iter_mut().filter(|c| c.sensitive) {
                change.old = change.old.as_ref().map(|_| json!("(sensitive value)"));
                change.new = change.new.as_ref().map(|_| json!("(sensitive value)"));
            }
            serde_json::to_value(&action).unwrap_or_default()
        })
        .collect()
}

/// Trait for runnable commands
///
/// Commands run on the main task only, so their futures need not be `Send`.
#[async_trait::async_trait(?Send)]
pub trait Runnable {
    /// Execute the command
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32>;
}
