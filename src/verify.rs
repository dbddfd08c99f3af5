//! Post-apply verification of the data path.
//!
//! A converged stack is only useful if data can reach it. [`Verifier`]
//! checks the half that is reachable from outside the VPC: the archive table
//! answers a `COUNT(*)` query. The database has no route from outside, so
//! its check is the route itself: the IAP tunnel, the client command and the
//! query to run once connected.
//!
//! Truncating the archive is opt-in and, like any destructive change, needs
//! confirmation.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::engine::{guarded_call, ReconcilerOptions};
use crate::error::{Error, Result};
use crate::provider::{TableRef, Warehouse};
use crate::secrets::NoLogRegistry;
use crate::topology::Outputs;

/// Query run against the database once connected through the tunnel.
pub const DATABASE_CHECK_QUERY: &str = "SELECT COUNT(*) FROM active_vulnerabilities;";

/// Result of querying the archive table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WarehouseCheck {
    /// `project.dataset.table`
    pub table: String,
    pub row_count: u64,
}

/// How an operator reaches the database.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseRoute {
    pub iap_tunnel_command: String,
    pub db_connection_command: String,
    pub check_query: String,
}

impl DatabaseRoute {
    pub fn for_outputs(outputs: &Outputs) -> Self {
        Self {
            iap_tunnel_command: outputs.iap_tunnel_command.clone(),
            db_connection_command: outputs.db_connection_command.clone(),
            check_query: DATABASE_CHECK_QUERY.to_string(),
        }
    }
}

/// Everything `vulnstack verify` reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationReport {
    pub warehouse: WarehouseCheck,
    /// Rows removed, when the archive was truncated first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated_rows: Option<u64>,
    pub database: DatabaseRoute,
}

/// Runs warehouse checks with the reconciler's retry and timeout settings.
pub struct Verifier {
    warehouse: Arc<dyn Warehouse>,
    options: ReconcilerOptions,
    no_log: Arc<NoLogRegistry>,
}

impl Verifier {
    pub fn new(warehouse: Arc<dyn Warehouse>, options: ReconcilerOptions) -> Self {
        Self {
            warehouse,
            options,
            no_log: Arc::new(NoLogRegistry::new()),
        }
    }

    /// Share a redaction registry with the caller.
    pub fn with_no_log(mut self, registry: Arc<NoLogRegistry>) -> Self {
        self.no_log = registry;
        self
    }

    /// Count the rows of `table`.
    pub async fn count_rows(&self, table: &TableRef) -> Result<WarehouseCheck> {
        let row_count = guarded_call(&self.options, &self.no_log, &table.resource_id(), "count rows", || {
            self.warehouse.row_count(table)
        })
        .await?;
        info!(%table, row_count, "archive table reachable");
        Ok(WarehouseCheck {
            table: table.to_string(),
            row_count,
        })
    }

    /// Remove every row of `table`; returns how many there were.
    ///
    /// Refused unless `confirmed`. The truncate call itself is never retried.
    pub async fn truncate(&self, table: &TableRef, confirmed: bool) -> Result<u64> {
        if !confirmed {
            return Err(Error::TruncateNotConfirmed(table.to_string()));
        }
        let before = self.count_rows(table).await?.row_count;

        let once = ReconcilerOptions {
            retry: crate::retry::RetryPolicy::no_retry(),
            ..self.options.clone()
        };
        guarded_call(&once, &self.no_log, &table.resource_id(), "truncate", || {
            self.warehouse.truncate(table)
        })
        .await?;
        warn!(%table, rows = before, "archive table truncated");
        Ok(before)
    }

    /// Check the warehouse and describe the database route.
    pub async fn report(&self, table: &TableRef, outputs: &Outputs) -> Result<VerificationReport> {
        Ok(VerificationReport {
            warehouse: self.count_rows(table).await?,
            truncated_rows: None,
            database: DatabaseRoute::for_outputs(outputs),
        })
    }
}
