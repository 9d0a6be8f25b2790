//! Server state with channel-based change notifications

use std::collections::BTreeMap;
use std::sync::Arc;

use calcol::{CalculationDefinition, CalculationManager, ColumnValues, ExecutionReport};
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};
use utoipa::ToSchema;

use crate::error::ServerError;

/// Shared server state
pub struct SharedState {
    pub(crate) manager: RwLock<CalculationManager>,
    /// Names of calculated columns whose results or definitions changed
    update_tx: broadcast::Sender<Vec<String>>,
}

impl SharedState {
    pub fn new(manager: CalculationManager) -> (Arc<Self>, broadcast::Receiver<Vec<String>>) {
        let (update_tx, update_rx) = broadcast::channel(64);
        let state = Arc::new(Self {
            manager: RwLock::new(manager),
            update_tx,
        });
        (state, update_rx)
    }

    /// Get a receiver for change notifications
    pub fn subscribe_updates(&self) -> broadcast::Receiver<Vec<String>> {
        self.update_tx.subscribe()
    }

    /// Run `f` with exclusive access to the manager on the blocking thread pool
    pub async fn with_manager<T, F>(self: &Arc<Self>, f: F) -> Result<T, ServerError>
    where
        F: FnOnce(&mut CalculationManager) -> Result<T, ServerError> + Send + 'static,
        T: Send + 'static,
    {
        let state = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let mut manager = state.manager.blocking_write();
            f(&mut manager)
        })
        .await
        .map_err(|e| ServerError::Task(e.to_string()))?
    }

    /// Notify subscribers (ignored if there are none)
    pub fn notify<I>(&self, columns: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut columns: Vec<String> = columns.into_iter().collect();
        columns.sort();
        columns.dedup();
        if columns.is_empty() {
            return;
        }
        debug!("Changed columns: {:?}", columns);
        let _ = self.update_tx.send(columns);
    }
}

// ============ API Types ============

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Deserialize, ToSchema)]
pub struct ParseRequest {
    pub formula: String,
}

#[derive(Serialize, ToSchema)]
pub struct ParseResponse {
    /// Canonical form of the formula
    pub expression: String,
    pub dependencies: Vec<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct NewCalculation {
    /// Display name; defaults to the column name
    pub name: Option<String>,
    pub column: String,
    pub formula: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Fields to change; omitted fields are left as they are
#[derive(Deserialize, ToSchema, Default)]
pub struct CalculationUpdate {
    pub name: Option<String>,
    /// New result column name
    pub column: Option<String>,
    pub formula: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CalculationResponse {
    pub id: u64,
    pub name: String,
    pub column: String,
    pub formula: String,
    pub active: bool,
    pub dependencies: Vec<String>,
    /// Whether results are cached (false means stale)
    pub cached: bool,
}

impl CalculationResponse {
    pub(crate) fn new(manager: &CalculationManager, definition: &CalculationDefinition) -> Self {
        let column = &definition.result_column_name;
        Self {
            id: definition.id.get(),
            name: definition.name.clone(),
            column: column.clone(),
            formula: definition.expression.to_string(),
            active: definition.is_active,
            dependencies: definition.expression.dependencies().iter().cloned().collect(),
            cached: manager.is_cached(column),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct CalculationsResponse {
    pub calculations: Vec<CalculationResponse>,
}

#[derive(Serialize, ToSchema)]
pub struct RowFailureResponse {
    pub row_id: u64,
    pub error: String,
}

#[derive(Serialize, ToSchema)]
pub struct ExecutionResponse {
    pub affected_columns: Vec<String>,
    /// Column -> row id -> value (`null` for rows that failed)
    #[schema(value_type = Object)]
    pub results: BTreeMap<String, ColumnValues>,
    pub failures: BTreeMap<String, Vec<RowFailureResponse>>,
}

impl From<ExecutionReport> for ExecutionResponse {
    fn from(report: ExecutionReport) -> Self {
        let failures = report
            .failures
            .into_iter()
            .map(|(column, failures)| {
                let failures = failures
                    .into_iter()
                    .map(|f| RowFailureResponse {
                        row_id: f.row_id,
                        error: f.error.to_string(),
                    })
                    .collect();
                (column, failures)
            })
            .collect();
        Self {
            affected_columns: report.affected_columns.into_iter().collect(),
            results: report.results_by_column,
            failures,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ColumnsResponse {
    /// Source columns followed by active calculated columns
    pub columns: Vec<String>,
    pub calculated: Vec<String>,
    pub row_count: usize,
}

#[derive(Serialize, ToSchema)]
pub struct VirtualColumnsResponse {
    #[schema(value_type = Object)]
    pub columns: BTreeMap<String, ColumnValues>,
}
