//! ServerCore - main public API for calcol-server

use std::sync::Arc;

use calcol::{CalculationDefinition, CalculationManager, CalculationPatch, Dataset, ManagerError, parse};
use log::info;
use tokio::sync::broadcast;

use crate::error::ServerError;
use crate::formulas::FormulaSpec;
use crate::state::{
    CalculationResponse, CalculationUpdate, ColumnsResponse, ExecutionResponse, NewCalculation,
    ParseResponse, SharedState, VirtualColumnsResponse,
};

/// Main server core: one calculation manager behind an async lock
#[derive(Clone)]
pub struct ServerCore {
    state: Arc<SharedState>,
}

impl ServerCore {
    pub fn new(manager: CalculationManager) -> Self {
        let (state, _) = SharedState::new(manager);
        Self { state }
    }

    /// Serve calculations over an in-memory row set
    pub fn from_dataset(dataset: Dataset) -> Self {
        Self::new(CalculationManager::new(dataset))
    }

    /// Create a new ServerCore and return an update receiver
    pub fn with_update_receiver(
        manager: CalculationManager,
    ) -> (Self, broadcast::Receiver<Vec<String>>) {
        let (state, rx) = SharedState::new(manager);
        (Self { state }, rx)
    }

    /// Get the underlying shared state
    pub fn state(&self) -> Arc<SharedState> {
        self.state.clone()
    }

    /// Get a receiver for change notifications
    pub fn subscribe_updates(&self) -> broadcast::Receiver<Vec<String>> {
        self.state.subscribe_updates()
    }

    /// Parse a formula without touching any state
    pub fn parse_formula(&self, formula: &str) -> Result<ParseResponse, ServerError> {
        let expr = parse(formula)?;
        Ok(ParseResponse {
            expression: expr.to_string(),
            dependencies: expr.dependencies().iter().cloned().collect(),
        })
    }

    // ============ Calculations ============

    /// Add a calculation and compute it with its cached dependents
    pub async fn add_calculation(
        &self,
        request: NewCalculation,
    ) -> Result<ExecutionResponse, ServerError> {
        let expression = parse(&request.formula)?;
        let definition = CalculationDefinition::new(request.column.as_str(), expression)
            .with_name(request.name.unwrap_or_else(|| request.column.clone()))
            .with_active(request.active);

        let report = self
            .state
            .with_manager(move |manager| Ok(manager.add_calculation(definition)?))
            .await?;

        let mut changed: Vec<String> = report.affected_columns.iter().cloned().collect();
        changed.push(request.column);
        self.state.notify(changed);
        Ok(report.into())
    }

    /// Update a calculation. Affected columns become stale until the next
    /// execute or refresh.
    pub async fn update_calculation(
        &self,
        column: &str,
        update: CalculationUpdate,
    ) -> Result<CalculationResponse, ServerError> {
        let mut patch = CalculationPatch::new();
        if let Some(name) = update.name {
            patch = patch.name(name);
        }
        if let Some(new_column) = update.column {
            patch = patch.rename_column(new_column);
        }
        if let Some(formula) = &update.formula {
            patch = patch.expression(parse(formula)?);
        }
        if let Some(active) = update.active {
            patch = patch.active(active);
        }
        let target = patch
            .result_column_name
            .clone()
            .unwrap_or_else(|| column.to_string());

        let old = column.to_string();
        let (response, changed) = self
            .state
            .with_manager(move |manager| {
                manager.update_calculation(&old, patch)?;
                let definition = manager
                    .calculation(&target)
                    .ok_or_else(|| ManagerError::UnknownCalculation(target.clone()))?;
                let mut changed = manager.dependents(&target);
                changed.insert(old);
                changed.insert(target.clone());
                Ok((CalculationResponse::new(manager, definition), changed))
            })
            .await?;

        self.state.notify(changed);
        Ok(response)
    }

    /// Remove a calculation; its dependents are left stale
    pub async fn remove_calculation(&self, column: &str) -> Result<CalculationResponse, ServerError> {
        let column = column.to_string();
        let (response, changed) = self
            .state
            .with_manager(move |manager| {
                let mut changed = manager.dependents(&column);
                let definition = manager.remove_calculation(&column)?;
                let response = CalculationResponse::new(manager, &definition);
                changed.insert(column);
                Ok((response, changed))
            })
            .await?;

        self.state.notify(changed);
        Ok(response)
    }

    pub async fn calculation(&self, column: &str) -> Option<CalculationResponse> {
        let manager = self.state.manager.read().await;
        manager
            .calculation(column)
            .map(|definition| CalculationResponse::new(&manager, definition))
    }

    /// All calculations in insertion order
    pub async fn list_calculations(&self) -> Vec<CalculationResponse> {
        let manager = self.state.manager.read().await;
        manager
            .calculations()
            .map(|definition| CalculationResponse::new(&manager, definition))
            .collect()
    }

    /// Add every formula in order, stopping at the first failure
    pub async fn load_formulas(&self, specs: Vec<FormulaSpec>) -> Result<usize, ServerError> {
        let count = specs.len();
        for spec in specs {
            self.add_calculation(NewCalculation {
                name: None,
                column: spec.column,
                formula: spec.formula,
                active: true,
            })
            .await?;
        }
        info!("Loaded {} formulas", count);
        Ok(count)
    }

    // ============ Execution ============

    /// Recompute every active calculation
    pub async fn execute_all(&self) -> Result<ExecutionResponse, ServerError> {
        let report = self
            .state
            .with_manager(|manager| Ok(manager.execute_all()?))
            .await?;
        self.state.notify(report.affected_columns.iter().cloned());
        Ok(report.into())
    }

    /// Recompute only stale active calculations
    pub async fn refresh(&self) -> Result<ExecutionResponse, ServerError> {
        let report = self
            .state
            .with_manager(|manager| Ok(manager.refresh()?))
            .await?;
        self.state.notify(report.affected_columns.iter().cloned());
        Ok(report.into())
    }

    /// Swap in a new row set and recompute everything against it
    pub async fn replace_source(&self, dataset: Dataset) -> Result<ExecutionResponse, ServerError> {
        let report = self
            .state
            .with_manager(move |manager| {
                manager.set_source(Arc::new(dataset));
                Ok(manager.refresh()?)
            })
            .await?;
        self.state.notify(report.affected_columns.iter().cloned());
        Ok(report.into())
    }

    // ============ Queries ============

    pub async fn columns(&self) -> ColumnsResponse {
        let manager = self.state.manager.read().await;
        ColumnsResponse {
            columns: manager.column_names(),
            calculated: manager
                .calculations()
                .filter(|c| c.is_active)
                .map(|c| c.result_column_name.clone())
                .collect(),
            row_count: manager.row_count(),
        }
    }

    /// Cached results of every active calculation
    pub async fn virtual_columns(&self) -> VirtualColumnsResponse {
        let manager = self.state.manager.read().await;
        VirtualColumnsResponse {
            columns: manager.virtual_columns(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calcol::Row;

    fn core() -> (ServerCore, broadcast::Receiver<Vec<String>>) {
        let dataset = Dataset::new(vec![
            Row::new(1).with_field("value", 100.0),
            Row::new(2).with_field("value", 5.0),
        ]);
        ServerCore::with_update_receiver(CalculationManager::new(dataset))
    }

    fn new_calc(column: &str, formula: &str) -> NewCalculation {
        NewCalculation {
            name: None,
            column: column.to_string(),
            formula: formula.to_string(),
            active: true,
        }
    }

    #[tokio::test]
    async fn add_notifies_affected_columns() {
        let (core, mut rx) = core();
        core.add_calculation(new_calc("referenceValue", "doubleValue + 100"))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), ["referenceValue"]);

        let response = core
            .add_calculation(new_calc("doubleValue", "value * 2"))
            .await
            .unwrap();
        assert_eq!(response.affected_columns, ["doubleValue", "referenceValue"]);
        assert_eq!(rx.recv().await.unwrap(), ["doubleValue", "referenceValue"]);

        let columns = core.virtual_columns().await.columns;
        assert_eq!(columns["referenceValue"][&1], Some(calcol::Value::Number(300.0)));
    }

    #[tokio::test]
    async fn update_leaves_columns_stale_until_refresh() {
        let (core, _rx) = core();
        core.add_calculation(new_calc("doubleValue", "value * 2")).await.unwrap();

        let updated = core
            .update_calculation(
                "doubleValue",
                CalculationUpdate {
                    formula: Some("value * 3".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!updated.cached);
        assert_eq!(updated.formula, "value * 3");

        let report = core.refresh().await.unwrap();
        assert_eq!(report.affected_columns, ["doubleValue"]);
        assert_eq!(
            report.results["doubleValue"][&2],
            Some(calcol::Value::Number(15.0))
        );
    }

    #[tokio::test]
    async fn errors_leave_state_unchanged() {
        let (core, _rx) = core();
        core.add_calculation(new_calc("a", "value + 1")).await.unwrap();
        core.add_calculation(new_calc("b", "a + 1")).await.unwrap();

        let err = core
            .update_calculation(
                "a",
                CalculationUpdate {
                    formula: Some("b".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("dependency cycle"));
        assert_eq!(core.calculation("a").await.unwrap().formula, "value + 1");

        assert!(core.add_calculation(new_calc("c", "value +")).await.is_err());
        assert!(core.calculation("c").await.is_none());
        assert_eq!(core.list_calculations().await.len(), 2);
    }

    #[tokio::test]
    async fn replace_source_recomputes() {
        let (core, _rx) = core();
        core.load_formulas(vec![FormulaSpec {
            column: "plusOne".to_string(),
            formula: "value + 1".to_string(),
        }])
        .await
        .unwrap();

        let dataset = Dataset::new(vec![Row::new(10).with_field("value", 41.0)]);
        let report = core.replace_source(dataset).await.unwrap();
        assert_eq!(
            report.results["plusOne"][&10],
            Some(calcol::Value::Number(42.0))
        );
        let columns = core.columns().await;
        assert_eq!(columns.columns, ["value", "plusOne"]);
        assert_eq!(columns.row_count, 1);
    }
}
