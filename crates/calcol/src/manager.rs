//! Calculation manager
//!
//! Owns every calculation defined over one dataset: the definitions, the
//! dependency graph between their result columns, and the cached results.
//! All state changes go through the manager's methods.
//!
//! # Example
//!
//! ```ignore
//! let mut manager = CalculationManager::new(dataset);
//! manager.add_formula("Double", "doubleValue", "value * 2")?;
//! manager.add_formula("Reference", "referenceValue", "doubleValue + 100")?;
//!
//! // Later, after a burst of edits
//! let report = manager.execute_all()?;
//! for (column, values) in report.results_by_column {
//!     merge_into_table(column, values);
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use log::{debug, info, warn};
use thiserror::Error;

use crate::ast::{CalculationDefinition, CalculationPatch, ExprKind, Expression};
use crate::dataset::{Fields, Row, RowId, RowSource};
use crate::eval::{EvalContext, EvalError, Evaluation, eval_scalar, evaluate, group_key};
use crate::functions::FunctionRegistry;
use crate::graph::{Cycle, DependencyGraph};
use crate::parse::parse;
use crate::value::Value;
use crate::CalcolError;

/// Results of one calculated column. `None` marks a row that failed to
/// evaluate; it is never replaced by a default value.
pub type ColumnValues = BTreeMap<RowId, Option<Value>>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ManagerError {
    #[error("Duplicate column name: {0}")]
    DuplicateColumnName(String),

    #[error("Unknown calculation: {0}")]
    UnknownCalculation(String),

    #[error("Invalid column name: {0:?}")]
    InvalidColumnName(String),

    #[error(transparent)]
    Cycle(#[from] Cycle),
}

type Result<T> = std::result::Result<T, ManagerError>;

#[derive(Debug, Clone, PartialEq)]
pub struct RowFailure {
    pub row_id: RowId,
    pub error: EvalError,
}

/// What one execution recomputed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionReport {
    /// Columns recomputed, including stale upstream columns pulled in
    pub affected_columns: BTreeSet<String>,
    pub results_by_column: BTreeMap<String, ColumnValues>,
    /// Per-row evaluation failures, by column
    pub failures: BTreeMap<String, Vec<RowFailure>>,
}

impl ExecutionReport {
    pub fn is_empty(&self) -> bool {
        self.affected_columns.is_empty()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.values().map(Vec::len).sum()
    }
}

pub struct CalculationManager {
    source: Arc<dyn RowSource>,
    functions: FunctionRegistry,
    /// Result column -> definition, in insertion order
    calculations: IndexMap<String, CalculationDefinition>,
    /// Result column -> cached values; a missing entry means stale
    results: HashMap<String, ColumnValues>,
    graph: DependencyGraph,
}

impl std::fmt::Debug for CalculationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalculationManager")
            .field("calculations", &self.calculations.keys().collect::<Vec<_>>())
            .field("cached", &self.results.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl CalculationManager {
    pub fn new<S: RowSource + 'static>(source: S) -> Self {
        Self::from_shared(Arc::new(source))
    }

    pub fn from_shared(source: Arc<dyn RowSource>) -> Self {
        Self {
            source,
            functions: FunctionRegistry::new(),
            calculations: IndexMap::new(),
            results: HashMap::new(),
            graph: DependencyGraph::new(),
        }
    }

    /// Use a custom function registry
    pub fn with_functions(mut self, functions: FunctionRegistry) -> Self {
        self.functions = functions;
        self
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Swap the row source. Every cached result is dropped.
    pub fn set_source(&mut self, source: Arc<dyn RowSource>) {
        self.source = source;
        self.results.clear();
        info!("Row source replaced, {} calculations stale", self.calculations.len());
    }

    // ============ Edits ============

    /// Register a calculation and compute it together with every cached
    /// calculation that depends on its column.
    ///
    /// On error nothing changes.
    pub fn add_calculation(&mut self, definition: CalculationDefinition) -> Result<ExecutionReport> {
        let column = definition.result_column_name.clone();
        self.validate_new_column(&column)?;

        let mut graph = self.graph.clone();
        graph.set_dependencies(&column, definition.expression.dependencies().iter().cloned());
        self.relink_readers(&mut graph, &column);
        if let Some(cycle) = graph.cycle_through(&column) {
            return Err(cycle.into());
        }
        self.graph = graph;

        info!(
            "Added calculation '{}' -> {}: {}",
            definition.name, column, definition.expression
        );
        let is_active = definition.is_active;
        self.calculations.insert(column.clone(), definition);

        let targets = self.invalidate_cascade(&column);
        if !is_active {
            return Ok(ExecutionReport::default());
        }
        self.execute_targets(targets)
    }

    /// Parse `formula` and add it. A parse error blocks the add.
    pub fn add_formula(
        &mut self,
        name: &str,
        column: &str,
        formula: &str,
    ) -> std::result::Result<ExecutionReport, CalcolError> {
        let expression = parse(formula)?;
        let definition = CalculationDefinition::new(column, expression).with_name(name);
        Ok(self.add_calculation(definition)?)
    }

    /// Apply field updates to the calculation producing `column`.
    ///
    /// Renaming the result column rewrites every other calculation that reads
    /// it, so their cached results stay valid. A changed expression or active
    /// flag invalidates the calculation and its dependents; nothing is
    /// recomputed until the next execution.
    pub fn update_calculation(&mut self, column: &str, patch: CalculationPatch) -> Result<()> {
        let index = self
            .calculations
            .get_index_of(column)
            .ok_or_else(|| ManagerError::UnknownCalculation(column.to_string()))?;

        let renamed = patch
            .result_column_name
            .clone()
            .filter(|new| new != column);
        if let Some(new) = &renamed {
            self.validate_new_column(new)?;
        }
        let target = renamed.clone().unwrap_or_else(|| column.to_string());

        let mut graph = self.graph.clone();
        let mut relinked = Vec::new();
        if let Some(new) = &renamed {
            graph.rename(column, new);
            relinked = self.relink_readers(&mut graph, new);
        }
        if let Some(expression) = &patch.expression {
            graph.set_dependencies(&target, expression.dependencies().iter().cloned());
        }
        if let Some(cycle) = graph.cycle_through(&target) {
            return Err(cycle.into());
        }
        self.graph = graph;

        if let Some(new) = &renamed {
            self.rename_column(index, column, new);
        }

        let Some(definition) = self.calculations.get_mut(&target) else {
            return Err(ManagerError::UnknownCalculation(target));
        };
        if let Some(name) = patch.name {
            definition.name = name;
        }
        let expression_changed = match patch.expression {
            Some(expression) => {
                definition.expression = expression;
                true
            }
            None => false,
        };
        let activity_changed = match patch.is_active {
            Some(active) if active != definition.is_active => {
                definition.is_active = active;
                true
            }
            _ => false,
        };
        info!(
            "Updated calculation '{}' -> {}: {}",
            definition.name, target, definition.expression
        );

        if expression_changed || activity_changed {
            self.invalidate_cascade(&target);
        }
        for reader in &relinked {
            self.invalidate_cascade(reader);
        }
        Ok(())
    }

    fn rename_column(&mut self, index: usize, old: &str, new: &str) {
        if let Some((_, mut definition)) = self.calculations.shift_remove_index(index) {
            definition.result_column_name = new.to_string();
            self.calculations.shift_insert(index, new.to_string(), definition);
        }
        if let Some(values) = self.results.remove(old) {
            self.results.insert(new.to_string(), values);
        }
        for definition in self.calculations.values_mut() {
            if definition.expression.dependencies().contains(old) {
                definition.expression = definition.expression.rename_dependency(old, new);
            }
        }
        debug!("Renamed column {old} -> {new}");
    }

    /// Delete a calculation. Calculations that read its column are left
    /// stale and fail with `UndefinedVariable` when next executed.
    pub fn remove_calculation(&mut self, column: &str) -> Result<CalculationDefinition> {
        let definition = self
            .calculations
            .shift_remove(column)
            .ok_or_else(|| ManagerError::UnknownCalculation(column.to_string()))?;

        let dependents = self.graph.transitive_dependents(column);
        self.results.remove(column);
        self.graph.remove(column);
        self.graph.strip(column);
        for dependent in &dependents {
            self.results.remove(dependent);
        }

        info!(
            "Removed calculation '{}' -> {} ({} dependents now stale)",
            definition.name,
            column,
            dependents.len()
        );
        Ok(definition)
    }

    /// Drop the cached results of `column` and of everything depending on
    /// it. Returns the invalidated columns.
    pub fn invalidate(&mut self, column: &str) -> Result<BTreeSet<String>> {
        if !self.calculations.contains_key(column) {
            return Err(ManagerError::UnknownCalculation(column.to_string()));
        }
        Ok(self.invalidate_cascade(column))
    }

    fn invalidate_cascade(&mut self, column: &str) -> BTreeSet<String> {
        let mut columns = self.graph.transitive_dependents(column);
        columns.insert(column.to_string());
        for c in &columns {
            self.results.remove(c);
        }
        debug!("Invalidated {columns:?}");
        columns
    }

    /// Link existing calculations that already read `column` (references left
    /// by an earlier removal or rename) to it again. Returns the linked readers.
    fn relink_readers(&self, graph: &mut DependencyGraph, column: &str) -> Vec<String> {
        let readers: Vec<String> = self
            .calculations
            .iter()
            .filter(|(name, def)| {
                name.as_str() != column
                    && graph.contains(name)
                    && def.expression.dependencies().contains(column)
            })
            .map(|(name, _)| name.clone())
            .collect();
        for reader in &readers {
            graph.link(reader, column);
        }
        readers
    }

    fn validate_new_column(&self, column: &str) -> Result<()> {
        if column.trim().is_empty() {
            return Err(ManagerError::InvalidColumnName(column.to_string()));
        }
        let taken = self.calculations.contains_key(column)
            || self.source.column_names().iter().any(|c| c == column);
        if taken {
            return Err(ManagerError::DuplicateColumnName(column.to_string()));
        }
        Ok(())
    }

    // ============ Execution ============

    /// Recompute every active calculation in dependency order
    pub fn execute_all(&mut self) -> Result<ExecutionReport> {
        let targets = self
            .calculations
            .iter()
            .filter(|(_, def)| def.is_active)
            .map(|(name, _)| name.clone())
            .collect();
        self.execute_targets(targets)
    }

    /// Recompute only the active calculations without cached results
    pub fn refresh(&mut self) -> Result<ExecutionReport> {
        let targets = self
            .calculations
            .iter()
            .filter(|(name, def)| def.is_active && !self.results.contains_key(name.as_str()))
            .map(|(name, _)| name.clone())
            .collect();
        self.execute_targets(targets)
    }

    /// Recompute `targets`, plus any stale active calculation they read
    fn execute_targets(&mut self, targets: BTreeSet<String>) -> Result<ExecutionReport> {
        let mut run: BTreeSet<String> = targets
            .into_iter()
            .filter(|c| self.is_active(c))
            .collect();
        let mut queue: Vec<String> = run.iter().cloned().collect();
        while let Some(column) = queue.pop() {
            let Some(deps) = self.graph.dependencies(&column) else {
                continue;
            };
            for dep in deps {
                if self.is_active(dep) && !self.results.contains_key(dep) && run.insert(dep.clone()) {
                    queue.push(dep.clone());
                }
            }
        }

        let roots = self
            .calculations
            .keys()
            .filter(|c| run.contains(c.as_str()))
            .map(String::as_str);
        let order = self
            .graph
            .topological_order(roots, |c| self.is_active(c))?;

        let started = Instant::now();
        let source_rows = self.source.rows();
        let mut rows: Vec<Row> = source_rows.to_vec();
        for (column, definition) in &self.calculations {
            if definition.is_active && !run.contains(column) {
                if let Some(values) = self.results.get(column) {
                    publish(&mut rows, column, values);
                }
            }
        }

        let mut report = ExecutionReport::default();
        for column in order {
            let Some(definition) = self.calculations.get(&column) else {
                continue;
            };
            let column_started = Instant::now();
            let (values, failures) = evaluate_column(&definition.expression, &rows, &self.functions);
            publish(&mut rows, &column, &values);

            debug!(
                "Computed {} over {} rows in {:.2?}",
                column,
                rows.len(),
                column_started.elapsed()
            );
            if let Some(first) = failures.first() {
                warn!(
                    "{} of {} rows failed for {} (row {}: {})",
                    failures.len(),
                    rows.len(),
                    column,
                    first.row_id,
                    first.error
                );
                report.failures.insert(column.clone(), failures);
            }

            self.results.insert(column.clone(), values.clone());
            report.results_by_column.insert(column.clone(), values);
            report.affected_columns.insert(column);
        }

        if !report.is_empty() {
            info!(
                "Executed {} calculations in {:.2?}",
                report.affected_columns.len(),
                started.elapsed()
            );
        }
        Ok(report)
    }

    // ============ Queries ============

    fn is_active(&self, column: &str) -> bool {
        self.calculations
            .get(column)
            .is_some_and(|def| def.is_active)
    }

    /// Cached results of every active calculation
    pub fn virtual_columns(&self) -> BTreeMap<String, ColumnValues> {
        self.calculations
            .iter()
            .filter(|(_, def)| def.is_active)
            .filter_map(|(name, _)| {
                self.results
                    .get(name)
                    .map(|values| (name.clone(), values.clone()))
            })
            .collect()
    }

    /// Cached results of one active calculation
    pub fn virtual_column(&self, column: &str) -> Option<&ColumnValues> {
        if self.is_active(column) {
            self.results.get(column)
        } else {
            None
        }
    }

    pub fn calculation(&self, column: &str) -> Option<&CalculationDefinition> {
        self.calculations.get(column)
    }

    /// Definitions in insertion order
    pub fn calculations(&self) -> impl Iterator<Item = &CalculationDefinition> {
        self.calculations.values()
    }

    /// Names the calculation producing `column` reads
    pub fn dependencies(&self, column: &str) -> Option<&BTreeSet<String>> {
        self.graph.dependencies(column)
    }

    /// Calculations that read `column`, directly or transitively
    pub fn dependents(&self, column: &str) -> BTreeSet<String> {
        self.graph.transitive_dependents(column)
    }

    pub fn is_cached(&self, column: &str) -> bool {
        self.results.contains_key(column)
    }

    /// Source columns followed by active calculated columns
    pub fn column_names(&self) -> Vec<String> {
        let mut names = self.source.column_names();
        names.extend(
            self.calculations
                .iter()
                .filter(|(_, def)| def.is_active)
                .map(|(name, _)| name.clone()),
        );
        names
    }

    pub fn row_count(&self) -> usize {
        self.source.rows().len()
    }
}

/// Make a computed column readable by later calculations. Failed rows read
/// as null.
fn publish(rows: &mut [Row], column: &str, values: &ColumnValues) {
    for row in rows.iter_mut() {
        let value = values.get(&row.id).cloned().flatten().unwrap_or(Value::Null);
        row.fields.insert(column.to_string(), value);
    }
}

fn evaluate_column(
    expression: &Expression,
    rows: &[Row],
    functions: &FunctionRegistry,
) -> (ColumnValues, Vec<RowFailure>) {
    let mut values = ColumnValues::new();
    let mut failures = Vec::new();
    let empty = Fields::new();
    let ctx = EvalContext::new(&empty, rows).with_functions(functions);

    if expression.is_whole_dataset() {
        // Evaluated once over the frozen snapshot, then projected per row
        match evaluate(expression, &ctx) {
            Ok(evaluation) => {
                for row in rows {
                    values.insert(row.id, Some(project(expression, &evaluation, row)));
                }
            }
            Err(error) => {
                for row in rows {
                    values.insert(row.id, None);
                    failures.push(RowFailure {
                        row_id: row.id,
                        error: error.clone(),
                    });
                }
            }
        }
        return (values, failures);
    }

    for row in rows {
        match eval_scalar(expression, &ctx.for_row(&row.fields)) {
            Ok(value) => {
                values.insert(row.id, Some(value));
            }
            Err(error) => {
                values.insert(row.id, None);
                failures.push(RowFailure {
                    row_id: row.id,
                    error,
                });
            }
        }
    }
    (values, failures)
}

fn project(expression: &Expression, evaluation: &Evaluation, row: &Row) -> Value {
    match evaluation {
        Evaluation::Scalar(value) => value.clone(),
        Evaluation::ByRow(by_row) => by_row.get(&row.id).cloned().unwrap_or(Value::Null),
        Evaluation::ByGroup(groups) => {
            let group_by: &[String] = match expression.kind() {
                ExprKind::Group { group_by, .. } => group_by,
                _ => &[],
            };
            groups
                .get(&group_key(&row.fields, group_by))
                .cloned()
                .unwrap_or(Value::Null)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Aggregation;
    use crate::dataset::Dataset;

    fn dataset() -> Dataset {
        Dataset::new(vec![
            Row::new(1).with_field("value", 100.0).with_field("region", "east"),
            Row::new(2).with_field("value", 5.0).with_field("region", "west"),
            Row::new(3).with_field("value", 0.0).with_field("region", "east"),
        ])
    }

    fn value(manager: &CalculationManager, column: &str, row: RowId) -> Option<Value> {
        manager.virtual_column(column)?.get(&row).cloned().flatten()
    }

    #[test]
    fn add_executes_and_reports_dependents() {
        let mut m = CalculationManager::new(dataset());
        let report = m.add_formula("Double", "doubleValue", "value * 2").unwrap();
        assert_eq!(report.affected_columns, BTreeSet::from(["doubleValue".to_string()]));
        assert_eq!(report.results_by_column["doubleValue"][&1], Some(Value::Number(200.0)));

        m.add_formula("Ref", "referenceValue", "doubleValue + 100").unwrap();
        assert_eq!(value(&m, "referenceValue", 1), Some(Value::Number(300.0)));
    }

    #[test]
    fn add_picks_up_dangling_readers() {
        let mut m = CalculationManager::new(dataset());
        let report = m.add_formula("Ref", "referenceValue", "doubleValue + 100").unwrap();
        assert_eq!(report.failures["referenceValue"].len(), 3);
        assert!(matches!(
            report.failures["referenceValue"][0].error,
            EvalError::UndefinedVariable(_)
        ));

        let report = m.add_formula("Double", "doubleValue", "value * 2").unwrap();
        assert!(report.affected_columns.contains("referenceValue"));
        assert_eq!(value(&m, "referenceValue", 2), Some(Value::Number(110.0)));
        assert_eq!(
            m.dependents("doubleValue"),
            BTreeSet::from(["referenceValue".to_string()])
        );
    }

    #[test]
    fn duplicate_and_invalid_names_are_rejected() {
        let mut m = CalculationManager::new(dataset());
        m.add_formula("A", "a", "1").unwrap();
        assert_eq!(
            m.add_formula("A2", "a", "2").unwrap_err(),
            CalcolError::Manager(ManagerError::DuplicateColumnName("a".to_string()))
        );
        assert_eq!(
            m.add_formula("V", "value", "2").unwrap_err(),
            CalcolError::Manager(ManagerError::DuplicateColumnName("value".to_string()))
        );
        assert!(matches!(
            m.add_formula("Blank", "  ", "2"),
            Err(CalcolError::Manager(ManagerError::InvalidColumnName(_)))
        ));
        assert_eq!(m.calculations().count(), 1);
    }

    #[test]
    fn parse_errors_block_the_add() {
        let mut m = CalculationManager::new(dataset());
        assert!(matches!(
            m.add_formula("Broken", "broken", "value * (2"),
            Err(CalcolError::Parse(_))
        ));
        assert!(m.calculation("broken").is_none());
    }

    #[test]
    fn cycles_are_rejected_without_state_change() {
        let mut m = CalculationManager::new(dataset());
        m.add_formula("A", "a", "value + 1").unwrap();
        m.add_formula("B", "b", "a + 1").unwrap();

        let err = m
            .update_calculation("a", CalculationPatch::new().expression(parse("b * 2").unwrap()))
            .unwrap_err();
        assert!(matches!(err, ManagerError::Cycle(_)));
        assert_eq!(m.calculation("a").unwrap().expression, parse("value + 1").unwrap());
        assert!(m.is_cached("a"));

        let err = m.add_formula("Self", "selfRef", "selfRef + 1").unwrap_err();
        assert!(matches!(err, CalcolError::Manager(ManagerError::Cycle(_))));
    }

    #[test]
    fn update_expression_invalidates_without_executing() {
        let mut m = CalculationManager::new(dataset());
        m.add_formula("A", "a", "value + 1").unwrap();
        m.add_formula("B", "b", "a * 10").unwrap();
        m.add_formula("C", "c", "value").unwrap();

        m.update_calculation("a", CalculationPatch::new().expression(parse("value + 2").unwrap()))
            .unwrap();
        assert!(!m.is_cached("a"));
        assert!(!m.is_cached("b"));
        assert!(m.is_cached("c"));

        let report = m.refresh().unwrap();
        assert_eq!(
            report.affected_columns,
            BTreeSet::from(["a".to_string(), "b".to_string()])
        );
        assert_eq!(value(&m, "b", 2), Some(Value::Number(70.0)));
    }

    #[test]
    fn rename_keeps_caches_and_rewrites_readers() {
        let mut m = CalculationManager::new(dataset());
        m.add_formula("Double", "doubleValue", "value * 2").unwrap();
        m.add_formula("Ref", "referenceValue", "doubleValue + 100").unwrap();

        m.update_calculation("doubleValue", CalculationPatch::new().rename_column("twice"))
            .unwrap();
        assert!(m.calculation("doubleValue").is_none());
        assert_eq!(value(&m, "twice", 1), Some(Value::Number(200.0)));
        assert!(m.is_cached("referenceValue"));
        assert_eq!(
            m.dependencies("referenceValue"),
            Some(&BTreeSet::from(["twice".to_string()]))
        );
        assert_eq!(
            m.calculation("referenceValue").unwrap().expression.to_string(),
            "twice + 100"
        );
        // Insertion order is kept
        let columns: Vec<&str> = m.calculations().map(|c| c.result_column_name.as_str()).collect();
        assert_eq!(columns, ["twice", "referenceValue"]);
    }

    #[test]
    fn rename_to_taken_name_fails() {
        let mut m = CalculationManager::new(dataset());
        m.add_formula("A", "a", "1").unwrap();
        m.add_formula("B", "b", "2").unwrap();
        assert_eq!(
            m.update_calculation("a", CalculationPatch::new().rename_column("b")),
            Err(ManagerError::DuplicateColumnName("b".to_string()))
        );
        assert_eq!(
            m.update_calculation("zzz", CalculationPatch::new().name("x")),
            Err(ManagerError::UnknownCalculation("zzz".to_string()))
        );
    }

    #[test]
    fn remove_leaves_readers_failing() {
        let mut m = CalculationManager::new(dataset());
        m.add_formula("Double", "doubleValue", "value * 2").unwrap();
        m.add_formula("Ref", "referenceValue", "doubleValue + 100").unwrap();

        let removed = m.remove_calculation("doubleValue").unwrap();
        assert_eq!(removed.name, "Double");
        assert!(!m.is_cached("referenceValue"));
        assert_eq!(m.dependencies("referenceValue"), Some(&BTreeSet::new()));

        let report = m.execute_all().unwrap();
        let failures = &report.failures["referenceValue"];
        assert_eq!(failures.len(), 3);
        assert_eq!(
            failures[0].error,
            EvalError::UndefinedVariable("doubleValue".to_string())
        );
        assert_eq!(value(&m, "referenceValue", 1), None);

        assert_eq!(
            m.remove_calculation("doubleValue").unwrap_err(),
            ManagerError::UnknownCalculation("doubleValue".to_string())
        );
    }

    #[test]
    fn failed_rows_are_empty_and_read_as_null() {
        let mut m = CalculationManager::new(dataset());
        let report = m.add_formula("Inverse", "inverse", "1 / value").unwrap();
        assert_eq!(report.failure_count(), 1);
        assert_eq!(report.failures["inverse"][0].row_id, 3);
        assert_eq!(report.results_by_column["inverse"][&3], None);

        m.add_formula("Safe", "safe", "inverse == null ? -1 : inverse").unwrap();
        assert_eq!(value(&m, "safe", 3), Some(Value::Number(-1.0)));
        assert_eq!(value(&m, "safe", 2), Some(Value::Number(0.2)));
    }

    #[test]
    fn inactive_calculations_are_hidden() {
        let mut m = CalculationManager::new(dataset());
        m.add_formula("A", "a", "value + 1").unwrap();
        m.update_calculation("a", CalculationPatch::new().active(false))
            .unwrap();
        m.execute_all().unwrap();
        assert!(m.virtual_columns().is_empty());
        assert!(!m.column_names().contains(&"a".to_string()));

        let hidden = CalculationDefinition::new("b", parse("value").unwrap()).with_active(false);
        let report = m.add_calculation(hidden).unwrap();
        assert!(report.is_empty());
        assert!(m.virtual_column("b").is_none());
    }

    #[test]
    fn group_and_rank_project_per_row() {
        let mut m = CalculationManager::new(dataset());
        m.add_calculation(CalculationDefinition::new(
            "regionTotal",
            Expression::group(["region"], Aggregation::Sum, Some("value")),
        ))
        .unwrap();
        m.add_calculation(CalculationDefinition::new(
            "valueRank",
            Expression::rank(["value"], false, false),
        ))
        .unwrap();
        m.add_formula("Share", "share", "value / regionTotal").unwrap();

        assert_eq!(value(&m, "regionTotal", 1), Some(Value::Number(100.0)));
        assert_eq!(value(&m, "regionTotal", 3), Some(Value::Number(100.0)));
        assert_eq!(value(&m, "regionTotal", 2), Some(Value::Number(5.0)));
        assert_eq!(value(&m, "valueRank", 3), Some(Value::Number(1.0)));
        assert_eq!(value(&m, "valueRank", 1), Some(Value::Number(3.0)));
        assert_eq!(value(&m, "share", 2), Some(Value::Number(1.0)));
    }

    #[test]
    fn set_source_invalidates_everything() {
        let mut m = CalculationManager::new(dataset());
        m.add_formula("A", "a", "value + 1").unwrap();
        m.set_source(Arc::new(Dataset::new(vec![Row::new(7).with_field("value", 1.0)])));
        assert!(!m.is_cached("a"));

        let report = m.refresh().unwrap();
        assert_eq!(report.results_by_column["a"][&7], Some(Value::Number(2.0)));
        assert_eq!(m.row_count(), 1);
    }
}
