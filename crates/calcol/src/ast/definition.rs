//! Calculation definitions

use std::sync::atomic::{AtomicU64, Ordering};

use super::Expression;

static NEXT_CALCULATION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CalculationId(u64);

impl CalculationId {
    fn next() -> Self {
        CalculationId(NEXT_CALCULATION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// A formula bound to the virtual column it produces
#[derive(Debug, Clone, PartialEq)]
pub struct CalculationDefinition {
    pub id: CalculationId,
    /// Display name shown to users
    pub name: String,
    /// Column the results are published under; unique within a manager
    pub result_column_name: String,
    pub expression: Expression,
    pub is_active: bool,
}

impl CalculationDefinition {
    /// Active definition whose display name is the result column name
    pub fn new(result_column_name: impl Into<String>, expression: Expression) -> Self {
        let result_column_name = result_column_name.into();
        Self {
            id: CalculationId::next(),
            name: result_column_name.clone(),
            result_column_name,
            expression,
            is_active: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }
}

/// Field updates applied by `CalculationManager::update_calculation`.
/// `None` leaves the field unchanged.
#[derive(Debug, Clone, Default)]
pub struct CalculationPatch {
    pub name: Option<String>,
    pub result_column_name: Option<String>,
    pub expression: Option<Expression>,
    pub is_active: Option<bool>,
}

impl CalculationPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn rename_column(mut self, column: impl Into<String>) -> Self {
        self.result_column_name = Some(column.into());
        self
    }

    pub fn expression(mut self, expression: Expression) -> Self {
        self.expression = Some(expression);
        self
    }

    pub fn active(mut self, is_active: bool) -> Self {
        self.is_active = Some(is_active);
        self
    }
}
