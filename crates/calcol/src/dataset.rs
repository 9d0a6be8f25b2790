//! Rows, row sources, and conversion from polars DataFrames

use std::collections::HashSet;
use std::sync::Arc;

use chrono::DateTime;
use indexmap::IndexMap;
use polars::prelude::*;

use crate::value::Value;

/// Stable row identity; calculated-column caches are keyed by it
pub type RowId = u64;

/// Named field values of one row, in column order
pub type Fields = IndexMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub id: RowId,
    pub fields: Fields,
}

impl Row {
    pub fn new(id: RowId) -> Self {
        Self {
            id,
            fields: Fields::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// The live dataset a manager computes against. Implementations may return
/// a different (for example, filtered) row set on each call.
pub trait RowSource: Send + Sync {
    fn rows(&self) -> Arc<[Row]>;
    fn column_names(&self) -> Vec<String>;
}

/// In-memory, read-only row set
#[derive(Debug, Clone)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Arc<[Row]>,
}

impl Dataset {
    /// Build from rows; columns are taken in first-seen order
    pub fn new(rows: Vec<Row>) -> Self {
        let mut columns: IndexMap<String, ()> = IndexMap::new();
        for row in &rows {
            for name in row.fields.keys() {
                if !columns.contains_key(name) {
                    columns.insert(name.clone(), ());
                }
            }
        }
        Self {
            columns: columns.into_keys().collect(),
            rows: rows.into(),
        }
    }

    /// Convert a DataFrame; row ids are row positions
    pub fn from_dataframe(df: &DataFrame) -> PolarsResult<Self> {
        let ids = (0..df.height() as RowId).collect();
        Self::build(df, ids)
    }

    /// Convert a DataFrame, taking row ids from an integer column
    pub fn from_dataframe_with_ids(df: &DataFrame, id_column: &str) -> PolarsResult<Self> {
        let ids = df
            .column(id_column)?
            .as_materialized_series()
            .cast(&DataType::UInt64)?;

        let mut seen = HashSet::with_capacity(df.height());
        let mut row_ids = Vec::with_capacity(df.height());
        for (position, id) in ids.u64()?.into_iter().enumerate() {
            let Some(id) = id else {
                return Err(PolarsError::ComputeError(
                    format!("row {position} has a null id in column '{id_column}'").into(),
                ));
            };
            if !seen.insert(id) {
                return Err(PolarsError::ComputeError(
                    format!("duplicate row id {id} in column '{id_column}'").into(),
                ));
            }
            row_ids.push(id);
        }

        Self::build(df, row_ids)
    }

    fn build(df: &DataFrame, ids: Vec<RowId>) -> PolarsResult<Self> {
        let mut rows: Vec<Row> = ids.into_iter().map(Row::new).collect();
        let mut columns = Vec::with_capacity(df.width());

        for column in df.get_columns() {
            let name = column.name().to_string();
            let values = column_values(column.as_materialized_series())?;
            for (row, value) in rows.iter_mut().zip(values) {
                row.fields.insert(name.clone(), value);
            }
            columns.push(name);
        }

        Ok(Self {
            columns,
            rows: rows.into(),
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl RowSource for Dataset {
    fn rows(&self) -> Arc<[Row]> {
        Arc::clone(&self.rows)
    }

    fn column_names(&self) -> Vec<String> {
        self.columns.clone()
    }
}

/// Convert one series into cell values, one per row
fn column_values(series: &Series) -> PolarsResult<Vec<Value>> {
    let values = match series.dtype() {
        DataType::Boolean => series.bool()?.into_iter().map(Value::from).collect(),
        DataType::String => series
            .str()?
            .into_iter()
            .map(|v| v.map_or(Value::Null, Value::from))
            .collect(),
        DataType::Date | DataType::Datetime(_, _) => series
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?
            .cast(&DataType::Int64)?
            .i64()?
            .into_iter()
            .map(|ms| {
                ms.and_then(DateTime::from_timestamp_millis)
                    .map_or(Value::Null, |dt| Value::Date(dt.naive_utc()))
            })
            .collect(),
        dtype if dtype.is_primitive_numeric() => series
            .cast(&DataType::Float64)?
            .f64()?
            .into_iter()
            .map(Value::from)
            .collect(),
        _ => series
            .cast(&DataType::String)?
            .str()?
            .into_iter()
            .map(|v| v.map_or(Value::Null, Value::from))
            .collect(),
    };
    Ok(values)
}
