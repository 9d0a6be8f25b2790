//! Data file loading

use std::path::Path;
use std::sync::Arc;

use calcol::Dataset;
use log::info;
use polars::prelude::*;

/// Load a DataFrame from a file path (sync, collects immediately)
pub fn load_file_sync(path: &Path) -> Result<DataFrame, PolarsError> {
    let pl_path = PlPath::Local(Arc::from(path));
    let lf = match path.extension().and_then(|e| e.to_str()) {
        Some("parquet") => LazyFrame::scan_parquet(pl_path, Default::default())?,
        Some("csv") => LazyCsvReader::new(pl_path).finish()?,
        Some("ipc" | "arrow") => LazyFrame::scan_ipc(pl_path, Default::default(), Default::default())?,
        Some(ext) => return Err(PolarsError::ComputeError(
            format!("unsupported file extension: {ext}").into(),
        )),
        None => return Err(PolarsError::ComputeError(
            "file has no extension".to_string().into(),
        )),
    };
    lf.collect()
}

/// Load a file into a row set. Row ids come from `id_column` when given,
/// otherwise from row positions.
pub fn load_dataset_sync(path: &Path, id_column: Option<&str>) -> Result<Dataset, PolarsError> {
    let df = load_file_sync(path)?;
    let dataset = match id_column {
        Some(column) => Dataset::from_dataframe_with_ids(&df, column)?,
        None => Dataset::from_dataframe(&df)?,
    };
    info!(
        "Loaded {} ({} rows, {} columns)",
        path.display(),
        df.height(),
        df.width()
    );
    Ok(dataset)
}

/// Load a row set (async, runs on blocking thread pool)
pub async fn load_dataset(path: &Path, id_column: Option<&str>) -> Result<Dataset, PolarsError> {
    let path = path.to_path_buf();
    let id_column = id_column.map(str::to_string);
    tokio::task::spawn_blocking(move || load_dataset_sync(&path, id_column.as_deref()))
        .await
        .map_err(|e| PolarsError::ComputeError(format!("blocking task failed: {e}").into()))?
}

/// Check if a file has a supported extension
pub fn is_supported_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("parquet" | "csv" | "ipc" | "arrow")
    )
}
