use std::{collections::HashMap, fmt, path::Path, sync::Arc};

/// Column header to cell value for a single row.
pub type RowData = HashMap<String, String>;

#[derive(thiserror::Error, Debug)]
pub enum WorkbookError {
	#[error("failed to open workbook: <path='{}'>: {reason}", .path.display())]
	Open { path: Box<Path>, reason: String },
	#[error("worksheet not found in workbook: <name='{0}'>")]
	WorksheetNotFound(String),
	#[error("row out of range: <worksheet='{worksheet}', row={row}, total_rows={total_rows}>")]
	RowOutOfRange {
		worksheet: String,
		row: usize,
		total_rows: usize,
	},
	#[error("failed to read workbook: {0}")]
	Read(String),
}

/// An opened spreadsheet.
///
/// Rows are addressed with 1-based indexes over the data rows of a worksheet, so the valid
/// range for `get_row` is `1..=row_count`.
pub trait Workbook: fmt::Debug + Send + Sync + 'static {
	fn path(&self) -> &Path;

	fn worksheet_names(&self) -> Vec<String>;

	fn row_count(&self, worksheet: &str) -> Result<usize, WorkbookError>;

	fn get_row(&self, worksheet: &str, row: usize) -> Result<RowData, WorkbookError>;
}

/// Opens workbooks from disk, used both when creating groups and when restoring them after a
/// restart.
pub trait WorkbookReader: Send + Sync + 'static {
	fn open(&self, path: &Path) -> Result<Arc<dyn Workbook>, WorkbookError>;
}
