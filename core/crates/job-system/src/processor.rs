use std::{fmt, path::Path};

use async_trait::async_trait;

use super::{
	rules::{ImageRule, TextRule},
	signal::{InterruptionKind, LinkedCancellation},
	workbook::RowData,
};

/// Named suspension points inside the processing of a single row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckpointStage {
	BeforeRow,
	BeforeCloudResolve,
	AfterCloudResolve,
	BeforeDownload,
	AfterDownload,
	BeforeImageProcessing,
	AfterImageProcessing,
	BeforeDocumentMutation,
	AfterDocumentMutation,
	BeforePersistState,
}

impl CheckpointStage {
	/// Stages where the sheet checkpoint matches what the document holds, the only places
	/// where a pause takes effect.
	#[must_use]
	pub const fn is_row_boundary(self) -> bool {
		matches!(self, Self::BeforeRow | Self::BeforePersistState)
	}
}

impl fmt::Display for CheckpointStage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(self, f)
	}
}

/// Cooperative hook handed to the [`RowProcessor`].
///
/// Calling [`Checkpoint::checkpoint`] fails with the interruption once the sheet is cancelled,
/// so processors should propagate the error with `?`. Pauses are held back until the row is
/// done, they block on the row boundary stages only.
#[async_trait]
pub trait Checkpoint: Send + Sync {
	async fn checkpoint(&self, stage: CheckpointStage) -> Result<(), InterruptionKind>;

	/// For processors that want to race their own long running futures against cancellation.
	fn cancellation(&self) -> &LinkedCancellation;
}

/// Everything a processor needs to apply one row to the output document.
#[derive(Debug, Clone, Copy)]
pub struct RowContext<'a> {
	pub output_path: &'a Path,
	pub template_path: &'a Path,
	pub text_rules: &'a [TextRule],
	pub image_rules: &'a [ImageRule],
	/// 1-based row number inside the worksheet
	pub row_number: usize,
	pub row: &'a RowData,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowOutcome {
	pub text_replacements: usize,
	pub image_replacements: usize,
	pub image_errors: usize,
	/// Row level problems that didn't stop the row, like an unreachable image
	pub errors: Vec<String>,
}

impl RowOutcome {
	#[must_use]
	pub fn has_errors(&self) -> bool {
		self.image_errors > 0 || !self.errors.is_empty()
	}
}

#[derive(thiserror::Error, Debug)]
pub enum RowProcessError {
	#[error("row processing interrupted: {0}")]
	Interrupted(#[from] InterruptionKind),
	#[error("{0}")]
	Fatal(String),
}

impl RowProcessError {
	pub fn fatal(e: impl fmt::Display) -> Self {
		Self::Fatal(e.to_string())
	}
}

/// Applies a row of data to the generated document.
#[async_trait]
pub trait RowProcessor: Send + Sync + 'static {
	async fn process(
		&self,
		ctx: RowContext<'_>,
		checkpoint: &dyn Checkpoint,
	) -> Result<RowOutcome, RowProcessError>;
}
