use std::sync::Arc;

use async_trait::async_trait;
use sg_task_system::{CancellationToken, TaskId, TaskRunner};
use sg_utils::error::FileIOError;
use serde_json::json;
use tokio::fs;
use tracing::{debug, error, info, instrument, trace, warn};

use super::{
	active::ActiveJobCollection,
	context::JobContext,
	group::JobGroup,
	processor::{Checkpoint, CheckpointStage, RowContext, RowProcessError, RowProcessor},
	sheet::JobSheet,
	signal::{InterruptionKind, LinkedCancellation},
	status::SheetStatus,
	store::{JobLogEntry, LogLevel},
	SheetId,
};

const OUTPUT_MISSING_ON_RESUME: &str = "Output file missing during resume.";

/// Runs one sheet from its checkpoint to the last row, it is what the task system workers
/// call for every dispatched sheet id.
pub(crate) struct JobExecutor {
	active: Arc<ActiveJobCollection>,
	processor: Arc<dyn RowProcessor>,
	ctx: JobContext,
}

#[async_trait]
impl TaskRunner for JobExecutor {
	async fn run(&self, task_id: TaskId, interrupter: CancellationToken) {
		self.execute(task_id, interrupter).await;
	}
}

/// Releases the sheet claim whatever way the execution ends.
struct ExecutionGuard<'a>(&'a JobSheet);

impl Drop for ExecutionGuard<'_> {
	fn drop(&mut self) {
		self.0.end_execution();
	}
}

impl JobExecutor {
	pub(crate) fn new(
		active: Arc<ActiveJobCollection>,
		processor: Arc<dyn RowProcessor>,
		ctx: JobContext,
	) -> Self {
		Self {
			active,
			processor,
			ctx,
		}
	}

	#[instrument(skip(self, interrupter))]
	async fn execute(&self, sheet_id: SheetId, interrupter: CancellationToken) {
		let Some(sheet) = self.active.get_sheet(sheet_id) else {
			warn!("Dispatched sheet job is no longer active, skipping");
			return;
		};

		let Some(group) = self.active.get_group(sheet.group_id()) else {
			warn!(group_id = %sheet.group_id(), "Group of dispatched sheet job is gone, skipping");
			return;
		};

		if !sheet.try_begin_execution() {
			warn!("Sheet job is already being executed, skipping");
			return;
		}
		let _guard = ExecutionGuard(&sheet);

		if sheet.status().is_terminal() {
			debug!(status = ?sheet.status(), "Sheet job already finished, skipping");
			return;
		}

		let checkpoint = SheetCheckpoint {
			sheet: &sheet,
			group: &group,
			ctx: &self.ctx,
			cancellation: sheet.linked_cancellation(interrupter),
		};

		if !sheet.set_status(SheetStatus::Running, None) {
			debug!(status = ?sheet.status(), "Sheet job can't start from its current status");
			return;
		}
		self.ctx.sheet_status_changed(&sheet).await;
		self.ctx.refresh_group(&group).await;

		info!(
			worksheet = sheet.worksheet(),
			next_row = sheet.next_row(),
			total_rows = sheet.total_rows(),
			"Executing sheet job"
		);

		match self.run_rows(&sheet, &group, &checkpoint).await {
			Ok(()) => self.complete(&sheet, &group).await,
			Err(RowProcessError::Fatal(message)) => self.fail(&sheet, &group, message).await,
			Err(RowProcessError::Interrupted(kind)) => {
				self.interrupted(&sheet, &group, kind).await;
			}
		}
	}

	async fn run_rows(
		&self,
		sheet: &JobSheet,
		group: &JobGroup,
		checkpoint: &SheetCheckpoint<'_>,
	) -> Result<(), RowProcessError> {
		let workbook = group.workbook().ok_or_else(|| {
			RowProcessError::Fatal(format!(
				"Workbook is not loaded: '{}'",
				group.workbook_path().display()
			))
		})?;

		prepare_output(sheet, group).await?;

		for row_number in sheet.next_row()..=sheet.total_rows() {
			checkpoint.checkpoint(CheckpointStage::BeforeRow).await?;

			let row = workbook
				.get_row(sheet.worksheet(), row_number)
				.map_err(RowProcessError::fatal)?;

			let outcome = self
				.processor
				.process(
					RowContext {
						output_path: sheet.output_path(),
						template_path: group.template_path(),
						text_rules: group.text_rules(),
						image_rules: group.image_rules(),
						row_number,
						row: &row,
					},
					checkpoint,
				)
				.await?;

			trace!(
				row_number,
				text_replacements = outcome.text_replacements,
				image_replacements = outcome.image_replacements,
				"Row processed"
			);

			if outcome.has_errors() {
				sheet.register_row_error();

				warn!(row_number, errors = ?outcome.errors, "Row completed with errors;");

				self.ctx
					.log(
						sheet,
						JobLogEntry::new(
							LogLevel::Warning,
							format!(
								"Row {row_number} completed with {} image errors",
								outcome.image_errors
							),
						)
						.with_data(json!({
							"row": row_number,
							"imageErrors": outcome.image_errors,
							"errors": outcome.errors,
						})),
					)
					.await;
			}

			sheet.update_progress(row_number);

			checkpoint
				.checkpoint(CheckpointStage::BeforePersistState)
				.await?;

			self.ctx.persist_sheet(sheet).await;
			self.ctx.sheet_progressed(sheet, group);
		}

		Ok(())
	}

	async fn complete(&self, sheet: &JobSheet, group: &JobGroup) {
		if sheet.set_status(SheetStatus::Completed, None) {
			self.ctx.sheet_status_changed(sheet).await;
			info!(error_count = sheet.error_count(), "Sheet job completed");
		}

		self.ctx.refresh_group(group).await;
		self.ctx.sheet_progressed(sheet, group);
		self.active.notify_sheet_completed(sheet.id()).await;
	}

	async fn fail(&self, sheet: &JobSheet, group: &JobGroup, message: String) {
		error!(%message, "Sheet job failed;");

		if sheet.set_status(SheetStatus::Failed, Some(message.clone())) {
			self.ctx.notifier.notify_job_error(sheet.id(), &message);
			self.ctx.sheet_status_changed(sheet).await;
			self.ctx
				.log(sheet, JobLogEntry::new(LogLevel::Error, message))
				.await;
		}

		self.ctx.refresh_group(group).await;
		self.active.notify_sheet_completed(sheet.id()).await;
	}

	async fn interrupted(&self, sheet: &JobSheet, group: &JobGroup, kind: InterruptionKind) {
		// A cancel call already marked the sheet, anything else leaves it resumable
		if sheet.status() != SheetStatus::Cancelled
			&& sheet.set_status(SheetStatus::Paused, None)
		{
			self.ctx.sheet_status_changed(sheet).await;
		} else {
			self.ctx.persist_sheet(sheet).await;
		}

		info!(%kind, status = ?sheet.status(), current_row = sheet.current_row(), "Sheet job interrupted");

		if self.ctx.refresh_group(group).await.is_terminal() {
			self.active.notify_sheet_completed(sheet.id()).await;
		}
	}
}

/// Copies the template over the output on a fresh start, a resumed sheet must find the
/// document it was writing.
async fn prepare_output(sheet: &JobSheet, group: &JobGroup) -> Result<(), RowProcessError> {
	let output_path = sheet.output_path();

	if sheet.current_row() == 0 {
		if let Some(parent) = output_path.parent() {
			fs::create_dir_all(parent).await.map_err(|e| {
				RowProcessError::fatal(FileIOError::from((
					parent,
					e,
					"Failed to create output folder",
				)))
			})?;
		}

		fs::copy(group.template_path(), output_path)
			.await
			.map_err(|e| {
				RowProcessError::fatal(FileIOError::from((
					group.template_path(),
					e,
					"Failed to copy template to output",
				)))
			})?;

		debug!(output_path = %output_path.display(), "Template copied to output");
	} else if !fs::try_exists(output_path).await.unwrap_or(false) {
		return Err(RowProcessError::Fatal(OUTPUT_MISSING_ON_RESUME.to_string()));
	}

	Ok(())
}

struct SheetCheckpoint<'a> {
	sheet: &'a JobSheet,
	group: &'a JobGroup,
	ctx: &'a JobContext,
	cancellation: LinkedCancellation,
}

#[async_trait]
impl Checkpoint for SheetCheckpoint<'_> {
	async fn checkpoint(&self, stage: CheckpointStage) -> Result<(), InterruptionKind> {
		if let Some(kind) = self.cancellation.interruption() {
			return Err(kind);
		}

		// Pausing halfway through a row would leave the document ahead of the checkpoint
		if !stage.is_row_boundary() || !self.sheet.is_paused() {
			return Ok(());
		}

		let paused_here = self.sheet.status() == SheetStatus::Running
			&& self.sheet.set_status(SheetStatus::Paused, None);
		if paused_here {
			info!(sheet_id = %self.sheet.id(), %stage, "Sheet job paused");
			self.ctx.sheet_status_changed(self.sheet).await;
			self.ctx.refresh_group(self.group).await;
		}

		self.sheet
			.pause_signal()
			.wait_if_paused(&self.cancellation)
			.await?;

		if let Some(kind) = self.cancellation.interruption() {
			return Err(kind);
		}

		if self.sheet.status() == SheetStatus::Paused
			&& self.sheet.set_status(SheetStatus::Running, None)
		{
			info!(sheet_id = %self.sheet.id(), %stage, "Sheet job resumed");
			self.ctx.sheet_status_changed(self.sheet).await;
			self.ctx.refresh_group(self.group).await;
		}

		Ok(())
	}

	fn cancellation(&self) -> &LinkedCancellation {
		&self.cancellation
	}
}
