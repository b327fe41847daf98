use std::{io::ErrorKind, path::Path, sync::Arc};

use sg_utils::error::{report_error, FileIOError};
use tokio::fs;
use tracing::{error, trace};

use super::{
	config::JobSystemConfig,
	group::JobGroup,
	notifier::JobNotifier,
	sheet::JobSheet,
	status::GroupStatus,
	store::{JobLogEntry, JobStateStore},
};

/// Persistence and notification plumbing shared by the collections and the executor.
///
/// Nothing in here fails: store errors are logged and swallowed, notifications are fire and
/// forget, so bookkeeping problems never take a job down.
#[derive(Clone)]
pub(crate) struct JobContext {
	pub(crate) store: Arc<dyn JobStateStore>,
	pub(crate) notifier: JobNotifier,
	pub(crate) config: Arc<JobSystemConfig>,
}

impl JobContext {
	pub(crate) async fn persist_sheet(&self, sheet: &JobSheet) {
		// Snapshot taken under the lock so the last write always carries the latest state
		let _guard = sheet.persist_lock.lock().await;

		if sheet.is_removed() {
			trace!(sheet_id = %sheet.id(), "Not persisting removed sheet");
			return;
		}

		if let Err(e) = self.store.save_sheet(&sheet.to_state()).await {
			error!(sheet_id = %sheet.id(), ?e, "Failed to persist sheet state;");
		}
	}

	pub(crate) async fn persist_group(&self, group: &JobGroup) {
		let _guard = group.persist_lock.lock().await;

		if group.is_removed() {
			trace!(group_id = %group.id(), "Not persisting removed group");
			return;
		}

		if let Err(e) = self.store.save_group(&group.to_state()).await {
			error!(group_id = %group.id(), ?e, "Failed to persist group state;");
		}
	}

	/// Persists the sheet and tells subscribers about its current status.
	pub(crate) async fn sheet_status_changed(&self, sheet: &JobSheet) {
		self.persist_sheet(sheet).await;

		let snapshot = sheet.snapshot();
		self.notifier
			.notify_job_status_changed(sheet.id(), snapshot.status, snapshot.error_message);
	}

	pub(crate) fn sheet_progressed(&self, sheet: &JobSheet, group: &JobGroup) {
		let snapshot = sheet.snapshot();
		self.notifier.notify_job_progress(
			sheet.id(),
			snapshot.current_row,
			snapshot.total_rows,
			snapshot.progress,
			snapshot.error_count,
		);
		self.notifier
			.notify_group_progress(group.id(), group.progress(), group.error_count());
	}

	/// Recomputes the group status from its sheets, persisting it and notifying on change.
	pub(crate) async fn refresh_group(&self, group: &JobGroup) -> GroupStatus {
		let (status, changed) = group.update_status();

		self.persist_group(group).await;

		if changed {
			self.notifier.notify_group_status_changed(group.id(), status);
		}

		status
	}

	/// Sends a log entry to subscribers and appends it to the sheet's log trail.
	pub(crate) async fn log(&self, sheet: &JobSheet, entry: JobLogEntry) {
		if !sheet.is_removed() {
			report_error(&self.store.append_job_log(sheet.id(), &entry).await);
		}
		self.notifier.notify_log(sheet.id(), entry);
	}

	/// Deletes the persisted sheet for good: it is marked removed first and any save already
	/// in flight is waited for, so no later write can bring it back.
	pub(crate) async fn forget_sheet(&self, sheet: &JobSheet) {
		sheet.mark_removed();

		let _guard = sheet.persist_lock.lock().await;

		if let Err(e) = self.store.remove_sheet(sheet.id()).await {
			error!(sheet_id = %sheet.id(), ?e, "Failed to remove persisted sheet state;");
		}
	}

	/// Same as [`JobContext::forget_sheet`] for a whole group and its sheets.
	pub(crate) async fn forget_group(&self, group: &JobGroup) {
		group.mark_removed();

		for sheet in group.sheets() {
			sheet.mark_removed();
			drop(sheet.persist_lock.lock().await);
		}

		let _guard = group.persist_lock.lock().await;

		if let Err(e) = self.store.remove_group(group.id()).await {
			error!(group_id = %group.id(), ?e, "Failed to remove persisted group state;");
		}
	}
}

/// Best effort removal of a generated document.
pub(crate) async fn remove_output(path: &Path) {
	match fs::remove_file(path).await {
		Ok(()) => trace!(path = %path.display(), "Removed output file"),
		Err(e) if e.kind() == ErrorKind::NotFound => {}
		Err(e) => error!(
			e = %FileIOError::from((path, e, "Failed to remove output file")),
			"Failed to clean up output;"
		),
	}
}
