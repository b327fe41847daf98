use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use super::{
	active::ActiveJobCollection,
	completed::CompletedJobCollection,
	context::JobContext,
	error::JobSystemError,
	group::JobGroup,
	sheet::JobSheet,
	status::SheetStatus,
	store::GroupState,
	workbook::WorkbookReader,
	GroupId, SheetId,
};

/// Read facade over both collections, plus the startup recovery from the state store.
pub struct JobManager {
	active: Arc<ActiveJobCollection>,
	completed: Arc<CompletedJobCollection>,
	ctx: JobContext,
	workbooks: Arc<dyn WorkbookReader>,
}

impl JobManager {
	pub(crate) fn new(
		active: Arc<ActiveJobCollection>,
		completed: Arc<CompletedJobCollection>,
		ctx: JobContext,
		workbooks: Arc<dyn WorkbookReader>,
	) -> Self {
		Self {
			active,
			completed,
			ctx,
			workbooks,
		}
	}

	#[must_use]
	pub fn active(&self) -> &ActiveJobCollection {
		&self.active
	}

	#[must_use]
	pub fn completed(&self) -> &CompletedJobCollection {
		&self.completed
	}

	#[must_use]
	pub fn get_group(&self, group_id: GroupId) -> Option<Arc<JobGroup>> {
		self.active
			.get_group(group_id)
			.or_else(|| self.completed.get_group(group_id))
	}

	#[must_use]
	pub fn get_sheet(&self, sheet_id: SheetId) -> Option<Arc<JobSheet>> {
		self.active
			.get_sheet(sheet_id)
			.or_else(|| self.completed.get_sheet(sheet_id))
	}

	/// Active groups first, then the completed ones.
	#[must_use]
	pub fn get_all_groups(&self) -> Vec<Arc<JobGroup>> {
		let mut groups = self.active.groups();
		groups.extend(self.completed.groups());
		groups
	}

	/// Rebuilds both collections from the state store, re-dispatching every sheet that still
	/// has to run. Must happen before the workers start.
	#[instrument(skip(self), err)]
	pub(crate) async fn restore(&self) -> Result<(), JobSystemError> {
		let states = self.ctx.store.get_all_groups().await?;
		let (mut active_count, mut completed_count) = (0, 0);

		for state in states {
			let sheets = self
				.ctx
				.store
				.get_sheets_by_group(state.id)
				.await?
				.iter()
				.map(|sheet_state| Arc::new(JobSheet::restore(sheet_state)))
				.collect::<Vec<_>>();

			if sheets.is_empty() {
				warn!(group_id = %state.id, "Found persisted group without sheets, discarding it");
				if let Err(e) = self.ctx.store.remove_group(state.id).await {
					error!(group_id = %state.id, ?e, "Failed to remove empty persisted group;");
				}
				continue;
			}

			let finished = sheets.iter().all(|sheet| sheet.status().is_terminal());
			if state.status.is_terminal() && finished {
				self.completed
					.add_group(Arc::new(JobGroup::restore(&state, None, sheets)));
				completed_count += 1;
				continue;
			}

			if self.restore_active(&state, sheets).await? {
				active_count += 1;
			} else {
				completed_count += 1;
			}
		}

		info!(active_count, completed_count, "Restored job groups from store");

		Ok(())
	}

	/// Returns `false` if the group turned out to be done and went to the completed collection.
	async fn restore_active(
		&self,
		state: &GroupState,
		sheets: Vec<Arc<JobSheet>>,
	) -> Result<bool, JobSystemError> {
		let workbook = match self.workbooks.open(&state.workbook_path) {
			Ok(workbook) => Some(workbook),
			Err(e) => {
				error!(
					group_id = %state.id,
					workbook_path = %state.workbook_path.display(),
					?e,
					"Failed to reopen workbook of restored group;"
				);

				let message = e.to_string();
				for sheet in sheets.iter().filter(|sheet| !sheet.status().is_terminal()) {
					sheet.set_status(SheetStatus::Failed, Some(message.clone()));
				}

				None
			}
		};

		let group = Arc::new(JobGroup::restore(state, workbook, sheets));

		// Persist the normalized statuses, a crash during a run left sheets marked as running
		for sheet in group.sheets() {
			self.ctx.persist_sheet(&sheet).await;
		}

		if self.ctx.refresh_group(&group).await.is_terminal() && group.is_finished() {
			self.completed.add_group(group);
			return Ok(false);
		}

		self.active.restore_group(Arc::clone(&group));

		for sheet in group.sheets() {
			if sheet.status() == SheetStatus::Pending {
				self.active.dispatch(&sheet).await?;
			} else {
				debug!(
					sheet_id = %sheet.id(),
					status = ?sheet.status(),
					"Restored sheet job waits for a resume"
				);
			}
		}

		Ok(true)
	}
}
