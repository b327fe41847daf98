use std::sync::Arc;

use dashmap::DashMap;
use tracing::{error, info, instrument};

use super::{
	context::{remove_output, JobContext},
	group::JobGroup,
	sheet::JobSheet,
	status::GroupStatus,
	GroupId, SheetId,
};

/// Read mostly archive of groups that reached a terminal status.
pub struct CompletedJobCollection {
	groups: DashMap<GroupId, Arc<JobGroup>>,
	sheets: DashMap<SheetId, Arc<JobSheet>>,
	ctx: JobContext,
}

impl CompletedJobCollection {
	pub(crate) fn new(ctx: JobContext) -> Self {
		Self {
			groups: DashMap::new(),
			sheets: DashMap::new(),
			ctx,
		}
	}

	/// Takes ownership of a finished group and its sheets.
	pub(crate) fn add_group(&self, group: Arc<JobGroup>) {
		group.release_workbook();

		for sheet in group.sheets() {
			self.sheets.insert(sheet.id(), sheet);
		}

		info!(group_id = %group.id(), status = ?group.status(), "Group archived as completed");

		self.groups.insert(group.id(), group);
	}

	#[must_use]
	pub fn get_group(&self, group_id: GroupId) -> Option<Arc<JobGroup>> {
		self.groups.get(&group_id).map(|group| Arc::clone(group.value()))
	}

	#[must_use]
	pub fn get_sheet(&self, sheet_id: SheetId) -> Option<Arc<JobSheet>> {
		self.sheets.get(&sheet_id).map(|sheet| Arc::clone(sheet.value()))
	}

	#[must_use]
	pub fn groups(&self) -> Vec<Arc<JobGroup>> {
		self.groups
			.iter()
			.map(|group| Arc::clone(group.value()))
			.collect()
	}

	fn groups_with(&self, status: GroupStatus) -> Vec<Arc<JobGroup>> {
		self.groups
			.iter()
			.filter(|group| group.status() == status)
			.map(|group| Arc::clone(group.value()))
			.collect()
	}

	#[must_use]
	pub fn successful_groups(&self) -> Vec<Arc<JobGroup>> {
		self.groups_with(GroupStatus::Completed)
	}

	#[must_use]
	pub fn failed_groups(&self) -> Vec<Arc<JobGroup>> {
		self.groups_with(GroupStatus::Failed)
	}

	#[must_use]
	pub fn cancelled_groups(&self) -> Vec<Arc<JobGroup>> {
		self.groups_with(GroupStatus::Cancelled)
	}

	#[must_use]
	pub fn contains_group(&self, group_id: GroupId) -> bool {
		self.groups.contains_key(&group_id)
	}

	#[must_use]
	pub fn contains_sheet(&self, sheet_id: SheetId) -> bool {
		self.sheets.contains_key(&sheet_id)
	}

	#[must_use]
	pub fn group_count(&self) -> usize {
		self.groups.len()
	}

	#[must_use]
	pub fn sheet_count(&self) -> usize {
		self.sheets.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.groups.is_empty()
	}

	/// Purges a group, its sheets, their output files and their persisted state.
	///
	/// Returns `false` if the group isn't here.
	#[instrument(skip(self))]
	pub async fn remove_group(&self, group_id: GroupId) -> bool {
		let Some((_, group)) = self.groups.remove(&group_id) else {
			return false;
		};

		for sheet in group.sheets() {
			self.sheets.remove(&sheet.id());
			remove_output(sheet.output_path()).await;
		}

		if let Err(e) = self.ctx.store.remove_group(group_id).await {
			error!(?e, "Failed to remove persisted group state;");
		}

		info!("Removed completed group");

		true
	}

	/// Purges a single sheet. Removing the last sheet of a group removes the group too,
	/// otherwise the group status is recomputed from the remaining sheets.
	#[instrument(skip(self))]
	pub async fn remove_sheet(&self, sheet_id: SheetId) -> bool {
		let Some((_, sheet)) = self.sheets.remove(&sheet_id) else {
			return false;
		};

		remove_output(sheet.output_path()).await;

		if let Err(e) = self.ctx.store.remove_sheet(sheet_id).await {
			error!(?e, "Failed to remove persisted sheet state;");
		}

		if let Some(group) = self.get_group(sheet.group_id()) {
			group.remove_sheet(sheet_id);

			if group.sheets_count() == 0 {
				self.groups.remove(&group.id());
				if let Err(e) = self.ctx.store.remove_group(group.id()).await {
					error!(group_id = %group.id(), ?e, "Failed to remove persisted group state;");
				}
				info!(group_id = %group.id(), "Removed completed group after deleting its last sheet");
			} else {
				self.ctx.refresh_group(&group).await;
			}
		}

		info!("Removed completed sheet");

		true
	}

	/// Purges every completed group, returning how many were removed.
	pub async fn clear_all(&self) -> usize {
		let group_ids = self
			.groups
			.iter()
			.map(|group| *group.key())
			.collect::<Vec<_>>();

		let mut removed = 0;
		for group_id in group_ids {
			if self.remove_group(group_id).await {
				removed += 1;
			}
		}

		removed
	}
}
