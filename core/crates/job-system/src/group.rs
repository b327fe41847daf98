use std::{
	fmt,
	path::{Path, PathBuf},
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use super::{
	rules::{ImageRule, TextRule},
	sheet::{percentage, JobSheet},
	status::{GroupStatus, SheetStatus},
	store::GroupState,
	workbook::Workbook,
	GroupId, SheetId,
};

/// A batch of sheet jobs sharing one workbook, one template and one set of rules.
///
/// The group owns its sheets exclusively and its status is only ever derived from them through
/// [`JobGroup::update_status`].
pub struct JobGroup {
	id: GroupId,
	workbook_path: PathBuf,
	workbook: RwLock<Option<Arc<dyn Workbook>>>,
	template_path: PathBuf,
	output_folder: PathBuf,
	text_rules: Vec<TextRule>,
	image_rules: Vec<ImageRule>,
	created_at: DateTime<Utc>,
	status: Mutex<GroupStatus>,
	sheets: DashMap<SheetId, Arc<JobSheet>>,
	removed: AtomicBool,
	pub(crate) persist_lock: tokio::sync::Mutex<()>,
}

impl fmt::Debug for JobGroup {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("JobGroup")
			.field("id", &self.id)
			.field("workbook_path", &self.workbook_path)
			.field("template_path", &self.template_path)
			.field("output_folder", &self.output_folder)
			.field("status", &*self.status.lock())
			.field("sheets_count", &self.sheets.len())
			.finish_non_exhaustive()
	}
}

impl JobGroup {
	#[must_use]
	pub fn new(
		workbook: Arc<dyn Workbook>,
		template_path: impl Into<PathBuf>,
		output_folder: impl Into<PathBuf>,
		text_rules: Vec<TextRule>,
		image_rules: Vec<ImageRule>,
	) -> Self {
		Self {
			id: Uuid::new_v4(),
			workbook_path: workbook.path().to_path_buf(),
			workbook: RwLock::new(Some(workbook)),
			template_path: template_path.into(),
			output_folder: output_folder.into(),
			text_rules,
			image_rules,
			created_at: Utc::now(),
			status: Mutex::new(GroupStatus::Pending),
			sheets: DashMap::new(),
			removed: AtomicBool::new(false),
			persist_lock: tokio::sync::Mutex::new(()),
		}
	}

	/// Rebuilds a group from its persisted state, the workbook is only needed if the group
	/// still has rows to process.
	#[must_use]
	pub fn restore(
		state: &GroupState,
		workbook: Option<Arc<dyn Workbook>>,
		sheets: impl IntoIterator<Item = Arc<JobSheet>>,
	) -> Self {
		let group = Self {
			id: state.id,
			workbook_path: state.workbook_path.clone(),
			workbook: RwLock::new(workbook),
			template_path: state.template_path.clone(),
			output_folder: state.output_folder.clone(),
			text_rules: state.text_rules.clone(),
			image_rules: state.image_rules.clone(),
			created_at: state.created_at,
			status: Mutex::new(state.status),
			sheets: DashMap::new(),
			removed: AtomicBool::new(false),
			persist_lock: tokio::sync::Mutex::new(()),
		};

		for sheet in sheets {
			group.add_sheet(sheet);
		}

		group
	}

	#[must_use]
	pub const fn id(&self) -> GroupId {
		self.id
	}

	#[must_use]
	pub fn workbook_path(&self) -> &Path {
		&self.workbook_path
	}

	#[must_use]
	pub fn workbook(&self) -> Option<Arc<dyn Workbook>> {
		self.workbook.read().clone()
	}

	/// Drops our reference to the workbook, once the group is done with it.
	pub(crate) fn release_workbook(&self) {
		if self.workbook.write().take().is_some() {
			debug!(group_id = %self.id, "Released group workbook");
		}
	}

	#[must_use]
	pub fn template_path(&self) -> &Path {
		&self.template_path
	}

	#[must_use]
	pub fn output_folder(&self) -> &Path {
		&self.output_folder
	}

	#[must_use]
	pub fn text_rules(&self) -> &[TextRule] {
		&self.text_rules
	}

	#[must_use]
	pub fn image_rules(&self) -> &[ImageRule] {
		&self.image_rules
	}

	#[must_use]
	pub const fn created_at(&self) -> DateTime<Utc> {
		self.created_at
	}

	#[must_use]
	pub fn status(&self) -> GroupStatus {
		*self.status.lock()
	}

	#[must_use]
	pub fn is_active(&self) -> bool {
		self.status().is_active()
	}

	/// Whether every sheet reached a terminal status. A group can already be `Failed` while
	/// some of its sheets are still running, it is only done once they all stop.
	#[must_use]
	pub fn is_finished(&self) -> bool {
		self.sheets
			.iter()
			.all(|sheet| sheet.status().is_terminal())
	}

	/// Once removed, nothing about this group is written to the store anymore.
	pub(crate) fn mark_removed(&self) {
		self.removed.store(true, Ordering::Release);
	}

	#[must_use]
	pub fn is_removed(&self) -> bool {
		self.removed.load(Ordering::Acquire)
	}

	pub(crate) fn add_sheet(&self, sheet: Arc<JobSheet>) {
		self.sheets.insert(sheet.id(), sheet);
	}

	pub(crate) fn remove_sheet(&self, sheet_id: SheetId) -> Option<Arc<JobSheet>> {
		self.sheets.remove(&sheet_id).map(|(_, sheet)| sheet)
	}

	#[must_use]
	pub fn sheet(&self, sheet_id: SheetId) -> Option<Arc<JobSheet>> {
		self.sheets
			.get(&sheet_id)
			.map(|sheet| Arc::clone(sheet.value()))
	}

	#[must_use]
	pub fn sheets(&self) -> Vec<Arc<JobSheet>> {
		self.sheets
			.iter()
			.map(|sheet| Arc::clone(sheet.value()))
			.collect()
	}

	#[must_use]
	pub fn sheet_ids(&self) -> Vec<SheetId> {
		self.sheets.iter().map(|sheet| *sheet.key()).collect()
	}

	#[must_use]
	pub fn sheets_count(&self) -> usize {
		self.sheets.len()
	}

	/// Recomputes the status from a fresh read of every sheet, returning it along with
	/// whether it changed.
	///
	/// The status lock is held during the whole computation, so concurrent recomputations
	/// triggered by sibling sheets are serialized and the last one always sees every sheet
	/// in its latest state.
	pub(crate) fn update_status(&self) -> (GroupStatus, bool) {
		let mut status = self.status.lock();

		let new_status = GroupStatus::from_sheets(self.sheets().iter().map(|sheet| sheet.status()));

		let changed = *status != new_status;
		if changed {
			debug!(group_id = %self.id, from = ?*status, to = ?new_status, "Group status changed");
			*status = new_status;
		}

		(new_status, changed)
	}

	/// Row weighted progress: processed rows over total rows across every sheet.
	#[must_use]
	pub fn progress(&self) -> f32 {
		let (done, total) = self
			.sheets()
			.iter()
			.map(|sheet| (sheet.current_row(), sheet.total_rows()))
			.fold((0, 0), |(done, total), (current, rows)| {
				(done + current, total + rows)
			});

		let status = if self.status() == GroupStatus::Completed {
			SheetStatus::Completed
		} else {
			SheetStatus::Pending
		};

		percentage(done, total, status)
	}

	#[must_use]
	pub fn error_count(&self) -> u64 {
		self.sheets().iter().map(|sheet| sheet.error_count()).sum()
	}

	#[must_use]
	pub fn to_state(&self) -> GroupState {
		GroupState {
			id: self.id,
			workbook_path: self.workbook_path.clone(),
			template_path: self.template_path.clone(),
			output_folder: self.output_folder.clone(),
			text_rules: self.text_rules.clone(),
			image_rules: self.image_rules.clone(),
			created_at: self.created_at,
			status: self.status(),
			sheet_ids: self.sheet_ids(),
			error_count: self.error_count(),
		}
	}
}
