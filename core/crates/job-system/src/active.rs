use std::{
	collections::HashSet,
	path::{Path, PathBuf},
	sync::Arc,
};

use dashmap::DashMap;
use sg_utils::{error::FileIOError, path::sanitize_file_name};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use super::{
	completed::CompletedJobCollection,
	context::JobContext,
	dispatcher::JobDispatcher,
	error::JobSystemError,
	group::JobGroup,
	rules::{ImageRule, TextRule},
	sheet::JobSheet,
	status::{GroupStatus, SheetStatus},
	workbook::WorkbookReader,
	GroupId, SheetId,
};

/// Everything needed to create a new group of sheet jobs.
#[derive(Debug, Clone, Default)]
pub struct CreateGroupRequest {
	pub template_path: PathBuf,
	pub spreadsheet_path: PathBuf,
	/// Folder receiving one generated document per worksheet
	pub output_path: PathBuf,
	/// Worksheets to generate, empty means every worksheet of the workbook
	pub sheet_names: Vec<String>,
	pub text_rules: Vec<TextRule>,
	pub image_rules: Vec<ImageRule>,
}

/// Owner of every group that still has work to do.
///
/// This is the only place where jobs are born and where pause, resume and cancel requests
/// land while a job is active. Once a group becomes terminal it is handed over to the
/// [`CompletedJobCollection`] and forgotten here.
pub struct ActiveJobCollection {
	groups: DashMap<GroupId, Arc<JobGroup>>,
	sheets: DashMap<SheetId, Arc<JobSheet>>,
	group_id_by_output: DashMap<PathBuf, GroupId>,
	ctx: JobContext,
	dispatcher: Arc<dyn JobDispatcher>,
	workbooks: Arc<dyn WorkbookReader>,
	completed: Arc<CompletedJobCollection>,
}

impl ActiveJobCollection {
	pub(crate) fn new(
		ctx: JobContext,
		dispatcher: Arc<dyn JobDispatcher>,
		workbooks: Arc<dyn WorkbookReader>,
		completed: Arc<CompletedJobCollection>,
	) -> Self {
		Self {
			groups: DashMap::new(),
			sheets: DashMap::new(),
			group_id_by_output: DashMap::new(),
			ctx,
			dispatcher,
			workbooks,
			completed,
		}
	}

	// Queries

	#[must_use]
	pub fn get_group(&self, group_id: GroupId) -> Option<Arc<JobGroup>> {
		self.groups
			.get(&group_id)
			.map(|group| Arc::clone(group.value()))
	}

	#[must_use]
	pub fn get_sheet(&self, sheet_id: SheetId) -> Option<Arc<JobSheet>> {
		self.sheets
			.get(&sheet_id)
			.map(|sheet| Arc::clone(sheet.value()))
	}

	#[must_use]
	pub fn groups(&self) -> Vec<Arc<JobGroup>> {
		self.groups
			.iter()
			.map(|group| Arc::clone(group.value()))
			.collect()
	}

	#[must_use]
	pub fn sheets(&self) -> Vec<Arc<JobSheet>> {
		self.sheets
			.iter()
			.map(|sheet| Arc::clone(sheet.value()))
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
	pub fn running_groups(&self) -> Vec<Arc<JobGroup>> {
		self.groups_with(GroupStatus::Running)
	}

	#[must_use]
	pub fn paused_groups(&self) -> Vec<Arc<JobGroup>> {
		self.groups_with(GroupStatus::Paused)
	}

	#[must_use]
	pub fn pending_groups(&self) -> Vec<Arc<JobGroup>> {
		self.groups_with(GroupStatus::Pending)
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

	/// Finds the active group writing into `output_folder`.
	pub async fn get_group_by_output_path(
		&self,
		output_folder: impl AsRef<Path> + Send,
	) -> Option<Arc<JobGroup>> {
		let output_folder = normalize_output_folder(output_folder.as_ref()).await;

		let group_id = *self.group_id_by_output.get(&output_folder)?;
		self.get_group(group_id)
	}

	// Group lifecycle

	/// Validates the request against the workbook and registers a new group with one sheet
	/// per requested worksheet. Nothing runs until [`ActiveJobCollection::start_group`].
	#[instrument(skip_all, fields(spreadsheet = %request.spreadsheet_path.display()), err)]
	pub async fn create_group(
		&self,
		request: CreateGroupRequest,
	) -> Result<Arc<JobGroup>, JobSystemError> {
		let CreateGroupRequest {
			template_path,
			spreadsheet_path,
			output_path,
			sheet_names,
			text_rules,
			image_rules,
		} = request;

		if output_path.as_os_str().to_string_lossy().trim().is_empty() {
			return Err(JobSystemError::EmptyOutputPath);
		}

		let workbook = self.workbooks.open(&spreadsheet_path)?;
		let available = workbook.worksheet_names();

		let worksheets = if sheet_names.is_empty() {
			available
		} else {
			let mut seen = HashSet::with_capacity(sheet_names.len());
			let mut worksheets = Vec::with_capacity(sheet_names.len());

			for name in sheet_names {
				if !available.contains(&name) {
					return Err(JobSystemError::WorksheetNotFound(name));
				}
				if seen.insert(name.clone()) {
					worksheets.push(name);
				}
			}

			worksheets
		};

		let row_counts = worksheets
			.iter()
			.map(|name| workbook.row_count(name))
			.collect::<Result<Vec<_>, _>>()?;

		fs::create_dir_all(&output_path).await.map_err(|e| {
			FileIOError::from((&output_path, e, "Failed to create output folder"))
		})?;
		let output_folder = normalize_output_folder(&output_path).await;

		let group = Arc::new(JobGroup::new(
			workbook,
			template_path,
			output_folder.clone(),
			text_rules,
			image_rules,
		));

		let mut used_paths = HashSet::with_capacity(worksheets.len());
		for (name, total_rows) in worksheets.into_iter().zip(row_counts) {
			let output_path = unique_output_path(
				&output_folder,
				&name,
				&self.ctx.config.output_extension,
				&mut used_paths,
			);

			let sheet = Arc::new(JobSheet::new(group.id(), name, output_path, total_rows));
			self.sheets.insert(sheet.id(), Arc::clone(&sheet));
			group.add_sheet(sheet);
		}

		self.groups.insert(group.id(), Arc::clone(&group));
		self.group_id_by_output.insert(output_folder, group.id());

		self.ctx.persist_group(&group).await;
		for sheet in group.sheets() {
			self.ctx.persist_sheet(&sheet).await;
		}

		info!(group_id = %group.id(), sheets_count = group.sheets_count(), "Created job group");

		Ok(group)
	}

	/// Dispatches every pending sheet of the group.
	#[instrument(skip(self), err)]
	pub async fn start_group(&self, group_id: GroupId) -> Result<(), JobSystemError> {
		let group = self
			.get_group(group_id)
			.ok_or(JobSystemError::GroupNotFound(group_id))?;

		for sheet in group.sheets() {
			if sheet.status() == SheetStatus::Pending {
				self.dispatch(&sheet).await?;
			}
		}

		info!("Started job group");

		Ok(())
	}

	#[instrument(skip(self), err)]
	pub async fn pause_group(&self, group_id: GroupId) -> Result<(), JobSystemError> {
		let group = self
			.get_group(group_id)
			.ok_or(JobSystemError::GroupNotFound(group_id))?;

		for sheet in group.sheets() {
			self.pause_sheet_internal(&sheet);
		}

		info!("Pause requested for job group");

		Ok(())
	}

	#[instrument(skip(self), err)]
	pub async fn resume_group(&self, group_id: GroupId) -> Result<(), JobSystemError> {
		let group = self
			.get_group(group_id)
			.ok_or(JobSystemError::GroupNotFound(group_id))?;

		for sheet in group.sheets() {
			self.resume_sheet_internal(&sheet).await?;
		}

		info!("Resumed job group");

		Ok(())
	}

	#[instrument(skip(self), err)]
	pub async fn cancel_group(&self, group_id: GroupId) -> Result<(), JobSystemError> {
		let group = self
			.get_group(group_id)
			.ok_or(JobSystemError::GroupNotFound(group_id))?;

		for sheet in group.sheets() {
			self.cancel_sheet_internal(&sheet).await;
		}

		info!("Cancelled job group");

		self.check_and_move_group_if_done(&group).await;

		Ok(())
	}

	/// Cancels whatever is still running in the group and forgets about it, persisted state
	/// included.
	#[instrument(skip(self), err)]
	pub async fn cancel_and_remove_group(&self, group_id: GroupId) -> Result<(), JobSystemError> {
		let (_, group) = self
			.groups
			.remove(&group_id)
			.ok_or(JobSystemError::GroupNotFound(group_id))?;

		for sheet in group.sheets() {
			sheet.mark_removed();
			self.cancel_sheet_internal(&sheet).await;
			self.sheets.remove(&sheet.id());
		}

		self.group_id_by_output
			.remove_if(group.output_folder(), |_, id| *id == group_id);
		group.release_workbook();

		self.ctx.forget_group(&group).await;

		self.ctx
			.notifier
			.notify_group_status_changed(group_id, GroupStatus::Cancelled);

		info!("Cancelled and removed job group");

		Ok(())
	}

	// Sheet lifecycle

	#[instrument(skip(self), err)]
	pub async fn pause_sheet(&self, sheet_id: SheetId) -> Result<(), JobSystemError> {
		let sheet = self
			.get_sheet(sheet_id)
			.ok_or(JobSystemError::SheetNotFound(sheet_id))?;

		self.pause_sheet_internal(&sheet);

		Ok(())
	}

	#[instrument(skip(self), err)]
	pub async fn resume_sheet(&self, sheet_id: SheetId) -> Result<(), JobSystemError> {
		let sheet = self
			.get_sheet(sheet_id)
			.ok_or(JobSystemError::SheetNotFound(sheet_id))?;

		self.resume_sheet_internal(&sheet).await
	}

	#[instrument(skip(self), err)]
	pub async fn cancel_sheet(&self, sheet_id: SheetId) -> Result<(), JobSystemError> {
		let sheet = self
			.get_sheet(sheet_id)
			.ok_or(JobSystemError::SheetNotFound(sheet_id))?;

		self.cancel_sheet_internal(&sheet).await;

		if let Some(group) = self.get_group(sheet.group_id()) {
			self.check_and_move_group_if_done(&group).await;
		}

		Ok(())
	}

	/// Cancels the sheet and forgets about it. Removing the last sheet of a group removes the
	/// group as well.
	#[instrument(skip(self), err)]
	pub async fn cancel_and_remove_sheet(&self, sheet_id: SheetId) -> Result<(), JobSystemError> {
		let (_, sheet) = self
			.sheets
			.remove(&sheet_id)
			.ok_or(JobSystemError::SheetNotFound(sheet_id))?;

		sheet.mark_removed();
		self.cancel_sheet_internal(&sheet).await;
		self.ctx.forget_sheet(&sheet).await;

		let Some(group) = self.get_group(sheet.group_id()) else {
			return Ok(());
		};

		group.remove_sheet(sheet_id);

		if group.sheets_count() == 0 {
			let group_id = group.id();
			self.groups.remove(&group_id);
			self.group_id_by_output
				.remove_if(group.output_folder(), |_, id| *id == group_id);
			group.release_workbook();

			self.ctx.forget_group(&group).await;

			info!(%group_id, "Removed job group after deleting its last sheet");
		} else {
			self.check_and_move_group_if_done(&group).await;
		}

		info!("Cancelled and removed sheet job");

		Ok(())
	}

	// Bulk operations

	pub async fn pause_all(&self) {
		for group in self.groups() {
			for sheet in group.sheets() {
				self.pause_sheet_internal(&sheet);
			}
		}

		info!("Pause requested for every active job");
	}

	pub async fn resume_all(&self) -> Result<(), JobSystemError> {
		for group in self.groups() {
			for sheet in group.sheets() {
				self.resume_sheet_internal(&sheet).await?;
			}
		}

		info!("Resumed every active job");

		Ok(())
	}

	pub async fn cancel_all(&self) {
		for group in self.groups() {
			for sheet in group.sheets() {
				self.cancel_sheet_internal(&sheet).await;
			}

			self.check_and_move_group_if_done(&group).await;
		}

		info!("Cancelled every active job");
	}

	// Internals

	/// Called by the executor once a sheet reached a terminal status.
	pub(crate) async fn notify_sheet_completed(&self, sheet_id: SheetId) {
		let Some(sheet) = self.get_sheet(sheet_id) else {
			return;
		};

		if sheet.is_removed() {
			return;
		}

		if let Some(group) = self.get_group(sheet.group_id()) {
			self.check_and_move_group_if_done(&group).await;
		}
	}

	/// Registers a group rebuilt from the store.
	pub(crate) fn restore_group(&self, group: Arc<JobGroup>) {
		for sheet in group.sheets() {
			self.sheets.insert(sheet.id(), sheet);
		}

		self.group_id_by_output
			.insert(group.output_folder().to_path_buf(), group.id());
		self.groups.insert(group.id(), group);
	}

	/// Pushes the sheet into the dispatcher queue and remembers the dispatch handle.
	pub(crate) async fn dispatch(&self, sheet: &JobSheet) -> Result<(), JobSystemError> {
		let handle = self.dispatcher.requeue(sheet.id())?;
		sheet.set_dispatch_handle(Some(handle));

		self.ctx.persist_sheet(sheet).await;

		debug!(sheet_id = %sheet.id(), %handle, "Sheet job dispatched");

		Ok(())
	}

	/// Arms the pause signal, the execution will move to `Paused` on its next checkpoint.
	fn pause_sheet_internal(&self, sheet: &JobSheet) {
		if sheet.status().is_terminal() {
			return;
		}

		if sheet.request_pause() {
			info!(sheet_id = %sheet.id(), "Pause requested for sheet job");
		}
	}

	async fn resume_sheet_internal(&self, sheet: &JobSheet) -> Result<(), JobSystemError> {
		let status = sheet.status();
		if status.is_terminal() {
			return Ok(());
		}

		let was_paused = sheet.request_resume();

		// Paused without anyone waiting on the signal, like after a restart or a shutdown
		if status == SheetStatus::Paused && !sheet.is_executing() {
			self.dispatch(sheet).await?;
		}

		if was_paused || status == SheetStatus::Paused {
			info!(sheet_id = %sheet.id(), "Resumed sheet job");
		}

		Ok(())
	}

	/// Cancels right away: the sheet becomes `Cancelled` now and any queued dispatch is
	/// dropped, a live execution stops at its next checkpoint.
	async fn cancel_sheet_internal(&self, sheet: &JobSheet) -> bool {
		// Status first, so a live execution never sees the token without the final status
		if !sheet.set_status(SheetStatus::Cancelled, None) {
			return false;
		}

		sheet.request_cancel();

		if self.dispatcher.remove(sheet.id()) {
			debug!(sheet_id = %sheet.id(), "Dropped queued dispatch of cancelled sheet job");
		}

		self.ctx.sheet_status_changed(sheet).await;

		info!(sheet_id = %sheet.id(), "Cancelled sheet job");

		true
	}

	/// Migrates the group once every one of its sheets stopped for good.
	async fn check_and_move_group_if_done(&self, group: &Arc<JobGroup>) {
		if self.ctx.refresh_group(group).await.is_terminal() && group.is_finished() {
			self.move_to_completed(group);
		}
	}

	/// Hands a terminal group over to the completed collection, exactly once.
	fn move_to_completed(&self, group: &Arc<JobGroup>) {
		let group_id = group.id();

		if self.groups.remove(&group_id).is_none() {
			return;
		}

		for sheet_id in group.sheet_ids() {
			self.sheets.remove(&sheet_id);
		}

		self.group_id_by_output
			.remove_if(group.output_folder(), |_, id| *id == group_id);

		self.completed.add_group(Arc::clone(group));

		info!(%group_id, status = ?group.status(), "Moved job group to completed collection");
	}
}

async fn normalize_output_folder(path: &Path) -> PathBuf {
	match fs::canonicalize(path).await {
		Ok(path) => path,
		Err(e) => {
			warn!(path = %path.display(), ?e, "Failed to normalize output folder;");
			path.to_path_buf()
		}
	}
}

/// `<folder>/<sanitized worksheet name>.<extension>`, suffixed with a counter when two
/// worksheets sanitize to the same file name.
fn unique_output_path(
	folder: &Path,
	worksheet: &str,
	extension: &str,
	used: &mut HashSet<PathBuf>,
) -> PathBuf {
	let stem = sanitize_file_name(worksheet);

	let mut path = folder.join(format!("{stem}.{extension}"));
	let mut counter = 1;
	while !used.insert(path.clone()) {
		counter += 1;
		path = folder.join(format!("{stem} ({counter}).{extension}"));
	}

	path
}
