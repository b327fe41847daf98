use std::{
	collections::{HashMap, VecDeque},
	io::ErrorKind,
	path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use sg_utils::error::FileIOError;
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::{error::StoreError, GroupId, SheetId};

use super::{GroupState, JobLogEntry, JobStateStore, SheetState};

const GROUPS_DIR: &str = "groups";
const SHEETS_DIR: &str = "sheets";
const LOGS_DIR: &str = "logs";

const STATE_EXTENSION: &str = "bin";
const LOG_EXTENSION: &str = "jsonl";

/// Stores each group and sheet as a MessagePack file and each sheet log as JSON lines:
///
/// ```text
/// <root>/groups/<group_id>.bin
/// <root>/sheets/<sheet_id>.bin
/// <root>/logs/<sheet_id>.jsonl
/// ```
///
/// State files are written to a temporary file and renamed over the previous version, so a
/// crash mid write leaves the last good state in place. A log may grow to twice
/// `max_log_entries` lines before it is compacted back to the most recent `max_log_entries`.
#[derive(Debug)]
pub struct FileJobStateStore {
	root: PathBuf,
	max_log_entries: usize,
	/// Lines in each log file we appended to, also serializing every log file access
	log_lines: Mutex<HashMap<SheetId, usize>>,
}

impl FileJobStateStore {
	pub async fn new(
		root: impl AsRef<Path> + Send,
		max_log_entries: usize,
	) -> Result<Self, StoreError> {
		let root = root.as_ref().to_path_buf();

		for dir in [GROUPS_DIR, SHEETS_DIR, LOGS_DIR] {
			let dir = root.join(dir);
			fs::create_dir_all(&dir).await.map_err(|e| {
				FileIOError::from((&dir, e, "Failed to create job state store directory"))
			})?;
		}

		debug!(root = %root.display(), "Job state store ready");

		Ok(Self {
			root,
			max_log_entries,
			log_lines: Mutex::new(HashMap::new()),
		})
	}

	fn group_path(&self, group_id: GroupId) -> PathBuf {
		self.root
			.join(GROUPS_DIR)
			.join(group_id.to_string())
			.with_extension(STATE_EXTENSION)
	}

	fn sheet_path(&self, sheet_id: SheetId) -> PathBuf {
		self.root
			.join(SHEETS_DIR)
			.join(sheet_id.to_string())
			.with_extension(STATE_EXTENSION)
	}

	fn log_path(&self, sheet_id: SheetId) -> PathBuf {
		self.root
			.join(LOGS_DIR)
			.join(sheet_id.to_string())
			.with_extension(LOG_EXTENSION)
	}

	/// Keeps the last `max_log_entries` of the log file, returning how many are left.
	async fn compact_log(&self, sheet_id: SheetId, path: &Path) -> Result<usize, StoreError> {
		let entries = read_log(sheet_id, path, self.max_log_entries).await?;

		let mut lines = Vec::new();
		for entry in &entries {
			serde_json::to_writer(&mut lines, entry)?;
			lines.push(b'\n');
		}

		let tmp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4()));

		fs::write(&tmp_path, lines)
			.await
			.map_err(|e| FileIOError::from((&tmp_path, e, "Failed to write compacted job log")))?;

		fs::rename(&tmp_path, path)
			.await
			.map_err(|e| FileIOError::from((path, e, "Failed to replace job log")))?;

		debug!(%sheet_id, kept = entries.len(), "Compacted job log");

		Ok(entries.len())
	}
}

/// The last `max_entries` well formed entries of a log file, oldest first.
async fn read_log(
	sheet_id: SheetId,
	path: &Path,
	max_entries: usize,
) -> Result<Vec<JobLogEntry>, StoreError> {
	let contents = match fs::read_to_string(path).await {
		Ok(contents) => contents,
		Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
		Err(e) => return Err(FileIOError::from((path, e, "Failed to read job log")).into()),
	};

	let mut entries = VecDeque::with_capacity(max_entries.min(1024));

	for line in contents.lines().filter(|line| !line.trim().is_empty()) {
		match serde_json::from_str::<JobLogEntry>(line) {
			Ok(entry) => {
				entries.push_back(entry);
				if entries.len() > max_entries {
					entries.pop_front();
				}
			}
			// A crash can leave a half written last line behind
			Err(e) => warn!(%sheet_id, ?e, "Skipping malformed job log line;"),
		}
	}

	Ok(entries.into())
}

async fn count_log_lines(path: &Path) -> Result<usize, StoreError> {
	match fs::read_to_string(path).await {
		Ok(contents) => Ok(contents
			.lines()
			.filter(|line| !line.trim().is_empty())
			.count()),
		Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
		Err(e) => Err(FileIOError::from((path, e, "Failed to read job log")).into()),
	}
}

async fn write_state(path: &Path, state: &impl Serialize) -> Result<(), StoreError> {
	let bytes = rmp_serde::to_vec_named(state)?;

	let tmp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4()));

	fs::write(&tmp_path, bytes)
		.await
		.map_err(|e| FileIOError::from((&tmp_path, e, "Failed to write job state")))?;

	if let Err(e) = fs::rename(&tmp_path, path).await {
		if let Err(e) = fs::remove_file(&tmp_path).await {
			warn!(tmp_path = %tmp_path.display(), ?e, "Failed to clean up temporary job state file;");
		}
		return Err(FileIOError::from((path, e, "Failed to replace job state")).into());
	}

	Ok(())
}

async fn read_state<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
	match fs::read(path).await {
		Ok(bytes) => Ok(Some(rmp_serde::from_slice(&bytes)?)),
		Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
		Err(e) => Err(FileIOError::from((path, e, "Failed to read job state")).into()),
	}
}

async fn read_all_states<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>, StoreError> {
	let mut read_dir = fs::read_dir(dir)
		.await
		.map_err(|e| FileIOError::from((dir, e, "Failed to read job state directory")))?;

	let mut states = Vec::new();

	while let Some(entry) = read_dir
		.next_entry()
		.await
		.map_err(|e| FileIOError::from((dir, e, "Failed to read job state directory entry")))?
	{
		let path = entry.path();
		if path.extension().and_then(|ext| ext.to_str()) != Some(STATE_EXTENSION) {
			continue;
		}

		match read_state(&path).await {
			Ok(Some(state)) => states.push(state),
			// Removed between listing and reading
			Ok(None) => {}
			Err(StoreError::Deserialize(e)) => {
				warn!(path = %path.display(), ?e, "Skipping corrupted job state file;");
			}
			Err(e) => return Err(e),
		}
	}

	Ok(states)
}

async fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
	match fs::remove_file(path).await {
		Ok(()) => Ok(()),
		Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
		Err(e) => Err(FileIOError::from((path, e, "Failed to remove job state")).into()),
	}
}

#[async_trait]
impl JobStateStore for FileJobStateStore {
	async fn save_group(&self, state: &GroupState) -> Result<(), StoreError> {
		write_state(&self.group_path(state.id), state).await
	}

	async fn save_sheet(&self, state: &SheetState) -> Result<(), StoreError> {
		write_state(&self.sheet_path(state.id), state).await
	}

	async fn get_group(&self, group_id: GroupId) -> Result<Option<GroupState>, StoreError> {
		read_state(&self.group_path(group_id)).await
	}

	async fn get_sheet(&self, sheet_id: SheetId) -> Result<Option<SheetState>, StoreError> {
		read_state(&self.sheet_path(sheet_id)).await
	}

	async fn get_sheets_by_group(&self, group_id: GroupId) -> Result<Vec<SheetState>, StoreError> {
		let Some(group) = self.get_group(group_id).await? else {
			return Ok(vec![]);
		};

		let mut sheets = Vec::with_capacity(group.sheet_ids.len());
		for sheet_id in group.sheet_ids {
			match read_state::<SheetState>(&self.sheet_path(sheet_id)).await {
				Ok(Some(sheet)) if sheet.group_id == group_id => sheets.push(sheet),
				Ok(_) => {}
				Err(StoreError::Deserialize(e)) => {
					warn!(%sheet_id, ?e, "Skipping corrupted sheet state file;");
				}
				Err(e) => return Err(e),
			}
		}

		Ok(sheets)
	}

	async fn get_all_groups(&self) -> Result<Vec<GroupState>, StoreError> {
		read_all_states(&self.root.join(GROUPS_DIR)).await
	}

	async fn append_job_log(
		&self,
		sheet_id: SheetId,
		entry: &JobLogEntry,
	) -> Result<(), StoreError> {
		self.append_job_logs(sheet_id, std::slice::from_ref(entry))
			.await
	}

	async fn append_job_logs(
		&self,
		sheet_id: SheetId,
		entries: &[JobLogEntry],
	) -> Result<(), StoreError> {
		if entries.is_empty() {
			return Ok(());
		}

		let mut lines = Vec::new();
		for entry in entries {
			serde_json::to_writer(&mut lines, entry)?;
			lines.push(b'\n');
		}

		let path = self.log_path(sheet_id);

		let mut log_lines = self.log_lines.lock().await;

		let lines_count = match log_lines.get(&sheet_id) {
			Some(count) => *count,
			None => count_log_lines(&path).await?,
		};

		let mut file = fs::OpenOptions::new()
			.create(true)
			.append(true)
			.open(&path)
			.await
			.map_err(|e| FileIOError::from((&path, e, "Failed to open job log")))?;

		file.write_all(&lines)
			.await
			.map_err(|e| FileIOError::from((&path, e, "Failed to append to job log")))?;

		file.flush()
			.await
			.map_err(|e| FileIOError::from((&path, e, "Failed to flush job log")))?;

		drop(file);

		trace!(%sheet_id, count = entries.len(), "Appended job log entries");

		let mut lines_count = lines_count + entries.len();
		if lines_count > self.max_log_entries.saturating_mul(2) {
			lines_count = self.compact_log(sheet_id, &path).await?;
		}
		log_lines.insert(sheet_id, lines_count);

		Ok(())
	}

	async fn get_job_logs(&self, sheet_id: SheetId) -> Result<Vec<JobLogEntry>, StoreError> {
		let _guard = self.log_lines.lock().await;

		read_log(sheet_id, &self.log_path(sheet_id), self.max_log_entries).await
	}

	async fn remove_group(&self, group_id: GroupId) -> Result<(), StoreError> {
		if let Some(group) = self.get_group(group_id).await? {
			for sheet_id in group.sheet_ids {
				self.remove_sheet(sheet_id).await?;
			}
		}

		remove_if_exists(&self.group_path(group_id)).await
	}

	async fn remove_sheet(&self, sheet_id: SheetId) -> Result<(), StoreError> {
		remove_if_exists(&self.sheet_path(sheet_id)).await?;

		let mut log_lines = self.log_lines.lock().await;
		log_lines.remove(&sheet_id);
		remove_if_exists(&self.log_path(sheet_id)).await
	}
}
