use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
	error::StoreError,
	rules::{ImageRule, TextRule},
	status::{GroupStatus, SheetStatus},
	GroupId, SheetId,
};

mod file;
mod memory;

pub use file::FileJobStateStore;
pub use memory::MemoryJobStateStore;

/// Persisted view of a [`JobGroup`](crate::JobGroup).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupState {
	pub id: GroupId,
	pub workbook_path: PathBuf,
	pub template_path: PathBuf,
	pub output_folder: PathBuf,
	pub text_rules: Vec<TextRule>,
	pub image_rules: Vec<ImageRule>,
	pub created_at: DateTime<Utc>,
	pub status: GroupStatus,
	pub sheet_ids: Vec<SheetId>,
	pub error_count: u64,
}

/// Persisted view of a [`JobSheet`](crate::JobSheet), `current_row` is the resume checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetState {
	pub id: SheetId,
	pub group_id: GroupId,
	pub worksheet: String,
	pub output_path: PathBuf,
	pub current_row: usize,
	pub total_rows: usize,
	pub status: SheetStatus,
	pub error_count: u64,
	pub error_message: Option<String>,
	pub dispatch_handle: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
	Debug,
	Info,
	Warning,
	Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLogEntry {
	pub level: LogLevel,
	pub message: String,
	pub timestamp: DateTime<Utc>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<serde_json::Value>,
}

impl JobLogEntry {
	#[must_use]
	pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
		Self {
			level,
			message: message.into(),
			timestamp: Utc::now(),
			data: None,
		}
	}

	#[must_use]
	pub fn with_data(mut self, data: serde_json::Value) -> Self {
		self.data = Some(data);
		self
	}
}

/// Durable mirror of every group and sheet, plus an append only log per sheet.
///
/// Saves are upserts, removals are idempotent and cascade: removing a group removes its
/// sheets, removing a sheet removes its logs.
#[async_trait]
pub trait JobStateStore: Send + Sync + 'static {
	async fn save_group(&self, state: &GroupState) -> Result<(), StoreError>;

	async fn save_sheet(&self, state: &SheetState) -> Result<(), StoreError>;

	async fn get_group(&self, group_id: GroupId) -> Result<Option<GroupState>, StoreError>;

	async fn get_sheet(&self, sheet_id: SheetId) -> Result<Option<SheetState>, StoreError>;

	async fn get_sheets_by_group(&self, group_id: GroupId) -> Result<Vec<SheetState>, StoreError>;

	/// Groups that still have work to do, used to rebuild the active collection on startup
	async fn get_active_groups(&self) -> Result<Vec<GroupState>, StoreError> {
		Ok(self
			.get_all_groups()
			.await?
			.into_iter()
			.filter(|group| group.status.is_active())
			.collect())
	}

	async fn get_all_groups(&self) -> Result<Vec<GroupState>, StoreError>;

	async fn append_job_log(&self, sheet_id: SheetId, entry: &JobLogEntry)
		-> Result<(), StoreError>;

	async fn append_job_logs(
		&self,
		sheet_id: SheetId,
		entries: &[JobLogEntry],
	) -> Result<(), StoreError> {
		for entry in entries {
			self.append_job_log(sheet_id, entry).await?;
		}

		Ok(())
	}

	/// The most recent entries, oldest first
	async fn get_job_logs(&self, sheet_id: SheetId) -> Result<Vec<JobLogEntry>, StoreError>;

	async fn remove_group(&self, group_id: GroupId) -> Result<(), StoreError>;

	async fn remove_sheet(&self, sheet_id: SheetId) -> Result<(), StoreError>;
}
