use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{error::StoreError, GroupId, SheetId};

use super::{GroupState, JobLogEntry, JobStateStore, SheetState};

/// Keeps everything in memory, for tests and embedders that don't need to survive restarts.
#[derive(Debug)]
pub struct MemoryJobStateStore {
	groups: RwLock<HashMap<GroupId, GroupState>>,
	sheets: RwLock<HashMap<SheetId, SheetState>>,
	logs: RwLock<HashMap<SheetId, VecDeque<JobLogEntry>>>,
	max_log_entries: usize,
}

impl MemoryJobStateStore {
	#[must_use]
	pub fn new(max_log_entries: usize) -> Self {
		Self {
			groups: RwLock::default(),
			sheets: RwLock::default(),
			logs: RwLock::default(),
			max_log_entries,
		}
	}
}

#[async_trait]
impl JobStateStore for MemoryJobStateStore {
	async fn save_group(&self, state: &GroupState) -> Result<(), StoreError> {
		self.groups.write().await.insert(state.id, state.clone());
		Ok(())
	}

	async fn save_sheet(&self, state: &SheetState) -> Result<(), StoreError> {
		self.sheets.write().await.insert(state.id, state.clone());
		Ok(())
	}

	async fn get_group(&self, group_id: GroupId) -> Result<Option<GroupState>, StoreError> {
		Ok(self.groups.read().await.get(&group_id).cloned())
	}

	async fn get_sheet(&self, sheet_id: SheetId) -> Result<Option<SheetState>, StoreError> {
		Ok(self.sheets.read().await.get(&sheet_id).cloned())
	}

	async fn get_sheets_by_group(&self, group_id: GroupId) -> Result<Vec<SheetState>, StoreError> {
		Ok(self
			.sheets
			.read()
			.await
			.values()
			.filter(|sheet| sheet.group_id == group_id)
			.cloned()
			.collect())
	}

	async fn get_all_groups(&self) -> Result<Vec<GroupState>, StoreError> {
		Ok(self.groups.read().await.values().cloned().collect())
	}

	async fn append_job_log(
		&self,
		sheet_id: SheetId,
		entry: &JobLogEntry,
	) -> Result<(), StoreError> {
		let mut logs = self.logs.write().await;
		let entries = logs.entry(sheet_id).or_default();

		entries.push_back(entry.clone());
		while entries.len() > self.max_log_entries {
			entries.pop_front();
		}

		Ok(())
	}

	async fn get_job_logs(&self, sheet_id: SheetId) -> Result<Vec<JobLogEntry>, StoreError> {
		Ok(self
			.logs
			.read()
			.await
			.get(&sheet_id)
			.map(|entries| entries.iter().cloned().collect())
			.unwrap_or_default())
	}

	async fn remove_group(&self, group_id: GroupId) -> Result<(), StoreError> {
		self.groups.write().await.remove(&group_id);

		let removed_sheets = {
			let mut sheets = self.sheets.write().await;
			let ids = sheets
				.values()
				.filter(|sheet| sheet.group_id == group_id)
				.map(|sheet| sheet.id)
				.collect::<Vec<_>>();

			for id in &ids {
				sheets.remove(id);
			}

			ids
		};

		let mut logs = self.logs.write().await;
		for id in removed_sheets {
			logs.remove(&id);
		}

		Ok(())
	}

	async fn remove_sheet(&self, sheet_id: SheetId) -> Result<(), StoreError> {
		self.sheets.write().await.remove(&sheet_id);
		self.logs.write().await.remove(&sheet_id);
		Ok(())
	}
}
