use sg_task_system::TaskSystemError;
use sg_utils::error::FileIOError;

use super::{workbook::WorkbookError, GroupId, SheetId};

#[derive(thiserror::Error, Debug)]
pub enum JobSystemError {
	#[error("job group not found: <id='{0}'>")]
	GroupNotFound(GroupId),
	#[error("sheet job not found: <id='{0}'>")]
	SheetNotFound(SheetId),
	#[error("requested worksheet doesn't exist in the workbook: <name='{0}'>")]
	WorksheetNotFound(String),
	#[error("output path is required to create a job group")]
	EmptyOutputPath,

	#[error(transparent)]
	Workbook(#[from] WorkbookError),
	#[error(transparent)]
	Store(#[from] StoreError),
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error(transparent)]
	Dispatcher(#[from] TaskSystemError),
	#[error(transparent)]
	Config(#[from] ConfigError),
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("failed to serialize job state: {0}")]
	Serialize(#[from] rmp_serde::encode::Error),
	#[error("failed to deserialize job state: {0}")]
	Deserialize(#[from] rmp_serde::decode::Error),
	#[error("failed to (de)serialize job log entry: {0}")]
	Log(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("failed to parse job system config: {0}")]
	Parse(#[from] serde_json::Error),
}
