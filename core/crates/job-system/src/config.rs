//! Job system configuration

use std::{
	fs,
	path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use sg_utils::error::FileIOError;
use tracing::{error, info, warn};

use super::error::ConfigError;

pub const CONFIG_FILE_NAME: &str = "job_system.json";

const DEFAULT_MAX_LOG_ENTRIES: usize = 2000;
const DEFAULT_OUTPUT_EXTENSION: &str = "pptx";
const DEFAULT_NOTIFICATION_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSystemConfig {
	/// How many sheets can be processed at the same time
	pub max_concurrent_jobs: usize,

	/// Where the job state store keeps its files
	pub data_directory: PathBuf,

	/// Log entries kept per sheet, older ones are dropped on read
	pub max_log_entries: usize,

	/// Extension of the generated documents, without the leading dot
	pub output_extension: String,

	/// Buffer of the notification channel, slow subscribers lag behind past this
	pub notification_capacity: usize,
}

impl Default for JobSystemConfig {
	fn default() -> Self {
		Self::default_with_dir(PathBuf::from("."))
	}
}

impl JobSystemConfig {
	#[must_use]
	pub fn default_with_dir(data_directory: PathBuf) -> Self {
		Self {
			max_concurrent_jobs: default_concurrency(),
			data_directory,
			max_log_entries: DEFAULT_MAX_LOG_ENTRIES,
			output_extension: DEFAULT_OUTPUT_EXTENSION.to_string(),
			notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
		}
	}

	/// Loads the configuration from `data_dir`, creating it with defaults if missing.
	pub fn load_from(data_dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let data_dir = data_dir.as_ref();
		let config_path = data_dir.join(CONFIG_FILE_NAME);

		match fs::read_to_string(&config_path) {
			Ok(json) => {
				info!(config_path = %config_path.display(), "Loading job system config");
				let mut config = serde_json::from_str::<Self>(&json)?;
				if config.max_concurrent_jobs == 0 {
					config.max_concurrent_jobs = default_concurrency();
				}
				Ok(config)
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				warn!(
					config_path = %config_path.display(),
					"No job system config found, creating default"
				);
				let config = Self::default_with_dir(data_dir.to_path_buf());
				config.save(data_dir)?;
				Ok(config)
			}
			Err(e) => Err(FileIOError::from((
				&config_path,
				e,
				"Failed to read job system config",
			))
			.into()),
		}
	}

	pub fn save(&self, data_dir: impl AsRef<Path>) -> Result<(), ConfigError> {
		let data_dir = data_dir.as_ref();

		fs::create_dir_all(data_dir).map_err(|e| {
			FileIOError::from((data_dir, e, "Failed to create job system data directory"))
		})?;

		let config_path = data_dir.join(CONFIG_FILE_NAME);
		fs::write(&config_path, serde_json::to_vec_pretty(self)?)
			.map_err(|e| FileIOError::from((&config_path, e, "Failed to write job system config")))?;

		info!(config_path = %config_path.display(), "Saved job system config");

		Ok(())
	}
}

fn default_concurrency() -> usize {
	std::thread::available_parallelism().map_or_else(
		|e| {
			error!(?e, "Failed to get available parallelism for the job system;");
			1
		},
		std::num::NonZeroUsize::get,
	)
}
