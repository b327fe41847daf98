//!
//! # Job System
//!
//! Turns the worksheets of a spreadsheet into generated documents, one background job per
//! worksheet, grouped by the request that created them.
//!
//! A [`JobGroup`] owns its [`JobSheet`]s and its status is always derived from theirs. Sheets
//! are processed row by row by a bounded pool of workers from [`sg_task_system`], each row
//! handed to the user provided [`RowProcessor`]. Every processed row is a durable checkpoint
//! in the [`JobStateStore`], so sheets can be paused, resumed, cancelled, and picked up again
//! after a restart right where they stopped.
//!
//! Everything that happens is broadcast as [`JobEvent`]s to whoever subscribes.

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

use std::{path::Path, sync::Arc};

use futures::{stream, Stream};
use sg_task_system::TaskSystem;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};
use uuid::Uuid;

mod active;
mod completed;
pub mod config;
mod context;
mod dispatcher;
pub mod error;
mod executor;
mod group;
mod manager;
pub mod notifier;
pub mod processor;
pub mod rules;
mod sheet;
mod signal;
pub mod status;
pub mod store;
pub mod workbook;

pub use active::{ActiveJobCollection, CreateGroupRequest};
pub use completed::CompletedJobCollection;
pub use config::JobSystemConfig;
pub use dispatcher::JobDispatcher;
pub use error::JobSystemError;
pub use group::JobGroup;
pub use manager::JobManager;
pub use notifier::{JobEvent, JobNotifier};
pub use processor::{
	Checkpoint, CheckpointStage, RowContext, RowOutcome, RowProcessError, RowProcessor,
};
pub use rules::{CropType, ImageRule, RoiType, TextRule};
pub use sheet::{JobSheet, SheetSnapshot};
pub use signal::{InterruptionKind, LinkedCancellation, PauseSignal};
pub use status::{GroupStatus, SheetStatus};
pub use store::{FileJobStateStore, JobLogEntry, JobStateStore, LogLevel, MemoryJobStateStore};
pub use workbook::{RowData, Workbook, WorkbookError, WorkbookReader};

use context::JobContext;
use executor::JobExecutor;

pub type GroupId = Uuid;
pub type SheetId = Uuid;

/// The central unit wiring the collections, the workers and the state store together.
///
/// Creating it restores every persisted group and starts the workers, from then on it is the
/// single entry point for creating and controlling jobs.
pub struct JobSystem {
	manager: JobManager,
	task_system: TaskSystem,
	ctx: JobContext,
}

impl JobSystem {
	/// Builds a job system over the given store, restoring whatever the store holds.
	pub async fn new(
		config: JobSystemConfig,
		store: Arc<dyn JobStateStore>,
		workbooks: Arc<dyn WorkbookReader>,
		processor: Arc<dyn RowProcessor>,
	) -> Result<Self, JobSystemError> {
		let ctx = JobContext {
			store,
			notifier: JobNotifier::new(config.notification_capacity),
			config: Arc::new(config),
		};

		let task_system = TaskSystem::new(ctx.config.max_concurrent_jobs);

		let completed = Arc::new(CompletedJobCollection::new(ctx.clone()));
		let active = Arc::new(ActiveJobCollection::new(
			ctx.clone(),
			Arc::new(task_system.get_dispatcher()),
			Arc::clone(&workbooks),
			Arc::clone(&completed),
		));

		let manager = JobManager::new(Arc::clone(&active), completed, ctx.clone(), workbooks);
		manager.restore().await?;

		task_system.start(Arc::new(JobExecutor::new(active, processor, ctx.clone())))?;

		info!(
			workers_count = task_system.workers_count(),
			"Job system started"
		);

		Ok(Self {
			manager,
			task_system,
			ctx,
		})
	}

	/// Loads the configuration from `data_directory` and keeps the job state on disk next to it.
	pub async fn open(
		data_directory: impl AsRef<Path> + Send,
		workbooks: Arc<dyn WorkbookReader>,
		processor: Arc<dyn RowProcessor>,
	) -> Result<Self, JobSystemError> {
		let config = JobSystemConfig::load_from(data_directory)?;
		let store =
			FileJobStateStore::new(&config.data_directory, config.max_log_entries).await?;

		Self::new(config, Arc::new(store), workbooks, processor).await
	}

	#[must_use]
	pub fn manager(&self) -> &JobManager {
		&self.manager
	}

	#[must_use]
	pub fn config(&self) -> &JobSystemConfig {
		&self.ctx.config
	}

	#[must_use]
	pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
		self.ctx.notifier.subscribe()
	}

	/// Every [`JobEvent`] from now on, skipping over the ones lost if the consumer lags behind.
	pub fn events(&self) -> impl Stream<Item = JobEvent> + Send + 'static {
		stream::unfold(self.subscribe(), |mut rx| async move {
			loop {
				match rx.recv().await {
					Ok(event) => return Some((event, rx)),
					Err(broadcast::error::RecvError::Lagged(skipped)) => {
						warn!(skipped, "Job events consumer lagged behind;");
					}
					Err(broadcast::error::RecvError::Closed) => return None,
				}
			}
		})
	}

	/// Registers a new group with one sheet per requested worksheet, without starting it.
	pub async fn create_group(
		&self,
		request: CreateGroupRequest,
	) -> Result<(GroupId, Vec<SheetId>), JobSystemError> {
		let group = self.manager.active().create_group(request).await?;

		Ok((group.id(), group.sheet_ids()))
	}

	pub async fn start_group(&self, group_id: GroupId) -> Result<(), JobSystemError> {
		self.manager.active().start_group(group_id).await
	}

	#[must_use]
	pub fn get_group(&self, group_id: GroupId) -> Option<Arc<JobGroup>> {
		self.manager.get_group(group_id)
	}

	#[must_use]
	pub fn get_sheet(&self, sheet_id: SheetId) -> Option<Arc<JobSheet>> {
		self.manager.get_sheet(sheet_id)
	}

	#[must_use]
	pub fn get_all_groups(&self) -> Vec<Arc<JobGroup>> {
		self.manager.get_all_groups()
	}

	pub async fn get_group_by_output_path(
		&self,
		output_folder: impl AsRef<Path> + Send,
	) -> Option<Arc<JobGroup>> {
		self.manager
			.active()
			.get_group_by_output_path(output_folder)
			.await
	}

	pub async fn pause_group(&self, group_id: GroupId) -> Result<(), JobSystemError> {
		self.manager.active().pause_group(group_id).await
	}

	pub async fn resume_group(&self, group_id: GroupId) -> Result<(), JobSystemError> {
		self.manager.active().resume_group(group_id).await
	}

	pub async fn cancel_group(&self, group_id: GroupId) -> Result<(), JobSystemError> {
		self.manager.active().cancel_group(group_id).await
	}

	pub async fn pause_sheet(&self, sheet_id: SheetId) -> Result<(), JobSystemError> {
		self.manager.active().pause_sheet(sheet_id).await
	}

	pub async fn resume_sheet(&self, sheet_id: SheetId) -> Result<(), JobSystemError> {
		self.manager.active().resume_sheet(sheet_id).await
	}

	pub async fn cancel_sheet(&self, sheet_id: SheetId) -> Result<(), JobSystemError> {
		self.manager.active().cancel_sheet(sheet_id).await
	}

	pub async fn pause_all(&self) {
		self.manager.active().pause_all().await;
	}

	pub async fn resume_all(&self) -> Result<(), JobSystemError> {
		self.manager.active().resume_all().await
	}

	pub async fn cancel_all(&self) {
		self.manager.active().cancel_all().await;
	}

	/// Purges a group wherever it is, cancelling it first if it is still active.
	///
	/// Returns `false` if no such group exists.
	#[instrument(skip(self), err)]
	pub async fn remove_group(&self, group_id: GroupId) -> Result<bool, JobSystemError> {
		if self.manager.completed().remove_group(group_id).await {
			return Ok(true);
		}

		if !self.manager.active().contains_group(group_id) {
			return Ok(false);
		}

		self.manager
			.active()
			.cancel_and_remove_group(group_id)
			.await
			.map(|()| true)
	}

	/// Purges a sheet wherever it is, cancelling it first if it is still active.
	///
	/// Returns `false` if no such sheet exists.
	#[instrument(skip(self), err)]
	pub async fn remove_sheet(&self, sheet_id: SheetId) -> Result<bool, JobSystemError> {
		if self.manager.completed().remove_sheet(sheet_id).await {
			return Ok(true);
		}

		if !self.manager.active().contains_sheet(sheet_id) {
			return Ok(false);
		}

		self.manager
			.active()
			.cancel_and_remove_sheet(sheet_id)
			.await
			.map(|()| true)
	}

	/// Purges every completed group, returning how many were removed.
	pub async fn clear_completed(&self) -> usize {
		self.manager.completed().clear_all().await
	}

	pub async fn get_job_logs(&self, sheet_id: SheetId) -> Result<Vec<JobLogEntry>, JobSystemError> {
		self.ctx
			.store
			.get_job_logs(sheet_id)
			.await
			.map_err(Into::into)
	}

	/// Gracefully shutdown the job system.
	///
	/// Running sheets are interrupted at their next checkpoint and stay paused, sheets that
	/// were still waiting for a worker stay pending and are dispatched again on next start.
	pub async fn shutdown(&self) {
		let never_started = self.task_system.shutdown().await;

		for sheet_id in never_started {
			if let Some(sheet) = self.manager.active().get_sheet(sheet_id) {
				sheet.set_dispatch_handle(None);
				self.ctx.persist_sheet(&sheet).await;
			}
		}

		info!("Job system gracefully shutdown");
	}
}
