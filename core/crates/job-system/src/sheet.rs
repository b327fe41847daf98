use std::{
	path::{Path, PathBuf},
	sync::atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;
use sg_task_system::DispatchHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

use super::{
	signal::{LinkedCancellation, PauseSignal},
	status::SheetStatus,
	store::SheetState,
	GroupId, SheetId,
};

#[derive(Debug)]
struct SheetProgress {
	status: SheetStatus,
	current_row: usize,
	error_count: u64,
	error_message: Option<String>,
	dispatch_handle: Option<DispatchHandle>,
}

/// Consistent view of a sheet's counters, taken under a single lock.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetSnapshot {
	pub status: SheetStatus,
	pub current_row: usize,
	pub total_rows: usize,
	pub progress: f32,
	pub error_count: u64,
	pub error_message: Option<String>,
}

/// One worksheet turned into one generated document.
///
/// `(status, current_row, error_message)` only change together under the sheet lock, and at
/// most one execution may hold the sheet through [`JobSheet::try_begin_execution`].
#[derive(Debug)]
pub struct JobSheet {
	id: SheetId,
	group_id: GroupId,
	worksheet: String,
	output_path: PathBuf,
	total_rows: usize,
	progress: Mutex<SheetProgress>,
	executing: AtomicBool,
	removed: AtomicBool,
	cancel_token: CancellationToken,
	pause_signal: PauseSignal,
	pub(crate) persist_lock: tokio::sync::Mutex<()>,
}

impl JobSheet {
	#[must_use]
	pub fn new(
		group_id: GroupId,
		worksheet: impl Into<String>,
		output_path: impl Into<PathBuf>,
		total_rows: usize,
	) -> Self {
		Self::with_progress(
			Uuid::new_v4(),
			group_id,
			worksheet.into(),
			output_path.into(),
			total_rows,
			SheetProgress {
				status: SheetStatus::Pending,
				current_row: 0,
				error_count: 0,
				error_message: None,
				dispatch_handle: None,
			},
		)
	}

	/// Rebuilds a sheet from its persisted state.
	///
	/// Every status comes back as it was stored except `Running`: a sheet that was running
	/// when the process went down comes back as `Pending`, so it can be dispatched again. A
	/// paused one comes back with its pause signal armed.
	#[must_use]
	pub fn restore(state: &SheetState) -> Self {
		let status = match state.status {
			SheetStatus::Running => SheetStatus::Pending,
			status => status,
		};

		let sheet = Self::with_progress(
			state.id,
			state.group_id,
			state.worksheet.clone(),
			state.output_path.clone(),
			state.total_rows,
			SheetProgress {
				status,
				current_row: state.current_row.min(state.total_rows),
				error_count: state.error_count,
				error_message: state.error_message.clone(),
				dispatch_handle: state.dispatch_handle.map(DispatchHandle::from_raw),
			},
		);

		if status == SheetStatus::Paused {
			sheet.pause_signal.pause();
		}

		sheet
	}

	fn with_progress(
		id: SheetId,
		group_id: GroupId,
		worksheet: String,
		output_path: PathBuf,
		total_rows: usize,
		progress: SheetProgress,
	) -> Self {
		Self {
			id,
			group_id,
			worksheet,
			output_path,
			total_rows,
			progress: Mutex::new(progress),
			executing: AtomicBool::new(false),
			removed: AtomicBool::new(false),
			cancel_token: CancellationToken::new(),
			pause_signal: PauseSignal::new(),
			persist_lock: tokio::sync::Mutex::new(()),
		}
	}

	#[must_use]
	pub const fn id(&self) -> SheetId {
		self.id
	}

	#[must_use]
	pub const fn group_id(&self) -> GroupId {
		self.group_id
	}

	#[must_use]
	pub fn worksheet(&self) -> &str {
		&self.worksheet
	}

	#[must_use]
	pub fn output_path(&self) -> &Path {
		&self.output_path
	}

	#[must_use]
	pub const fn total_rows(&self) -> usize {
		self.total_rows
	}

	#[must_use]
	pub fn status(&self) -> SheetStatus {
		self.progress.lock().status
	}

	#[must_use]
	pub fn current_row(&self) -> usize {
		self.progress.lock().current_row
	}

	/// 1-based number of the next row to process
	#[must_use]
	pub fn next_row(&self) -> usize {
		self.current_row() + 1
	}

	#[must_use]
	pub fn error_count(&self) -> u64 {
		self.progress.lock().error_count
	}

	#[must_use]
	pub fn error_message(&self) -> Option<String> {
		self.progress.lock().error_message.clone()
	}

	#[must_use]
	pub fn dispatch_handle(&self) -> Option<DispatchHandle> {
		self.progress.lock().dispatch_handle
	}

	/// Percentage of processed rows, an empty sheet is either done or not started.
	#[must_use]
	pub fn progress(&self) -> f32 {
		let progress = self.progress.lock();
		percentage(progress.current_row, self.total_rows, progress.status)
	}

	#[must_use]
	pub fn snapshot(&self) -> SheetSnapshot {
		let progress = self.progress.lock();

		SheetSnapshot {
			status: progress.status,
			current_row: progress.current_row,
			total_rows: self.total_rows,
			progress: percentage(progress.current_row, self.total_rows, progress.status),
			error_count: progress.error_count,
			error_message: progress.error_message.clone(),
		}
	}

	#[must_use]
	pub fn is_executing(&self) -> bool {
		self.executing.load(Ordering::Acquire)
	}

	#[must_use]
	pub fn is_paused(&self) -> bool {
		self.pause_signal.is_paused()
	}

	/// Moves the sheet to `next` if the state machine allows it, replacing the error message.
	///
	/// Returns `false` and leaves the sheet untouched otherwise, which is what keeps a
	/// cancelled sheet cancelled no matter what its execution does afterwards.
	pub(crate) fn set_status(&self, next: SheetStatus, message: Option<String>) -> bool {
		let mut progress = self.progress.lock();

		if !progress.status.can_transition_to(next) {
			trace!(
				sheet_id = %self.id,
				from = ?progress.status,
				to = ?next,
				"Ignoring sheet status transition"
			);
			return false;
		}

		if progress.status != next {
			debug!(sheet_id = %self.id, from = ?progress.status, to = ?next, "Sheet status changed");
		}

		progress.status = next;
		progress.error_message = message;

		true
	}

	/// Records that rows up to `row` (1-based, inclusive) are done.
	pub(crate) fn update_progress(&self, row: usize) {
		let mut progress = self.progress.lock();
		progress.current_row = row.min(self.total_rows).max(progress.current_row);
	}

	pub(crate) fn register_row_error(&self) -> u64 {
		let mut progress = self.progress.lock();
		progress.error_count += 1;
		progress.error_count
	}

	pub(crate) fn set_dispatch_handle(&self, handle: Option<DispatchHandle>) {
		self.progress.lock().dispatch_handle = handle;
	}

	/// Claims the sheet for an execution, `false` if another execution already holds it.
	pub(crate) fn try_begin_execution(&self) -> bool {
		self.executing
			.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.is_ok()
	}

	pub(crate) fn end_execution(&self) {
		self.executing.store(false, Ordering::Release);
	}

	/// Once removed, nothing about this sheet is written to the store anymore.
	pub(crate) fn mark_removed(&self) {
		self.removed.store(true, Ordering::Release);
	}

	#[must_use]
	pub fn is_removed(&self) -> bool {
		self.removed.load(Ordering::Acquire)
	}

	pub(crate) fn request_pause(&self) -> bool {
		self.pause_signal.pause()
	}

	pub(crate) fn request_resume(&self) -> bool {
		self.pause_signal.resume()
	}

	pub(crate) fn request_cancel(&self) {
		self.cancel_token.cancel();
	}

	pub(crate) const fn pause_signal(&self) -> &PauseSignal {
		&self.pause_signal
	}

	pub(crate) fn linked_cancellation(&self, worker: CancellationToken) -> LinkedCancellation {
		LinkedCancellation::new(self.cancel_token.clone(), worker)
	}

	#[must_use]
	pub fn to_state(&self) -> SheetState {
		let progress = self.progress.lock();

		SheetState {
			id: self.id,
			group_id: self.group_id,
			worksheet: self.worksheet.clone(),
			output_path: self.output_path.clone(),
			current_row: progress.current_row,
			total_rows: self.total_rows,
			status: progress.status,
			error_count: progress.error_count,
			error_message: progress.error_message.clone(),
			dispatch_handle: progress.dispatch_handle.map(DispatchHandle::as_u64),
		}
	}
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn percentage(done: usize, total: usize, status: SheetStatus) -> f32 {
	if total == 0 {
		return if status == SheetStatus::Completed {
			100.0
		} else {
			0.0
		};
	}

	(done as f32 / total as f32 * 100.0).clamp(0.0, 100.0)
}
