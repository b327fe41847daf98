use sg_task_system::{DispatchHandle, TaskDispatcher, TaskSystemError};

use super::SheetId;

/// Queue feeding sheet ids to the executors.
///
/// Implementations must hand out a given id only once while it is queued or running, so a
/// sheet never has two executions at the same time.
pub trait JobDispatcher: Send + Sync + 'static {
	/// Queues the sheet, if it is currently running it will be dispatched again as soon as the
	/// current execution returns.
	fn requeue(&self, sheet_id: SheetId) -> Result<DispatchHandle, TaskSystemError>;

	/// Drops a queued dispatch that didn't start yet.
	fn remove(&self, sheet_id: SheetId) -> bool;
}

impl JobDispatcher for TaskDispatcher {
	fn requeue(&self, sheet_id: SheetId) -> Result<DispatchHandle, TaskSystemError> {
		Self::requeue(self, sheet_id)
	}

	fn remove(&self, sheet_id: SheetId) -> bool {
		Self::remove(self, sheet_id)
	}
}
