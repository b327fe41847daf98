use thiserror::Error;

use super::task::TaskId;

#[derive(Debug, Error)]
pub enum Error {
	#[error("task system is shutdown, refused to dispatch task <id='{0}'>")]
	Shutdown(TaskId),
	#[error("task system workers were already started")]
	AlreadyStarted,
}
