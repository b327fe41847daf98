use std::fmt;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A unique identifier for a task using the [`uuid`](https://docs.rs/uuid) crate.
pub type TaskId = Uuid;

/// Identifies one particular dispatch of a task.
///
/// Every time a task id goes through [`Dispatcher::enqueue`](crate::TaskDispatcher::enqueue) or
/// [`Dispatcher::requeue`](crate::TaskDispatcher::requeue) and a new queue entry is created, it
/// receives a fresh handle. Handles are unique for the lifetime of a [`TaskSystem`](crate::TaskSystem)
/// and are meant to be stored by the user to correlate dashboards and requeues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct DispatchHandle(u64);

impl DispatchHandle {
	#[must_use]
	pub const fn from_raw(raw: u64) -> Self {
		Self(raw)
	}

	#[must_use]
	pub const fn as_u64(self) -> u64 {
		self.0
	}
}

impl fmt::Display for DispatchHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// The work executed by the task system workers for each dispatched task id.
///
/// The task system only knows about ids, the runner is responsible for resolving whatever
/// state is behind them. A runner must observe the received `interrupter` token at its own
/// safe points: it is canceled when the task system shuts down and workers wait for every
/// running task to return before finishing.
///
/// We're currently using the [`async_trait`](https://docs.rs/async-trait) crate to allow dyn async traits.
#[async_trait]
pub trait TaskRunner: Send + Sync + 'static {
	async fn run(&self, task_id: TaskId, interrupter: CancellationToken);
}
