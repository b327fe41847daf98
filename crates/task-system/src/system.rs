use std::{
	collections::{hash_map::Entry, HashMap},
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc,
	},
};

use async_channel as chan;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{
	error::Error,
	task::{DispatchHandle, TaskId, TaskRunner},
	worker::spawn_worker,
};

/// The central unit of the task system, owning the workers and the shared queue.
///
/// The system is built in two steps so the user can hand out [`Dispatcher`]s (and even enqueue
/// work) before the [`TaskRunner`] exists: [`System::new`] creates the queue and
/// [`System::start`] spawns the workers.
pub struct System {
	workers_count: usize,
	dispatcher: Dispatcher,
	cancel_token: CancellationToken,
	handles: Mutex<Option<Vec<JoinHandle<()>>>>,
	started: Mutex<bool>,
}

impl System {
	/// Creates a task system that will run at most `workers_count` tasks at the same time.
	///
	/// A count of zero falls back to the available parallelism of the machine.
	#[must_use]
	pub fn new(workers_count: usize) -> Self {
		let workers_count = if workers_count == 0 {
			std::thread::available_parallelism().map_or_else(
				|e| {
					error!(?e, "Failed to get available parallelism in the task system;");
					1
				},
				std::num::NonZeroUsize::get,
			)
		} else {
			workers_count
		};

		let (queue_tx, queue_rx) = chan::unbounded();

		Self {
			workers_count,
			dispatcher: Dispatcher {
				inner: Arc::new(DispatcherInner {
					queue_tx,
					queue_rx,
					entries: Mutex::new(HashMap::new()),
					last_handle: AtomicU64::new(0),
				}),
			},
			cancel_token: CancellationToken::new(),
			handles: Mutex::new(Some(Vec::new())),
			started: Mutex::new(false),
		}
	}

	#[must_use]
	pub const fn workers_count(&self) -> usize {
		self.workers_count
	}

	#[must_use]
	pub fn get_dispatcher(&self) -> Dispatcher {
		self.dispatcher.clone()
	}

	/// Spawns the workers, each one pulling task ids from the shared queue and handing them to
	/// `runner`. Tasks enqueued before this call are picked up right away.
	pub fn start(&self, runner: Arc<dyn TaskRunner>) -> Result<(), Error> {
		let mut started = self.started.lock();
		if *started {
			return Err(Error::AlreadyStarted);
		}

		let mut maybe_handles = self.handles.lock();
		let Some(handles) = maybe_handles.as_mut() else {
			warn!("Trying to start a task system that was already shutdown");
			return Ok(());
		};

		handles.extend((0..self.workers_count).map(|worker_id| {
			spawn_worker(
				worker_id,
				self.dispatcher.clone(),
				Arc::clone(&runner),
				self.cancel_token.clone(),
			)
		}));

		*started = true;

		info!(workers_count = self.workers_count, "Task system started");

		Ok(())
	}

	/// Gracefully shutdown the task system.
	///
	/// Running tasks receive a cancellation through their interrupter token and we wait for
	/// them to return. Tasks that were still waiting on the queue are given back to the caller,
	/// so they can be stored and re-dispatched later.
	pub async fn shutdown(&self) -> Vec<TaskId> {
		let Some(handles) = self.handles.lock().take() else {
			warn!("Trying to shutdown the tasks system that was already shutdown");
			return vec![];
		};

		self.cancel_token.cancel();
		self.dispatcher.inner.queue_tx.close();

		for handle in handles {
			if let Err(e) = handle.await {
				error!(?e, "Task system worker failed to shutdown;");
			}
		}

		let never_started = self.dispatcher.drain();

		info!(
			never_started_count = never_started.len(),
			"Task system gracefully shutdown"
		);

		never_started
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
	Queued,
	Running { requeue: Option<DispatchHandle> },
}

#[derive(Debug)]
struct QueueEntry {
	handle: DispatchHandle,
	state: EntryState,
}

#[derive(Debug)]
pub(crate) struct QueuedTask {
	pub(crate) task_id: TaskId,
	pub(crate) handle: DispatchHandle,
}

#[derive(Debug)]
struct DispatcherInner {
	queue_tx: chan::Sender<QueuedTask>,
	queue_rx: chan::Receiver<QueuedTask>,
	entries: Mutex<HashMap<TaskId, QueueEntry>>,
	last_handle: AtomicU64,
}

/// Cheap to clone handle used to push task ids into the task system queue.
///
/// A task id is handed to a worker at most once while it is in flight (queued or running):
/// enqueueing an id that is already in flight returns the existing [`DispatchHandle`].
#[derive(Debug, Clone)]
pub struct Dispatcher {
	inner: Arc<DispatcherInner>,
}

impl Dispatcher {
	fn next_handle(&self) -> DispatchHandle {
		DispatchHandle::from_raw(self.inner.last_handle.fetch_add(1, Ordering::Relaxed) + 1)
	}

	fn push(&self, task_id: TaskId, handle: DispatchHandle) -> Result<(), Error> {
		self.inner
			.queue_tx
			.try_send(QueuedTask { task_id, handle })
			.map_err(|_| Error::Shutdown(task_id))
	}

	/// Enqueues a task id, unless it is already queued or running.
	pub fn enqueue(&self, task_id: TaskId) -> Result<DispatchHandle, Error> {
		let mut entries = self.inner.entries.lock();

		match entries.entry(task_id) {
			Entry::Occupied(entry) => {
				let handle = entry.get().handle;
				trace!(%task_id, %handle, "Task already in flight, not enqueueing it again");
				Ok(handle)
			}
			Entry::Vacant(entry) => {
				let handle = self.next_handle();
				self.push(task_id, handle)?;
				entry.insert(QueueEntry {
					handle,
					state: EntryState::Queued,
				});
				trace!(%task_id, %handle, "Task enqueued");
				Ok(handle)
			}
		}
	}

	/// Enqueues a task id again even if it is currently running, in which case it will be
	/// queued as soon as the current run returns.
	pub fn requeue(&self, task_id: TaskId) -> Result<DispatchHandle, Error> {
		let mut entries = self.inner.entries.lock();

		match entries.entry(task_id) {
			Entry::Occupied(mut entry) => match entry.get().state {
				EntryState::Queued => Ok(entry.get().handle),
				EntryState::Running {
					requeue: Some(handle),
				} => Ok(handle),
				EntryState::Running { requeue: None } => {
					if self.inner.queue_tx.is_closed() {
						return Err(Error::Shutdown(task_id));
					}
					let handle = self.next_handle();
					entry.get_mut().state = EntryState::Running {
						requeue: Some(handle),
					};
					debug!(%task_id, %handle, "Task is running, will be requeued when it returns");
					Ok(handle)
				}
			},
			Entry::Vacant(entry) => {
				let handle = self.next_handle();
				self.push(task_id, handle)?;
				entry.insert(QueueEntry {
					handle,
					state: EntryState::Queued,
				});
				debug!(%task_id, %handle, "Task requeued");
				Ok(handle)
			}
		}
	}

	/// Removes a task id that is still waiting on the queue. Returns `false` if the task isn't
	/// queued, a running task can only be stopped by its runner.
	pub fn remove(&self, task_id: TaskId) -> bool {
		let mut entries = self.inner.entries.lock();

		let Some(entry) = entries.get_mut(&task_id) else {
			return false;
		};

		if let EntryState::Running { requeue } = &mut entry.state {
			// Only the pending requeue can be dropped
			return requeue.take().is_some();
		}

		entries.remove(&task_id);
		trace!(%task_id, "Removed queued task");

		true
	}

	#[must_use]
	pub fn is_running(&self, task_id: &TaskId) -> bool {
		matches!(
			self.inner.entries.lock().get(task_id),
			Some(QueueEntry {
				state: EntryState::Running { .. },
				..
			})
		)
	}

	#[must_use]
	pub fn in_flight_count(&self) -> usize {
		self.inner.entries.lock().len()
	}

	pub(crate) fn receiver(&self) -> chan::Receiver<QueuedTask> {
		self.inner.queue_rx.clone()
	}

	/// Marks a popped entry as running, returning `false` for stale entries (removed or
	/// superseded by a newer dispatch of the same task id).
	pub(crate) fn claim(&self, QueuedTask { task_id, handle }: &QueuedTask) -> bool {
		let mut entries = self.inner.entries.lock();

		match entries.get_mut(task_id) {
			Some(entry) if entry.handle == *handle && entry.state == EntryState::Queued => {
				entry.state = EntryState::Running { requeue: None };
				true
			}
			_ => false,
		}
	}

	/// Releases a task id after its run returned, pushing it back to the queue if a requeue
	/// was requested in the meantime.
	pub(crate) fn finish(&self, task_id: TaskId) {
		let mut entries = self.inner.entries.lock();

		let Some(entry) = entries.get_mut(&task_id) else {
			return;
		};

		if let EntryState::Running {
			requeue: Some(handle),
		} = entry.state
		{
			if self.push(task_id, handle).is_ok() {
				entry.handle = handle;
				entry.state = EntryState::Queued;
				return;
			}
			warn!(%task_id, "Task system is shutting down, dropping pending requeue");
		}

		entries.remove(&task_id);
	}

	fn drain(&self) -> Vec<TaskId> {
		let mut entries = self.inner.entries.lock();
		let mut never_started = Vec::new();

		while let Ok(QueuedTask { task_id, handle }) = self.inner.queue_rx.try_recv() {
			if matches!(
				entries.get(&task_id),
				Some(entry) if entry.handle == handle && entry.state == EntryState::Queued
			) {
				never_started.push(task_id);
			}
		}

		entries.clear();

		never_started
	}
}
