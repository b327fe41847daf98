use std::sync::Arc;

use tokio::{spawn, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, trace, Instrument};

use super::{
	system::{Dispatcher, QueuedTask},
	task::TaskRunner,
};

pub type WorkerId = usize;

#[instrument(name = "task_system_worker", skip(dispatcher, runner, cancel_token))]
pub(crate) fn spawn_worker(
	worker_id: WorkerId,
	dispatcher: Dispatcher,
	runner: Arc<dyn TaskRunner>,
	cancel_token: CancellationToken,
) -> JoinHandle<()> {
	spawn(
		async move {
			trace!("Worker starting...");
			run(&dispatcher, &runner, &cancel_token).await;
			info!("Worker gracefully shutdown");
		}
		.in_current_span(),
	)
}

async fn run(
	dispatcher: &Dispatcher,
	runner: &Arc<dyn TaskRunner>,
	cancel_token: &CancellationToken,
) {
	let queue_rx = dispatcher.receiver();

	loop {
		let queued = tokio::select! {
			biased;

			() = cancel_token.cancelled() => {
				trace!("Worker received shutdown signal and will exit...");
				break;
			}

			res = queue_rx.recv() => match res {
				Ok(queued) => queued,
				Err(_) => {
					trace!("Task queue closed, worker will exit...");
					break;
				}
			},
		};

		if !dispatcher.claim(&queued) {
			trace!(task_id = %queued.task_id, handle = %queued.handle, "Skipping stale queue entry");
			continue;
		}

		let QueuedTask { task_id, handle } = queued;

		trace!(%task_id, %handle, "Worker picked up task");

		// Running on its own tokio task so a panicking runner doesn't take the worker with it
		if let Err(e) = spawn({
			let runner = Arc::clone(runner);
			let interrupter = cancel_token.child_token();
			async move { runner.run(task_id, interrupter).await }.in_current_span()
		})
		.await
		{
			if e.is_panic() {
				error!(%task_id, ?e, "Task runner panicked;");
			} else {
				error!(%task_id, ?e, "Task runner was aborted;");
			}
		}

		dispatcher.finish(task_id);
	}
}
