use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use super::{
	status::{GroupStatus, SheetStatus},
	store::{JobLogEntry, LogLevel},
	GroupId, SheetId,
};

/// Everything subscribers get to know about jobs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum JobEvent {
	SheetProgress {
		sheet_id: SheetId,
		current_row: usize,
		total_rows: usize,
		progress: f32,
		error_count: u64,
		timestamp: DateTime<Utc>,
	},
	SheetStatus {
		sheet_id: SheetId,
		status: SheetStatus,
		message: Option<String>,
		timestamp: DateTime<Utc>,
	},
	SheetError {
		sheet_id: SheetId,
		message: String,
		timestamp: DateTime<Utc>,
	},
	GroupProgress {
		group_id: GroupId,
		progress: f32,
		error_count: u64,
		timestamp: DateTime<Utc>,
	},
	GroupStatus {
		group_id: GroupId,
		status: GroupStatus,
		timestamp: DateTime<Utc>,
	},
	Log {
		sheet_id: SheetId,
		level: LogLevel,
		message: String,
		timestamp: DateTime<Utc>,
		data: Option<serde_json::Value>,
	},
}

impl JobEvent {
	/// Id of the sheet or group this event is about.
	#[must_use]
	pub const fn job_id(&self) -> uuid::Uuid {
		match self {
			Self::SheetProgress { sheet_id, .. }
			| Self::SheetStatus { sheet_id, .. }
			| Self::SheetError { sheet_id, .. }
			| Self::Log { sheet_id, .. } => *sheet_id,
			Self::GroupProgress { group_id, .. } | Self::GroupStatus { group_id, .. } => *group_id,
		}
	}
}

/// Fire and forget fan out of [`JobEvent`]s.
///
/// Sending never waits: without subscribers events are dropped and a subscriber that falls
/// more than the channel capacity behind gets a `Lagged` error on its next receive.
#[derive(Debug, Clone)]
pub struct JobNotifier {
	chan: broadcast::Sender<JobEvent>,
}

impl JobNotifier {
	#[must_use]
	pub fn new(capacity: usize) -> Self {
		Self {
			chan: broadcast::channel(capacity.max(1)).0,
		}
	}

	#[must_use]
	pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
		self.chan.subscribe()
	}

	fn emit(&self, event: JobEvent) {
		if self.chan.receiver_count() > 0 && self.chan.send(event).is_err() {
			trace!("All job event subscribers went away");
		}
	}

	pub fn notify_job_progress(
		&self,
		sheet_id: SheetId,
		current_row: usize,
		total_rows: usize,
		progress: f32,
		error_count: u64,
	) {
		self.emit(JobEvent::SheetProgress {
			sheet_id,
			current_row,
			total_rows,
			progress,
			error_count,
			timestamp: Utc::now(),
		});
	}

	pub fn notify_job_status_changed(
		&self,
		sheet_id: SheetId,
		status: SheetStatus,
		message: Option<String>,
	) {
		self.emit(JobEvent::SheetStatus {
			sheet_id,
			status,
			message,
			timestamp: Utc::now(),
		});
	}

	pub fn notify_job_error(&self, sheet_id: SheetId, message: impl Into<String>) {
		self.emit(JobEvent::SheetError {
			sheet_id,
			message: message.into(),
			timestamp: Utc::now(),
		});
	}

	pub fn notify_group_progress(&self, group_id: GroupId, progress: f32, error_count: u64) {
		self.emit(JobEvent::GroupProgress {
			group_id,
			progress,
			error_count,
			timestamp: Utc::now(),
		});
	}

	pub fn notify_group_status_changed(&self, group_id: GroupId, status: GroupStatus) {
		self.emit(JobEvent::GroupStatus {
			group_id,
			status,
			timestamp: Utc::now(),
		});
	}

	pub fn notify_log(&self, sheet_id: SheetId, entry: JobLogEntry) {
		let JobLogEntry {
			level,
			message,
			timestamp,
			data,
		} = entry;

		self.emit(JobEvent::Log {
			sheet_id,
			level,
			message,
			timestamp,
			data,
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn sending_without_subscribers_is_fine() {
		let notifier = JobNotifier::new(4);
		notifier.notify_job_error(SheetId::new_v4(), "nobody is listening");
	}

	#[tokio::test]
	async fn every_subscriber_gets_every_event() {
		let notifier = JobNotifier::new(4);
		let mut first = notifier.subscribe();
		let mut second = notifier.subscribe();

		let group_id = GroupId::new_v4();
		notifier.notify_group_status_changed(group_id, GroupStatus::Running);

		for rx in [&mut first, &mut second] {
			let event = rx.recv().await.unwrap();
			assert_eq!(event.job_id(), group_id);
			assert!(matches!(
				event,
				JobEvent::GroupStatus {
					status: GroupStatus::Running,
					..
				}
			));
		}
	}

	#[tokio::test]
	async fn slow_subscriber_lags_instead_of_blocking() {
		let notifier = JobNotifier::new(2);
		let mut rx = notifier.subscribe();
		let sheet_id = SheetId::new_v4();

		for row in 1..=5 {
			notifier.notify_job_progress(sheet_id, row, 5, 20.0 * row as f32, 0);
		}

		assert!(matches!(
			rx.recv().await,
			Err(broadcast::error::RecvError::Lagged(3))
		));
		assert!(matches!(
			rx.recv().await.unwrap(),
			JobEvent::SheetProgress { current_row: 4, .. }
		));
	}
}
