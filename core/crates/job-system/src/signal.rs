use std::fmt;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Which side of a [`LinkedCancellation`] fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptionKind {
	/// The sheet itself was cancelled by a control call
	Cancelled,
	/// The worker running the sheet is going away, usually a task system shutdown
	Shutdown,
}

impl fmt::Display for InterruptionKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Cancelled => write!(f, "cancelled"),
			Self::Shutdown => write!(f, "shutdown"),
		}
	}
}

impl std::error::Error for InterruptionKind {}

/// Merges the cancellation handed by a worker with the sheet's own cancellation, firing as
/// soon as any of them fires.
#[derive(Debug, Clone)]
pub struct LinkedCancellation {
	sheet: CancellationToken,
	worker: CancellationToken,
}

impl LinkedCancellation {
	#[must_use]
	pub const fn new(sheet: CancellationToken, worker: CancellationToken) -> Self {
		Self { sheet, worker }
	}

	#[must_use]
	pub fn is_cancelled(&self) -> bool {
		self.interruption().is_some()
	}

	/// The sheet cancellation takes precedence when both fired.
	#[must_use]
	pub fn interruption(&self) -> Option<InterruptionKind> {
		if self.sheet.is_cancelled() {
			Some(InterruptionKind::Cancelled)
		} else if self.worker.is_cancelled() {
			Some(InterruptionKind::Shutdown)
		} else {
			None
		}
	}

	pub async fn cancelled(&self) -> InterruptionKind {
		tokio::select! {
			biased;
			() = self.sheet.cancelled() => InterruptionKind::Cancelled,
			() = self.worker.cancelled() => InterruptionKind::Shutdown,
		}
	}
}

/// Single slot cooperative gate checked by the row loop.
///
/// Only the current state matters: pausing twice is the same as pausing once and a resume
/// releases every waiter at once.
#[derive(Debug)]
pub struct PauseSignal {
	armed: watch::Sender<bool>,
}

impl Default for PauseSignal {
	fn default() -> Self {
		Self::new()
	}
}

impl PauseSignal {
	#[must_use]
	pub fn new() -> Self {
		Self {
			armed: watch::Sender::new(false),
		}
	}

	/// Arms the signal, returning `false` if it was already armed.
	pub fn pause(&self) -> bool {
		!self.armed.send_replace(true)
	}

	/// Disarms the signal and wakes up any waiter, returning `false` if it wasn't armed.
	pub fn resume(&self) -> bool {
		self.armed.send_replace(false)
	}

	#[must_use]
	pub fn is_paused(&self) -> bool {
		*self.armed.borrow()
	}

	/// Blocks while the signal is armed.
	///
	/// Returns right away if the signal isn't armed, and returns the interruption if
	/// `cancellation` fires while waiting.
	pub async fn wait_if_paused(
		&self,
		cancellation: &LinkedCancellation,
	) -> Result<(), InterruptionKind> {
		let mut armed_rx = self.armed.subscribe();

		loop {
			if !*armed_rx.borrow_and_update() {
				return Ok(());
			}

			tokio::select! {
				biased;

				kind = cancellation.cancelled() => return Err(kind),

				res = armed_rx.changed() => {
					if res.is_err() {
						// The sender lives as long as `self`, so this is unreachable in practice
						return Ok(());
					}
				}
			}
		}
	}
}
