use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a single sheet job.
///
/// `Pending -> Running -> {Completed | Failed | Cancelled}`, `Running <-> Paused` and
/// `Paused -> Cancelled`. A pending sheet can also be cancelled before any worker picks it up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SheetStatus {
	Pending,
	Running,
	Paused,
	Completed,
	Failed,
	Cancelled,
}

impl SheetStatus {
	#[must_use]
	pub const fn is_terminal(self) -> bool {
		matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
	}

	#[must_use]
	pub const fn is_active(self) -> bool {
		!self.is_terminal()
	}

	/// Whether the state machine allows going from `self` to `next`. Staying on the same
	/// status is always allowed for non terminal statuses.
	///
	/// Idle sheets (pending or paused) may fail without running when their workbook can't be
	/// reopened after a restart.
	#[must_use]
	pub const fn can_transition_to(self, next: Self) -> bool {
		use SheetStatus::{Cancelled, Completed, Failed, Paused, Pending, Running};

		matches!(
			(self, next),
			(Pending, Pending | Running | Failed | Cancelled)
				| (Running, Running | Paused | Completed | Failed | Cancelled)
				| (Paused, Paused | Running | Cancelled | Failed)
		)
	}
}

impl fmt::Display for SheetStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(self, f)
	}
}

/// Aggregated status of a group, always derived from its sheets through
/// [`GroupStatus::from_sheets`] except for the initial `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupStatus {
	Pending,
	Running,
	Paused,
	Completed,
	Failed,
	Cancelled,
}

impl GroupStatus {
	#[must_use]
	pub const fn is_terminal(self) -> bool {
		matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
	}

	#[must_use]
	pub const fn is_active(self) -> bool {
		!self.is_terminal()
	}

	/// Precedence, first match wins:
	/// 1. any sheet failed: `Failed`;
	/// 2. every sheet terminal: `Cancelled` if any sheet was cancelled, else `Completed`;
	/// 3. any sheet running: `Running`;
	/// 4. any sheet paused: `Paused`;
	/// 5. `Pending`.
	///
	/// A group without sheets is considered `Pending`.
	pub fn from_sheets(statuses: impl IntoIterator<Item = SheetStatus>) -> Self {
		let mut any = false;
		let mut any_failed = false;
		let mut any_active = false;
		let mut any_cancelled = false;
		let mut any_running = false;
		let mut any_paused = false;

		for status in statuses {
			any = true;
			match status {
				SheetStatus::Failed => any_failed = true,
				SheetStatus::Cancelled => any_cancelled = true,
				SheetStatus::Completed => {}
				SheetStatus::Running => {
					any_active = true;
					any_running = true;
				}
				SheetStatus::Paused => {
					any_active = true;
					any_paused = true;
				}
				SheetStatus::Pending => any_active = true,
			}
		}

		if !any {
			Self::Pending
		} else if any_failed {
			Self::Failed
		} else if !any_active {
			if any_cancelled {
				Self::Cancelled
			} else {
				Self::Completed
			}
		} else if any_running {
			Self::Running
		} else if any_paused {
			Self::Paused
		} else {
			Self::Pending
		}
	}
}

impl fmt::Display for GroupStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(self, f)
	}
}
