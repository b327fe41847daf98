//!
//! # Task System
//!
//! A small library that runs dispatched task ids on a bounded pool of workers.
//!
//! The user brings a [`TaskRunner`] and pushes task ids through a [`TaskDispatcher`], the system
//! handles queueing and makes sure that:
//! - At most `workers_count` tasks run at the same time;
//! - A task id is handed to a worker only once while it is in flight, enqueueing it again is a no-op;
//! - A running task can be requeued, being pushed back to the queue as soon as its run returns;
//! - A queued task can be removed before any worker picks it up;
//! - When the system is shutdown, running tasks are interrupted through a cancellation token and
//!   the tasks that never started are given back, so the user can store them and re-dispatch later.
//!
//! ## Basic example
//!
//! ```
//! use std::sync::Arc;
//!
//! use sg_task_system::{TaskId, TaskRunner, TaskSystem};
//! use async_trait::async_trait;
//! use tokio_util::sync::CancellationToken;
//!
//! struct PrintRunner;
//!
//! #[async_trait]
//! impl TaskRunner for PrintRunner {
//!     async fn run(&self, task_id: TaskId, _interrupter: CancellationToken) {
//!         println!("running {task_id}");
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let system = TaskSystem::new(2);
//!     system.start(Arc::new(PrintRunner)).unwrap();
//!
//!     system.get_dispatcher().enqueue(TaskId::new_v4()).unwrap();
//!
//!     system.shutdown().await;
//! }
//! ```

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

mod error;
mod system;
mod task;
mod worker;

pub use error::Error as TaskSystemError;
pub use system::{Dispatcher as TaskDispatcher, System as TaskSystem};
pub use task::{DispatchHandle, TaskId, TaskRunner};
pub use worker::WorkerId;

pub use tokio_util::sync::CancellationToken;
