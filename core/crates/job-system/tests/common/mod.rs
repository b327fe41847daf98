#![allow(dead_code)]

use sg_core_job_system::{
	Checkpoint, CheckpointStage, JobGroup, JobSheet, JobSystem, RowContext, RowData, RowOutcome,
	RowProcessError, RowProcessor, Workbook, WorkbookError, WorkbookReader,
};

use std::{
	collections::{HashMap, HashSet},
	path::{Path, PathBuf},
	sync::{
		atomic::{AtomicBool, AtomicUsize, Ordering},
		Arc,
	},
	time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::{
	sync::{mpsc, Notify},
	time::{sleep, timeout},
};

pub const WAIT: Duration = Duration::from_secs(10);

/// In memory workbook, every row has a `Name` and a `Row` column.
#[derive(Debug)]
pub struct FakeWorkbook {
	path: PathBuf,
	worksheets: Vec<(String, usize)>,
}

impl FakeWorkbook {
	pub fn new(path: impl Into<PathBuf>, worksheets: &[(&str, usize)]) -> Arc<Self> {
		Arc::new(Self {
			path: path.into(),
			worksheets: worksheets
				.iter()
				.map(|(name, rows)| ((*name).to_string(), *rows))
				.collect(),
		})
	}
}

impl Workbook for FakeWorkbook {
	fn path(&self) -> &Path {
		&self.path
	}

	fn worksheet_names(&self) -> Vec<String> {
		self.worksheets.iter().map(|(name, _)| name.clone()).collect()
	}

	fn row_count(&self, worksheet: &str) -> Result<usize, WorkbookError> {
		self.worksheets
			.iter()
			.find(|(name, _)| name == worksheet)
			.map(|(_, rows)| *rows)
			.ok_or_else(|| WorkbookError::WorksheetNotFound(worksheet.to_string()))
	}

	fn get_row(&self, worksheet: &str, row: usize) -> Result<RowData, WorkbookError> {
		let total_rows = self.row_count(worksheet)?;
		if row == 0 || row > total_rows {
			return Err(WorkbookError::RowOutOfRange {
				worksheet: worksheet.to_string(),
				row,
				total_rows,
			});
		}

		Ok(HashMap::from([
			("Name".to_string(), format!("{worksheet}-{row}")),
			("Row".to_string(), row.to_string()),
		]))
	}
}

#[derive(Debug, Default)]
pub struct FakeReader {
	workbooks: Mutex<HashMap<PathBuf, Arc<FakeWorkbook>>>,
}

impl FakeReader {
	pub fn with(workbook: Arc<FakeWorkbook>) -> Arc<Self> {
		let reader = Self::default();
		reader
			.workbooks
			.lock()
			.insert(workbook.path.clone(), workbook);
		Arc::new(reader)
	}
}

impl WorkbookReader for FakeReader {
	fn open(&self, path: &Path) -> Result<Arc<dyn Workbook>, WorkbookError> {
		self.workbooks
			.lock()
			.get(path)
			.map(|workbook| Arc::clone(workbook) as Arc<dyn Workbook>)
			.ok_or_else(|| WorkbookError::Open {
				path: path.into(),
				reason: "no such file".to_string(),
			})
	}
}

/// Stops the processor once on `row` until the test releases it.
#[derive(Debug)]
pub struct RowHook {
	pub row: usize,
	reached_tx: mpsc::UnboundedSender<usize>,
	release: Arc<Notify>,
	fired: AtomicBool,
}

impl RowHook {
	pub fn new(row: usize) -> (Self, mpsc::UnboundedReceiver<usize>, Arc<Notify>) {
		let (reached_tx, reached_rx) = mpsc::unbounded_channel();
		let release = Arc::new(Notify::new());

		(
			Self {
				row,
				reached_tx,
				release: Arc::clone(&release),
				fired: AtomicBool::new(false),
			},
			reached_rx,
			release,
		)
	}
}

/// Row processor driven by the test: records every processed row and can be told to warn,
/// blow up, stall or stop on given rows.
#[derive(Debug, Default)]
pub struct ScriptedProcessor {
	pub hook: Option<RowHook>,
	pub warn_rows: HashSet<usize>,
	/// Output file name whose first row fails the whole sheet
	pub fatal_output: Option<String>,
	pub delay: Option<Duration>,
	pub processed: Mutex<Vec<(PathBuf, usize)>>,
	pub running: AtomicUsize,
	pub max_running: AtomicUsize,
}

impl ScriptedProcessor {
	pub fn rows_for(&self, output_path: &Path) -> Vec<usize> {
		self.processed
			.lock()
			.iter()
			.filter(|(path, _)| path == output_path)
			.map(|(_, row)| *row)
			.collect()
	}

	pub fn processed_count(&self) -> usize {
		self.processed.lock().len()
	}
}

#[async_trait]
impl RowProcessor for ScriptedProcessor {
	async fn process(
		&self,
		ctx: RowContext<'_>,
		checkpoint: &dyn Checkpoint,
	) -> Result<RowOutcome, RowProcessError> {
		checkpoint
			.checkpoint(CheckpointStage::BeforeDocumentMutation)
			.await?;

		if let Some(hook) = &self.hook {
			if hook.row == ctx.row_number && !hook.fired.swap(true, Ordering::SeqCst) {
				hook.reached_tx.send(ctx.row_number).ok();
				hook.release.notified().await;
			}
		}

		let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
		self.max_running.fetch_max(now_running, Ordering::SeqCst);

		if let Some(delay) = self.delay {
			tokio::select! {
				() = sleep(delay) => {}
				kind = checkpoint.cancellation().cancelled() => {
					self.running.fetch_sub(1, Ordering::SeqCst);
					return Err(kind.into());
				}
			}
		}

		self.running.fetch_sub(1, Ordering::SeqCst);

		let is_fatal = self.fatal_output.as_deref().is_some_and(|name| {
			ctx.output_path
				.file_name()
				.is_some_and(|file_name| file_name == name)
		});
		if is_fatal {
			return Err(RowProcessError::Fatal("template is corrupted".to_string()));
		}

		self.processed
			.lock()
			.push((ctx.output_path.to_path_buf(), ctx.row_number));

		checkpoint
			.checkpoint(CheckpointStage::AfterDocumentMutation)
			.await?;

		let errors = if self.warn_rows.contains(&ctx.row_number) {
			vec![format!("image unreachable for {}", ctx.row["Name"])]
		} else {
			vec![]
		};

		Ok(RowOutcome {
			text_replacements: ctx.text_rules.len(),
			image_replacements: 0,
			image_errors: errors.len(),
			errors,
		})
	}
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
	timeout(WAIT, async {
		while !condition() {
			sleep(Duration::from_millis(10)).await;
		}
	})
	.await
	.expect("condition not met in time");
}

pub async fn wait_for_sheet(
	system: &JobSystem,
	sheet_id: uuid::Uuid,
	status: sg_core_job_system::SheetStatus,
) -> Arc<JobSheet> {
	wait_until(|| {
		system
			.get_sheet(sheet_id)
			.is_some_and(|sheet| sheet.status() == status)
	})
	.await;

	system.get_sheet(sheet_id).expect("sheet vanished")
}

pub async fn wait_for_group(
	system: &JobSystem,
	group_id: uuid::Uuid,
	status: sg_core_job_system::GroupStatus,
) -> Arc<JobGroup> {
	wait_until(|| {
		system
			.get_group(group_id)
			.is_some_and(|group| group.status() == status)
	})
	.await;

	system.get_group(group_id).expect("group vanished")
}
