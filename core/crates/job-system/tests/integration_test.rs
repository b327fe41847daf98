use sg_core_job_system::{
	store::{GroupState, SheetState},
	CreateGroupRequest, FileJobStateStore, GroupStatus, JobStateStore, JobSystem, JobSystemConfig,
	JobSystemError, LogLevel, MemoryJobStateStore, SheetStatus, TextRule,
};

use std::{
	collections::HashSet,
	path::{Path, PathBuf},
	sync::{atomic::Ordering, Arc},
	time::Duration,
};

use chrono::Utc;
use tempfile::{tempdir, TempDir};
use tokio::fs;
use tracing_test::traced_test;
use uuid::Uuid;

mod common;

use common::{
	wait_for_group, wait_for_sheet, wait_until, FakeReader, FakeWorkbook, RowHook,
	ScriptedProcessor,
};

const WORKBOOK: &str = "/data/students.xlsx";

struct TestEnv {
	dir: TempDir,
	template: PathBuf,
	output: PathBuf,
}

impl TestEnv {
	async fn new() -> Self {
		let dir = tempdir().unwrap();
		let template = dir.path().join("template.pptx");
		fs::write(&template, b"template").await.unwrap();
		let output = dir.path().join("out");

		Self {
			dir,
			template,
			output,
		}
	}

	fn config(&self, max_concurrent_jobs: usize) -> JobSystemConfig {
		JobSystemConfig {
			max_concurrent_jobs,
			..JobSystemConfig::default_with_dir(self.dir.path().to_path_buf())
		}
	}

	fn request(&self, sheet_names: &[&str]) -> CreateGroupRequest {
		CreateGroupRequest {
			template_path: self.template.clone(),
			spreadsheet_path: PathBuf::from(WORKBOOK),
			output_path: self.output.clone(),
			sheet_names: sheet_names.iter().map(ToString::to_string).collect(),
			text_rules: vec![TextRule {
				pattern: "{{name}}".to_string(),
				columns: vec!["Name".to_string()],
			}],
			image_rules: vec![],
		}
	}

	async fn system(
		&self,
		max_concurrent_jobs: usize,
		store: Arc<dyn JobStateStore>,
		worksheets: &[(&str, usize)],
		processor: Arc<ScriptedProcessor>,
	) -> JobSystem {
		JobSystem::new(
			self.config(max_concurrent_jobs),
			store,
			FakeReader::with(FakeWorkbook::new(WORKBOOK, worksheets)),
			processor,
		)
		.await
		.unwrap()
	}
}

fn memory_store() -> Arc<MemoryJobStateStore> {
	Arc::new(MemoryJobStateStore::new(100))
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn group_runs_to_completion() {
	let env = TestEnv::new().await;
	let processor = Arc::new(ScriptedProcessor::default());
	let system = env
		.system(2, memory_store(), &[("Sheet1", 3), ("Sheet2", 5)], Arc::clone(&processor))
		.await;

	let (group_id, sheet_ids) = system.create_group(env.request(&[])).await.unwrap();
	assert_eq!(sheet_ids.len(), 2);
	assert_eq!(
		system.get_group(group_id).unwrap().status(),
		GroupStatus::Pending
	);

	system.start_group(group_id).await.unwrap();

	let group = wait_for_group(&system, group_id, GroupStatus::Completed).await;
	wait_until(|| system.manager().completed().contains_group(group_id)).await;

	assert!(!system.manager().active().contains_group(group_id));
	assert!((group.progress() - 100.0).abs() < f32::EPSILON);
	assert_eq!(processor.processed_count(), 8);

	for sheet in group.sheets() {
		assert_eq!(sheet.status(), SheetStatus::Completed);
		assert_eq!(sheet.current_row(), sheet.total_rows());
		assert!(fs::try_exists(sheet.output_path()).await.unwrap());
		assert_eq!(
			processor.rows_for(sheet.output_path()),
			(1..=sheet.total_rows()).collect::<Vec<_>>()
		);
	}

	system.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn pause_and_resume_continue_at_the_next_row() {
	let env = TestEnv::new().await;
	let (hook, mut reached_rx, release) = RowHook::new(4);
	let processor = Arc::new(ScriptedProcessor {
		hook: Some(hook),
		..Default::default()
	});
	let system = env
		.system(1, memory_store(), &[("Sheet1", 10)], Arc::clone(&processor))
		.await;

	let (group_id, sheet_ids) = system.create_group(env.request(&["Sheet1"])).await.unwrap();
	let sheet_id = sheet_ids[0];
	system.start_group(group_id).await.unwrap();

	assert_eq!(reached_rx.recv().await, Some(4));
	system.pause_sheet(sheet_id).await.unwrap();
	release.notify_one();

	let sheet = wait_for_sheet(&system, sheet_id, SheetStatus::Paused).await;
	assert_eq!(sheet.current_row(), 4);
	assert!((sheet.progress() - 40.0).abs() < f32::EPSILON);
	wait_for_group(&system, group_id, GroupStatus::Paused).await;

	// Stays put while paused
	tokio::time::sleep(Duration::from_millis(100)).await;
	assert_eq!(processor.processed_count(), 4);

	system.resume_sheet(sheet_id).await.unwrap();

	let sheet = wait_for_sheet(&system, sheet_id, SheetStatus::Completed).await;
	assert_eq!(sheet.current_row(), 10);
	assert!((sheet.progress() - 100.0).abs() < f32::EPSILON);
	assert_eq!(
		processor.rows_for(sheet.output_path()),
		(1..=10).collect::<Vec<_>>()
	);

	system.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn unknown_worksheet_registers_nothing() {
	let env = TestEnv::new().await;
	let store = memory_store();
	let system = env
		.system(
			1,
			Arc::clone(&store) as Arc<dyn JobStateStore>,
			&[("Sheet1", 2), ("Sheet2", 2), ("Sheet3", 2)],
			Arc::new(ScriptedProcessor::default()),
		)
		.await;

	let res = system.create_group(env.request(&["Sheet1", "Sheet9"])).await;
	assert!(matches!(res, Err(JobSystemError::WorksheetNotFound(name)) if name == "Sheet9"));

	assert!(system.get_all_groups().is_empty());
	assert!(store.get_all_groups().await.unwrap().is_empty());

	system.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn empty_output_path_is_rejected() {
	let env = TestEnv::new().await;
	let system = env
		.system(
			1,
			memory_store(),
			&[("Sheet1", 2)],
			Arc::new(ScriptedProcessor::default()),
		)
		.await;

	let mut request = env.request(&[]);
	request.output_path = PathBuf::from("  ");

	assert!(matches!(
		system.create_group(request).await,
		Err(JobSystemError::EmptyOutputPath)
	));
	assert!(system.get_all_groups().is_empty());

	system.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn cancel_is_terminal() {
	let env = TestEnv::new().await;
	let (hook, mut reached_rx, release) = RowHook::new(2);
	let processor = Arc::new(ScriptedProcessor {
		hook: Some(hook),
		..Default::default()
	});
	let system = env
		.system(1, memory_store(), &[("Sheet1", 5)], Arc::clone(&processor))
		.await;

	let (group_id, sheet_ids) = system.create_group(env.request(&[])).await.unwrap();
	let sheet_id = sheet_ids[0];
	system.start_group(group_id).await.unwrap();

	assert_eq!(reached_rx.recv().await, Some(2));
	system.cancel_sheet(sheet_id).await.unwrap();
	release.notify_one();

	let sheet = wait_for_sheet(&system, sheet_id, SheetStatus::Cancelled).await;
	wait_until(|| !sheet.is_executing()).await;

	// Nothing brings it back
	assert!(system.resume_sheet(sheet_id).await.is_err());
	assert_eq!(sheet.status(), SheetStatus::Cancelled);
	assert!(sheet.current_row() < 5);
	assert!(processor.processed_count() <= 2);

	let group = wait_for_group(&system, group_id, GroupStatus::Cancelled).await;
	assert!(!group.is_active());
	assert!(system.manager().completed().contains_group(group_id));

	system.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn cancelling_a_group_that_never_started() {
	let env = TestEnv::new().await;
	let system = env
		.system(
			1,
			memory_store(),
			&[("Sheet1", 2), ("Sheet2", 2)],
			Arc::new(ScriptedProcessor::default()),
		)
		.await;

	let (group_id, sheet_ids) = system.create_group(env.request(&[])).await.unwrap();
	system.cancel_group(group_id).await.unwrap();

	for sheet_id in sheet_ids {
		assert_eq!(
			system.get_sheet(sheet_id).unwrap().status(),
			SheetStatus::Cancelled
		);
	}

	let group = system.get_group(group_id).unwrap();
	assert_eq!(group.status(), GroupStatus::Cancelled);
	assert!(system.manager().completed().contains_group(group_id));

	assert!(matches!(
		system.start_group(group_id).await,
		Err(JobSystemError::GroupNotFound(id)) if id == group_id
	));

	system.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn row_errors_are_counted_and_logged() {
	let env = TestEnv::new().await;
	let processor = Arc::new(ScriptedProcessor {
		warn_rows: HashSet::from([2, 3]),
		..Default::default()
	});
	let system = env
		.system(1, memory_store(), &[("Sheet1", 4)], Arc::clone(&processor))
		.await;

	let (group_id, sheet_ids) = system.create_group(env.request(&[])).await.unwrap();
	system.start_group(group_id).await.unwrap();

	let sheet = wait_for_sheet(&system, sheet_ids[0], SheetStatus::Completed).await;
	assert_eq!(sheet.error_count(), 2);
	assert!(sheet.error_message().is_none());

	let logs = system.get_job_logs(sheet_ids[0]).await.unwrap();
	assert_eq!(logs.len(), 2);
	assert!(logs.iter().all(|entry| entry.level == LogLevel::Warning));
	assert_eq!(logs[0].message, "Row 2 completed with 1 image errors");
	assert_eq!(logs[0].data.as_ref().unwrap()["row"], 2);
	assert_eq!(logs[0].data.as_ref().unwrap()["imageErrors"], 1);
	assert_eq!(logs[1].data.as_ref().unwrap()["row"], 3);

	let group = wait_for_group(&system, group_id, GroupStatus::Completed).await;
	assert_eq!(group.error_count(), 2);

	system.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn fatal_error_fails_only_its_sheet() {
	let env = TestEnv::new().await;
	let processor = Arc::new(ScriptedProcessor {
		fatal_output: Some("Broken.pptx".to_string()),
		..Default::default()
	});
	let system = env
		.system(
			2,
			memory_store(),
			&[("Healthy", 3), ("Broken", 3)],
			Arc::clone(&processor),
		)
		.await;

	let (group_id, _) = system.create_group(env.request(&[])).await.unwrap();
	system.start_group(group_id).await.unwrap();

	wait_until(|| system.manager().completed().contains_group(group_id)).await;
	let group = system.get_group(group_id).unwrap();
	assert_eq!(group.status(), GroupStatus::Failed);

	for sheet in group.sheets() {
		match sheet.worksheet() {
			"Healthy" => {
				assert_eq!(sheet.status(), SheetStatus::Completed);
				assert_eq!(sheet.current_row(), 3);
			}
			"Broken" => {
				assert_eq!(sheet.status(), SheetStatus::Failed);
				assert_eq!(sheet.current_row(), 0);
				assert_eq!(
					sheet.error_message().as_deref(),
					Some("template is corrupted")
				);
			}
			other => panic!("unexpected worksheet {other}"),
		}
	}

	system.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn failed_sheet_leaves_its_siblings_running() {
	let env = TestEnv::new().await;
	let (hook, mut reached_rx, release) = RowHook::new(3);
	let processor = Arc::new(ScriptedProcessor {
		hook: Some(hook),
		fatal_output: Some("Broken.pptx".to_string()),
		..Default::default()
	});
	let system = env
		.system(
			2,
			memory_store(),
			&[("Healthy", 5), ("Broken", 3)],
			Arc::clone(&processor),
		)
		.await;

	let (group_id, sheet_ids) = system.create_group(env.request(&[])).await.unwrap();
	let by_name = |name: &str| {
		sheet_ids
			.iter()
			.map(|id| system.get_sheet(*id).unwrap())
			.find(|sheet| sheet.worksheet() == name)
			.unwrap()
	};
	let (healthy, broken) = (by_name("Healthy"), by_name("Broken"));

	system.start_group(group_id).await.unwrap();

	// Healthy is held on its third row while Broken blows up on its first one
	assert_eq!(reached_rx.recv().await, Some(3));
	wait_for_sheet(&system, broken.id(), SheetStatus::Failed).await;
	wait_for_group(&system, group_id, GroupStatus::Failed).await;

	assert!(system.manager().active().contains_group(group_id));
	assert!(system.manager().active().contains_sheet(healthy.id()));
	assert_eq!(healthy.status(), SheetStatus::Running);

	release.notify_one();

	wait_until(|| system.manager().completed().contains_group(group_id)).await;
	assert_eq!(healthy.status(), SheetStatus::Completed);
	assert_eq!(healthy.current_row(), 5);
	assert_eq!(
		processor.rows_for(healthy.output_path()),
		(1..=5).collect::<Vec<_>>()
	);
	assert_eq!(
		system.get_group(group_id).unwrap().status(),
		GroupStatus::Failed
	);

	system.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn workers_bound_concurrency() {
	let env = TestEnv::new().await;
	let processor = Arc::new(ScriptedProcessor {
		delay: Some(Duration::from_millis(20)),
		..Default::default()
	});
	let system = env
		.system(
			2,
			memory_store(),
			&[("A", 3), ("B", 3), ("C", 3), ("D", 3)],
			Arc::clone(&processor),
		)
		.await;

	let (group_id, _) = system.create_group(env.request(&[])).await.unwrap();
	system.start_group(group_id).await.unwrap();

	let group = wait_for_group(&system, group_id, GroupStatus::Completed).await;
	assert!(group
		.sheets()
		.iter()
		.all(|sheet| sheet.status() == SheetStatus::Completed));
	assert_eq!(processor.processed_count(), 12);
	assert!(processor.max_running.load(Ordering::SeqCst) <= 2);

	system.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn paused_sheet_survives_restart() {
	let env = TestEnv::new().await;
	let store_dir = env.dir.path().join("state");

	let (hook, mut reached_rx, release) = RowHook::new(3);
	let first_processor = Arc::new(ScriptedProcessor {
		hook: Some(hook),
		..Default::default()
	});
	let store = Arc::new(FileJobStateStore::new(&store_dir, 100).await.unwrap());
	let system = env
		.system(1, store, &[("Sheet1", 6)], Arc::clone(&first_processor))
		.await;

	let (group_id, sheet_ids) = system.create_group(env.request(&[])).await.unwrap();
	let sheet_id = sheet_ids[0];
	system.start_group(group_id).await.unwrap();

	assert_eq!(reached_rx.recv().await, Some(3));
	system.pause_sheet(sheet_id).await.unwrap();
	release.notify_one();

	wait_for_sheet(&system, sheet_id, SheetStatus::Paused).await;
	system.shutdown().await;
	drop(system);

	let second_processor = Arc::new(ScriptedProcessor::default());
	let store = Arc::new(FileJobStateStore::new(&store_dir, 100).await.unwrap());
	let system = env
		.system(1, store, &[("Sheet1", 6)], Arc::clone(&second_processor))
		.await;

	let sheet = system.get_sheet(sheet_id).unwrap();
	assert_eq!(sheet.status(), SheetStatus::Paused);
	assert_eq!(sheet.current_row(), 3);
	assert!(sheet.is_paused());
	assert!(system.manager().active().contains_group(group_id));

	system.resume_sheet(sheet_id).await.unwrap();

	let sheet = wait_for_sheet(&system, sheet_id, SheetStatus::Completed).await;
	assert_eq!(sheet.current_row(), 6);
	assert_eq!(first_processor.rows_for(sheet.output_path()), vec![1, 2, 3]);
	assert_eq!(second_processor.rows_for(sheet.output_path()), vec![4, 5, 6]);

	system.shutdown().await;
}

fn persisted_group(env: &TestEnv, status: GroupStatus, sheet_ids: Vec<Uuid>) -> GroupState {
	GroupState {
		id: Uuid::new_v4(),
		workbook_path: PathBuf::from(WORKBOOK),
		template_path: env.template.clone(),
		output_folder: env.output.clone(),
		text_rules: vec![],
		image_rules: vec![],
		created_at: Utc::now(),
		status,
		sheet_ids,
		error_count: 0,
	}
}

fn persisted_sheet(
	group_id: Uuid,
	output_folder: &Path,
	status: SheetStatus,
	current_row: usize,
) -> SheetState {
	SheetState {
		id: Uuid::new_v4(),
		group_id,
		worksheet: "Sheet1".to_string(),
		output_path: output_folder.join("Sheet1.pptx"),
		current_row,
		total_rows: 5,
		status,
		error_count: 0,
		error_message: None,
		dispatch_handle: Some(3),
	}
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn interrupted_sheet_is_requeued_on_start() {
	let env = TestEnv::new().await;
	let store = memory_store();

	let mut group = persisted_group(&env, GroupStatus::Running, vec![]);
	let sheet = persisted_sheet(group.id, &env.output, SheetStatus::Running, 2);
	group.sheet_ids.push(sheet.id);
	store.save_group(&group).await.unwrap();
	store.save_sheet(&sheet).await.unwrap();

	fs::create_dir_all(&env.output).await.unwrap();
	fs::write(&sheet.output_path, b"half done").await.unwrap();

	let processor = Arc::new(ScriptedProcessor::default());
	let system = env
		.system(
			1,
			Arc::clone(&store) as Arc<dyn JobStateStore>,
			&[("Sheet1", 5)],
			Arc::clone(&processor),
		)
		.await;

	wait_for_group(&system, group.id, GroupStatus::Completed).await;
	assert_eq!(processor.rows_for(&sheet.output_path), vec![3, 4, 5]);

	let stored = store.get_sheet(sheet.id).await.unwrap().unwrap();
	assert_eq!(stored.current_row, 5);

	system.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn missing_output_fails_the_resumed_sheet() {
	let env = TestEnv::new().await;
	let store = memory_store();

	let mut group = persisted_group(&env, GroupStatus::Running, vec![]);
	let sheet = persisted_sheet(group.id, &env.output, SheetStatus::Running, 2);
	group.sheet_ids.push(sheet.id);
	store.save_group(&group).await.unwrap();
	store.save_sheet(&sheet).await.unwrap();

	let system = env
		.system(
			1,
			Arc::clone(&store) as Arc<dyn JobStateStore>,
			&[("Sheet1", 5)],
			Arc::new(ScriptedProcessor::default()),
		)
		.await;

	let restored = wait_for_sheet(&system, sheet.id, SheetStatus::Failed).await;
	assert_eq!(
		restored.error_message().as_deref(),
		Some("Output file missing during resume.")
	);
	assert_eq!(restored.current_row(), 2);

	system.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn unreadable_workbook_fails_restored_group() {
	let env = TestEnv::new().await;
	let store = memory_store();

	let mut group = persisted_group(&env, GroupStatus::Paused, vec![]);
	group.workbook_path = PathBuf::from("/data/gone.xlsx");
	let sheet = persisted_sheet(group.id, &env.output, SheetStatus::Paused, 1);
	group.sheet_ids.push(sheet.id);
	store.save_group(&group).await.unwrap();
	store.save_sheet(&sheet).await.unwrap();

	let system = env
		.system(
			1,
			Arc::clone(&store) as Arc<dyn JobStateStore>,
			&[("Sheet1", 5)],
			Arc::new(ScriptedProcessor::default()),
		)
		.await;

	let restored = system.get_group(group.id).unwrap();
	assert_eq!(restored.status(), GroupStatus::Failed);
	assert!(system.manager().completed().contains_group(group.id));

	let restored_sheet = system.get_sheet(sheet.id).unwrap();
	assert_eq!(restored_sheet.status(), SheetStatus::Failed);
	assert!(restored_sheet
		.error_message()
		.unwrap()
		.contains("failed to open workbook"));

	let stored = store.get_group(group.id).await.unwrap().unwrap();
	assert_eq!(stored.status, GroupStatus::Failed);

	system.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn removing_completed_groups_deletes_outputs() {
	let env = TestEnv::new().await;
	let store = memory_store();
	let system = env
		.system(
			2,
			Arc::clone(&store) as Arc<dyn JobStateStore>,
			&[("Sheet1", 2), ("Sheet2", 2)],
			Arc::new(ScriptedProcessor::default()),
		)
		.await;

	let (group_id, sheet_ids) = system.create_group(env.request(&[])).await.unwrap();
	system.start_group(group_id).await.unwrap();
	wait_for_group(&system, group_id, GroupStatus::Completed).await;
	wait_until(|| system.manager().completed().contains_group(group_id)).await;

	let outputs = sheet_ids
		.iter()
		.map(|sheet_id| system.get_sheet(*sheet_id).unwrap().output_path().to_path_buf())
		.collect::<Vec<_>>();

	// Dropping one sheet keeps the group around
	assert!(system.remove_sheet(sheet_ids[0]).await.unwrap());
	assert!(!fs::try_exists(&outputs[0]).await.unwrap());
	assert_eq!(system.get_group(group_id).unwrap().sheets_count(), 1);

	assert!(system.remove_group(group_id).await.unwrap());
	assert!(!fs::try_exists(&outputs[1]).await.unwrap());
	assert!(system.get_group(group_id).is_none());
	assert!(store.get_group(group_id).await.unwrap().is_none());

	assert!(!system.remove_group(group_id).await.unwrap());
	assert_eq!(system.clear_completed().await, 0);

	system.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn removing_the_last_active_sheet_removes_the_group() {
	let env = TestEnv::new().await;
	let system = env
		.system(
			1,
			memory_store(),
			&[("Sheet1", 2)],
			Arc::new(ScriptedProcessor::default()),
		)
		.await;

	let (group_id, sheet_ids) = system.create_group(env.request(&[])).await.unwrap();

	let found = system.get_group_by_output_path(&env.output).await.unwrap();
	assert_eq!(found.id(), group_id);

	assert!(system.remove_sheet(sheet_ids[0]).await.unwrap());
	assert!(system.get_group(group_id).is_none());
	assert!(system.get_group_by_output_path(&env.output).await.is_none());

	system.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn removed_group_stays_removed_while_its_sheet_winds_down() {
	let env = TestEnv::new().await;
	let store = memory_store();
	let (hook, mut reached_rx, release) = RowHook::new(2);
	let processor = Arc::new(ScriptedProcessor {
		hook: Some(hook),
		..Default::default()
	});
	let system = env
		.system(
			1,
			Arc::clone(&store) as Arc<dyn JobStateStore>,
			&[("Sheet1", 5)],
			Arc::clone(&processor),
		)
		.await;

	let (group_id, sheet_ids) = system.create_group(env.request(&[])).await.unwrap();
	let sheet = system.get_sheet(sheet_ids[0]).unwrap();
	system.start_group(group_id).await.unwrap();

	assert_eq!(reached_rx.recv().await, Some(2));
	assert!(system.remove_group(group_id).await.unwrap());
	assert!(store.get_group(group_id).await.unwrap().is_none());

	release.notify_one();
	wait_until(|| !sheet.is_executing()).await;

	assert_eq!(sheet.status(), SheetStatus::Cancelled);
	assert!(system.get_group(group_id).is_none());
	assert!(store.get_group(group_id).await.unwrap().is_none());
	assert!(store.get_sheet(sheet.id()).await.unwrap().is_none());
	assert!(store.get_job_logs(sheet.id()).await.unwrap().is_empty());

	system.shutdown().await;
	drop(system);

	let system = env
		.system(
			1,
			Arc::clone(&store) as Arc<dyn JobStateStore>,
			&[("Sheet1", 5)],
			Arc::new(ScriptedProcessor::default()),
		)
		.await;
	assert!(system.get_all_groups().is_empty());

	system.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn removed_running_sheet_stays_removed() {
	let env = TestEnv::new().await;
	let store = memory_store();
	let (hook, mut reached_rx, release) = RowHook::new(2);
	let processor = Arc::new(ScriptedProcessor {
		hook: Some(hook),
		..Default::default()
	});
	let system = env
		.system(
			1,
			Arc::clone(&store) as Arc<dyn JobStateStore>,
			&[("Sheet1", 3), ("Sheet2", 3)],
			Arc::clone(&processor),
		)
		.await;

	let (group_id, _) = system.create_group(env.request(&[])).await.unwrap();
	system.start_group(group_id).await.unwrap();

	assert_eq!(reached_rx.recv().await, Some(2));
	let group = system.get_group(group_id).unwrap();
	let running = group
		.sheets()
		.into_iter()
		.find(|sheet| sheet.is_executing())
		.unwrap();

	assert!(system.remove_sheet(running.id()).await.unwrap());
	release.notify_one();

	wait_until(|| system.manager().completed().contains_group(group_id)).await;
	wait_until(|| !running.is_executing()).await;

	assert!(store.get_sheet(running.id()).await.unwrap().is_none());

	let stored_group = store.get_group(group_id).await.unwrap().unwrap();
	assert_eq!(stored_group.status, GroupStatus::Completed);
	assert_eq!(stored_group.sheet_ids.len(), 1);
	assert!(!stored_group.sheet_ids.contains(&running.id()));

	let group = system.get_group(group_id).unwrap();
	assert_eq!(group.sheets_count(), 1);
	assert!(group
		.sheets()
		.iter()
		.all(|sheet| sheet.status() == SheetStatus::Completed));

	system.shutdown().await;
}
