use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use kanban_core::board::Board;
use kanban_core::column::ColumnId;
use kanban_core::filter::{RecencyWindow, ViewSettings};
use kanban_core::sort::{SortField, SortRule, default_rules};
use kanban_core::sync::{FileStatus, LoadSource};
use kanban_core::task::{Priority, TaskFields};
use tempfile::tempdir;

fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).single().expect("valid time")
}

async fn load(dir: &Path) -> Board {
    Board::load(dir, Duration::from_millis(500), ViewSettings::default())
        .await
        .expect("load board")
}

fn titles(board: &Board, column: ColumnId, now: DateTime<Utc>) -> Vec<String> {
    board
        .visible_tasks(column, now)
        .tasks
        .iter()
        .map(|task| task.title.clone())
        .collect()
}

fn seed_scenario_tasks(board: &mut Board) {
    let mut t1 = TaskFields::new("T1", ColumnId::Backlog);
    t1.due = NaiveDate::from_ymd_opt(2024, 1, 10);
    t1.priority = Priority::High;
    let mut t2 = TaskFields::new("T2", ColumnId::Backlog);
    t2.due = NaiveDate::from_ymd_opt(2024, 1, 5);
    t2.priority = Priority::Low;
    board.create(t1, at(2024, 1, 1)).unwrap();
    board.create(t2, at(2024, 1, 1)).unwrap();
}

#[tokio::test]
async fn scenario_a_due_ascending() {
    let temp = tempdir().expect("tempdir");
    let mut board = load(temp.path()).await;
    seed_scenario_tasks(&mut board);

    board.set_sort_rules(vec![SortRule::asc(SortField::Due)]);
    assert_eq!(titles(&board, ColumnId::Backlog, at(2024, 1, 2)), ["T2", "T1"]);
}

#[tokio::test]
async fn scenario_b_priority_then_due() {
    let temp = tempdir().expect("tempdir");
    let mut board = load(temp.path()).await;
    seed_scenario_tasks(&mut board);

    board.set_sort_rules(vec![SortRule::asc(SortField::Priority), SortRule::asc(SortField::Due)]);
    assert_eq!(titles(&board, ColumnId::Backlog, at(2024, 1, 2)), ["T1", "T2"]);
    assert_eq!(board.sort_summary().as_deref(), Some("Priority → Due Date"));
}

#[tokio::test]
async fn scenario_c_done_stamps_and_clears_completion() {
    let temp = tempdir().expect("tempdir");
    let mut board = load(temp.path()).await;
    let id = board
        .create(TaskFields::new("ship", ColumnId::InProgress), at(2026, 1, 1))
        .unwrap()
        .id;

    let t = at(2026, 1, 5);
    assert_eq!(board.move_task(&id, ColumnId::Done, t).unwrap().completed_at, Some(t));
    let back = board.move_task(&id, ColumnId::Review, at(2026, 1, 6)).unwrap();
    assert_eq!(back.completed_at, None);
    assert_eq!(back.order, 0);
}

#[tokio::test]
async fn scenario_d_cache_survives_restart() {
    let temp = tempdir().expect("tempdir");
    let saved = {
        let mut board = load(temp.path()).await;
        seed_scenario_tasks(&mut board);
        let mut tagged = TaskFields::new("tagged", ColumnId::Review);
        tagged.tags = vec!["ui".to_string()];
        tagged.desc = Some("with **markdown**".to_string());
        board.create(tagged, at(2024, 1, 3)).unwrap();
        board.set_sort_rules(vec![SortRule::desc(SortField::Effort)]);
        assert_eq!(board.status(), FileStatus::NoFileLinked);
        board.state().clone()
    };

    let board = load(temp.path()).await;
    assert_eq!(board.source(), LoadSource::Cache);
    assert_eq!(board.state(), &saved);
}

#[tokio::test]
async fn scenario_e_recency_window_hides_old_done_tasks() {
    let temp = tempdir().expect("tempdir");
    let now = at(2026, 6, 1);
    let mut board = Board::load(
        temp.path(),
        Duration::from_millis(500),
        ViewSettings::with_recency(RecencyWindow::default()),
    )
    .await
    .expect("load board");

    for i in 0..35 {
        let finished = if i < 5 {
            now - chrono::Duration::days(40)
        } else {
            now - chrono::Duration::days(1)
        };
        board
            .create(TaskFields::new(format!("done {i}"), ColumnId::Done), finished)
            .unwrap();
    }

    let visible = board.visible_tasks(ColumnId::Done, now);
    assert_eq!(visible.tasks.len(), 30);
    assert_eq!(visible.suppressed, 5);

    board.set_show_all(true);
    let visible = board.visible_tasks(ColumnId::Done, now);
    assert_eq!(visible.tasks.len(), 35);
    assert_eq!(visible.suppressed, 0);
}

#[tokio::test]
async fn malformed_cache_starts_empty_with_notice() {
    let temp = tempdir().expect("tempdir");
    fs::write(temp.path().join("kanban-data.json"), "{\"tasks\": 7").unwrap();

    let mut board = load(temp.path()).await;
    assert_eq!(board.source(), LoadSource::Empty);
    assert!(board.tasks().is_empty());
    assert_eq!(board.sort_rules(), default_rules().as_slice());
    let notices = board.take_notices();
    assert_eq!(notices.len(), 1);
    assert!(board.take_notices().is_empty());
}

#[tokio::test]
async fn legacy_cache_is_upgraded_on_next_write() {
    let temp = tempdir().expect("tempdir");
    let cache = temp.path().join("kanban-data.json");
    fs::write(
        &cache,
        r#"[{"id": "a1", "title": "old", "status": "review", "order": 2, "created": 1700000000000}]"#,
    )
    .unwrap();

    let mut board = load(temp.path()).await;
    assert_eq!(board.tasks().len(), 1);
    assert_eq!(board.sort_rules(), default_rules().as_slice());

    board.create(TaskFields::new("new", ColumnId::Review), at(2026, 1, 1)).unwrap();
    let text = fs::read_to_string(&cache).unwrap();
    assert!(text.trim_start().starts_with('{'));
    assert!(text.contains("\"sortRules\""));
    assert_eq!(board.find("a1").map(|t| t.order), Some(2));
    assert_eq!(board.tasks()[1].order, 1);
}

#[tokio::test]
async fn invalid_input_changes_nothing() {
    let temp = tempdir().expect("tempdir");
    let mut board = load(temp.path()).await;
    assert!(board.create(TaskFields::new("   ", ColumnId::Backlog), at(2026, 1, 1)).is_err());
    assert!(board.tasks().is_empty());
    assert!(!temp.path().join("kanban-data.json").exists());
    assert!(board.move_task("missing", ColumnId::Done, at(2026, 1, 1)).is_err());
}

#[tokio::test]
async fn linked_file_seeds_an_empty_cache() {
    let temp = tempdir().expect("tempdir");
    let file = temp.path().join("board.json");
    let saved = {
        let mut board = load(temp.path()).await;
        seed_scenario_tasks(&mut board);
        board.save_as(&file).await.unwrap();
        assert_eq!(board.status(), FileStatus::Linked { name: "board.json".to_string() });
        board.state().clone()
    };
    fs::remove_file(temp.path().join("kanban-data.json")).unwrap();

    let board = load(temp.path()).await;
    assert_eq!(board.source(), LoadSource::LinkedFile);
    assert_eq!(board.state(), &saved);
    assert!(temp.path().join("kanban-data.json").exists());
}

#[tokio::test]
async fn cache_wins_over_linked_file() {
    let temp = tempdir().expect("tempdir");
    let file = temp.path().join("board.json");
    {
        let mut board = load(temp.path()).await;
        seed_scenario_tasks(&mut board);
        board.save_as(&file).await.unwrap();
    }
    fs::write(&file, "[]").unwrap();

    let board = load(temp.path()).await;
    assert_eq!(board.source(), LoadSource::Cache);
    assert_eq!(board.tasks().len(), 2);
    assert_eq!(board.linked_path(), Some(file));
}

#[tokio::test]
async fn vanished_linked_file_falls_back_silently() {
    let temp = tempdir().expect("tempdir");
    let file = temp.path().join("board.json");
    {
        let mut board = load(temp.path()).await;
        seed_scenario_tasks(&mut board);
        board.save_as(&file).await.unwrap();
    }
    fs::remove_file(&file).unwrap();

    let mut board = load(temp.path()).await;
    assert_eq!(board.status(), FileStatus::NoFileLinked);
    assert!(board.take_notices().is_empty());
    assert_eq!(board.tasks().len(), 2);
}
