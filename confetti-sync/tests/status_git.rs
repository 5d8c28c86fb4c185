mod common;

use common::{numbered_lines, Repo};
use confetti_core::{GitStatus, SyncBatch};
use confetti_sync::status::{changes_since, local_status};

#[test]
fn new_files_without_commits_are_untracked_in_creation_order() {
    let repo = Repo::init();
    repo.write("a.txt", "a\n");
    repo.write("b.txt", "b\n");
    repo.write("c/d.php", "<?php\n");

    let changes = changes_since(&repo.git, "").expect("changes");
    let paths: Vec<&str> = changes.iter().map(|c| c.path.as_str()).collect();
    assert_eq!(paths, vec!["a.txt", "b.txt", "c/d.php"]);
    for change in &changes {
        assert!(change.is_new(), "{change}");
        assert_eq!(change.staged_status, GitStatus::Added);
        assert_eq!(change.unstaged_status, GitStatus::Untracked);
    }
}

#[test]
fn hidden_and_swap_files_are_filtered() {
    let repo = Repo::init();
    repo.write("visible.txt", "v\n");
    repo.write(".env", "SECRET=1\n");
    repo.write("config/.hidden/x.txt", "x\n");
    repo.write("view.php.swp", "swap\n");
    repo.write("view.php~", "backup\n");

    let changes = changes_since(&repo.git, "").expect("changes");
    let paths: Vec<&str> = changes.iter().map(|c| c.path.as_str()).collect();
    assert_eq!(paths, vec!["visible.txt"]);
}

#[test]
fn staged_rename_reports_one_change_with_full_similarity() {
    let repo = Repo::init();
    repo.write("old.txt", &numbered_lines(0));
    let head = repo.commit_all("initial");
    repo.run(&["mv", "old.txt", "new.txt"]);

    let changes = changes_since(&repo.git, &head).expect("changes");
    assert_eq!(changes.len(), 1, "{changes:?}");
    let rename = &changes[0];
    assert_eq!(rename.staged_status, GitStatus::Renamed);
    assert_eq!(rename.path, "new.txt");
    assert_eq!(rename.from_path.as_deref(), Some("old.txt"));
    assert_eq!(rename.similarity_score, 100);

    let batch = SyncBatch::from_changes(changes, 10);
    let expanded: Vec<(&str, GitStatus)> = batch
        .changes()
        .iter()
        .map(|c| (c.path.as_str(), c.status()))
        .collect();
    assert_eq!(
        expanded,
        vec![("old.txt", GitStatus::Deleted), ("new.txt", GitStatus::Renamed)]
    );
}

#[test]
fn edited_rename_scores_drop_with_edit_size() {
    let score_after = |changed: usize| {
        let repo = Repo::init();
        repo.write("old.txt", &numbered_lines(0));
        let head = repo.commit_all("initial");
        repo.run(&["mv", "old.txt", "new.txt"]);
        repo.write("new.txt", &numbered_lines(changed));

        let changes = changes_since(&repo.git, &head).expect("changes");
        let rename = changes
            .iter()
            .find(|c| c.is_rename())
            .unwrap_or_else(|| panic!("no rename in {changes:?}"));
        rename.similarity_score
    };

    let small = score_after(1);
    let large = score_after(3);
    assert!(small > 0 && small < 100, "small edit score {small}");
    assert!(large > 0 && large < 100, "large edit score {large}");
    assert!(large < small, "expected {large} < {small}");
}

#[test]
fn modified_and_deleted_files_relative_to_baseline() {
    let repo = Repo::init();
    repo.write("keep.txt", "x\n");
    repo.write("gone.txt", "bye\n");
    let head = repo.commit_all("initial");
    repo.write("keep.txt", "xy\n");
    repo.remove("gone.txt");
    repo.write("fresh.txt", "new\n");

    let changes = changes_since(&repo.git, &head).expect("changes");
    let summary: Vec<(&str, GitStatus)> = changes
        .iter()
        .map(|c| (c.path.as_str(), c.status()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("gone.txt", GitStatus::Deleted),
            ("keep.txt", GitStatus::Modified),
            ("fresh.txt", GitStatus::Untracked),
        ]
    );
}

#[test]
fn clean_tree_has_no_changes() {
    let repo = Repo::init();
    repo.write("a.txt", "a\n");
    let head = repo.commit_all("initial");

    assert!(changes_since(&repo.git, &head).expect("first").is_empty());
    assert!(changes_since(&repo.git, &head).expect("second").is_empty());
}

#[test]
fn local_status_reads_staged_and_unstaged_sides() {
    let repo = Repo::init();
    repo.write("a.txt", "a\n");
    repo.write("b.txt", "b\n");
    repo.commit_all("initial");
    repo.write("a.txt", "a2\n");
    repo.run(&["add", "a.txt"]);
    repo.write("a.txt", "a3\n");
    repo.write("u.txt", "u\n");

    let changes = local_status(&repo.git).expect("status");
    let a = changes.iter().find(|c| c.path == "a.txt").expect("a.txt");
    assert_eq!(a.staged_status, GitStatus::Modified);
    assert_eq!(a.unstaged_status, GitStatus::Modified);
    let u = changes.iter().find(|c| c.path == "u.txt").expect("u.txt");
    assert!(u.is_new());
    assert!(changes.iter().all(|c| c.path != "b.txt"));
}
