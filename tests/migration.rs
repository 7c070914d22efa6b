//! Migration state machine driven with canned environments, covering the
//! decision table and the consent/cleanup/report sequencing.

use utf8fix::migrate::{self, Latch, MigrationEnv, MigrationOutcome, MoveOutcome};

#[derive(Default)]
struct FakeEnv {
    source_exists: bool,
    destination_exists: bool,
    accept: bool,
    move_result: Option<MoveOutcome>,
    calls: Vec<&'static str>,
    reported: Option<MoveOutcome>,
}

impl MigrationEnv for FakeEnv {
    fn source_exists(&mut self) -> bool {
        self.calls.push("source_exists");
        self.source_exists
    }

    fn destination_exists(&mut self) -> bool {
        self.calls.push("destination_exists");
        self.destination_exists
    }

    fn confirm(&mut self) -> bool {
        self.calls.push("confirm");
        self.accept
    }

    fn move_tree(&mut self) -> MoveOutcome {
        self.calls.push("move_tree");
        self.move_result.expect("move_tree called unexpectedly")
    }

    fn remove_empty_source_ancestors(&mut self) {
        self.calls.push("cleanup");
    }

    fn report_move_problem(&mut self, outcome: MoveOutcome) {
        self.calls.push("report");
        self.reported = Some(outcome);
    }
}

#[test]
fn nothing_to_rescue() {
    let mut env = FakeEnv::default();
    assert_eq!(migrate::run(&mut env), MigrationOutcome::NotNeeded);
    assert_eq!(env.calls, vec!["source_exists"]);
}

#[test]
fn existing_destination_is_never_overwritten() {
    let mut env = FakeEnv {
        source_exists: true,
        destination_exists: true,
        ..Default::default()
    };
    assert_eq!(migrate::run(&mut env), MigrationOutcome::NotNeeded);
    // No consent prompt, no move.
    assert_eq!(env.calls, vec!["source_exists", "destination_exists"]);
}

// Two path strings aliasing the same physical directory look exactly like an
// existing destination to the link-resolving probes, so no migration is
// offered for a junctioned Documents directory either.
#[test]
fn aliased_directories_are_a_no_op() {
    let mut env = FakeEnv {
        source_exists: true,
        destination_exists: true,
        accept: true,
        ..Default::default()
    };
    assert_eq!(migrate::run(&mut env), MigrationOutcome::NotNeeded);
    assert!(!env.calls.contains(&"confirm"));
}

#[test]
fn declining_moves_nothing() {
    let mut env = FakeEnv {
        source_exists: true,
        ..Default::default()
    };
    assert_eq!(migrate::run(&mut env), MigrationOutcome::Declined);
    assert_eq!(env.calls, vec!["source_exists", "destination_exists", "confirm"]);
}

#[test]
fn accepted_migration_cleans_up_ancestors() {
    let mut env = FakeEnv {
        source_exists: true,
        accept: true,
        move_result: Some(MoveOutcome::Moved),
        ..Default::default()
    };
    assert_eq!(migrate::run(&mut env), MigrationOutcome::Migrated);
    assert_eq!(
        env.calls,
        vec!["source_exists", "destination_exists", "confirm", "move_tree", "cleanup"],
    );
    assert_eq!(env.reported, None);
}

#[test]
fn partial_abort_reports_and_leaves_data() {
    let mut env = FakeEnv {
        source_exists: true,
        accept: true,
        move_result: Some(MoveOutcome::Aborted),
        ..Default::default()
    };
    assert_eq!(migrate::run(&mut env), MigrationOutcome::MoveAborted);
    assert!(!env.calls.contains(&"cleanup"));
    assert_eq!(env.reported, Some(MoveOutcome::Aborted));
}

#[test]
fn failed_move_reports_and_leaves_data() {
    let mut env = FakeEnv {
        source_exists: true,
        accept: true,
        move_result: Some(MoveOutcome::Failed),
        ..Default::default()
    };
    assert_eq!(migrate::run(&mut env), MigrationOutcome::MoveFailed);
    assert!(!env.calls.contains(&"cleanup"));
    assert_eq!(env.reported, Some(MoveOutcome::Failed));
}

#[test]
fn rerun_after_migration_is_a_no_op() {
    // After a successful move the source directory is gone; the fresh probes
    // short-circuit without prompting again.
    let mut env = FakeEnv {
        source_exists: true,
        accept: true,
        move_result: Some(MoveOutcome::Moved),
        ..Default::default()
    };
    assert_eq!(migrate::run(&mut env), MigrationOutcome::Migrated);

    let mut env = FakeEnv {
        accept: true,
        ..Default::default()
    };
    assert_eq!(migrate::run(&mut env), MigrationOutcome::NotNeeded);
}

#[test]
fn ancestor_cleanup_stops_at_first_failed_removal() {
    let path = "C:\\Users\\x\\Documents\\My Games\\Mafia II Definitive Edition"
        .encode_utf16()
        .collect::<Vec<u16>>();
    let mut attempts: Vec<String> = Vec::new();
    migrate::remove_empty_ancestors(&path, |dir| {
        attempts.push(String::from_utf16_lossy(dir));
        // Only the save directory and "My Games" are empty; Documents
        // still holds other files and refuses removal.
        attempts.len() <= 2
    });
    assert_eq!(
        attempts,
        vec![
            "C:\\Users\\x\\Documents\\My Games\\Mafia II Definitive Edition",
            "C:\\Users\\x\\Documents\\My Games",
            "C:\\Users\\x\\Documents",
        ],
    );
}

#[test]
fn ancestor_cleanup_stops_at_drive_root() {
    let path = "C:\\saves".encode_utf16().collect::<Vec<u16>>();
    let mut attempts = 0;
    migrate::remove_empty_ancestors(&path, |_dir| {
        attempts += 1;
        true
    });
    assert_eq!(attempts, 1);
}

#[test]
fn latch_admits_one_caller() {
    let latch = Latch::new();
    assert!(latch.acquire());
    assert!(!latch.acquire());
    assert!(!latch.acquire());
}
