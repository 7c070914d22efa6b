//! Save-directory migration workflow.
//!
//! Entered from inside the hooked path-conversion routine the first time the
//! game resolves its Documents directory. The decision is derived fresh from
//! two directory probes each run: once the saves have been moved the source
//! directory no longer exists, so later runs short-circuit to
//! [`MigrationOutcome::NotNeeded`].
//!
//! The interactive pieces are injected through [`MigrationEnv`] so the state
//! machine itself stays deterministic; the real environment lives in the shim
//! crate, tests supply canned decisions.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::wide;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Every file moved, nothing skipped.
    Moved,
    /// The move ran but the user canceled part of it. Files may now exist in
    /// both locations; no rollback is attempted since the partial state is
    /// ambiguous.
    Aborted,
    /// The move call itself failed.
    Failed,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MigrationOutcome {
    NotNeeded,
    Declined,
    Migrated,
    MoveAborted,
    MoveFailed,
}

/// Capabilities the workflow needs from its host platform.
pub trait MigrationEnv {
    /// Does the misresolved save directory exist? The probe must follow
    /// junctions and links, so two path strings aliasing one physical
    /// directory compare as both existing.
    fn source_exists(&mut self) -> bool;
    fn destination_exists(&mut self) -> bool;
    /// Modal consent. Only explicit acceptance continues the migration.
    fn confirm(&mut self) -> bool;
    /// Recursive move of the whole source directory to the destination.
    fn move_tree(&mut self) -> MoveOutcome;
    /// Removes now-empty ancestors of the source, walking upward until one
    /// removal fails. Only called after a clean move.
    fn remove_empty_source_ancestors(&mut self);
    /// Blocking notification telling the user to verify both locations.
    fn report_move_problem(&mut self, outcome: MoveOutcome);
}

pub fn run<E: MigrationEnv>(env: &mut E) -> MigrationOutcome {
    if !env.source_exists() {
        return MigrationOutcome::NotNeeded;
    }
    if env.destination_exists() {
        // Never overwrite an existing destination. Also covers the case of
        // both paths resolving to the same physical directory.
        return MigrationOutcome::NotNeeded;
    }
    if !env.confirm() {
        debug!("Save migration declined");
        return MigrationOutcome::Declined;
    }
    match env.move_tree() {
        MoveOutcome::Moved => {
            env.remove_empty_source_ancestors();
            debug!("Save migration complete");
            MigrationOutcome::Migrated
        }
        outcome @ MoveOutcome::Aborted => {
            env.report_move_problem(outcome);
            MigrationOutcome::MoveAborted
        }
        outcome @ MoveOutcome::Failed => {
            env.report_move_problem(outcome);
            MigrationOutcome::MoveFailed
        }
    }
}

/// The upward cleanup walk after a clean move: tries to remove `path`, then
/// each ancestor in turn, and stops at the first removal `remove_dir`
/// reports as failed or at the drive root. The platform remover is expected
/// to refuse non-empty directories, so the walk never climbs past a
/// directory that still holds files.
pub fn remove_empty_ancestors(path: &[u16], mut remove_dir: impl FnMut(&[u16]) -> bool) {
    let mut end = path.len();
    loop {
        if !remove_dir(&path[..end]) {
            break;
        }
        match wide::parent_len(&path[..end]) {
            Some(len) => end = len,
            None => break,
        }
    }
}

/// One-shot entry guard. The conversion hook only ever sees the save path
/// once per process in practice, but the workflow should not rely on
/// call-site timing.
pub struct Latch(AtomicBool);

impl Latch {
    pub const fn new() -> Latch {
        Latch(AtomicBool::new(false))
    }

    /// True for exactly one caller over the process lifetime.
    pub fn acquire(&self) -> bool {
        !self.0.swap(true, Ordering::Relaxed)
    }
}
