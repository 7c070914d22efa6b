//! One-time relocation of saves out of a mojibake directory. Earlier runs
//! without the fix converted the Documents path through the ANSI code page,
//! so on non-ASCII user names the game wrote saves under a garbled sibling
//! of the real Documents directory. The first fixed `wcstombs` call lands
//! here and offers to move them where the UTF-8 paths will now point.

use std::slice;

use libc::c_char;
use winapi::um::fileapi::{CreateFileA, CreateFileW, RemoveDirectoryW, OPEN_EXISTING};
use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
use winapi::um::shellapi::{SHFileOperationW, FOF_NOCONFIRMMKDIR, FO_MOVE, SHFILEOPSTRUCTW};
use winapi::um::winbase::FILE_FLAG_BACKUP_SEMANTICS;
use winapi::um::winnt::{FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE};

use utf8fix::migrate::{self, Latch, MigrationEnv, MoveOutcome};
use utf8fix::wide;
use utf8fix::{PRODUCT_DIR, SAVE_ROOT};

use crate::windows::{confirm_box, message_box};
use crate::TITLE;

static RESCUE_DONE: Latch = Latch::new();

/// Runs the save migration workflow at most once per process. `documents`
/// is the wide Documents path the host is currently converting.
pub unsafe fn check_for_misplaced_saves(documents: *const u16) {
    let orig = match crate::shims::orig_wcstombs() {
        Some(orig) => orig,
        None => return,
    };
    if !RESCUE_DONE.acquire() {
        return;
    }

    // Replay the conversion the host used to do, to learn where its saves
    // actually went.
    let mut broken = [0 as c_char; 260];
    if orig(broken.as_mut_ptr(), documents, broken.len()) == usize::MAX {
        return;
    }
    let broken_len = broken.iter().position(|&c| c == 0).unwrap_or(0);
    if broken_len == 0 {
        return;
    }

    let mut source = broken[..broken_len].iter().map(|&c| c as u8).collect::<Vec<u8>>();
    wide::push_component(&mut source, SAVE_ROOT);
    wide::push_component(&mut source, PRODUCT_DIR);

    let mut documents_len = 0;
    while *documents.add(documents_len) != 0 {
        documents_len += 1;
    }
    let mut destination = slice::from_raw_parts(documents, documents_len).to_vec();
    wide::push_component_wide(&mut destination, SAVE_ROOT);
    wide::push_component_wide(&mut destination, PRODUCT_DIR);

    let source_wide = wide::widen_ansi(&source);
    let mut env = RescueEnv {
        source,
        source_wide,
        destination,
    };
    migrate::run(&mut env);
}

/// Probes directories the exact way the host's two code paths address them:
/// the mojibake source through the ANSI API, the proper destination through
/// the wide API. `FILE_FLAG_BACKUP_SEMANTICS` opens directories and follows
/// junctions, so an aliased Documents directory counts as already existing.
struct RescueEnv {
    source: Vec<u8>,
    source_wide: Vec<u16>,
    destination: Vec<u16>,
}

unsafe fn directory_exists_ansi(path: &[u8]) -> bool {
    let mut terminated = path.to_vec();
    terminated.push(0);
    let handle = CreateFileA(
        terminated.as_ptr() as *const c_char,
        0,
        FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
        std::ptr::null_mut(),
        OPEN_EXISTING,
        FILE_FLAG_BACKUP_SEMANTICS,
        std::ptr::null_mut(),
    );
    if handle == INVALID_HANDLE_VALUE {
        false
    } else {
        CloseHandle(handle);
        true
    }
}

unsafe fn directory_exists_wide(path: &[u16]) -> bool {
    let mut terminated = path.to_vec();
    terminated.push(0);
    let handle = CreateFileW(
        terminated.as_ptr(),
        0,
        FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
        std::ptr::null_mut(),
        OPEN_EXISTING,
        FILE_FLAG_BACKUP_SEMANTICS,
        std::ptr::null_mut(),
    );
    if handle == INVALID_HANDLE_VALUE {
        false
    } else {
        CloseHandle(handle);
        true
    }
}

impl MigrationEnv for RescueEnv {
    fn source_exists(&mut self) -> bool {
        // The host created this directory with ANSI calls, so probe it the
        // same way to see exactly what the host saw.
        unsafe { directory_exists_ansi(&self.source) }
    }

    fn destination_exists(&mut self) -> bool {
        unsafe { directory_exists_wide(&self.destination) }
    }

    fn confirm(&mut self) -> bool {
        let text = format!(
            "Save games from an earlier session were found in\n\n{}\n\n\
             which is not where the game will look for them from now on. \
             Do you want to move them to\n\n{}\n\n\
             so your progress carries over?",
            String::from_utf8_lossy(&self.source),
            String::from_utf16_lossy(&self.destination),
        );
        confirm_box(TITLE, &text)
    }

    fn move_tree(&mut self) -> MoveOutcome {
        let from = wide::double_null_terminated(&self.source_wide);
        let to = wide::double_null_terminated(&self.destination);
        unsafe {
            let mut op: SHFILEOPSTRUCTW = std::mem::zeroed();
            op.wFunc = FO_MOVE;
            op.pFrom = from.as_ptr();
            op.pTo = to.as_ptr();
            op.fFlags = FOF_NOCONFIRMMKDIR;
            if SHFileOperationW(&mut op) != 0 {
                MoveOutcome::Failed
            } else if op.fAnyOperationsAborted != 0 {
                MoveOutcome::Aborted
            } else {
                MoveOutcome::Moved
            }
        }
    }

    fn remove_empty_source_ancestors(&mut self) {
        // RemoveDirectoryW refuses non-empty directories, which ends the
        // walk at the first ancestor still holding files.
        migrate::remove_empty_ancestors(&self.source_wide, |dir| {
            let mut terminated = dir.to_vec();
            terminated.push(0);
            unsafe { RemoveDirectoryW(terminated.as_ptr()) != 0 }
        });
    }

    fn report_move_problem(&mut self, outcome: MoveOutcome) {
        let reason = match outcome {
            MoveOutcome::Aborted => "The move was interrupted before it finished.",
            _ => "The move could not be completed.",
        };
        let text = format!(
            "{}\n\nPlease check that your save games are still present in\n\n{}\n\n\
             and if any were already moved to\n\n{}\n\n\
             move them back before playing.",
            reason,
            String::from_utf8_lossy(&self.source),
            String::from_utf16_lossy(&self.destination),
        );
        message_box(TITLE, &text);
    }
}
