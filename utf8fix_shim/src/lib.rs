//! Injected DLL fixing UTF-8 path handling in Mafia II: Definitive Edition.
//!
//! The host converts its wide Documents path with `wcstombs` and then feeds
//! the resulting ANSI bytes to `*A` file APIs, which breaks every profile
//! with a non-ASCII user name. This library redirects the relevant import
//! slots to UTF-8 wrappers, splices the conversion call itself, and blanks
//! the code that overrides the UTF-8 code page with a registry value. Every
//! code patch is gated on an exact signature match count, so on an
//! unexpected binary the patch is skipped rather than misapplied.

#![cfg(windows)]

#[macro_use]
extern crate log;

pub mod hooks;
pub mod rescue;
pub mod shims;
pub mod windows;

use std::ptr;
use std::slice;

use winapi::shared::minwindef::{BOOL, DWORD, HINSTANCE, LPVOID, TRUE};
use winapi::um::libloaderapi::GetModuleHandleW;
use winapi::um::winnt::DLL_PROCESS_ATTACH;

use utf8fix::image::{Error, Image, ImportPatch};
use utf8fix::pattern::Pattern;

pub const TITLE: &str = "Mafia II DE UTF-8 Fix";

// The `mov r8d, imm32; call wcstombs` sequence converting the Documents
// path; the call starts 6 bytes in.
const WCSTOMBS_CALL: &str = "41 B8 ? ? ? ? E8 ? ? ? ? 48 8B C7 40 38 7C 05 50";
// `mov byte [r14], '*'` right before the indirect call through the cached
// MultiByteToWideChar pointer.
const MB_TO_WC_SLOT: &str = "41 C6 06 2A";
// `mov r14d, 0FDE9h` loading CP_UTF8, followed by a 2-byte override from
// the registry-read code page.
const UTF8_CODEPAGE_LOAD: &str = "41 BE E9 FD 00 00";

#[no_mangle]
pub unsafe extern "system" fn DllMain(
    _instance: HINSTANCE,
    reason: DWORD,
    _reserved: LPVOID,
) -> BOOL {
    if reason == DLL_PROCESS_ATTACH {
        initialize();
    }
    TRUE
}

unsafe fn initialize() {
    let image = match Image::from_base(GetModuleHandleW(ptr::null()) as *mut u8) {
        Ok(image) => image,
        Err(error) => return report_fatal(&error),
    };
    if let Err(error) = redirect_imports(&image) {
        return report_fatal(&error);
    }
    install_code_patches(&image);
}

unsafe fn redirect_imports(image: &Image) -> Result<(), Error> {
    let patches = [
        ImportPatch {
            library: "kernel32.dll",
            symbol: "CreateDirectoryA",
            replacement: shims::create_directory_utf8 as usize,
        },
        ImportPatch {
            library: "kernel32.dll",
            symbol: "GetFileAttributesA",
            replacement: shims::get_file_attributes_utf8 as usize,
        },
        ImportPatch {
            library: "kernel32.dll",
            symbol: "SetFileAttributesA",
            replacement: shims::set_file_attributes_utf8 as usize,
        },
        ImportPatch {
            library: "kernel32.dll",
            symbol: "CreateFileA",
            replacement: shims::create_file_utf8 as usize,
        },
        ImportPatch {
            library: "kernel32.dll",
            symbol: "FindFirstFileA",
            replacement: shims::find_first_file_utf8 as usize,
        },
        ImportPatch {
            library: "kernel32.dll",
            symbol: "FindNextFileA",
            replacement: shims::find_next_file_utf8 as usize,
        },
        ImportPatch {
            library: "shell32.dll",
            symbol: "SHFileOperationW",
            replacement: shims::sh_file_operation_fixed as usize,
        },
    ];
    // Import tables live on read-only pages, so route the writes through
    // the protection-flipping helper.
    let written = image.redirect_imports(&patches, |slot, value| unsafe {
        hooks::write_protected(slot as *mut u8, &value.to_ne_bytes());
    })?;
    info!("Redirected {} import slots", written);
    Ok(())
}

unsafe fn install_code_patches(image: &Image) {
    let (code, len) = match image.code_section() {
        Some(section) => section,
        None => {
            warn!("No executable section found, skipping code patches");
            return;
        }
    };
    let code_slice = slice::from_raw_parts(code, len);

    if let Ok(matches) = Pattern::parse(WCSTOMBS_CALL).require(code_slice, 1) {
        let site = code.add(matches[0] + 6);
        shims::set_orig_wcstombs(hooks::read_call(site));
        if let Some(mut trampoline) = hooks::Trampoline::near(site as usize) {
            if let Some(stub) = trampoline.jump_stub(shims::wcstombs_rescue as usize) {
                hooks::write_call(site, stub);
                hooks::record(site as usize, stub, shims::wcstombs_rescue as usize);
            }
        }
    }

    if let Ok(matches) = Pattern::parse(MB_TO_WC_SLOT).require(code_slice, 1) {
        // Displacement of the `call [rip+disp32]` following the match.
        let site = code.add(matches[0] + 4 + 2);
        if let Some(mut trampoline) = hooks::Trampoline::near(site as usize) {
            let replacement = shims::multi_byte_to_wide_char_utf8 as usize;
            if let Some(slot) = trampoline.pointer_slot(replacement) {
                hooks::write_offset_value(site, slot as usize);
                hooks::record(site as usize, slot as usize, replacement);
            }
        }
    }

    if let Ok(matches) = Pattern::parse(UTF8_CODEPAGE_LOAD).require(code_slice, 4) {
        for m in matches {
            // Blank the 2-byte register move that replaces CP_UTF8 with a
            // code page read from the registry.
            hooks::nop(code.add(m + 6 + 4), 2);
        }
    }
}

fn report_fatal(error: &Error) {
    error!("{}", error);
    let text = format!(
        "The UTF-8 path fix could not be installed:\n\n{}\n\n\
         The game will start without it, but profiles with non-ASCII user \
         names may not be able to save.",
        error,
    );
    windows::message_box(TITLE, &text);
}
