//! UTF-8 versions of the ANSI file APIs the host binds to, plus the two
//! shims wired in through code patches. Every wrapper keeps the exact
//! signature of the function it stands in for; the host calls these through
//! its own import table without ever knowing.

use std::ffi::CStr;
use std::mem;
use std::ptr;
use std::slice;

use libc::c_char;
use once_cell::sync::OnceCell;
use winapi::ctypes::c_int;
use winapi::shared::minwindef::{BOOL, DWORD, UINT};
use winapi::um::fileapi::{
    CreateDirectoryW, CreateFileW, FindFirstFileW, FindNextFileW, GetFileAttributesW,
    SetFileAttributesW,
};
use winapi::um::minwinbase::{LPSECURITY_ATTRIBUTES, LPWIN32_FIND_DATAA, WIN32_FIND_DATAW};
use winapi::um::shellapi::{SHFileOperationW, SHFILEOPSTRUCTW};
use winapi::um::stringapiset::{MultiByteToWideChar, WideCharToMultiByte};
use winapi::um::winnls::CP_UTF8;
use winapi::um::winnt::{HANDLE, LPCSTR, LPWSTR};

use utf8fix::wide;

use crate::rescue;

/// Signature of the CRT's `wcstombs`, which the host calls through one
/// spliced rel32 call.
pub type Wcstombs = unsafe extern "C" fn(*mut c_char, *const u16, usize) -> usize;

static ORIG_WCSTOMBS: OnceCell<Wcstombs> = OnceCell::new();

pub fn set_orig_wcstombs(address: usize) {
    let func: Wcstombs = unsafe { mem::transmute(address) };
    let _ = ORIG_WCSTOMBS.set(func);
}

pub fn orig_wcstombs() -> Option<Wcstombs> {
    ORIG_WCSTOMBS.get().copied()
}

unsafe fn wide_arg(path: LPCSTR) -> Vec<u16> {
    wide::wide_from_utf8(CStr::from_ptr(path).to_bytes())
}

pub unsafe extern "system" fn create_directory_utf8(
    path: LPCSTR,
    security: LPSECURITY_ATTRIBUTES,
) -> BOOL {
    CreateDirectoryW(wide_arg(path).as_ptr(), security)
}

pub unsafe extern "system" fn get_file_attributes_utf8(path: LPCSTR) -> DWORD {
    GetFileAttributesW(wide_arg(path).as_ptr())
}

pub unsafe extern "system" fn set_file_attributes_utf8(path: LPCSTR, attributes: DWORD) -> BOOL {
    SetFileAttributesW(wide_arg(path).as_ptr(), attributes)
}

pub unsafe extern "system" fn create_file_utf8(
    path: LPCSTR,
    access: DWORD,
    share: DWORD,
    security: LPSECURITY_ATTRIBUTES,
    disposition: DWORD,
    flags: DWORD,
    template: HANDLE,
) -> HANDLE {
    CreateFileW(
        wide_arg(path).as_ptr(),
        access,
        share,
        security,
        disposition,
        flags,
        template,
    )
}

/// Narrows wide find data into the ANSI layout the host expects, with file
/// names re-encoded as UTF-8 instead of the system code page.
unsafe fn narrow_find_data(src: &WIN32_FIND_DATAW, dst: LPWIN32_FIND_DATAA) {
    let dst = &mut *dst;
    dst.dwFileAttributes = src.dwFileAttributes;
    dst.ftCreationTime = src.ftCreationTime;
    dst.ftLastAccessTime = src.ftLastAccessTime;
    dst.ftLastWriteTime = src.ftLastWriteTime;
    dst.nFileSizeHigh = src.nFileSizeHigh;
    dst.nFileSizeLow = src.nFileSizeLow;
    dst.dwReserved0 = src.dwReserved0;
    dst.dwReserved1 = src.dwReserved1;
    let name = slice::from_raw_parts_mut(dst.cFileName.as_mut_ptr() as *mut u8, dst.cFileName.len());
    wide::narrow_into(&src.cFileName, name);
    let alt = slice::from_raw_parts_mut(
        dst.cAlternateFileName.as_mut_ptr() as *mut u8,
        dst.cAlternateFileName.len(),
    );
    wide::narrow_into(&src.cAlternateFileName, alt);
}

pub unsafe extern "system" fn find_first_file_utf8(
    path: LPCSTR,
    data: LPWIN32_FIND_DATAA,
) -> HANDLE {
    let mut wide_data: WIN32_FIND_DATAW = mem::zeroed();
    let handle = FindFirstFileW(wide_arg(path).as_ptr(), &mut wide_data);
    if handle != winapi::um::handleapi::INVALID_HANDLE_VALUE {
        narrow_find_data(&wide_data, data);
    }
    handle
}

pub unsafe extern "system" fn find_next_file_utf8(handle: HANDLE, data: LPWIN32_FIND_DATAA) -> BOOL {
    let mut wide_data: WIN32_FIND_DATAW = mem::zeroed();
    let ok = FindNextFileW(handle, &mut wide_data);
    if ok != 0 {
        narrow_find_data(&wide_data, data);
    }
    ok
}

/// The rip-relative patch points the host's cached `MultiByteToWideChar`
/// pointer here, so the code page argument it passes is ignored.
pub unsafe extern "system" fn multi_byte_to_wide_char_utf8(
    _code_page: UINT,
    flags: DWORD,
    input: LPCSTR,
    input_len: c_int,
    output: LPWSTR,
    output_len: c_int,
) -> c_int {
    MultiByteToWideChar(CP_UTF8, flags, input, input_len, output, output_len)
}

/// Replacement for the host's `wcstombs` call on the Documents path:
/// converts to UTF-8 instead of the ANSI code page, then checks once
/// whether earlier ANSI runs left saves in a mojibake directory.
pub unsafe extern "C" fn wcstombs_rescue(dest: *mut c_char, src: *const u16, max: usize) -> usize {
    let converted = WideCharToMultiByte(
        CP_UTF8,
        0,
        src,
        -1,
        dest,
        max as c_int,
        ptr::null(),
        ptr::null_mut(),
    );
    let result = wide::wcstombs_len(converted);
    rescue::check_for_misplaced_saves(src);
    result
}

/// `SHFileOperationW` with the host's missing second path-list terminator
/// repaired before the shell sees the lists.
pub unsafe extern "system" fn sh_file_operation_fixed(op: *mut SHFILEOPSTRUCTW) -> c_int {
    let op = &mut *op;
    if !op.pFrom.is_null() {
        wide::fix_second_terminator(op.pFrom as *mut u16);
    }
    if !op.pTo.is_null() {
        wide::fix_second_terminator(op.pTo as *mut u16);
    }
    SHFileOperationW(op)
}
