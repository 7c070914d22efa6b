//! String and path plumbing shared by the Win32 wrappers: UTF-8/UTF-16
//! conversion, `PathCombine`-style component appends in both encodings, and
//! the terminator repairs the shell move API needs.

fn is_sep(c: u16) -> bool {
    c == u16::from(b'\\') || c == u16::from(b'/')
}

/// NUL-terminated UTF-16 from bytes interpreted as UTF-8. Invalid sequences
/// become replacement characters, matching an unflagged
/// `MultiByteToWideChar(CP_UTF8)`.
pub fn wide_from_utf8(bytes: &[u8]) -> Vec<u16> {
    let mut out = String::from_utf8_lossy(bytes).encode_utf16().collect::<Vec<u16>>();
    out.push(0);
    out
}

/// Widens raw single-byte characters without any code page translation.
/// This reproduces how the host's broken path strings look to the wide APIs
/// and is only used on paths the host itself created.
pub fn widen_ansi(bytes: &[u8]) -> Vec<u16> {
    bytes.iter().map(|&b| u16::from(b)).collect()
}

/// Writes `src` (cut at its first NUL) into the fixed-size single-byte
/// buffer `dst` as UTF-8, truncating at a character boundary and
/// NUL-terminating whenever the buffer is non-empty. Returns the number of
/// bytes written before the NUL.
pub fn narrow_into(src: &[u16], dst: &mut [u8]) -> usize {
    if dst.is_empty() {
        return 0;
    }
    let end = src.iter().position(|&c| c == 0).unwrap_or(src.len());
    let mut pos = 0;
    for ch in char::decode_utf16(src[..end].iter().cloned()) {
        let ch = ch.unwrap_or(char::REPLACEMENT_CHARACTER);
        let len = ch.len_utf8();
        if pos + len + 1 > dst.len() {
            break;
        }
        ch.encode_utf8(&mut dst[pos..pos + len]);
        pos += len;
    }
    dst[pos] = 0;
    pos
}

/// Appends a path component, inserting a backslash unless one is already
/// there. An empty base stays relative.
pub fn push_component(path: &mut Vec<u8>, component: &str) {
    match path.last() {
        None => (),
        Some(&b'\\') | Some(&b'/') => (),
        Some(_) => path.push(b'\\'),
    }
    path.extend_from_slice(component.as_bytes());
}

pub fn push_component_wide(path: &mut Vec<u16>, component: &str) {
    match path.last() {
        None => (),
        Some(&c) if is_sep(c) => (),
        Some(_) => path.push(u16::from(b'\\')),
    }
    path.extend(component.encode_utf16());
}

/// Length of the parent-directory prefix of `path`, or `None` at a drive
/// root or a single-component path. Drives the upward empty-directory walk
/// after a migration.
pub fn parent_len(path: &[u16]) -> Option<usize> {
    let mut end = path.len();
    while end > 0 && is_sep(path[end - 1]) {
        end -= 1;
    }
    let idx = path[..end].iter().rposition(|&c| is_sep(c))?;
    // "C:\x" would yield "C:", which is not a removable directory.
    if idx <= 2 {
        None
    } else {
        Some(idx)
    }
}

/// Copies a path and gives it the double NUL terminator `SHFileOperationW`
/// path lists require.
pub fn double_null_terminated(path: &[u16]) -> Vec<u16> {
    let mut out = path.to_vec();
    out.push(0);
    out.push(0);
    out
}

/// Repairs a single-path list that is missing its second terminating NUL.
/// The host builds these lists on its stack one character short, so writing
/// one u16 past the first NUL stays inside its buffer.
pub unsafe fn fix_second_terminator(list: *mut u16) {
    let mut len = 0;
    while *list.add(len) != 0 {
        len += 1;
    }
    *list.add(len + 1) = 0;
}

/// Maps a `WideCharToMultiByte` result (which counts the NUL) to the
/// `wcstombs` contract (which does not). A failed conversion returns 0 here
/// and wraps to `usize::MAX`, which is exactly the CRT's `(size_t)-1` error
/// value, so the wrap is intentional.
pub fn wcstombs_len(converted: i32) -> usize {
    (converted as usize).wrapping_sub(1)
}
