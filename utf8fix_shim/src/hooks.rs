//! Inline patching primitives: near executable-memory allocation for
//! delegation stubs, rel32 call splicing, and protected byte overwrites.
//!
//! Callers gate every use behind `Pattern::require`; nothing here validates
//! what it is pointed at beyond what the splice itself needs.

use std::mem;
use std::ptr;
use std::slice;

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::{const_mutex, Mutex};
use winapi::ctypes::c_void;
use winapi::um::memoryapi::{VirtualAlloc, VirtualProtect};
use winapi::um::processthreadsapi::{FlushInstructionCache, GetCurrentProcess};
use winapi::um::sysinfoapi::GetSystemInfo;
use winapi::um::winnt::{MEM_COMMIT, MEM_RESERVE, PAGE_EXECUTE_READWRITE};

/// An installed redirection. Owned here for the process lifetime; process
/// teardown reclaims everything.
pub struct HookRecord {
    pub site: usize,
    pub stub: usize,
    pub replacement: usize,
}

static INSTALLED: Mutex<Vec<HookRecord>> = const_mutex(Vec::new());

pub fn record(site: usize, stub: usize, replacement: usize) {
    INSTALLED.lock().push(HookRecord {
        site,
        stub,
        replacement,
    });
}

const REGION_SIZE: usize = 0x1000;
// Staying within this distance of the patch site keeps every rel32 written
// below encodable.
const MAX_DISTANCE: usize = 0x4000_0000;

pub struct Trampoline {
    base: *mut u8,
    used: usize,
}

impl Trampoline {
    /// Allocates an executable region within rel32 range of `target`,
    /// probing outward in allocation-granularity steps.
    pub unsafe fn near(target: usize) -> Option<Trampoline> {
        let mut info = mem::zeroed();
        GetSystemInfo(&mut info);
        let granularity = info.dwAllocationGranularity as usize;
        let mut delta = granularity;
        while delta < MAX_DISTANCE {
            for candidate in [target.wrapping_sub(delta), target.wrapping_add(delta)] {
                let candidate = candidate & !(granularity - 1);
                if candidate == 0 {
                    continue;
                }
                let region = VirtualAlloc(
                    candidate as *mut c_void,
                    REGION_SIZE,
                    MEM_COMMIT | MEM_RESERVE,
                    PAGE_EXECUTE_READWRITE,
                );
                if !region.is_null() {
                    return Some(Trampoline {
                        base: region as *mut u8,
                        used: 0,
                    });
                }
            }
            delta += granularity;
        }
        None
    }

    unsafe fn alloc(&mut self, len: usize, align: usize) -> Option<*mut u8> {
        let offset = (self.used + align - 1) & !(align - 1);
        if offset + len > REGION_SIZE {
            return None;
        }
        self.used = offset + len;
        Some(self.base.add(offset))
    }

    /// Emits `jmp [rip+0]; dq target` and returns the stub entry, usable as
    /// a rel32 destination standing in for an arbitrary 64-bit target.
    pub unsafe fn jump_stub(&mut self, target: usize) -> Option<usize> {
        let stub = self.alloc(14, 8)?;
        let mut code = [0u8; 14];
        code[0] = 0xff;
        code[1] = 0x25;
        LittleEndian::write_u32(&mut code[2..6], 0);
        LittleEndian::write_u64(&mut code[6..14], target as u64);
        ptr::copy_nonoverlapping(code.as_ptr(), stub, code.len());
        FlushInstructionCache(GetCurrentProcess(), stub as *const c_void, code.len());
        Some(stub as usize)
    }

    /// A pointer-sized data slot reachable by rip-relative operands near the
    /// region's target.
    pub unsafe fn pointer_slot(&mut self, value: usize) -> Option<*mut usize> {
        let size = mem::size_of::<usize>();
        let slot = self.alloc(size, size)? as *mut usize;
        *slot = value;
        Some(slot)
    }
}

/// Destination of the rel32 call instruction at `site`.
pub unsafe fn read_call(site: *const u8) -> usize {
    let rel = LittleEndian::read_i32(slice::from_raw_parts(site.add(1), 4));
    (site as usize).wrapping_add(5).wrapping_add(rel as isize as usize)
}

/// Splices the rel32 call at `site` to go to `target` instead.
pub unsafe fn write_call(site: *mut u8, target: usize) {
    let rel = target.wrapping_sub(site as usize + 5) as u32;
    let mut bytes = [0u8; 5];
    bytes[0] = 0xe8;
    LittleEndian::write_u32(&mut bytes[1..], rel);
    write_protected(site, &bytes);
}

/// Rewrites a 4-byte rip-relative displacement at `site` to reference
/// `target`.
pub unsafe fn write_offset_value(site: *mut u8, target: usize) {
    let rel = target.wrapping_sub(site as usize + 4) as u32;
    let mut bytes = [0u8; 4];
    LittleEndian::write_u32(&mut bytes, rel);
    write_protected(site, &bytes);
}

pub unsafe fn nop(site: *mut u8, len: usize) {
    write_protected(site, &vec![0x90u8; len]);
}

/// Writes through read-only pages, restoring the previous protection and
/// flushing the instruction cache afterwards.
pub unsafe fn write_protected(site: *mut u8, bytes: &[u8]) {
    let mut old = 0;
    if VirtualProtect(site as *mut c_void, bytes.len(), PAGE_EXECUTE_READWRITE, &mut old) == 0 {
        return;
    }
    ptr::copy_nonoverlapping(bytes.as_ptr(), site, bytes.len());
    let mut unused = 0;
    VirtualProtect(site as *mut c_void, bytes.len(), old, &mut unused);
    FlushInstructionCache(GetCurrentProcess(), site as *const c_void, bytes.len());
}
