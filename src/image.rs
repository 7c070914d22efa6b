//! Inspector for a loaded executable image: import table lookup/redirection
//! and code section bounds for signature scanning.
//!
//! The walk reads the PE headers directly off the mapped image, so everything
//! here is `unsafe` and only valid while the module stays mapped. Slot writes
//! go through an injected writer; the caller decides how to make the address
//! table writable (or, in tests, records the writes against a synthetic
//! image built in a plain byte buffer).

use std::mem;
use std::ptr;

use quick_error::quick_error;

quick_error! {
    #[derive(Debug)]
    pub enum Error {
        BadDosMagic {
            display("Image does not start with an MZ header")
        }
        BadPeMagic {
            display("PE signature missing")
        }
        BadOptionalMagic(magic: u16) {
            display("Unknown optional header magic {:04x}", magic)
        }
        NoImports {
            display("Image has no import directory")
        }
        /// A targeted library is bound by ordinal only. The compilation model
        /// of the host differs from what this fix was built against, and
        /// continuing would silently fail to patch, so this is fatal.
        MissingNameTable(library: String) {
            display("Import descriptor for {} has no name table", library)
        }
    }
}

/// One import-table rewrite: `library!symbol` gets its resolved address slot
/// overwritten with `replacement`.
pub struct ImportPatch {
    pub library: &'static str,
    pub symbol: &'static str,
    pub replacement: usize,
}

pub struct Image {
    base: *mut u8,
}

const DOS_MAGIC: u16 = 0x5a4d;
const PE_MAGIC: u32 = 0x0000_4550;
const PE32_MAGIC: u16 = 0x10b;
const PE32_PLUS_MAGIC: u16 = 0x20b;
const IMPORT_DIRECTORY: u32 = 1;
const SCN_MEM_EXECUTE: u32 = 0x2000_0000;
const ORDINAL_FLAG: usize = 1 << (usize::BITS - 1);
const DESCRIPTOR_SIZE: u32 = 20;

impl Image {
    /// Wraps a module base after validating the DOS and PE magics.
    pub unsafe fn from_base(base: *mut u8) -> Result<Image, Error> {
        let image = Image { base };
        if image.read::<u16>(0) != DOS_MAGIC {
            return Err(Error::BadDosMagic);
        }
        let nt = image.read::<u32>(0x3c);
        if image.read::<u32>(nt) != PE_MAGIC {
            return Err(Error::BadPeMagic);
        }
        match image.read::<u16>(nt + 0x18) {
            PE32_MAGIC | PE32_PLUS_MAGIC => Ok(image),
            magic => Err(Error::BadOptionalMagic(magic)),
        }
    }

    pub fn base(&self) -> *mut u8 {
        self.base
    }

    unsafe fn read<T: Copy>(&self, offset: u32) -> T {
        ptr::read_unaligned(self.base.add(offset as usize) as *const T)
    }

    unsafe fn nt_offset(&self) -> u32 {
        self.read::<u32>(0x3c)
    }

    /// (virtual address, size) of a data directory entry, if present.
    unsafe fn data_directory(&self, index: u32) -> Option<(u32, u32)> {
        let opt = self.nt_offset() + 0x18;
        let (count_offset, dir_offset) = match self.read::<u16>(opt) {
            PE32_MAGIC => (opt + 0x5c, opt + 0x60),
            _ => (opt + 0x6c, opt + 0x70),
        };
        if index >= self.read::<u32>(count_offset) {
            return None;
        }
        let va = self.read::<u32>(dir_offset + index * 8);
        let size = self.read::<u32>(dir_offset + index * 8 + 4);
        if va == 0 {
            None
        } else {
            Some((va, size))
        }
    }

    unsafe fn name_matches(&self, rva: u32, expected: &str, ignore_case: bool) -> bool {
        let bytes = expected.as_bytes();
        for (i, &b) in bytes.iter().enumerate() {
            let live = self.read::<u8>(rva + i as u32);
            let equal = if ignore_case {
                live.eq_ignore_ascii_case(&b)
            } else {
                live == b
            };
            if !equal {
                return false;
            }
        }
        self.read::<u8>(rva + bytes.len() as u32) == 0
    }

    unsafe fn read_name(&self, rva: u32) -> String {
        let mut bytes = Vec::new();
        let mut offset = rva;
        loop {
            let byte = self.read::<u8>(offset);
            if byte == 0 || bytes.len() > 0x100 {
                break;
            }
            bytes.push(byte);
            offset += 1;
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Walks the import descriptors and overwrites the address-table slot of
    /// every patched symbol through `write_slot`. Library names compare
    /// case-insensitively, symbol names exactly. Returns the number of slots
    /// written.
    ///
    /// Only descriptors some patch targets are inspected at all; a targeted
    /// descriptor whose original-first-thunk is null fails the whole walk
    /// with [`Error::MissingNameTable`].
    pub unsafe fn redirect_imports(
        &self,
        patches: &[ImportPatch],
        mut write_slot: impl FnMut(*mut usize, usize),
    ) -> Result<u32, Error> {
        let (imports, _size) = self.data_directory(IMPORT_DIRECTORY).ok_or(Error::NoImports)?;
        let thunk_size = mem::size_of::<usize>() as u32;
        let mut written = 0;
        let mut descriptor = imports;
        loop {
            let library_rva = self.read::<u32>(descriptor + 12);
            if library_rva == 0 {
                break;
            }
            let targeted = patches
                .iter()
                .any(|p| self.name_matches(library_rva, p.library, true));
            if targeted {
                let name_table = self.read::<u32>(descriptor);
                if name_table == 0 {
                    return Err(Error::MissingNameTable(self.read_name(library_rva)));
                }
                let address_table = self.read::<u32>(descriptor + 16);
                let mut index = 0;
                loop {
                    let entry = self.read::<usize>(name_table + index * thunk_size);
                    if entry == 0 {
                        break;
                    }
                    // Ordinal imports carry no name to compare against.
                    if entry & ORDINAL_FLAG == 0 {
                        // Skip the hint field of the name entry.
                        let symbol_rva = entry as u32 + 2;
                        for patch in patches {
                            if self.name_matches(library_rva, patch.library, true) &&
                                self.name_matches(symbol_rva, patch.symbol, false)
                            {
                                let slot = self
                                    .base
                                    .add((address_table + index * thunk_size) as usize)
                                    as *mut usize;
                                debug!(
                                    "Redirecting {}!{} at {:p}",
                                    patch.library, patch.symbol, slot,
                                );
                                write_slot(slot, patch.replacement);
                                written += 1;
                            }
                        }
                    }
                    index += 1;
                }
            }
            descriptor += DESCRIPTOR_SIZE;
        }
        Ok(written)
    }

    /// Pointer and length of the first executable section, the region all
    /// code signatures are matched against.
    pub unsafe fn code_section(&self) -> Option<(*mut u8, usize)> {
        let nt = self.nt_offset();
        let section_count = self.read::<u16>(nt + 6) as u32;
        let optional_size = self.read::<u16>(nt + 0x14) as u32;
        let sections = nt + 0x18 + optional_size;
        for i in 0..section_count {
            let section = sections + i * 40;
            let characteristics = self.read::<u32>(section + 36);
            if characteristics & SCN_MEM_EXECUTE != 0 {
                let va = self.read::<u32>(section + 12);
                let virtual_size = self.read::<u32>(section + 8);
                return Some((self.base.add(va as usize), virtual_size as usize));
            }
        }
        None
    }
}
