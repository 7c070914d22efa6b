//! Import-table redirection exercised against a synthetic image laid out in
//! a plain byte buffer, with every RVA equal to its buffer offset.

use utf8fix::image::{Error, Image, ImportPatch};
use utf8fix::pattern::Pattern;

const NT: usize = 0x80;
const OPT: usize = NT + 0x18;
const SECTIONS: usize = OPT + 0xf0;
const CODE: usize = 0x1c0;
const DESCRIPTORS: usize = 0x200;
const NAME_TABLE: usize = 0x300;
const LIBRARY_NAME: usize = 0x400;
const SYMBOL_A: usize = 0x420;
const SYMBOL_B: usize = 0x440;
const ADDRESS_TABLE: usize = 0x500;

const ORIGINAL_A: usize = 0x1111_1111;
const ORIGINAL_B: usize = 0x2222_2222;

struct FakeImage(Vec<u8>);

impl FakeImage {
    fn put(&mut self, offset: usize, bytes: &[u8]) {
        self.0[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn put_u16(&mut self, offset: usize, value: u16) {
        self.put(offset, &value.to_ne_bytes());
    }

    fn put_u32(&mut self, offset: usize, value: u32) {
        self.put(offset, &value.to_ne_bytes());
    }

    fn put_usize(&mut self, offset: usize, value: usize) {
        self.put(offset, &value.to_ne_bytes());
    }

    fn slot(&self, index: usize) -> usize {
        let offset = ADDRESS_TABLE + index * std::mem::size_of::<usize>();
        usize::from_ne_bytes(
            self.0[offset..offset + std::mem::size_of::<usize>()].try_into().unwrap(),
        )
    }

    fn image(&mut self) -> Image {
        unsafe { Image::from_base(self.0.as_mut_ptr()).unwrap() }
    }
}

/// One imported library (name table at NAME_TABLE unless overridden to 0)
/// with two named symbols and one by-ordinal entry between them.
fn build(name_table: u32) -> FakeImage {
    let mut img = FakeImage(vec![0u8; 0x600]);
    let thunk = std::mem::size_of::<usize>();

    img.put(0, b"MZ");
    img.put_u32(0x3c, NT as u32);
    img.put(NT, b"PE\0\0");
    img.put_u16(NT + 6, 1); // section count
    img.put_u16(NT + 0x14, 0xf0); // optional header size
    img.put_u16(OPT, 0x20b); // PE32+
    img.put_u32(OPT + 0x6c, 16); // directory count
    img.put_u32(OPT + 0x70 + 8, DESCRIPTORS as u32); // import directory
    img.put_u32(OPT + 0x70 + 12, 40);

    img.put(SECTIONS, b".text\0\0\0");
    img.put_u32(SECTIONS + 8, 0x20); // virtual size
    img.put_u32(SECTIONS + 12, CODE as u32);
    img.put_u32(SECTIONS + 36, 0x6000_0020); // code | execute | read

    img.put_u32(DESCRIPTORS, name_table);
    img.put_u32(DESCRIPTORS + 12, LIBRARY_NAME as u32);
    img.put_u32(DESCRIPTORS + 16, ADDRESS_TABLE as u32);

    // Mixed case to exercise the case-insensitive library compare.
    img.put(LIBRARY_NAME, b"KERNEL32.dll\0");
    img.put_u16(SYMBOL_A, 0); // hint
    img.put(SYMBOL_A + 2, b"CreateFileA\0");
    img.put_u16(SYMBOL_B, 0);
    img.put(SYMBOL_B + 2, b"FindFirstFileA\0");

    img.put_usize(NAME_TABLE, SYMBOL_A);
    img.put_usize(NAME_TABLE + thunk, 1 << (usize::BITS - 1)); // by ordinal
    img.put_usize(NAME_TABLE + thunk * 2, SYMBOL_B);

    img.put_usize(ADDRESS_TABLE, ORIGINAL_A);
    img.put_usize(ADDRESS_TABLE + thunk, 0xdead);
    img.put_usize(ADDRESS_TABLE + thunk * 2, ORIGINAL_B);

    img.put(CODE, &[0x90, 0x41, 0xb8, 0xe9, 0xfd, 0x00, 0x00, 0xc3]);
    img
}

fn patches() -> [ImportPatch; 2] {
    [
        ImportPatch {
            library: "kernel32.dll",
            symbol: "CreateFileA",
            replacement: 0xaaaa_0001,
        },
        ImportPatch {
            library: "kernel32.dll",
            symbol: "FindFirstFileA",
            replacement: 0xaaaa_0002,
        },
    ]
}

#[test]
fn redirects_matching_slots() {
    let mut img = build(NAME_TABLE as u32);
    let image = img.image();
    let written =
        unsafe { image.redirect_imports(&patches(), |slot, value| unsafe { *slot = value }).unwrap() };
    assert_eq!(written, 2);
    assert_eq!(img.slot(0), 0xaaaa_0001);
    assert_eq!(img.slot(1), 0xdead); // ordinal entry untouched
    assert_eq!(img.slot(2), 0xaaaa_0002);
}

#[test]
fn redirection_is_idempotent() {
    let mut img = build(NAME_TABLE as u32);
    let image = img.image();
    unsafe {
        image.redirect_imports(&patches(), |slot, value| unsafe { *slot = value }).unwrap();
        image.redirect_imports(&patches(), |slot, value| unsafe { *slot = value }).unwrap();
    }
    assert_eq!(img.slot(0), 0xaaaa_0001);
    assert_eq!(img.slot(2), 0xaaaa_0002);
}

#[test]
fn unknown_symbols_touch_nothing() {
    let mut img = build(NAME_TABLE as u32);
    let image = img.image();
    let patches = [ImportPatch {
        library: "kernel32.dll",
        symbol: "CreateDirectoryA",
        replacement: 0xbbbb,
    }];
    let mut writes = 0;
    let written = unsafe {
        image
            .redirect_imports(&patches, |_slot, _value| writes += 1)
            .unwrap()
    };
    assert_eq!(written, 0);
    assert_eq!(writes, 0);
    assert_eq!(img.slot(0), ORIGINAL_A);
    assert_eq!(img.slot(2), ORIGINAL_B);
}

#[test]
fn untargeted_library_is_not_walked() {
    let mut img = build(NAME_TABLE as u32);
    let image = img.image();
    let patches = [ImportPatch {
        library: "shell32.dll",
        symbol: "SHFileOperationW",
        replacement: 0xcccc,
    }];
    let written =
        unsafe { image.redirect_imports(&patches, |slot, value| unsafe { *slot = value }).unwrap() };
    assert_eq!(written, 0);
}

#[test]
fn ordinal_only_binding_is_fatal() {
    let mut img = build(0);
    let image = img.image();
    let result = unsafe { image.redirect_imports(&patches(), |slot, value| unsafe { *slot = value }) };
    match result {
        Err(Error::MissingNameTable(library)) => assert_eq!(library, "KERNEL32.dll"),
        other => panic!("Expected MissingNameTable, got {:?}", other),
    }
    // Fatal must also mean no partial writes.
    assert_eq!(img.slot(0), ORIGINAL_A);
    assert_eq!(img.slot(2), ORIGINAL_B);
}

#[test]
fn code_section_bounds_feed_the_scanner() {
    let mut img = build(NAME_TABLE as u32);
    let image = img.image();
    let (ptr, len) = unsafe { image.code_section().unwrap() };
    assert_eq!(len, 0x20);
    let code = unsafe { std::slice::from_raw_parts(ptr, len) };
    let matches = Pattern::parse("41 BE E9 FD 00 00").scan(code);
    assert!(matches.is_empty());
    let matches = Pattern::parse("41 B8 E9 FD 00 00").scan(code);
    assert_eq!(matches, vec![1]);
}

#[test]
fn rejects_non_images() {
    let mut garbage = vec![0u8; 0x100];
    assert!(unsafe { Image::from_base(garbage.as_mut_ptr()) }.is_err());
    garbage[0] = b'M';
    garbage[1] = b'Z';
    assert!(matches!(
        unsafe { Image::from_base(garbage.as_mut_ptr()) },
        Err(Error::BadPeMagic)
    ));
}
