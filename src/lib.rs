//! Core logic of the runtime UTF-8 path fix for Mafia II: Definitive Edition.
//!
//! The game converts UTF-16 paths through ANSI code page APIs, which corrupts
//! non-Latin characters and can resolve the user's save directory to a wrong
//! location. This crate holds everything that does not need a live process:
//! byte-pattern signatures and their exact-count gate, the import table walk,
//! the save migration state machine, and the string/path plumbing the Win32
//! wrappers are built on. The `utf8fix_shim` crate applies all of it to the
//! running game.

#[macro_use] extern crate log;

pub mod image;
pub mod migrate;
pub mod pattern;
pub mod wide;

/// Directory the game keeps its user data under, relative to Documents.
pub const SAVE_ROOT: &str = "My Games";
pub const PRODUCT_DIR: &str = "Mafia II Definitive Edition";
