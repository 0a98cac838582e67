#![cfg_attr(not(feature = "std"), no_std)]

//! Page-granular storage interface consumed by the `embeddb` storage engine.
//!
//! This crate plays the role that `embedded_nand::NandFlash` plays for a NAND
//! flash device, but generalized to the page-file contract the engine
//! actually needs: synchronous, fail-closed, page-granular
//! `open/close/read/write/seek/tell/flush/error`, with a sticky error flag.
//! Concrete physical media drivers (SD card, SPI NOR/NAND, FRAM) are out of
//! scope; this crate ships only the trait and two reference implementations
//! used for testing and desktop hosting.

mod fmt;
pub mod mock;

#[cfg(feature = "std")]
pub mod file;

use thiserror::Error;

/// Generic error kind a [`PageFile`] implementation maps its errors onto.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[non_exhaustive]
pub enum PageFileErrorKind {
    /// An operation was attempted before `open` succeeded, or after `close`.
    NotOpen,
    /// The requested page or byte offset is beyond the file's bounds.
    OutOfBounds,
    /// The underlying medium reported an I/O failure.
    Io,
    /// Error specific to the implementation.
    Other,
}

/// Error type implemented by a [`PageFile`]'s associated `Error`.
pub trait PageFileError: core::fmt::Debug {
    fn kind(&self) -> PageFileErrorKind;
}

/// Shares an error type across a [`PageFile`] implementation, mirroring
/// `embedded_nand::ErrorType`.
pub trait ErrorType {
    type Error: PageFileError;
}

/// How a [`PageFile`] should be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Open an existing file for reading and writing, preserving contents.
    ReadWrite,
    /// Truncate (or create) the file, discarding any existing contents.
    ReadWriteTruncate,
}

/// A block-addressable storage abstraction: synchronous, fail-closed,
/// page-granular (`spec.md` \S4.1).
///
/// Guarantees the core relies on: a completed `write_page` is durable after
/// `flush`; partial page writes never happen; reads and writes of distinct
/// pages may be issued in any order.
pub trait PageFile: ErrorType {
    /// Size in bytes of one page. Every `read_page`/`write_page` call moves
    /// exactly this many bytes.
    const PAGE_SIZE: usize;

    /// Open the underlying medium. Returns `Ok(true)` if a file with
    /// existing content was found and preserved (relevant for engine
    /// recovery), `Ok(false)` if a fresh/truncated file was opened.
    fn open(&mut self, mode: OpenMode) -> Result<bool, Self::Error>;

    /// Close the underlying medium. After this, any other call must fail
    /// with [`PageFileErrorKind::NotOpen`].
    fn close(&mut self) -> Result<(), Self::Error>;

    /// Read page `page_id` into `out`. `out.len()` must equal `PAGE_SIZE`.
    /// Returns the number of pages read (0 or 1).
    fn read_page(&mut self, page_id: u32, out: &mut [u8]) -> Result<u32, Self::Error>;

    /// Write `data` as page `page_id`. `data.len()` must equal `PAGE_SIZE`.
    /// Returns the number of pages written (0 or 1).
    fn write_page(&mut self, page_id: u32, data: &[u8]) -> Result<u32, Self::Error>;

    /// Move the byte cursor used by [`Self::read_rel`]/[`Self::write_rel`].
    fn seek(&mut self, abs_byte_offset: u64) -> Result<(), Self::Error>;

    /// Current absolute byte offset of the cursor.
    fn tell(&mut self) -> Result<u64, Self::Error>;

    /// Read `out.len()` bytes starting at the current cursor, advancing it.
    /// Used by the var log, whose records straddle page boundaries.
    fn read_rel(&mut self, out: &mut [u8]) -> Result<usize, Self::Error>;

    /// Write `data` starting at the current cursor, advancing it.
    fn write_rel(&mut self, data: &[u8]) -> Result<usize, Self::Error>;

    /// Make all completed writes durable.
    fn flush(&mut self) -> Result<(), Self::Error>;

    /// Sticky error flag: once set by a failed operation it stays set until
    /// the implementation is reopened. The engine polls this after every
    /// I/O call and converts a set flag into `Error::Io`.
    fn error(&mut self) -> bool;
}

/// Error used by the reference implementations in this crate ([`mock`],
/// [`file`]).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("page file is not open")]
    NotOpen,
    #[error("offset or page id out of bounds")]
    OutOfBounds,
    #[error("I/O error")]
    Io,
}

impl PageFileError for Error {
    fn kind(&self) -> PageFileErrorKind {
        match self {
            Error::NotOpen => PageFileErrorKind::NotOpen,
            Error::OutOfBounds => PageFileErrorKind::OutOfBounds,
            Error::Io => PageFileErrorKind::Io,
        }
    }
}

