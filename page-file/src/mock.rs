//! In-memory [`PageFile`] used for tests and for the `embeddb` test suite,
//! playing the role that `embedded_nand::test::VirtualNandFlash` plays for
//! the teacher crate.

use crate::{Error, ErrorType, OpenMode, PageFile};

/// A fixed-capacity, heap-free page file backed by an in-struct byte array.
///
/// `PAGE_SIZE` is the page size in bytes; `NUM_PAGES` bounds the file's
/// capacity, mirroring `embedded_nand::test::VirtualNandFlash`'s fixed-array
/// storage rather than reaching for an allocator.
#[derive(Debug, Clone)]
pub struct MemoryPageFile<const PAGE_SIZE: usize, const NUM_PAGES: usize> {
    storage: [[u8; PAGE_SIZE]; NUM_PAGES],
    has_content: bool,
    open: bool,
    cursor: u64,
    sticky_error: bool,
}

impl<const PAGE_SIZE: usize, const NUM_PAGES: usize> Default
    for MemoryPageFile<PAGE_SIZE, NUM_PAGES>
{
    fn default() -> Self {
        Self::new()
    }
}

impl<const PAGE_SIZE: usize, const NUM_PAGES: usize> MemoryPageFile<PAGE_SIZE, NUM_PAGES> {
    /// Create a new, unopened memory page file.
    pub fn new() -> Self {
        Self {
            storage: [[0xFFu8; PAGE_SIZE]; NUM_PAGES],
            has_content: false,
            open: false,
            cursor: 0,
            sticky_error: false,
        }
    }

    fn require_open(&mut self) -> Result<(), Error> {
        if !self.open {
            self.sticky_error = true;
            return Err(Error::NotOpen);
        }
        Ok(())
    }

    fn byte_len(&self) -> u64 {
        NUM_PAGES as u64 * PAGE_SIZE as u64
    }

    fn byte_at(&self, offset: u64) -> u8 {
        let offset = offset as usize;
        self.storage[offset / PAGE_SIZE][offset % PAGE_SIZE]
    }

    fn set_byte_at(&mut self, offset: u64, value: u8) {
        let offset = offset as usize;
        self.storage[offset / PAGE_SIZE][offset % PAGE_SIZE] = value;
    }
}

impl<const PAGE_SIZE: usize, const NUM_PAGES: usize> ErrorType
    for MemoryPageFile<PAGE_SIZE, NUM_PAGES>
{
    type Error = Error;
}

impl<const PAGE_SIZE: usize, const NUM_PAGES: usize> PageFile
    for MemoryPageFile<PAGE_SIZE, NUM_PAGES>
{
    const PAGE_SIZE: usize = PAGE_SIZE;

    fn open(&mut self, mode: OpenMode) -> Result<bool, Self::Error> {
        let had_content = self.has_content;
        if mode == OpenMode::ReadWriteTruncate {
            self.storage = [[0xFFu8; PAGE_SIZE]; NUM_PAGES];
            self.has_content = false;
        }
        self.open = true;
        self.cursor = 0;
        self.sticky_error = false;
        Ok(had_content && mode == OpenMode::ReadWrite)
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        self.open = false;
        Ok(())
    }

    fn read_page(&mut self, page_id: u32, out: &mut [u8]) -> Result<u32, Self::Error> {
        self.require_open()?;
        if out.len() != PAGE_SIZE || page_id as usize >= NUM_PAGES {
            self.sticky_error = true;
            return Err(Error::OutOfBounds);
        }
        out.copy_from_slice(&self.storage[page_id as usize]);
        Ok(1)
    }

    fn write_page(&mut self, page_id: u32, data: &[u8]) -> Result<u32, Self::Error> {
        self.require_open()?;
        if data.len() != PAGE_SIZE || page_id as usize >= NUM_PAGES {
            self.sticky_error = true;
            return Err(Error::OutOfBounds);
        }
        self.storage[page_id as usize].copy_from_slice(data);
        self.has_content = true;
        Ok(1)
    }

    fn seek(&mut self, abs_byte_offset: u64) -> Result<(), Self::Error> {
        self.require_open()?;
        if abs_byte_offset > self.byte_len() {
            self.sticky_error = true;
            return Err(Error::OutOfBounds);
        }
        self.cursor = abs_byte_offset;
        Ok(())
    }

    fn tell(&mut self) -> Result<u64, Self::Error> {
        self.require_open()?;
        Ok(self.cursor)
    }

    fn read_rel(&mut self, out: &mut [u8]) -> Result<usize, Self::Error> {
        self.require_open()?;
        let avail = self.byte_len().saturating_sub(self.cursor) as usize;
        let n = out.len().min(avail);
        for (i, b) in out[..n].iter_mut().enumerate() {
            *b = self.byte_at(self.cursor + i as u64);
        }
        self.cursor += n as u64;
        Ok(n)
    }

    fn write_rel(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
        self.require_open()?;
        let avail = self.byte_len().saturating_sub(self.cursor) as usize;
        if data.len() > avail {
            self.sticky_error = true;
            return Err(Error::OutOfBounds);
        }
        for (i, &b) in data.iter().enumerate() {
            self.set_byte_at(self.cursor + i as u64, b);
        }
        self.cursor += data.len() as u64;
        self.has_content = true;
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.require_open()
    }

    fn error(&mut self) -> bool {
        self.sticky_error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_page() {
        let mut f = MemoryPageFile::<512, 4>::new();
        f.open(OpenMode::ReadWriteTruncate).unwrap();
        let page = [7u8; 512];
        assert_eq!(f.write_page(2, &page).unwrap(), 1);
        let mut out = [0u8; 512];
        assert_eq!(f.read_page(2, &mut out).unwrap(), 1);
        assert_eq!(out, page);
    }

    #[test]
    fn out_of_bounds_sets_sticky_error() {
        let mut f = MemoryPageFile::<512, 2>::new();
        f.open(OpenMode::ReadWriteTruncate).unwrap();
        let page = [0u8; 512];
        assert!(f.write_page(5, &page).is_err());
        assert!(f.error());
    }

    #[test]
    fn rel_io_straddles_pages() {
        let mut f = MemoryPageFile::<16, 4>::new();
        f.open(OpenMode::ReadWriteTruncate).unwrap();
        f.seek(10).unwrap();
        f.write_rel(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        f.seek(10).unwrap();
        let mut out = [0u8; 8];
        f.read_rel(&mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn not_open_is_rejected() {
        let mut f = MemoryPageFile::<512, 1>::new();
        let mut out = [0u8; 512];
        assert!(f.read_page(0, &mut out).is_err());
    }

    #[test]
    fn reopen_without_truncate_preserves_content() {
        let mut f = MemoryPageFile::<512, 2>::new();
        f.open(OpenMode::ReadWriteTruncate).unwrap();
        f.write_page(0, &[9u8; 512]).unwrap();
        f.close().unwrap();
        let had_content = f.open(OpenMode::ReadWrite).unwrap();
        assert!(had_content);
        let mut out = [0u8; 512];
        f.read_page(0, &mut out).unwrap();
        assert_eq!(out, [9u8; 512]);
    }
}
