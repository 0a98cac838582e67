//! The sort engine's temp file: a flat sequence of fixed-size-record pages
//! (`spec.md` \S6), shared by the unsorted input, every intermediate run,
//! and the final sorted output.

use alloc::vec;
use alloc::vec::Vec;

use page_file::PageFile;

use crate::record::RecordPageLayout;

pub struct TempFile<F: PageFile> {
    file: F,
    layout: RecordPageLayout,
    /// One past the highest page id ever written; `write_page` callers
    /// pick explicit ids, this only tracks the high-water mark so callers
    /// can append without tracking it themselves.
    next_page_id: u32,
}

impl<F: PageFile> TempFile<F> {
    pub fn new(file: F, layout: RecordPageLayout) -> Self {
        Self {
            file,
            layout,
            next_page_id: 0,
        }
    }

    pub fn layout(&self) -> RecordPageLayout {
        self.layout
    }

    pub fn next_page_id(&self) -> u32 {
        self.next_page_id
    }

    /// Append one page holding `records` (a flat buffer of whole records,
    /// `records.len() <= records_per_page * record_size`), tagged with
    /// `sublist_idx` (`spec.md` \S4.10.1's 0-based sublist-local page
    /// index).
    pub fn append_page(&mut self, sublist_idx: u32, records: &[u8]) -> Result<u32, F::Error> {
        let count = records.len() / self.layout.record_size;
        let mut buf = vec![0u8; self.layout.page_size];
        self.layout.set_sublist_block_index(&mut buf, sublist_idx);
        self.layout.set_record_count(&mut buf, count as u16);
        buf[crate::record::TEMP_PAGE_HEADER_SIZE..crate::record::TEMP_PAGE_HEADER_SIZE + records.len()]
            .copy_from_slice(records);
        let page_id = self.next_page_id;
        self.file.write_page(page_id, &buf)?;
        self.next_page_id += 1;
        Ok(page_id)
    }

    pub fn read_page(&mut self, page_id: u32, buf: &mut [u8]) -> Result<(), F::Error> {
        self.file.read_page(page_id, buf)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), F::Error> {
        self.file.flush()
    }

    pub fn into_inner(self) -> F {
        self.file
    }

    pub fn inner_mut(&mut self) -> &mut F {
        &mut self.file
    }

    pub fn new_page_buf(&self) -> Vec<u8> {
        vec![0u8; self.layout.page_size]
    }
}

/// Sequential read cursor over a page range already written to a
/// [`TempFile`]. Takes the file as an explicit argument on every call
/// instead of owning a reference to it, so a caller can interleave reads
/// through a cursor with writes through the same `TempFile` (e.g.
/// replacement selection re-reading materialized input while appending
/// sorted runs to the same file) without two live mutable borrows.
pub struct TempFileCursor {
    page: u32,
    idx: usize,
    count_in_page: usize,
    remaining: u64,
    loaded: bool,
}

impl TempFileCursor {
    pub fn new(remaining: u64) -> Self {
        Self {
            page: 0,
            idx: 0,
            count_in_page: 0,
            remaining,
            loaded: false,
        }
    }

    /// Fill `out` with the next record. `buf` is scratch space the caller
    /// owns (sized one page); returns `false` once `remaining` records
    /// have been read.
    pub fn next<F: PageFile>(
        &mut self,
        temp: &mut TempFile<F>,
        buf: &mut Vec<u8>,
        out: &mut [u8],
    ) -> Result<bool, F::Error> {
        if self.remaining == 0 {
            return Ok(false);
        }
        if !self.loaded || self.idx >= self.count_in_page {
            if self.loaded {
                self.page += 1;
                self.idx = 0;
            }
            temp.read_page(self.page, buf)?;
            self.count_in_page = temp.layout().record_count(buf) as usize;
            self.loaded = true;
        }
        out.copy_from_slice(temp.layout().record(buf, self.idx));
        self.idx += 1;
        self.remaining -= 1;
        Ok(true)
    }
}
