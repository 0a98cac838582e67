//! Sparse index log (C7, `spec.md` \S4.7).
//!
//! One entry per sealed data page, replicating that page's bitmap so range
//! predicates can skip whole data pages without reading them. Laid out as
//! its own append-only, wrap-around page file, the same shape as
//! [`crate::varlog::VarLog`] but holding fixed-size bitmap entries instead
//! of a length-prefixed byte stream.

use alloc::vec;
use alloc::vec::Vec;

use page_file::{OpenMode, PageFile};

use crate::page::{IndexPageHeaderLayout, INDEX_PAGE_HEADER_SIZE};

pub struct IndexLog<F: PageFile> {
    file: F,
    page_size: usize,
    bitmap_size: usize,
    num_index_pages: u32,
    capacity_per_page: usize,
    next_idx_page_id: u32,
    min_index_page_id: u32,
    write_buf: Vec<u8>,
    write_buf_count: u16,
    write_buf_min_data_page_id: u32,
    layout: IndexPageHeaderLayout,
}

impl<F: PageFile> IndexLog<F> {
    pub fn new(mut file: F, page_size: usize, bitmap_size: usize, num_index_pages: u32, reset: bool) -> Self {
        let existed = matches!(
            file.open(if reset {
                OpenMode::ReadWriteTruncate
            } else {
                OpenMode::ReadWrite
            }),
            Ok(true)
        );
        let layout = IndexPageHeaderLayout { bitmap_size };
        let capacity_per_page = layout.capacity(page_size);
        let mut log = Self {
            file,
            page_size,
            bitmap_size,
            num_index_pages,
            capacity_per_page,
            next_idx_page_id: 0,
            min_index_page_id: 0,
            write_buf: vec![0u8; page_size],
            write_buf_count: 0,
            write_buf_min_data_page_id: 0,
            layout,
        };
        if existed {
            log.recover();
        }
        log
    }

    fn slot(&self, page_id: u32) -> u32 {
        page_id % self.num_index_pages
    }

    fn recover(&mut self) {
        let mut buf = vec![0u8; self.page_size];
        let mut max_buf = vec![0u8; self.page_size];
        let mut max_id: Option<u32> = None;
        let mut min_id: Option<u32> = None;
        for slot in 0..self.num_index_pages {
            if self.file.read_page(slot, &mut buf).is_err() {
                continue;
            }
            if buf.iter().all(|&b| b == 0xFF) {
                continue;
            }
            let pid = self.layout.page_id(&buf);
            if max_id.map(|m| pid > m).unwrap_or(true) {
                max_id = Some(pid);
                max_buf.copy_from_slice(&buf);
            }
            if min_id.map(|m| pid < m).unwrap_or(true) {
                min_id = Some(pid);
            }
        }
        if let (Some(max_id), Some(min_id)) = (max_id, min_id) {
            self.next_idx_page_id = max_id + 1;
            self.min_index_page_id = min_id;
            self.write_buf_min_data_page_id =
                self.layout.min_data_page_id(&max_buf) + self.layout.count(&max_buf) as u32;
        }
    }

    pub fn next_idx_page_id(&self) -> u32 {
        self.next_idx_page_id
    }
    pub fn min_index_page_id(&self) -> u32 {
        self.min_index_page_id
    }
    pub fn num_avail_index_pages(&self) -> u32 {
        self.num_index_pages - (self.next_idx_page_id - self.min_index_page_id)
    }

    /// Append the bitmap for a just-sealed data page (`spec.md` \S4.7:
    /// "For every sealed data page, an entry equal to its bitmap is
    /// appended").
    pub fn append_entry(&mut self, data_page_id: u32, bitmap: &[u8]) -> Result<(), F::Error> {
        if self.write_buf_count == 0 {
            self.write_buf_min_data_page_id = data_page_id;
        }
        self.layout
            .entry_mut(&mut self.write_buf, self.write_buf_count as usize)
            .copy_from_slice(bitmap);
        self.write_buf_count += 1;
        if self.write_buf_count as usize == self.capacity_per_page {
            self.seal_write_buf()?;
        }
        Ok(())
    }

    fn seal_write_buf(&mut self) -> Result<(), F::Error> {
        self.layout.set_page_id(&mut self.write_buf, self.next_idx_page_id);
        self.layout
            .set_min_data_page_id(&mut self.write_buf, self.write_buf_min_data_page_id);
        self.layout.set_count(&mut self.write_buf, self.write_buf_count);
        let slot = self.slot(self.next_idx_page_id);
        self.file.write_page(slot, &self.write_buf)?;
        self.next_idx_page_id += 1;

        if self.next_idx_page_id - self.min_index_page_id == self.num_index_pages {
            self.min_index_page_id += 1;
        }

        self.write_buf.iter_mut().for_each(|b| *b = 0);
        self.write_buf_count = 0;
        Ok(())
    }

    /// Drop leading index pages that are now entirely stale (every entry
    /// they carry describes a data page older than `min_data_page_id`),
    /// called after a data-log wrap-around.
    pub fn retire_stale(&mut self, min_data_page_id: u32) -> Result<(), F::Error> {
        let mut buf = vec![0u8; self.page_size];
        while self.min_index_page_id < self.next_idx_page_id {
            let slot = self.slot(self.min_index_page_id);
            self.file.read_page(slot, &mut buf)?;
            let covers_end = self.layout.min_data_page_id(&buf) + self.layout.count(&buf) as u32;
            if covers_end <= min_data_page_id {
                self.min_index_page_id += 1;
            } else {
                break;
            }
        }
        Ok(())
    }

    /// The bitmap entry for `data_page_id`, or `None` if no live index page
    /// covers it (index disabled for that page, or never flushed).
    pub fn bitmap_for_data_page(&mut self, data_page_id: u32) -> Result<Option<Vec<u8>>, F::Error> {
        if self.write_buf_count > 0
            && data_page_id >= self.write_buf_min_data_page_id
            && data_page_id < self.write_buf_min_data_page_id + self.write_buf_count as u32
        {
            let idx = (data_page_id - self.write_buf_min_data_page_id) as usize;
            return Ok(Some(self.layout.entry(&self.write_buf, idx).to_vec()));
        }
        let mut buf = vec![0u8; self.page_size];
        let mut pid = self.min_index_page_id;
        while pid < self.next_idx_page_id {
            let slot = self.slot(pid);
            self.file.read_page(slot, &mut buf)?;
            let start = self.layout.min_data_page_id(&buf);
            let count = self.layout.count(&buf) as u32;
            if data_page_id >= start && data_page_id < start + count {
                let idx = (data_page_id - start) as usize;
                return Ok(Some(self.layout.entry(&buf, idx).to_vec()));
            }
            pid += 1;
        }
        Ok(None)
    }

    pub fn flush(&mut self) -> Result<(), F::Error> {
        if self.write_buf_count > 0 {
            self.layout.set_page_id(&mut self.write_buf, self.next_idx_page_id);
            self.layout
                .set_min_data_page_id(&mut self.write_buf, self.write_buf_min_data_page_id);
            self.layout.set_count(&mut self.write_buf, self.write_buf_count);
            let slot = self.slot(self.next_idx_page_id);
            self.file.write_page(slot, &self.write_buf)?;
        }
        self.file.flush()
    }

    pub fn close(&mut self) -> Result<(), F::Error> {
        self.file.close()
    }

    pub fn bitmap_size(&self) -> usize {
        self.bitmap_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use page_file::mock::MemoryPageFile;

    type Mem = MemoryPageFile<64, 8>;

    fn layout() -> IndexPageHeaderLayout {
        IndexPageHeaderLayout { bitmap_size: 1 }
    }

    #[test]
    fn entries_are_retrievable_after_page_seal() {
        let cap = layout().capacity(64);
        let mut log = IndexLog::<Mem>::new(Mem::new(), 64, 1, 8, true);
        for i in 0..cap as u32 {
            log.append_entry(i, &[i as u8]).unwrap();
        }
        // Exactly filled one page, so it has been sealed already.
        let bm = log.bitmap_for_data_page(0).unwrap().unwrap();
        assert_eq!(bm, vec![0u8]);
        let bm = log.bitmap_for_data_page(cap as u32 - 1).unwrap().unwrap();
        assert_eq!(bm, vec![(cap - 1) as u8]);
    }

    #[test]
    fn partial_buffer_entries_are_visible_before_flush() {
        let mut log = IndexLog::<Mem>::new(Mem::new(), 64, 1, 8, true);
        log.append_entry(0, &[0xAB]).unwrap();
        let bm = log.bitmap_for_data_page(0).unwrap().unwrap();
        assert_eq!(bm, vec![0xAB]);
    }

    #[test]
    fn retire_stale_advances_past_fully_covered_pages() {
        let cap = layout().capacity(64) as u32;
        let mut log = IndexLog::<Mem>::new(Mem::new(), 64, 1, 8, true);
        for i in 0..cap {
            log.append_entry(i, &[0]).unwrap();
        }
        assert_eq!(log.min_index_page_id(), 0);
        log.retire_stale(cap).unwrap();
        assert_eq!(log.min_index_page_id(), 1);
    }
}
