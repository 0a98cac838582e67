//! Variable-length payload log (C6, `spec.md` \S4.6).
//!
//! Each fixed record stores a `u32` byte offset into this stream. A logical
//! var record is `u32 length` followed by `length` payload bytes, and may
//! straddle any number of pages; each page's `prevVarRecordId` header field
//! lets a reader that lands mid-record walk back to where it started.

use alloc::vec;
use alloc::vec::Vec;

use page_file::{OpenMode, PageFile};

use crate::page::{VarPageHeaderLayout, VAR_PAGE_HEADER_SIZE};

/// A cursor into the var log, returned by `get_var`/`next_var` (C8/C9 of
/// `spec.md` \S4.9). Remembers only an absolute offset; it is invalidated
/// by wrap-around crossing the watermark, which the engine checks for
/// before handing one out.
#[derive(Debug, Clone, Copy)]
pub struct VarStream {
    pub(crate) file_pos: u64,
    pub(crate) bytes_remaining: u32,
}

impl VarStream {
    pub fn bytes_remaining(&self) -> u32 {
        self.bytes_remaining
    }
}

pub struct VarLog<F: PageFile> {
    file: F,
    page_size: usize,
    num_var_pages: u32,
    next_var_page_id: u32,
    min_var_page_id: u32,
    /// Absolute byte offset (page_id * page_size + offset_in_page) of the
    /// next write.
    current_var_loc: u64,
    /// Lowest absolute byte offset that still holds live data.
    min_var_record_id: u64,
    /// Start offset of the record currently being appended (the one whose
    /// length-prefix `write_raw` is mid-way through writing, or about to
    /// start writing).
    current_record_start: u64,
    /// Start offset to stamp as `prevVarRecordId` on the write-buffer page
    /// once it seals: the start of whichever record's length-prefix began
    /// on this page, or (for a page opened mid-record) the record that's
    /// straddling into it.
    page_first_record_offset: u64,
    write_buf: Vec<u8>,
    write_buf_page_id: u32,
    write_buf_len: usize,
    layout: VarPageHeaderLayout,
}

impl<F: PageFile> VarLog<F> {
    pub fn new(mut file: F, page_size: usize, num_var_pages: u32, reset: bool) -> Self {
        let existed = file.open(if reset {
            OpenMode::ReadWriteTruncate
        } else {
            OpenMode::ReadWrite
        });
        let existed = matches!(existed, Ok(true));
        let mut log = Self {
            file,
            page_size,
            num_var_pages,
            next_var_page_id: 0,
            min_var_page_id: 0,
            current_var_loc: VAR_PAGE_HEADER_SIZE as u64,
            min_var_record_id: VAR_PAGE_HEADER_SIZE as u64,
            current_record_start: VAR_PAGE_HEADER_SIZE as u64,
            page_first_record_offset: VAR_PAGE_HEADER_SIZE as u64,
            write_buf: vec![0u8; page_size],
            write_buf_page_id: 0,
            write_buf_len: VAR_PAGE_HEADER_SIZE,
            layout: VarPageHeaderLayout,
        };
        if existed {
            log.recover();
        }
        log
    }

    fn slot(&self, page_id: u32) -> u32 {
        page_id % self.num_var_pages
    }

    /// Recovery (`spec.md` \S4.5's var-log analogue): scan every physical
    /// slot for the highest live `pageId`, then derive `nextVarPageId`,
    /// `currentVarLoc`, `minVarRecordId` from that page's header. A page
    /// found only partially written by a `flush()` before the last close is
    /// treated as sealed and a fresh page is started after it, same as
    /// `IndexLog::recover`.
    fn recover(&mut self) {
        let mut buf = vec![0u8; self.page_size];
        let mut max_buf = vec![0u8; self.page_size];
        let mut max_id: Option<u32> = None;
        for slot in 0..self.num_var_pages {
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
        }
        if let Some(last) = max_id {
            self.next_var_page_id = last + 1;
            self.current_var_loc =
                self.next_var_page_id as u64 * self.page_size as u64 + VAR_PAGE_HEADER_SIZE as u64;
            self.min_var_record_id = self.layout.prev_var_record_id(&max_buf);
            self.write_buf_page_id = self.next_var_page_id;
            self.write_buf_len = VAR_PAGE_HEADER_SIZE;
            self.min_var_page_id = self.next_var_page_id.saturating_sub(self.num_var_pages);
            self.current_record_start = self.current_var_loc;
            self.page_first_record_offset = self.current_var_loc;
        }
    }

    pub fn next_var_page_id(&self) -> u32 {
        self.next_var_page_id
    }
    pub fn min_var_page_id(&self) -> u32 {
        self.min_var_page_id
    }
    pub fn current_var_loc(&self) -> u64 {
        self.current_var_loc
    }
    pub fn min_var_record_id(&self) -> u64 {
        self.min_var_record_id
    }
    pub fn num_avail_var_pages(&self) -> u32 {
        self.num_var_pages - (self.next_var_page_id - self.min_var_page_id)
    }

    /// Append a logical var record (`length` prefix + payload); returns the
    /// absolute offset a fixed record should store to find it again.
    pub fn put_var(&mut self, payload: &[u8]) -> Result<u64, F::Error> {
        let start_offset = self.current_var_loc;
        self.current_record_start = start_offset;
        let len = payload.len() as u32;
        self.write_raw(&len.to_le_bytes())?;
        self.write_raw(payload)?;
        Ok(start_offset)
    }

    fn write_raw(&mut self, mut data: &[u8]) -> Result<(), F::Error> {
        while !data.is_empty() {
            if self.write_buf_len == VAR_PAGE_HEADER_SIZE {
                // First bytes landing on an untouched page: either this
                // record's length-prefix begins here, or (a page opened
                // mid-write) this record is straddling into it. Either way
                // it is the earliest record with any data on this page.
                self.page_first_record_offset = self.current_record_start;
            }
            let cap = self.page_size - self.write_buf_len;
            let n = data.len().min(cap);
            self.write_buf[self.write_buf_len..self.write_buf_len + n]
                .copy_from_slice(&data[..n]);
            self.write_buf_len += n;
            self.current_var_loc += n as u64;
            data = &data[n..];
            if self.write_buf_len == self.page_size {
                self.seal_write_buf()?;
            }
        }
        Ok(())
    }

    fn seal_write_buf(&mut self) -> Result<(), F::Error> {
        self.layout.set_page_id(&mut self.write_buf, self.write_buf_page_id);
        self.layout
            .set_prev_var_record_id(&mut self.write_buf, self.page_first_record_offset);
        let slot = self.slot(self.write_buf_page_id);
        self.file.write_page(slot, &self.write_buf)?;
        self.next_var_page_id = self.write_buf_page_id + 1;

        if self.next_var_page_id - self.min_var_page_id >= self.num_var_pages {
            self.reclaim_oldest_var_block()?;
        }

        self.write_buf_page_id = self.next_var_page_id;
        self.write_buf.iter_mut().for_each(|b| *b = 0);
        self.write_buf_len = VAR_PAGE_HEADER_SIZE;
        // current_var_loc must land past the header of the fresh page.
        self.current_var_loc = self.write_buf_page_id as u64 * self.page_size as u64
            + VAR_PAGE_HEADER_SIZE as u64;
        Ok(())
    }

    fn reclaim_oldest_var_block(&mut self) -> Result<(), F::Error> {
        self.min_var_page_id += 1;
        let mut head = vec![0u8; self.page_size];
        let slot = self.slot(self.min_var_page_id);
        self.file.read_page(slot, &mut head)?;
        self.min_var_record_id = self.layout.prev_var_record_id(&head);
        Ok(())
    }

    /// Flush the partially filled write-buffer page without sealing it
    /// permanently into the logical page sequence; used by `flush()`
    /// (`spec.md` \S4.5).
    pub fn flush(&mut self) -> Result<(), F::Error> {
        self.layout.set_page_id(&mut self.write_buf, self.write_buf_page_id);
        self.layout
            .set_prev_var_record_id(&mut self.write_buf, self.page_first_record_offset);
        let slot = self.slot(self.write_buf_page_id);
        self.file.write_page(slot, &self.write_buf)?;
        self.file.flush()
    }

    /// Prepare to read the var record at `offset`. Returns `None` if the
    /// record has been reclaimed (`offset < min_var_record_id`).
    pub fn open_stream(&mut self, offset: u64) -> Option<Result<VarStream, F::Error>> {
        if offset < self.min_var_record_id {
            return None;
        }
        Some(self.read_length_prefix(offset).map(|len| VarStream {
            file_pos: offset + 4,
            bytes_remaining: len,
        }))
    }

    fn read_length_prefix(&mut self, offset: u64) -> Result<u32, F::Error> {
        let mut buf = [0u8; 4];
        self.read_raw(offset, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Read up to `out.len()` bytes from `stream`, advancing it. Returns 0
    /// at end of record.
    pub fn read_stream(&mut self, stream: &mut VarStream, out: &mut [u8]) -> Result<usize, F::Error> {
        let n = out.len().min(stream.bytes_remaining as usize);
        if n == 0 {
            return Ok(0);
        }
        self.read_raw(stream.file_pos, &mut out[..n])?;
        stream.file_pos += n as u64;
        stream.bytes_remaining -= n as u32;
        Ok(n)
    }

    fn read_raw(&mut self, mut offset: u64, out: &mut [u8]) -> Result<(), F::Error> {
        let mut written = 0;
        let mut buf = vec![0u8; self.page_size];
        while written < out.len() {
            let page_id = (offset / self.page_size as u64) as u32;
            let in_page = (offset % self.page_size as u64) as usize;
            if page_id == self.write_buf_page_id {
                buf.copy_from_slice(&self.write_buf);
            } else {
                let slot = self.slot(page_id);
                self.file.read_page(slot, &mut buf)?;
            }
            let avail = self.page_size - in_page;
            let n = (out.len() - written).min(avail);
            out[written..written + n].copy_from_slice(&buf[in_page..in_page + n]);
            written += n;
            offset += n as u64;
        }
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), F::Error> {
        self.file.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use page_file::mock::MemoryPageFile;

    type Mem = MemoryPageFile<64, 16>;

    #[test]
    fn put_and_read_var_record_round_trips() {
        let mut log = VarLog::<Mem>::new(Mem::new(), 64, 16, true);
        let off = log.put_var(b"hello world").unwrap();
        log.flush().unwrap();
        let mut stream = log.open_stream(off).unwrap().unwrap();
        let mut out = [0u8; 11];
        let n = log.read_stream(&mut stream, &mut out).unwrap();
        assert_eq!(n, 11);
        assert_eq!(&out, b"hello world");
    }

    #[test]
    fn record_can_straddle_multiple_pages() {
        let mut log = VarLog::<Mem>::new(Mem::new(), 64, 16, true);
        let payload: Vec<u8> = (0u8..200).collect();
        let off = log.put_var(&payload).unwrap();
        log.flush().unwrap();
        let mut stream = log.open_stream(off).unwrap().unwrap();
        let mut out = vec![0u8; 200];
        let mut total = 0;
        loop {
            let n = log.read_stream(&mut stream, &mut out[total..]).unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        assert_eq!(total, 200);
        assert_eq!(out, payload);
    }

    #[test]
    fn offset_below_watermark_is_reported_as_reclaimed() {
        let mut log = VarLog::<Mem>::new(Mem::new(), 64, 4, true);
        let first_off = log.put_var(&[1u8; 40]).unwrap();
        // Force enough pages to roll past the 4-page capacity.
        for _ in 0..10 {
            log.put_var(&[2u8; 40]).unwrap();
        }
        log.flush().unwrap();
        assert!(log.open_stream(first_off).is_none());
    }

    /// The watermark must advance far enough to reclaim old pages but no
    /// further: a record written well after the reclaimed ones must still
    /// read back correctly once capacity forces a wrap-around. Catches the
    /// watermark becoming a fixpoint (never advancing past its initial
    /// value) as well as it overshooting into still-live data.
    #[test]
    fn record_survives_wrap_around_and_reads_back_after_watermark_advances() {
        let mut log = VarLog::<Mem>::new(Mem::new(), 64, 4, true);
        let first_off = log.put_var(&[1u8; 40]).unwrap();
        let mut last_off = first_off;
        for i in 0..20u8 {
            last_off = log.put_var(&[i; 40]).unwrap();
        }
        log.flush().unwrap();

        assert!(
            log.min_var_record_id() > VAR_PAGE_HEADER_SIZE as u64,
            "watermark never advanced past its initial value"
        );
        assert!(log.open_stream(first_off).is_none());

        let mut stream = log.open_stream(last_off).unwrap().unwrap();
        let mut out = [0u8; 40];
        let mut total = 0;
        loop {
            let n = log.read_stream(&mut stream, &mut out[total..]).unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        assert_eq!(out, [19u8; 40]);
    }
}
