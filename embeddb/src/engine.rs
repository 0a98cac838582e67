//! The public `embeddb` facade (C2 buffer arena + C5 data log + the
//! `init/put/putVar/get/getVar/flush/close` surface of `spec.md` \S6).
//!
//! Ties together the spline locator (C3), bitmap filter (C4), data log
//! (C5, inlined here rather than split into its own module since it owns
//! the engine's counters directly), var log (C6), and sparse index log
//! (C7) behind one handle, following the Design Note "Global engine state
//! -> explicit handle": every operation takes `&mut Engine` rather than
//! touching a singleton.

use core::cmp::Ordering;

use alloc::vec;
use alloc::vec::Vec;

use page_file::{OpenMode, PageFile};

use crate::config::EngineConfig;
use crate::error::Error;
use crate::index::IndexLog;
use crate::iterator::{EngineIterator, QueryBounds};
use crate::page::DataPageHeaderLayout;
use crate::spline::Spline;
use crate::varlog::{VarLog, VarStream};

/// Outcome of [`Engine::get_var`], mirroring `spec.md` \S6's three-way
/// `getVar` contract without conflating "found but reclaimed" with a hard
/// error (`NOT_FOUND` is still surfaced as `Err(Error::NotFound)`).
pub enum GetVarOutcome {
    /// The fixed record was found and its var payload is still live.
    Live { stream: VarStream, length: u32 },
    /// The fixed record was found but its var payload has been reclaimed.
    Deleted,
}

/// The storage engine handle. `F` is the page-file implementation backing
/// the data log; the index and var logs (when enabled) are backed by their
/// own instance of the same type, since all three are independent
/// append-only streams (`spec.md` \S2's data-flow diagram).
pub struct Engine<F: PageFile> {
    config: EngineConfig,
    data_file: F,
    index: Option<IndexLog<F>>,
    var: Option<VarLog<F>>,
    spline: Spline,
    data_layout: DataPageHeaderLayout,
    record_size: usize,
    records_per_page: usize,

    next_data_page_id: u32,
    min_data_page_id: u32,
    min_key: Option<Vec<u8>>,
    last_key: Option<Vec<u8>>,

    write_buf: Vec<u8>,
    write_buf_count: u16,
    /// Set on every successful `put`/`put_var`, cleared by `flush`: lets a
    /// second consecutive `flush()` with no intervening writes perform no
    /// I/O (`spec.md` \S8's "flush is idempotent" property).
    dirty: bool,
}

impl<F: PageFile> Engine<F> {
    /// `init(state, maxSplineError)` (`spec.md` \S6). `index_file`/`var_file`
    /// are required iff `Parameters::USE_INDEX`/`USE_VDATA` is set.
    pub fn new(
        data_file: F,
        index_file: Option<F>,
        var_file: Option<F>,
        config: EngineConfig,
    ) -> Result<Self, Error<F::Error>> {
        if !config.validate() {
            return Err(Error::Init);
        }
        if config.parameters.use_index && index_file.is_none() {
            return Err(Error::Init);
        }
        if config.parameters.use_var_data && var_file.is_none() {
            return Err(Error::Init);
        }

        let bitmap_size = config.bitmap_size();
        let data_layout = DataPageHeaderLayout {
            key_size: config.key_size,
            data_size: config.data_size,
            bitmap_size: if config.parameters.use_bitmap {
                bitmap_size
            } else {
                0
            },
        };
        let var_offset_size = if config.parameters.use_var_data { 4 } else { 0 };
        let record_size = config.key_size + config.data_size + var_offset_size;
        let records_per_page = (config.page_size - data_layout.header_size()) / record_size;
        if records_per_page == 0 {
            return Err(Error::Init);
        }

        let reset = config.parameters.reset_data;
        let mut data_file = data_file;
        let existed = matches!(
            data_file.open(if reset {
                OpenMode::ReadWriteTruncate
            } else {
                OpenMode::ReadWrite
            }),
            Ok(true)
        );

        let index = index_file.map(|f| {
            IndexLog::new(
                f,
                config.page_size,
                bitmap_size,
                config.num_index_pages,
                reset,
            )
        });
        let var = var_file.map(|f| VarLog::new(f, config.page_size, config.num_var_pages, reset));

        let mut engine = Self {
            write_buf: vec![0u8; config.page_size],
            spline: Spline::new(config.max_spline_error),
            data_layout,
            record_size,
            records_per_page,
            next_data_page_id: 0,
            min_data_page_id: 0,
            min_key: None,
            last_key: None,
            dirty: false,
            config,
            data_file,
            index,
            var,
        };
        engine.reset_write_buf_header();

        if existed {
            engine.recover()?;
        }

        Ok(engine)
    }

    fn slot(&self, page_id: u32) -> u32 {
        page_id % self.config.num_data_pages
    }

    fn reset_write_buf_header(&mut self) {
        self.write_buf.iter_mut().for_each(|b| *b = 0);
        self.write_buf_count = 0;
        self.data_layout.set_page_id(&mut self.write_buf, self.next_data_page_id);
    }

    /// Recovery (`spec.md` \S4.5): find the last and first live data pages
    /// by scanning every slot once, derive `nextDataPageId`/`minDataPageId`/
    /// `minKey`, then rebuild the spline from each live page's first key.
    fn recover(&mut self) -> Result<(), Error<F::Error>> {
        let mut buf = vec![0u8; self.config.page_size];
        let mut max_buf = vec![0u8; self.config.page_size];
        let mut min_buf = vec![0u8; self.config.page_size];
        let mut max_id: Option<u32> = None;
        let mut min_id: Option<u32> = None;
        for slot in 0..self.config.num_data_pages {
            if self.data_file.read_page(slot, &mut buf).is_err() {
                continue;
            }
            if buf.iter().all(|&b| b == 0xFF) {
                continue;
            }
            let pid = self.data_layout.page_id(&buf);
            if max_id.map(|m| pid > m).unwrap_or(true) {
                max_id = Some(pid);
                max_buf.copy_from_slice(&buf);
            }
            if min_id.map(|m| pid < m).unwrap_or(true) {
                min_id = Some(pid);
                min_buf.copy_from_slice(&buf);
            }
        }
        let (Some(max_id), Some(min_id)) = (max_id, min_id) else {
            return Ok(());
        };

        self.min_data_page_id = min_id;
        self.min_key = Some(self.data_layout.min_key(&min_buf).to_vec());

        let max_count = self.data_layout.record_count(&max_buf) as usize;
        let max_is_sealed = max_count == self.records_per_page;
        // Only walk fully sealed pages into the spline; the in-progress
        // write buffer (if any) is not yet a committed knot.
        let sealed_end = if max_is_sealed { max_id + 1 } else { max_id };

        let mut last_key: Option<Vec<u8>> = None;
        for pid in self.min_data_page_id..sealed_end {
            let slot = self.slot(pid);
            self.data_file.read_page(slot, &mut buf).map_err(Error::from_page_file)?;
            if self.data_layout.page_id(&buf) != pid {
                // Slot has been overwritten by a newer page than `pid`
                // (can happen transiently while scanning a wrapped file);
                // skip it, its first key was already captured by an
                // earlier iteration of this same loop at its true id.
                continue;
            }
            let key = self.key_to_u64(self.data_layout.min_key(&buf));
            self.spline.add_point(key, pid);
            if self.data_layout.record_count(&buf) > 0 {
                last_key = Some(self.data_layout.max_key(&buf).to_vec());
            }
        }
        self.spline.finalize_pending();

        if max_is_sealed {
            // The most recent page was already full and sealed; its max key
            // was already folded into `last_key` by the loop above. Start a
            // fresh write buffer after it.
            self.next_data_page_id = max_id + 1;
            self.reset_write_buf_header();
        } else {
            // The most recent page was never sealed (no full-page trigger
            // fired before the last `flush`); resume appending to it
            // exactly as `flush` leaves it for the non-recovery path.
            if max_count > 0 {
                last_key = Some(self.data_layout.max_key(&max_buf).to_vec());
            }
            self.write_buf.copy_from_slice(&max_buf);
            self.write_buf_count = max_count as u16;
            self.next_data_page_id = max_id;
        }
        self.last_key = last_key;
        Ok(())
    }

    fn key_to_u64(&self, key: &[u8]) -> u64 {
        use crate::config::Comparator;
        match self.config.key_comparator {
            Comparator::I32 => {
                let mut b = [0u8; 4];
                b.copy_from_slice(&key[..4]);
                i32::from_le_bytes(b) as i64 as u64
            }
            Comparator::U32 => {
                let mut b = [0u8; 4];
                b.copy_from_slice(&key[..4]);
                u32::from_le_bytes(b) as u64
            }
            Comparator::I64 => {
                let mut b = [0u8; 8];
                b[..key.len().min(8)].copy_from_slice(&key[..key.len().min(8)]);
                i64::from_le_bytes(b) as u64
            }
            Comparator::U64 => {
                let mut b = [0u8; 8];
                b[..key.len().min(8)].copy_from_slice(&key[..key.len().min(8)]);
                u64::from_le_bytes(b)
            }
            Comparator::Bytes => {
                let mut b = [0u8; 8];
                let n = key.len().min(8);
                b[..n].copy_from_slice(&key[..n]);
                u64::from_be_bytes(b)
            }
        }
    }

    fn key_cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.config.key_comparator.compare(a, b)
    }
    fn data_cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.config.data_comparator.compare(a, b)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
    pub fn next_data_page_id(&self) -> u32 {
        self.next_data_page_id
    }
    pub fn min_data_page_id(&self) -> u32 {
        self.min_data_page_id
    }
    pub fn min_key(&self) -> Option<&[u8]> {
        self.min_key.as_deref()
    }
    pub fn num_avail_data_pages(&self) -> u32 {
        self.config.num_data_pages - (self.next_data_page_id - self.min_data_page_id)
    }
    pub fn record_size(&self) -> usize {
        self.record_size
    }
    pub fn header_size(&self) -> usize {
        self.data_layout.header_size()
    }

    /// `put(state, key, data)` (`spec.md` \S4.5 / \S6).
    pub fn put(&mut self, key: &[u8], data: &[u8]) -> Result<(), Error<F::Error>> {
        self.put_record(key, data, None)
    }

    /// `putVar(state, key, data, varBytesOrNil, length)` (`spec.md` \S4.6 /
    /// \S6). `payload` may be empty; a var record (possibly zero-length) is
    /// always appended when `USE_VDATA` is set, so `getVar` always has a
    /// stream to open.
    pub fn put_var(&mut self, key: &[u8], data: &[u8], payload: &[u8]) -> Result<(), Error<F::Error>> {
        if !self.config.parameters.use_var_data {
            return Err(Error::Init);
        }
        let offset = self
            .var
            .as_mut()
            .unwrap()
            .put_var(payload)
            .map_err(Error::from_page_file)?;
        let offset_u32: u32 = offset.try_into().map_err(|_| Error::Init)?;
        self.put_record(key, data, Some(offset_u32))
    }

    fn put_record(&mut self, key: &[u8], data: &[u8], var_offset: Option<u32>) -> Result<(), Error<F::Error>> {
        if let Some(last) = &self.last_key {
            if self.key_cmp(key, last) != Ordering::Greater {
                return Err(Error::DuplicateKey);
            }
        }

        if self.write_buf_count as usize == self.records_per_page {
            self.seal_write_buf()?;
        }

        if self.write_buf_count == 0 {
            self.data_layout.set_min_key(&mut self.write_buf, key);
        }
        self.data_layout.set_max_key(&mut self.write_buf, key);
        if self.write_buf_count == 0 {
            self.data_layout.set_min_data(&mut self.write_buf, data);
            self.data_layout.set_max_data(&mut self.write_buf, data);
        } else {
            if self.data_cmp(data, self.data_layout.min_data(&self.write_buf)) == Ordering::Less {
                self.data_layout.set_min_data(&mut self.write_buf, data);
            }
            if self.data_cmp(data, self.data_layout.max_data(&self.write_buf)) == Ordering::Greater {
                self.data_layout.set_max_data(&mut self.write_buf, data);
            }
        }
        if self.config.parameters.use_bitmap {
            if let Some(bitmap) = &self.config.bitmap {
                bitmap.update(data, self.data_layout.bitmap_mut(&mut self.write_buf));
            }
        }

        let off = self
            .data_layout
            .record_offset(self.write_buf_count as usize, self.record_size);
        self.write_buf[off..off + key.len()].copy_from_slice(key);
        self.write_buf[off + key.len()..off + key.len() + data.len()].copy_from_slice(data);
        if let Some(vo) = var_offset {
            let start = off + key.len() + data.len();
            self.write_buf[start..start + 4].copy_from_slice(&vo.to_le_bytes());
        }
        self.write_buf_count += 1;
        self.data_layout.set_record_count(&mut self.write_buf, self.write_buf_count);

        self.last_key = Some(key.to_vec());
        self.dirty = true;
        Ok(())
    }

    fn seal_write_buf(&mut self) -> Result<(), Error<F::Error>> {
        let slot = self.slot(self.next_data_page_id);
        self.data_file
            .write_page(slot, &self.write_buf)
            .map_err(Error::from_page_file)?;

        let first_key = self.data_layout.min_key(&self.write_buf).to_vec();
        let bitmap_to_index = if self.config.parameters.use_index {
            Some(self.data_layout.bitmap(&self.write_buf).to_vec())
        } else {
            None
        };

        let sealed_id = self.next_data_page_id;
        self.next_data_page_id += 1;

        let key_u64 = self.key_to_u64(&first_key);
        self.spline.add_point(key_u64, sealed_id);

        if let (Some(index), Some(bitmap)) = (self.index.as_mut(), bitmap_to_index) {
            index.append_entry(sealed_id, &bitmap).map_err(Error::from_page_file)?;
        }

        if self.next_data_page_id - self.min_data_page_id == self.config.num_data_pages {
            self.min_data_page_id += self.config.erase_size_in_pages;
            let mut head = vec![0u8; self.config.page_size];
            let slot = self.slot(self.min_data_page_id);
            self.data_file.read_page(slot, &mut head).map_err(Error::from_page_file)?;
            self.min_key = Some(self.data_layout.min_key(&head).to_vec());
            let min_key_u64 = self.key_to_u64(self.min_key.as_ref().unwrap());
            self.spline.trim(min_key_u64);
            if let Some(index) = self.index.as_mut() {
                index.retire_stale(self.min_data_page_id).map_err(Error::from_page_file)?;
            }
        } else if self.min_key.is_none() {
            self.min_key = Some(first_key);
        }

        self.reset_write_buf_header();
        Ok(())
    }

    /// `get(state, key, outData)` (`spec.md` \S4.5 / \S6).
    pub fn get(&mut self, key: &[u8], out_data: &mut [u8]) -> Result<(), Error<F::Error>> {
        let (pid, idx) = self.find_record(key)?;
        let mut buf = vec![0u8; self.config.page_size];
        self.read_logical_page(pid, &mut buf)?;
        let rec_off = self.data_layout.record_offset(idx, self.record_size);
        out_data.copy_from_slice(&buf[rec_off + self.config.key_size..rec_off + self.config.key_size + self.config.data_size]);
        Ok(())
    }

    /// `getVar(state, key, outData, &outStream, &outLength)` (`spec.md`
    /// \S4.6 / \S6), split into the fixed-record part (filled into
    /// `out_data`) and the var-stream outcome returned separately.
    pub fn get_var(&mut self, key: &[u8], out_data: &mut [u8]) -> Result<GetVarOutcome, Error<F::Error>> {
        if !self.config.parameters.use_var_data {
            return Err(Error::Init);
        }
        let (pid, idx) = self.find_record(key)?;
        let mut buf = vec![0u8; self.config.page_size];
        self.read_logical_page(pid, &mut buf)?;
        let rec_off = self.data_layout.record_offset(idx, self.record_size);
        out_data.copy_from_slice(&buf[rec_off + self.config.key_size..rec_off + self.config.key_size + self.config.data_size]);
        let vo_off = rec_off + self.config.key_size + self.config.data_size;
        let var_offset = u32::from_le_bytes(buf[vo_off..vo_off + 4].try_into().unwrap());

        let var = self.var.as_mut().unwrap();
        match var.open_stream(var_offset as u64) {
            None => Ok(GetVarOutcome::Deleted),
            Some(Ok(stream)) => {
                let length = stream.bytes_remaining();
                Ok(GetVarOutcome::Live { stream, length })
            }
            Some(Err(e)) => Err(Error::from_page_file(e)),
        }
    }

    /// Read `length` bytes from a var stream returned by [`Self::get_var`]
    /// / the iterator's `next_var`.
    pub fn read_var_stream(&mut self, stream: &mut VarStream, out: &mut [u8]) -> Result<usize, Error<F::Error>> {
        self.var
            .as_mut()
            .ok_or(Error::Init)?
            .read_stream(stream, out)
            .map_err(Error::from_page_file)
    }

    /// Bracket via C3, then linear scan within the (small, bounded)
    /// bracket comparing header min/max keys, then a record-level binary
    /// search within the chosen page.
    fn find_record(&mut self, key: &[u8]) -> Result<(u32, usize), Error<F::Error>> {
        if self.write_buf_count > 0
            && self.key_cmp(key, self.data_layout.min_key(&self.write_buf)) != Ordering::Less
            && self.key_cmp(key, self.data_layout.max_key(&self.write_buf)) != Ordering::Greater
        {
            let count = self.write_buf_count as usize;
            let buf = self.write_buf.clone();
            if let Some(idx) = self.binary_search_page(&buf, count, key) {
                return Ok((self.next_data_page_id, idx));
            }
        }

        if self.next_data_page_id == self.min_data_page_id {
            return Err(Error::NotFound);
        }
        let key_u64 = self.key_to_u64(key);
        let (low, high) = self.spline.locate(key_u64);
        let low = low.max(self.min_data_page_id);
        let high = high.min(self.next_data_page_id.saturating_sub(1)).max(low);

        let mut buf = vec![0u8; self.config.page_size];
        for pid in low..=high {
            if self.read_logical_page(pid, &mut buf).is_err() {
                continue;
            }
            if self.key_cmp(key, self.data_layout.min_key(&buf)) == Ordering::Less {
                continue;
            }
            if self.key_cmp(key, self.data_layout.max_key(&buf)) == Ordering::Greater {
                continue;
            }
            let count = self.data_layout.record_count(&buf) as usize;
            if let Some(idx) = self.binary_search_page(&buf, count, key) {
                return Ok((pid, idx));
            }
        }
        Err(Error::NotFound)
    }

    fn binary_search_page(&self, buf: &[u8], count: usize, key: &[u8]) -> Option<usize> {
        let (mut lo, mut hi) = (0usize, count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let off = self.data_layout.record_offset(mid, self.record_size);
            let rec_key = &buf[off..off + self.config.key_size];
            match self.key_cmp(key, rec_key) {
                Ordering::Equal => return Some(mid),
                Ordering::Less => hi = mid,
                Ordering::Greater => lo = mid + 1,
            }
        }
        None
    }

    /// Read logical data page `page_id`, transparently serving it from the
    /// write buffer if it has not been sealed to disk yet.
    fn read_logical_page(&mut self, page_id: u32, out: &mut [u8]) -> Result<(), Error<F::Error>> {
        if page_id == self.next_data_page_id {
            out.copy_from_slice(&self.write_buf);
            return Ok(());
        }
        let slot = self.slot(page_id);
        self.data_file.read_page(slot, out).map_err(Error::from_page_file)?;
        if self.data_layout.page_id(out) != page_id {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    pub(crate) fn data_layout(&self) -> &DataPageHeaderLayout {
        &self.data_layout
    }
    pub(crate) fn bitmap_scheme(&self) -> Option<&dyn crate::bitmap::BitmapScheme> {
        self.config.bitmap.as_deref()
    }
    pub(crate) fn index_log_mut(&mut self) -> Option<&mut IndexLog<F>> {
        self.index.as_mut()
    }
    pub(crate) fn key_size(&self) -> usize {
        self.config.key_size
    }
    pub(crate) fn data_size(&self) -> usize {
        self.config.data_size
    }
    pub(crate) fn key_compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.key_cmp(a, b)
    }
    pub(crate) fn data_compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.data_cmp(a, b)
    }
    pub(crate) fn has_var(&self) -> bool {
        self.config.parameters.use_var_data
    }

    /// First candidate page for a range scan starting at `min_key` (or the
    /// oldest live page if unbounded below), used by [`EngineIterator`].
    pub(crate) fn start_page_for(&self, min_key: Option<&[u8]>) -> u32 {
        match min_key {
            Some(k) => {
                let key_u64 = self.key_to_u64(k);
                self.spline.locate(key_u64).0.max(self.min_data_page_id)
            }
            None => self.min_data_page_id,
        }
    }

    /// Like [`Self::read_logical_page`], but reports an out-of-range page
    /// as `Ok(false)` instead of `Err(Error::NotFound)`, which is the
    /// "stop scanning" signal an iterator needs rather than a hard error.
    pub(crate) fn read_page_for_iter(&mut self, page_id: u32, out: &mut [u8]) -> Result<bool, Error<F::Error>> {
        if page_id < self.min_data_page_id || page_id > self.next_data_page_id {
            return Ok(false);
        }
        match self.read_logical_page(page_id, out) {
            Ok(()) => Ok(true),
            Err(Error::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Resolve a var offset read directly from an iterator-visited record
    /// into a stream, without re-running [`Self::find_record`].
    pub(crate) fn open_var_stream(&mut self, var_offset: u32) -> Result<GetVarOutcome, Error<F::Error>> {
        let var = self.var.as_mut().ok_or(Error::Init)?;
        match var.open_stream(var_offset as u64) {
            None => Ok(GetVarOutcome::Deleted),
            Some(Ok(stream)) => {
                let length = stream.bytes_remaining();
                Ok(GetVarOutcome::Live { stream, length })
            }
            Some(Err(e)) => Err(Error::from_page_file(e)),
        }
    }

    /// `initIterator(&it)` (`spec.md` \S4.8).
    pub fn init_iterator(&self, bounds: QueryBounds) -> EngineIterator<F> {
        EngineIterator::new(self, bounds)
    }

    /// `flush(state)` (`spec.md` \S4.5 / \S6): pads and writes the
    /// partially filled write-data page, writes any partially filled
    /// index/var pages, then flushes all backing files in an order that
    /// keeps a data page's index entry durable no earlier than the data
    /// itself.
    pub fn flush(&mut self) -> Result<(), Error<F::Error>> {
        if !self.dirty {
            return Ok(());
        }
        let slot = self.slot(self.next_data_page_id);
        self.data_file
            .write_page(slot, &self.write_buf)
            .map_err(Error::from_page_file)?;
        self.data_file.flush().map_err(Error::from_page_file)?;
        if let Some(index) = self.index.as_mut() {
            index.flush().map_err(Error::from_page_file)?;
        }
        if let Some(var) = self.var.as_mut() {
            var.flush().map_err(Error::from_page_file)?;
        }
        self.dirty = false;
        Ok(())
    }

    /// Recover the backing data-file handle, discarding in-memory state.
    /// Used by tests that simulate a process restart by handing the same
    /// storage to a freshly constructed `Engine`.
    pub fn into_data_file(self) -> F {
        self.data_file
    }

    /// `close(state)` (`spec.md` \S6).
    pub fn close(&mut self) -> Result<(), Error<F::Error>> {
        self.data_file.close().map_err(Error::from_page_file)?;
        if let Some(index) = self.index.as_mut() {
            index.close().map_err(Error::from_page_file)?;
        }
        if let Some(var) = self.var.as_mut() {
            var.close().map_err(Error::from_page_file)?;
        }
        Ok(())
    }
}
