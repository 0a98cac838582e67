//! Streaming range scan (C8, `spec.md` \S4.8).
//!
//! Construction precomputes a query bitmap via `buildFromRange` and seeks
//! the first candidate page via the spline (C3); `next`/`next_var` then
//! walk forward, skipping whole pages the sparse index (C7, or the page's
//! own inline bitmap when no index is configured) proves disjoint from the
//! query, and filtering individual records against the key/data bounds.

use core::marker::PhantomData;

use alloc::vec;
use alloc::vec::Vec;

use page_file::PageFile;

use crate::engine::{Engine, GetVarOutcome};
use crate::error::Error;
use crate::varlog::VarStream;

/// Optional `[min, max]` bounds on key and data (`spec.md` \S4.8: `null` on
/// either side means an open end).
#[derive(Debug, Clone, Default)]
pub struct QueryBounds {
    pub min_key: Option<Vec<u8>>,
    pub max_key: Option<Vec<u8>>,
    pub min_data: Option<Vec<u8>>,
    pub max_data: Option<Vec<u8>>,
}

pub struct EngineIterator<F: PageFile> {
    bounds: QueryBounds,
    query_bitmap: Option<Vec<u8>>,
    cur_page_id: u32,
    end_page_id: u32,
    page_buf: Vec<u8>,
    page_loaded: bool,
    record_idx: usize,
    done: bool,
    _marker: PhantomData<F>,
}

impl<F: PageFile> EngineIterator<F> {
    pub(crate) fn new(engine: &Engine<F>, bounds: QueryBounds) -> Self {
        let start = engine.start_page_for(bounds.min_key.as_deref());
        let end = engine.next_data_page_id();
        let query_bitmap = engine.bitmap_scheme().map(|bm| {
            let mut v = vec![0u8; bm.width()];
            bm.build_from_range(bounds.min_data.as_deref(), bounds.max_data.as_deref(), &mut v);
            v
        });
        Self {
            page_buf: vec![0u8; engine.config().page_size],
            bounds,
            query_bitmap,
            cur_page_id: start,
            end_page_id: end,
            page_loaded: false,
            record_idx: 0,
            done: false,
            _marker: PhantomData,
        }
    }

    /// Advance to the next page worth reading, applying the bitmap skip
    /// (C4/C7). Returns `false` once the scan is exhausted.
    fn load_next_page(&mut self, engine: &mut Engine<F>) -> Result<bool, Error<F::Error>> {
        loop {
            if self.done || self.cur_page_id > self.end_page_id {
                return Ok(false);
            }
            if let Some(query_bitmap) = &self.query_bitmap {
                let page_bitmap = match engine.index_log_mut() {
                    Some(index) => index.bitmap_for_data_page(self.cur_page_id).map_err(Error::from_page_file)?,
                    None => None,
                };
                if let (Some(scheme), Some(page_bitmap)) = (engine.bitmap_scheme(), page_bitmap.as_ref()) {
                    if !scheme.intersects(query_bitmap, page_bitmap) {
                        self.cur_page_id += 1;
                        continue;
                    }
                }
            }
            if !engine.read_page_for_iter(self.cur_page_id, &mut self.page_buf)? {
                self.cur_page_id += 1;
                continue;
            }
            if let (Some(query_bitmap), None) = (&self.query_bitmap, engine.index_log_mut()) {
                if let Some(scheme) = engine.bitmap_scheme() {
                    let page_bitmap = engine.data_layout().bitmap(&self.page_buf);
                    if !page_bitmap.is_empty() && !scheme.intersects(query_bitmap, page_bitmap) {
                        self.cur_page_id += 1;
                        continue;
                    }
                }
            }
            if let Some(max_key) = &self.bounds.max_key {
                if engine.key_compare(engine.data_layout().min_key(&self.page_buf), max_key) == core::cmp::Ordering::Greater {
                    self.done = true;
                    return Ok(false);
                }
            }
            self.page_loaded = true;
            self.record_idx = 0;
            return Ok(true);
        }
    }

    /// Returns the next record's byte offsets within `page_buf`, or `None`
    /// once the current page is exhausted (caller then advances the page).
    fn next_record_in_page(&mut self, engine: &Engine<F>) -> Option<usize> {
        let count = engine.data_layout().record_count(&self.page_buf) as usize;
        while self.record_idx < count {
            let off = engine.data_layout().record_offset(self.record_idx, engine.record_size());
            self.record_idx += 1;
            let key = &self.page_buf[off..off + engine.key_size()];
            if let Some(min_key) = &self.bounds.min_key {
                if engine.key_compare(key, min_key) == core::cmp::Ordering::Less {
                    continue;
                }
            }
            if let Some(max_key) = &self.bounds.max_key {
                if engine.key_compare(key, max_key) == core::cmp::Ordering::Greater {
                    self.done = true;
                    return None;
                }
            }
            let data = &self.page_buf[off + engine.key_size()..off + engine.key_size() + engine.data_size()];
            if let Some(min_data) = &self.bounds.min_data {
                if engine.data_compare(data, min_data) == core::cmp::Ordering::Less {
                    continue;
                }
            }
            if let Some(max_data) = &self.bounds.max_data {
                if engine.data_compare(data, max_data) == core::cmp::Ordering::Greater {
                    continue;
                }
            }
            return Some(off);
        }
        None
    }

    /// `next(&it, &keyOut, &dataOut)` (`spec.md` \S4.8).
    pub fn next(&mut self, engine: &mut Engine<F>, key_out: &mut [u8], data_out: &mut [u8]) -> Result<bool, Error<F::Error>> {
        loop {
            if !self.page_loaded && !self.load_next_page(engine)? {
                return Ok(false);
            }
            match self.next_record_in_page(engine) {
                Some(off) => {
                    key_out.copy_from_slice(&self.page_buf[off..off + engine.key_size()]);
                    data_out.copy_from_slice(&self.page_buf[off + engine.key_size()..off + engine.key_size() + engine.data_size()]);
                    return Ok(true);
                }
                None => {
                    if self.done {
                        return Ok(false);
                    }
                    self.page_loaded = false;
                    self.cur_page_id += 1;
                }
            }
        }
    }

    /// `nextVar(&it, &keyOut, &dataOut, &varStreamOut)` (`spec.md` \S4.8 /
    /// \S4.9): like [`Self::next`], but also resolves the record's var
    /// offset into a stream (or reports it as reclaimed).
    pub fn next_var(
        &mut self,
        engine: &mut Engine<F>,
        key_out: &mut [u8],
        data_out: &mut [u8],
    ) -> Result<Option<VarRecord>, Error<F::Error>> {
        if !engine.has_var() {
            return Err(Error::Init);
        }
        loop {
            if !self.page_loaded && !self.load_next_page(engine)? {
                return Ok(None);
            }
            match self.next_record_in_page(engine) {
                Some(off) => {
                    key_out.copy_from_slice(&self.page_buf[off..off + engine.key_size()]);
                    data_out.copy_from_slice(&self.page_buf[off + engine.key_size()..off + engine.key_size() + engine.data_size()]);
                    let vo_off = off + engine.key_size() + engine.data_size();
                    let var_offset = u32::from_le_bytes(self.page_buf[vo_off..vo_off + 4].try_into().unwrap());
                    return match engine.open_var_stream(var_offset)? {
                        GetVarOutcome::Live { stream, length } => Ok(Some(VarRecord::Live { stream, length })),
                        GetVarOutcome::Deleted => Ok(Some(VarRecord::Deleted)),
                    };
                }
                None => {
                    if self.done {
                        return Ok(None);
                    }
                    self.page_loaded = false;
                    self.cur_page_id += 1;
                }
            }
        }
    }

    /// `close(&it)` (`spec.md` \S4.8): no owned resources beyond the page
    /// buffer to drop, kept for symmetry with the spec's lifecycle.
    pub fn close(self) {}
}

/// Outcome of [`EngineIterator::next_var`] for one record.
pub enum VarRecord {
    Live { stream: VarStream, length: u32 },
    Deleted,
}
