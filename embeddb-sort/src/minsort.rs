//! Flash MinSort, plain variant (`spec.md` \S4.10.4).
//!
//! Operates directly on the unsorted input divided into `numRegions` of
//! `blocksPerRegion` pages each. Only one key-width slot per region lives in
//! memory (`min[regionIdx]`); `next()` always re-scans the current region
//! from its start because, unlike the sublist variant, nothing inside a
//! region is sorted.

use alloc::vec;
use alloc::vec::Vec;
use core::cmp::Ordering;

use page_file::PageFile;

use crate::record::{RecordCompare, SortSchema};
use crate::tempfile::TempFile;

pub struct MinSortPlain<C: RecordCompare> {
    schema: SortSchema<C>,
    /// First absolute page id of the input range; lets this operate on a
    /// range that does not start at page 0 (e.g. sorted runs appended
    /// after an unsorted prefix already consumed by replacement selection).
    base_page: u32,
    num_pages: u32,
    blocks_per_region: u32,
    num_regions: u32,
    total_records: u64,
    /// `None` once a region has yielded every record it held.
    region_min: Vec<Option<Vec<u8>>>,
    current: Option<Vec<u8>>,
    current_region: u32,
    /// Resume point within `current_region` for finding further instances
    /// of `current`; reset to the start whenever `current` changes.
    scan_pos: (u32, usize),
    /// Smallest key `> current` seen so far while scanning for further
    /// instances of `current`, accumulated across calls to `next()` (a
    /// single call only scans as far as the next match, so this must
    /// survive between calls or candidates seen before an intervening
    /// match would be forgotten).
    pending_next_min: Option<Vec<u8>>,
}

impl<C: RecordCompare> MinSortPlain<C> {
    /// `blocks_per_region` is chosen by the caller from the memory budget,
    /// mirroring `init_MinSort`'s `j = (memory - overhead) / (key_size +
    /// 1)` region-count derivation.
    pub fn new(
        schema: SortSchema<C>,
        num_pages: u32,
        blocks_per_region: u32,
        total_records: u64,
    ) -> Self {
        Self::with_base_page(schema, 0, num_pages, blocks_per_region, total_records)
    }

    /// Like [`Self::new`] but the input range starts at `base_page` rather
    /// than page 0 of the temp file.
    pub fn with_base_page(
        schema: SortSchema<C>,
        base_page: u32,
        num_pages: u32,
        blocks_per_region: u32,
        total_records: u64,
    ) -> Self {
        let blocks_per_region = blocks_per_region.max(1);
        let num_regions = num_pages.div_ceil(blocks_per_region).max(1);
        Self {
            schema,
            base_page,
            num_pages,
            blocks_per_region,
            num_regions,
            total_records,
            region_min: vec![None; num_regions as usize],
            current: None,
            current_region: 0,
            scan_pos: (0, 0),
            pending_next_min: None,
        }
    }

    /// Scan every page once to populate each region's minimum key
    /// (`spec.md` \S4.10.4: "Initialization scans every block once").
    pub fn init<F: PageFile>(&mut self, temp: &mut TempFile<F>) -> Result<(), F::Error> {
        let mut buf = temp.new_page_buf();
        let mut seen = 0u64;
        'pages: for page in 0..self.num_pages {
            temp.read_page(self.base_page + page, &mut buf)?;
            let count = self.schema.layout.record_count(&buf) as usize;
            let region = page / self.blocks_per_region;
            for i in 0..count {
                if seen >= self.total_records {
                    break 'pages;
                }
                seen += 1;
                let key = self.schema.key.key(self.schema.layout.record(&buf, i)).to_vec();
                let slot = &mut self.region_min[region as usize];
                let replace = match slot {
                    None => true,
                    Some(existing) => self.schema.cmp.compare(&key, existing) == Ordering::Less,
                };
                if replace {
                    *slot = Some(key);
                }
            }
        }
        Ok(())
    }

    fn active_region_with_smallest_min(&self) -> Option<(u32, Vec<u8>)> {
        let mut best: Option<(u32, &Vec<u8>)> = None;
        for (idx, slot) in self.region_min.iter().enumerate() {
            if let Some(key) = slot {
                let better = match &best {
                    None => true,
                    Some((_, b)) => self.schema.cmp.compare(key, b) == Ordering::Less,
                };
                if better {
                    best = Some((idx as u32, key));
                }
            }
        }
        best.map(|(idx, key)| (idx, key.clone()))
    }

    /// Emit the next record in non-decreasing key order into `out`
    /// (`out.len() == record_size`). Returns `false` once every region is
    /// exhausted.
    pub fn next<F: PageFile>(&mut self, temp: &mut TempFile<F>, out: &mut [u8]) -> Result<bool, F::Error> {
        loop {
            if self.current.is_none() {
                let Some((region, key)) = self.active_region_with_smallest_min() else {
                    return Ok(false);
                };
                self.current = Some(key);
                self.current_region = region;
                self.scan_pos = (region * self.blocks_per_region, 0);
                self.pending_next_min = None;
            }
            let current = self.current.clone().unwrap();
            let region_start = self.current_region * self.blocks_per_region;
            let region_end = (region_start + self.blocks_per_region).min(self.num_pages);

            let mut buf = temp.new_page_buf();
            let mut found = false;
            let (mut page, mut idx) = self.scan_pos;
            if page < region_start {
                page = region_start;
                idx = 0;
            }
            'scan: while page < region_end {
                temp.read_page(self.base_page + page, &mut buf)?;
                let count = self.schema.layout.record_count(&buf) as usize;
                while idx < count {
                    let record = self.schema.layout.record(&buf, idx);
                    let key = self.schema.key.key(record);
                    match self.schema.cmp.compare(key, &current) {
                        Ordering::Equal => {
                            out.copy_from_slice(record);
                            self.scan_pos = (page, idx + 1);
                            found = true;
                            break 'scan;
                        }
                        Ordering::Greater => {
                            if self
                                .pending_next_min
                                .as_ref()
                                .map(|n| self.schema.cmp.compare(key, n) == Ordering::Less)
                                .unwrap_or(true)
                            {
                                self.pending_next_min = Some(key.to_vec());
                            }
                        }
                        Ordering::Less => {}
                    }
                    idx += 1;
                }
                page += 1;
                idx = 0;
            }

            if found {
                return Ok(true);
            }

            // Every instance of `current` in this region is gone; the
            // smallest greater key seen across every call since `current`
            // was set becomes the region's new minimum.
            self.region_min[self.current_region as usize] = self.pending_next_min.take();
            self.current = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{KeyField, RecordPageLayout};
    use page_file::mock::MemoryPageFile;
    use page_file::OpenMode;

    fn i32_cmp(a: &[u8], b: &[u8]) -> Ordering {
        i32::from_le_bytes(a.try_into().unwrap()).cmp(&i32::from_le_bytes(b.try_into().unwrap()))
    }

    #[test]
    fn emits_all_records_in_sorted_order() {
        let layout = RecordPageLayout {
            record_size: 4,
            page_size: 32,
        };
        let schema = SortSchema {
            layout,
            key: KeyField { offset: 0, size: 4 },
            cmp: i32_cmp,
        };
        let mut file = MemoryPageFile::<32, 64>::new();
        file.open(OpenMode::ReadWriteTruncate).unwrap();
        let mut temp = TempFile::new(file, layout);
        let values = [5i32, 3, 8, 1, 9, 2, 7, 4, 6, 0, 5, 3];
        let records_per_page = layout.records_per_page();
        let mut page_records = Vec::new();
        let mut pages_written = 0u32;
        for (i, v) in values.iter().enumerate() {
            page_records.extend_from_slice(&v.to_le_bytes());
            if (i + 1) % records_per_page == 0 || i == values.len() - 1 {
                temp.append_page(pages_written, &page_records).unwrap();
                pages_written += 1;
                page_records.clear();
            }
        }

        let mut ms = MinSortPlain::new(schema, pages_written, 2, values.len() as u64);
        ms.init(&mut temp).unwrap();

        let mut out = [0u8; 4];
        let mut results = Vec::new();
        while ms.next(&mut temp, &mut out).unwrap() {
            results.push(i32::from_le_bytes(out));
        }
        let mut expected = values.to_vec();
        expected.sort();
        assert_eq!(results, expected);
    }

    /// Regression test: the smallest-greater-than-current candidate must be
    /// tracked across separate `next()` calls, not just within the call
    /// that finally exhausts `current`'s matches, otherwise a candidate
    /// seen right before an earlier match is forgotten and its record is
    /// silently skipped once a too-large "next minimum" is chosen.
    #[test]
    fn interspersed_duplicates_do_not_lose_intervening_candidates() {
        let layout = RecordPageLayout {
            record_size: 4,
            page_size: 64,
        };
        let schema = SortSchema {
            layout,
            key: KeyField { offset: 0, size: 4 },
            cmp: i32_cmp,
        };
        let mut file = MemoryPageFile::<64, 8>::new();
        file.open(OpenMode::ReadWriteTruncate).unwrap();
        let mut temp = TempFile::new(file, layout);
        let values = [3i32, 5, 3, 7, 3, 6, 3, 9];
        let mut page_records = Vec::new();
        for v in &values {
            page_records.extend_from_slice(&v.to_le_bytes());
        }
        temp.append_page(0, &page_records).unwrap();

        let mut ms = MinSortPlain::new(schema, 1, 1, values.len() as u64);
        ms.init(&mut temp).unwrap();

        let mut out = [0u8; 4];
        let mut results = Vec::new();
        while ms.next(&mut temp, &mut out).unwrap() {
            results.push(i32::from_le_bytes(out));
        }
        let mut expected = values.to_vec();
        expected.sort();
        assert_eq!(results, expected);
    }
}
