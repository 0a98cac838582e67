//! Flash MinSort, sorted-sublist variant (`spec.md` \S4.10.5).
//!
//! Exploits that every run produced by replacement selection is already
//! internally sorted: per-sublist state is just `(min_key, file_offset)`,
//! one key-width slot per sublist plus a cursor. `next()` always advances
//! the winning sublist's cursor by exactly one record, so unlike the plain
//! variant there is never a rescan.

use alloc::vec::Vec;
use core::cmp::Ordering;

use page_file::PageFile;

use crate::record::{RecordCompare, SortSchema};
use crate::replacement_selection::RunMeta;
use crate::tempfile::TempFile;

struct SublistCursor {
    run: RunMeta,
    /// Page offset from `run.start_page`, and record index within that page.
    page_offset: u32,
    record_idx: usize,
    min_key: Option<Vec<u8>>,
    min_record: Vec<u8>,
}

pub struct MinSortSublist<C: RecordCompare> {
    schema: SortSchema<C>,
    cursors: Vec<SublistCursor>,
}

impl<C: RecordCompare> MinSortSublist<C> {
    /// `spec.md` \S4.10.3's memory bound: one key-sized slot per sublist
    /// must fit in `(B-1)` buffer pages. Callers check
    /// [`crate::cost::choose_after_run_gen`] before constructing this.
    pub fn new<F: PageFile>(
        schema: SortSchema<C>,
        runs: &[RunMeta],
        temp: &mut TempFile<F>,
    ) -> Result<Self, F::Error> {
        let mut cursors = Vec::with_capacity(runs.len());
        let mut buf = temp.new_page_buf();
        for &run in runs {
            if run.record_count == 0 {
                continue;
            }
            temp.read_page(run.start_page, &mut buf)?;
            let first = schema.layout.record(&buf, 0);
            let min_key = schema.key.key(first).to_vec();
            cursors.push(SublistCursor {
                run,
                page_offset: 0,
                record_idx: 0,
                min_key: Some(min_key),
                min_record: first.to_vec(),
            });
        }
        Ok(Self { schema, cursors })
    }

    fn winning_cursor(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, c) in self.cursors.iter().enumerate() {
            if c.min_key.is_none() {
                continue;
            }
            let better = match best {
                None => true,
                Some(b) => {
                    self.schema.cmp.compare(
                        c.min_key.as_ref().unwrap(),
                        self.cursors[b].min_key.as_ref().unwrap(),
                    ) == Ordering::Less
                }
            };
            if better {
                best = Some(i);
            }
        }
        best
    }

    /// Emit the next record in non-decreasing key order. Returns `false`
    /// once every sublist is drained.
    pub fn next<F: PageFile>(&mut self, temp: &mut TempFile<F>, out: &mut [u8]) -> Result<bool, F::Error> {
        let Some(winner) = self.winning_cursor() else {
            return Ok(false);
        };
        out.copy_from_slice(&self.cursors[winner].min_record);
        self.advance(winner, temp)?;
        Ok(true)
    }

    fn advance<F: PageFile>(&mut self, idx: usize, temp: &mut TempFile<F>) -> Result<(), F::Error> {
        let records_per_page = self.schema.layout.records_per_page();
        let cursor = &mut self.cursors[idx];
        cursor.record_idx += 1;
        if cursor.record_idx >= records_per_page {
            cursor.record_idx = 0;
            cursor.page_offset += 1;
        }
        let consumed = cursor.page_offset as u64 * records_per_page as u64 + cursor.record_idx as u64;
        if cursor.page_offset >= cursor.run.length_in_pages || consumed >= cursor.run.record_count {
            cursor.min_key = None;
            return Ok(());
        }
        let mut buf = temp.new_page_buf();
        temp.read_page(cursor.run.start_page + cursor.page_offset, &mut buf)?;
        let record = self.schema.layout.record(&buf, cursor.record_idx);
        cursor.min_key = Some(self.schema.key.key(record).to_vec());
        cursor.min_record = record.to_vec();
        Ok(())
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
    fn merges_presorted_runs_in_order() {
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

        let run_a: Vec<i32> = vec![1, 4, 7, 10];
        let run_b: Vec<i32> = vec![2, 3, 8];
        let run_c: Vec<i32> = vec![0, 5, 6, 9];
        let mut runs = Vec::new();
        for values in [&run_a, &run_b, &run_c] {
            let start = temp.next_page_id();
            let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
            temp.append_page(0, &bytes).unwrap();
            runs.push(RunMeta {
                start_page: start,
                length_in_pages: 1,
                record_count: values.len() as u64,
            });
        }

        let mut ms = MinSortSublist::new(schema, &runs, &mut temp).unwrap();
        let mut out = [0u8; 4];
        let mut results = Vec::new();
        while ms.next(&mut temp, &mut out).unwrap() {
            results.push(i32::from_le_bytes(out));
        }
        assert_eq!(results, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    }
}
