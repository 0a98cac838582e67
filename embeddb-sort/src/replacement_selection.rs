//! Run generation via replacement selection (`spec.md` \S4.10.1, variant
//! "pessimistic").
//!
//! A heap of capacity `(B-1) * recordsPerPage` feeds a page-sized output
//! buffer. [`crate::heap::ReplacementHeap`]'s run tag plays the role of the
//! spec's "secondary unsorted list for records smaller than the
//! last-emitted key": once a record can no longer extend the current run it
//! is tagged for the next one and simply stops competing for the heap's
//! minimum until the current run closes.

use alloc::vec;
use alloc::vec::Vec;
use core::cmp::Ordering;

use page_file::PageFile;

use crate::error::Error;
use crate::heap::ReplacementHeap;
use crate::record::{RecordCompare, RecordPageLayout, RecordSource};
use crate::tempfile::{TempFile, TempFileCursor};

/// Page range of one completed run within the temp file.
#[derive(Debug, Clone, Copy)]
pub struct RunMeta {
    pub start_page: u32,
    pub length_in_pages: u32,
    pub record_count: u64,
}

/// Output of run generation: the runs produced plus the running
/// `avgDistinct` estimate the adaptive decision (`spec.md` \S4.10.3) needs.
pub struct RunGenStats {
    pub runs: Vec<RunMeta>,
    pub avg_distinct: f64,
}

/// Generate sorted runs from `source`, writing them contiguously to `temp`.
/// `heap_capacity_records` is `(B-1) * recordsPerPage` from the spec.
pub fn generate_runs<S, F, C>(
    source: &mut S,
    temp: &mut TempFile<F>,
    heap_capacity_records: usize,
    cmp: &C,
) -> Result<RunGenStats, Error<S::Error, F::Error>>
where
    S: RecordSource,
    F: PageFile,
    C: RecordCompare,
{
    let layout = temp.layout();
    let record_size = layout.record_size;
    let records_per_page = layout.records_per_page();

    let mut heap = ReplacementHeap::new(heap_capacity_records);
    let mut run = 0u32;
    let mut runs = Vec::new();
    let mut distinct_totals = 0u64;
    let mut distinct_counts = 0u64;

    // Prime the heap.
    let mut exhausted = false;
    while heap.len() < heap_capacity_records && !exhausted {
        let mut rec = vec![0u8; record_size];
        if source.next(&mut rec).map_err(Error::Source)? {
            heap.push(0, rec, cmp);
        } else {
            exhausted = true;
        }
    }

    let mut current_run_start_page = temp.next_page_id();
    let mut page_buf: Vec<u8> = Vec::with_capacity(record_size * records_per_page);
    let mut page_idx_in_run = 0u32;
    let mut run_record_count = 0u64;
    let mut run_distinct = 0u64;
    let mut last_emitted: Option<Vec<u8>> = None;

    loop {
        let popped = heap.pop(cmp);
        let Some((popped_run, record)) = popped else {
            // Heap empty: flush the final partial page of the final run, if any.
            if run_record_count > 0 {
                if !page_buf.is_empty() {
                    temp.append_page(page_idx_in_run, &page_buf)
                        .map_err(Error::File)?;
                    page_idx_in_run += 1;
                }
                runs.push(RunMeta {
                    start_page: current_run_start_page,
                    length_in_pages: page_idx_in_run,
                    record_count: run_record_count,
                });
                distinct_totals += run_distinct.max(1);
                distinct_counts += 1;
            }
            break;
        };

        if popped_run != run {
            // Current run is complete: flush partial page, record metadata,
            // start the next run, and retag every surviving next-run entry
            // (they are already tagged `run + 1`; bump our counter to match).
            if !page_buf.is_empty() {
                temp.append_page(page_idx_in_run, &page_buf)
                    .map_err(Error::File)?;
                page_idx_in_run += 1;
            }
            runs.push(RunMeta {
                start_page: current_run_start_page,
                length_in_pages: page_idx_in_run,
                record_count: run_record_count,
            });
            distinct_totals += run_distinct.max(1);
            distinct_counts += 1;

            run = popped_run;
            current_run_start_page = temp.next_page_id();
            page_buf.clear();
            page_idx_in_run = 0;
            run_record_count = 0;
            run_distinct = 0;
            last_emitted = None;
        }

        if last_emitted.as_deref().map(|l| cmp.compare(&record, l)) != Some(Ordering::Equal) {
            run_distinct += 1;
        }
        last_emitted = Some(record.clone());
        run_record_count += 1;
        page_buf.extend_from_slice(&record);

        if page_buf.len() == record_size * records_per_page {
            temp.append_page(page_idx_in_run, &page_buf)
                .map_err(Error::File)?;
            page_idx_in_run += 1;
            page_buf.clear();
        }

        // Refill the heap from upstream, tagging the new record for the
        // current run if it can still extend it, otherwise for the next.
        if !exhausted {
            let mut next_rec = vec![0u8; record_size];
            if source.next(&mut next_rec).map_err(Error::Source)? {
                let belongs_to_current = last_emitted
                    .as_deref()
                    .map(|l| cmp.compare(&next_rec, l) != Ordering::Less)
                    .unwrap_or(true);
                let tag = if belongs_to_current { run } else { run + 1 };
                heap.push(tag, next_rec, cmp);
            } else {
                exhausted = true;
            }
        }
    }

    let avg_distinct = if distinct_counts > 0 {
        distinct_totals as f64 / distinct_counts as f64
    } else {
        0.0
    };

    Ok(RunGenStats { runs, avg_distinct })
}

/// Like [`generate_runs`] but re-reads already-materialized input directly
/// from `temp`'s own page range via a [`TempFileCursor`] instead of a
/// generic [`RecordSource`]. Used when the upstream rows have already been
/// spilled to the same temp file runs are about to be appended to, where a
/// `RecordSource` borrowing the file a second time would conflict with the
/// run-writing side.
pub fn generate_runs_from_pages<F, C>(
    temp: &mut TempFile<F>,
    total_records: u64,
    heap_capacity_records: usize,
    cmp: &C,
) -> Result<RunGenStats, F::Error>
where
    F: PageFile,
    C: RecordCompare,
{
    let layout = temp.layout();
    let record_size = layout.record_size;
    let records_per_page = layout.records_per_page();

    let mut cursor = TempFileCursor::new(total_records);
    let mut in_buf = temp.new_page_buf();

    let mut heap = ReplacementHeap::new(heap_capacity_records);
    let mut run = 0u32;
    let mut runs = Vec::new();
    let mut distinct_totals = 0u64;
    let mut distinct_counts = 0u64;

    let mut exhausted = false;
    while heap.len() < heap_capacity_records && !exhausted {
        let mut rec = vec![0u8; record_size];
        if cursor.next(temp, &mut in_buf, &mut rec)? {
            heap.push(0, rec, cmp);
        } else {
            exhausted = true;
        }
    }

    let mut current_run_start_page = temp.next_page_id();
    let mut page_buf: Vec<u8> = Vec::with_capacity(record_size * records_per_page);
    let mut page_idx_in_run = 0u32;
    let mut run_record_count = 0u64;
    let mut run_distinct = 0u64;
    let mut last_emitted: Option<Vec<u8>> = None;

    loop {
        let popped = heap.pop(cmp);
        let Some((popped_run, record)) = popped else {
            if run_record_count > 0 {
                if !page_buf.is_empty() {
                    temp.append_page(page_idx_in_run, &page_buf)?;
                    page_idx_in_run += 1;
                }
                runs.push(RunMeta {
                    start_page: current_run_start_page,
                    length_in_pages: page_idx_in_run,
                    record_count: run_record_count,
                });
                distinct_totals += run_distinct.max(1);
                distinct_counts += 1;
            }
            break;
        };

        if popped_run != run {
            if !page_buf.is_empty() {
                temp.append_page(page_idx_in_run, &page_buf)?;
                page_idx_in_run += 1;
            }
            runs.push(RunMeta {
                start_page: current_run_start_page,
                length_in_pages: page_idx_in_run,
                record_count: run_record_count,
            });
            distinct_totals += run_distinct.max(1);
            distinct_counts += 1;

            run = popped_run;
            current_run_start_page = temp.next_page_id();
            page_buf.clear();
            page_idx_in_run = 0;
            run_record_count = 0;
            run_distinct = 0;
            last_emitted = None;
        }

        if last_emitted.as_deref().map(|l| cmp.compare(&record, l)) != Some(Ordering::Equal) {
            run_distinct += 1;
        }
        last_emitted = Some(record.clone());
        run_record_count += 1;
        page_buf.extend_from_slice(&record);

        if page_buf.len() == record_size * records_per_page {
            temp.append_page(page_idx_in_run, &page_buf)?;
            page_idx_in_run += 1;
            page_buf.clear();
        }

        if !exhausted {
            let mut next_rec = vec![0u8; record_size];
            if cursor.next(temp, &mut in_buf, &mut next_rec)? {
                let belongs_to_current = last_emitted
                    .as_deref()
                    .map(|l| cmp.compare(&next_rec, l) != Ordering::Less)
                    .unwrap_or(true);
                let tag = if belongs_to_current { run } else { run + 1 };
                heap.push(tag, next_rec, cmp);
            } else {
                exhausted = true;
            }
        }
    }

    let avg_distinct = if distinct_counts > 0 {
        distinct_totals as f64 / distinct_counts as f64
    } else {
        0.0
    };

    Ok(RunGenStats { runs, avg_distinct })
}
