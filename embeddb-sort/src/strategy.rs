//! Uniform sort-strategy capability and the adaptive orchestrator
//! (`spec.md` \S4.10.2, \S4.10.3, \S4.10.7, and Design Note "Sort engine
//! branching complexity": each algorithm variant sits behind one
//! `SortStrategy` surface and the branching lives only in [`adaptive_sort`],
//! never replicated inline inside a variant).

use alloc::vec;
use alloc::vec::Vec;
use core::cmp::Ordering;

use page_file::PageFile;

use crate::cost::{self, MergeChoice};
use crate::error::Error;
use crate::merge::merge_pass;
use crate::minsort::MinSortPlain;
use crate::minsort_sublist::MinSortSublist;
use crate::record::{RecordCompare, RecordSource, SortSchema};
use crate::replacement_selection::{generate_runs_from_pages, RunGenStats, RunMeta};
use crate::tempfile::{TempFile, TempFileCursor};

/// Common surface every sort sub-algorithm exposes (`init`/`next`/`close`
/// per the Design Note). `init` is folded into each variant's constructor
/// here since every variant needs different construction inputs (a run
/// list, a region count, ...); `next`/`close` are the part callers actually
/// share.
pub trait SortStrategy<F: PageFile> {
    fn next(&mut self, temp: &mut TempFile<F>, out: &mut [u8]) -> Result<bool, F::Error>;
    fn close(&mut self) {}
}

impl<F: PageFile, C: RecordCompare> SortStrategy<F> for MinSortPlain<C> {
    fn next(&mut self, temp: &mut TempFile<F>, out: &mut [u8]) -> Result<bool, F::Error> {
        MinSortPlain::next(self, temp, out)
    }
}

impl<F: PageFile, C: RecordCompare> SortStrategy<F> for MinSortSublist<C> {
    fn next(&mut self, temp: &mut TempFile<F>, out: &mut [u8]) -> Result<bool, F::Error> {
        MinSortSublist::next(self, temp, out)
    }
}

/// Streams one already-sorted run sequentially; the degenerate strategy
/// used when only one run exists or a NOB-merge pass has collapsed every
/// run into one (`spec.md` \S4.10.7's termination step).
pub struct RunReader {
    run: RunMeta,
    layout: crate::record::RecordPageLayout,
    page_offset: u32,
    record_idx: usize,
    consumed: u64,
}

impl RunReader {
    pub fn new(run: RunMeta, layout: crate::record::RecordPageLayout) -> Self {
        Self {
            run,
            layout,
            page_offset: 0,
            record_idx: 0,
            consumed: 0,
        }
    }
}

impl<F: PageFile> SortStrategy<F> for RunReader {
    fn next(&mut self, temp: &mut TempFile<F>, out: &mut [u8]) -> Result<bool, F::Error> {
        if self.consumed >= self.run.record_count {
            return Ok(false);
        }
        let mut buf = temp.new_page_buf();
        temp.read_page(self.run.start_page + self.page_offset, &mut buf)?;
        out.copy_from_slice(self.layout.record(&buf, self.record_idx));
        self.consumed += 1;
        self.record_idx += 1;
        let records_per_page = self.layout.records_per_page();
        if self.record_idx >= records_per_page {
            self.record_idx = 0;
            self.page_offset += 1;
        }
        Ok(true)
    }
}

/// The sort engine's output cursor: one of the three algorithm variants,
/// behind the same `next` surface (`spec.md` \S4.10.7).
pub enum SortOutput<C: RecordCompare> {
    Plain(MinSortPlain<C>),
    Sublist(MinSortSublist<C>),
    Run(RunReader),
}

impl<C: RecordCompare> SortOutput<C> {
    pub fn next<F: PageFile>(&mut self, temp: &mut TempFile<F>, out: &mut [u8]) -> Result<bool, F::Error> {
        match self {
            SortOutput::Plain(m) => SortStrategy::next(m, temp, out),
            SortOutput::Sublist(m) => SortStrategy::next(m, temp, out),
            SortOutput::Run(r) => SortStrategy::next(r, temp, out),
        }
    }
}

/// Tunables the caller supplies (`spec.md` \S4.10's `bufferSizeInBlocks`
/// and the write:read cost ratio).
#[derive(Debug, Clone, Copy)]
pub struct SortParams {
    /// `B`: number of page-sized buffers the engine may use.
    pub buffer_size_in_blocks: u64,
    /// `W`: write-to-read cost ratio, caller-supplied, already times 10.
    pub write_read_ratio_x10: u32,
    /// `spec.md` \S4.10.1's "runGenOnly": stop after producing sorted runs,
    /// skipping both the optimistic shortcut and the merge/MinSort
    /// decision. Exposed for callers that only want the runs (e.g. tests).
    pub run_gen_only: bool,
}

/// Drains `source` into `temp` as plain, unsorted record pages and returns
/// `(total_records, total_pages)`. Mirrors `loadRowData`'s role in
/// `sortWrapper.c`: materialize the upstream operator's rows before any
/// sort algorithm runs.
fn load_rows<S, F>(source: &mut S, temp: &mut TempFile<F>) -> Result<(u64, u32), Error<S::Error, F::Error>>
where
    S: RecordSource,
    F: PageFile,
{
    let layout = temp.layout();
    let records_per_page = layout.records_per_page();
    let mut page_buf: Vec<u8> = Vec::with_capacity(records_per_page * layout.record_size);
    let mut total_records = 0u64;
    let mut total_pages = 0u32;
    let mut rec = alloc::vec![0u8; layout.record_size];
    loop {
        if !source.next(&mut rec).map_err(Error::Source)? {
            break;
        }
        page_buf.extend_from_slice(&rec);
        total_records += 1;
        if page_buf.len() == records_per_page * layout.record_size {
            temp.append_page(total_pages, &page_buf).map_err(Error::File)?;
            total_pages += 1;
            page_buf.clear();
        }
    }
    if !page_buf.is_empty() {
        temp.append_page(total_pages, &page_buf).map_err(Error::File)?;
        total_pages += 1;
    }
    Ok((total_records, total_pages))
}

/// Adapts a [`SortSchema`]'s key-slice comparator to [`RecordCompare`]'s
/// whole-record signature, extracting the key first. Replacement
/// selection's heap (unlike [`merge_pass`] and the MinSort variants) takes
/// a bare comparator over whatever bytes it is handed, so this is what
/// makes it compare by key instead of by full record.
struct KeyedCompare<'a, C: RecordCompare> {
    schema: &'a SortSchema<C>,
}

impl<C: RecordCompare> RecordCompare for KeyedCompare<'_, C> {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.schema.key_cmp(a, b)
    }
}

/// Run generation, with the `in_memory_quick_sort` shortcut from
/// `adaptive_sort.c`: when the entire input already fits in one heap load
/// there is no point building a heap at all, quicksort it in place and
/// call that the only run.
fn generate_runs_or_sort_in_memory<F, C>(
    schema: &SortSchema<C>,
    temp: &mut TempFile<F>,
    total_records: u64,
    heap_capacity_records: usize,
) -> Result<RunGenStats, F::Error>
where
    F: PageFile,
    C: RecordCompare,
{
    if (total_records as usize) > heap_capacity_records {
        let keyed = KeyedCompare { schema };
        return generate_runs_from_pages(temp, total_records, heap_capacity_records, &keyed);
    }

    debug!("input fits in one buffer load, sorting in memory instead of generating runs");
    let record_size = schema.layout.record_size;
    let mut cursor = TempFileCursor::new(total_records);
    let mut page_buf = temp.new_page_buf();
    let mut flat = Vec::with_capacity(record_size * total_records as usize);
    let mut rec = vec![0u8; record_size];
    while cursor.next(temp, &mut page_buf, &mut rec)? {
        flat.extend_from_slice(&rec);
    }

    let keyed = KeyedCompare { schema };
    crate::quicksort::quicksort(&mut flat, record_size, &keyed);

    let records_per_page = schema.layout.records_per_page();
    let start_page = temp.next_page_id();
    let mut out_page_idx = 0u32;
    for chunk in flat.chunks(record_size * records_per_page) {
        temp.append_page(out_page_idx, chunk)?;
        out_page_idx += 1;
    }

    Ok(RunGenStats {
        runs: vec![RunMeta {
            start_page,
            length_in_pages: out_page_idx,
            record_count: total_records,
        }],
        avg_distinct: 0.0,
    })
}

/// Result of driving the runs produced by replacement selection to a
/// single sorted output (`spec.md` \S4.10.3).
enum MergeOutcome<C: RecordCompare> {
    Single(RunMeta),
    SwitchedToSublist(MinSortSublist<C>),
}

/// Repeatedly merges groups of up to `B-1` runs until one remains,
/// checking the late-binding MinSort switch (`spec.md` \S4.10.3, last
/// paragraph) before each pass.
fn merge_until_single_run<F, C>(
    schema: &SortSchema<C>,
    mut runs: Vec<RunMeta>,
    temp: &mut TempFile<F>,
    params: SortParams,
    avg_distinct: f64,
) -> Result<MergeOutcome<C>, F::Error>
where
    F: PageFile,
    C: RecordCompare + Clone,
{
    let group_size = (params.buffer_size_in_blocks.saturating_sub(1)).max(2) as usize;
    while runs.len() > 1 {
        if cost::should_switch_to_minsort_mid_merge(runs.len() as u64, avg_distinct) {
            let bound = ((params.buffer_size_in_blocks.saturating_sub(1)) as usize
                * schema.layout.page_size)
                / (schema.key.size + 4);
            if runs.len() <= bound {
                debug!(
                    "switching to sublist MinSort mid-merge: {} sublists remain",
                    runs.len()
                );
                let ms = MinSortSublist::new(schema.clone(), &runs, temp)?;
                return Ok(MergeOutcome::SwitchedToSublist(ms));
            }
        }
        let mut next_level = Vec::with_capacity(runs.len().div_ceil(group_size));
        for chunk in runs.chunks(group_size) {
            if chunk.len() == 1 {
                next_level.push(chunk[0]);
            } else {
                next_level.push(merge_pass(schema, chunk, temp)?);
            }
        }
        debug!("merge pass: {} runs -> {} runs", runs.len(), next_level.len());
        runs = next_level;
    }
    Ok(MergeOutcome::Single(runs[0]))
}

/// The full `ORDER BY` sort pipeline (`spec.md` \S4.10): materialize the
/// input, optionally take the optimistic Flash MinSort shortcut, otherwise
/// run replacement selection and then adaptively pick NOB-merge or one of
/// the two Flash MinSort variants.
pub fn adaptive_sort<S, F, C>(
    source: &mut S,
    temp: &mut TempFile<F>,
    schema: SortSchema<C>,
    params: SortParams,
) -> Result<SortOutput<C>, Error<S::Error, F::Error>>
where
    S: RecordSource,
    F: PageFile,
    C: RecordCompare + Clone,
{
    let (total_records, total_pages) = load_rows(source, temp)?;
    let b = params.buffer_size_in_blocks;

    if !params.run_gen_only
        && cost::should_use_optimistic_minsort(total_pages as u64, b, params.write_read_ratio_x10)
    {
        debug!("optimistic MinSort shortcut taken, skipping run generation");
        let blocks_per_region = region_block_count(&schema, b, total_pages);
        let mut plain = MinSortPlain::new(schema, total_pages, blocks_per_region, total_records);
        plain.init(temp).map_err(Error::File)?;
        return Ok(SortOutput::Plain(plain));
    }

    let records_per_page = schema.layout.records_per_page();
    let heap_capacity = (b.saturating_sub(1) as usize).max(1) * records_per_page;
    let stats = generate_runs_or_sort_in_memory(&schema, temp, total_records, heap_capacity)
        .map_err(Error::File)?;

    if stats.runs.is_empty() {
        let empty = RunMeta {
            start_page: 0,
            length_in_pages: 0,
            record_count: 0,
        };
        return Ok(SortOutput::Run(RunReader::new(empty, schema.layout)));
    }

    if stats.runs.len() == 1 {
        return Ok(SortOutput::Run(RunReader::new(stats.runs[0], schema.layout)));
    }

    let choice = cost::choose_after_run_gen(
        stats.runs.len() as u64,
        stats.avg_distinct,
        b,
        params.write_read_ratio_x10,
        schema.key.size,
        schema.layout.page_size,
    );
    debug!("post-run-gen choice: {:?}", choice);

    match choice {
        MergeChoice::MinSortSublist => {
            let ms = MinSortSublist::new(schema, &stats.runs, temp).map_err(Error::File)?;
            Ok(SortOutput::Sublist(ms))
        }
        MergeChoice::MinSortPlain => {
            // Memory bound failed for per-sublist tracking; fall back to
            // region-based MinSort. The runs are contiguous in the temp
            // file (replacement selection appends them back to back), so
            // they can be treated as one flat, already-mostly-sorted page
            // range: MinSort only needs to scan pages for a given key, it
            // does not depend on run boundaries.
            let first_page = stats.runs[0].start_page;
            let last_run = *stats.runs.last().unwrap();
            let total_sorted_records: u64 = stats.runs.iter().map(|r| r.record_count).sum();
            let total_sorted_pages = last_run.start_page + last_run.length_in_pages - first_page;
            let blocks_per_region = region_block_count(&schema, b, total_sorted_pages);
            let mut plain = MinSortPlain::with_base_page(
                schema,
                first_page,
                total_sorted_pages,
                blocks_per_region,
                total_sorted_records,
            );
            plain.init(temp).map_err(Error::File)?;
            Ok(SortOutput::Plain(plain))
        }
        MergeChoice::NobMerge => {
            match merge_until_single_run(&schema, stats.runs, temp, params, stats.avg_distinct)
                .map_err(Error::File)?
            {
                MergeOutcome::Single(run) => Ok(SortOutput::Run(RunReader::new(run, schema.layout))),
                MergeOutcome::SwitchedToSublist(ms) => Ok(SortOutput::Sublist(ms)),
            }
        }
    }
}

/// Number of pages per MinSort region: one key-sized slot per region must
/// fit in the buffer pages left over after reserving one page for the
/// region scan and one for general bookkeeping (`spec.md` \S4.10.4's
/// `init_MinSort` region-count derivation).
fn region_block_count<C: RecordCompare>(schema: &SortSchema<C>, buffer_pages: u64, total_pages: u32) -> u32 {
    let reserved_pages = 2u64;
    let usable_bytes = (buffer_pages.saturating_sub(reserved_pages) as usize) * schema.layout.page_size;
    let max_regions = (usable_bytes / schema.key.size).max(1) as u32;
    total_pages.div_ceil(max_regions).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use page_file::mock::MemoryPageFile;
    use page_file::OpenMode;

    fn i32_cmp(a: &[u8], b: &[u8]) -> Ordering {
        i32::from_le_bytes(a.try_into().unwrap()).cmp(&i32::from_le_bytes(b.try_into().unwrap()))
    }

    struct VecSource {
        values: Vec<i32>,
        pos: usize,
    }

    impl RecordSource for VecSource {
        type Error = core::convert::Infallible;

        fn next(&mut self, out: &mut [u8]) -> Result<bool, Self::Error> {
            if self.pos >= self.values.len() {
                return Ok(false);
            }
            out.copy_from_slice(&self.values[self.pos].to_le_bytes());
            self.pos += 1;
            Ok(true)
        }
    }

    fn drain(mut out: SortOutput<fn(&[u8], &[u8]) -> Ordering>, temp: &mut TempFile<MemoryPageFile<64, 1024>>) -> Vec<i32> {
        let mut buf = [0u8; 4];
        let mut results = Vec::new();
        while out.next(temp, &mut buf).unwrap() {
            results.push(i32::from_le_bytes(buf));
        }
        results
    }

    fn run(values: Vec<i32>, params: SortParams) -> Vec<i32> {
        let layout = crate::record::RecordPageLayout {
            record_size: 4,
            page_size: 64,
        };
        let mut file = MemoryPageFile::<64, 1024>::new();
        file.open(OpenMode::ReadWriteTruncate).unwrap();
        let mut temp = TempFile::new(file, layout);
        let schema = SortSchema {
            layout,
            key: crate::record::KeyField { offset: 0, size: 4 },
            cmp: i32_cmp as fn(&[u8], &[u8]) -> Ordering,
        };
        let mut source = VecSource { values, pos: 0 };
        let out = adaptive_sort(&mut source, &mut temp, schema, params).unwrap();
        drain(out, &mut temp)
    }

    /// A handful of records with a generous buffer takes the in-memory
    /// quicksort shortcut inside run generation (`spec.md` \S4.10.1's
    /// "input fits in one buffer load") rather than building a heap.
    #[test]
    fn small_input_sorts_via_in_memory_shortcut() {
        let values = vec![5, 3, 8, 1, 9, 2, 7, 4, 6, 0];
        let mut expected = values.clone();
        expected.sort();
        let params = SortParams {
            buffer_size_in_blocks: 8,
            write_read_ratio_x10: 0,
            run_gen_only: false,
        };
        assert_eq!(run(values, params), expected);
    }

    /// A heap capacity smaller than the input forces replacement selection
    /// to emit several runs that then have to be merged or MinSort'd back
    /// into one sorted sequence; the output is still a correct permutation
    /// regardless of which sub-algorithm the cost model ends up choosing
    /// (`spec.md` \S8's sort-output property). `write_read_ratio_x10: 0`
    /// and a buffer big enough to cover the whole (small) input's page
    /// count keeps the optimistic MinSort shortcut from swallowing the
    /// run-generation path entirely.
    #[test]
    fn larger_input_with_small_heap_still_sorts_correctly() {
        let values: Vec<i32> = (0..110).map(|i| (i * 37) % 211).collect();
        let mut expected = values.clone();
        expected.sort();
        let params = SortParams {
            buffer_size_in_blocks: 8,
            write_read_ratio_x10: 0,
            run_gen_only: false,
        };
        assert_eq!(run(values, params), expected);
    }

    /// Same shape as above but with heavy key repetition, so the runs'
    /// average distinct-value count is low enough that the cost model is
    /// likely to resolve the post-run-generation choice to a Flash MinSort
    /// variant instead of a NOB merge.
    #[test]
    fn input_with_many_duplicate_keys_still_sorts_correctly() {
        let values: Vec<i32> = (0..110).map(|i| i % 5).collect();
        let mut expected = values.clone();
        expected.sort();
        let params = SortParams {
            buffer_size_in_blocks: 8,
            write_read_ratio_x10: 0,
            run_gen_only: false,
        };
        assert_eq!(run(values, params), expected);
    }

    #[test]
    fn empty_input_sorts_to_empty_output() {
        let params = SortParams {
            buffer_size_in_blocks: 8,
            write_read_ratio_x10: 10,
            run_gen_only: false,
        };
        assert_eq!(run(Vec::new(), params), Vec::<i32>::new());
    }
}
