//! Cost model driving the adaptive choice between a no-output-buffer merge
//! and the two Flash MinSort variants (`spec.md` \S4.10.2, \S4.10.3).

/// `nobCost = ceil(log_B(n)) * (10 + W) / 10` where `n` is either the total
/// page count (pre-run-generation estimate) or the actual sublist count
/// (post-run-generation decision), `B` is `bufferSizeInBlocks`, and `W` is
/// the caller-supplied write:read cost ratio times 10.
pub fn nob_cost(n: u64, buffer_pages: u64, write_read_ratio_x10: u32) -> f64 {
    let b = (buffer_pages.max(2)) as f64;
    let log_b_n = (n.max(1) as f64).log(b).ceil().max(1.0);
    log_b_n * (10.0 + write_read_ratio_x10 as f64) / 10.0
}

/// MinSort's cost is dominated by the number of full-region rescans, which
/// is proportional to the number of distinct values per run.
pub fn minsort_cost_estimate(avg_distinct: f64) -> f64 {
    avg_distinct / 10.0
}

/// A-priori `avgDistinct` used by the optimistic shortcut, before any run
/// has actually been generated (`spec.md` \S4.10.2).
pub const A_PRIORI_AVG_DISTINCT: f64 = 16.0;

/// `spec.md` \S4.10.2: speculatively run Flash MinSort instead of even
/// starting replacement selection when its a-priori cost estimate beats the
/// predicted NOB-merge cost over the whole (unsorted) input.
pub fn should_use_optimistic_minsort(num_pages: u64, buffer_pages: u64, write_read_ratio_x10: u32) -> bool {
    minsort_cost_estimate(A_PRIORI_AVG_DISTINCT) < nob_cost(num_pages, buffer_pages, write_read_ratio_x10)
}

/// Which strategy the post-run-generation decision (`spec.md` \S4.10.3)
/// picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeChoice {
    NobMerge,
    MinSortSublist,
    MinSortPlain,
}

/// `spec.md` \S4.10.3's decision, recomputing `nobCost` with the actual
/// `numSublist` and comparing it to `avgDistinct/10`.
pub fn choose_after_run_gen(
    num_sublists: u64,
    avg_distinct: f64,
    buffer_pages: u64,
    write_read_ratio_x10: u32,
    key_size: usize,
    page_size: usize,
) -> MergeChoice {
    let nob = nob_cost(num_sublists, buffer_pages, write_read_ratio_x10);
    let minsort = minsort_cost_estimate(avg_distinct);
    if nob > minsort {
        let sublist_memory_bound =
            ((buffer_pages.saturating_sub(1)) as usize * page_size) / (key_size + 4);
        if num_sublists as usize <= sublist_memory_bound {
            MergeChoice::MinSortSublist
        } else {
            MergeChoice::MinSortPlain
        }
    } else {
        MergeChoice::NobMerge
    }
}

/// `spec.md` \S4.10.3's late-binding switch inside merge passes: when the
/// number of sublists still to be merged falls in `32..=64`, a cost check
/// may prefer finishing via MinSort instead of another merge pass.
pub fn should_switch_to_minsort_mid_merge(remaining_sublists: u64, avg_distinct: f64) -> bool {
    (32..=64).contains(&remaining_sublists) && minsort_cost_estimate(avg_distinct) < remaining_sublists as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nob_cost_grows_with_log_base_buffer_pages() {
        let small = nob_cost(100, 8, 10);
        let large = nob_cost(100_000, 8, 10);
        assert!(large > small);
    }

    #[test]
    fn optimistic_minsort_favoured_when_nob_cost_is_high() {
        // Tiny buffer relative to huge input drives nobCost up.
        assert!(should_use_optimistic_minsort(1_000_000, 4, 10));
    }

    #[test]
    fn sublist_memory_bound_falls_back_to_plain_minsort() {
        // minsort is cheaper here (nob=8.0 > minsort=0.1) but 200 sublists
        // overflow the one-key-slot-per-sublist memory bound of 128.
        let choice = choose_after_run_gen(200, 1.0, 4, 10, 8, 512);
        assert_eq!(choice, MergeChoice::MinSortPlain);
    }

    #[test]
    fn few_sublists_with_memory_to_spare_uses_sublist_minsort() {
        // Same cheap-minsort case as above, but few enough sublists (5) to
        // fit the memory bound (128).
        let choice = choose_after_run_gen(5, 1.0, 4, 10, 8, 512);
        assert_eq!(choice, MergeChoice::MinSortSublist);
    }

    #[test]
    fn high_distinct_count_prefers_nob_merge() {
        // Every record close to distinct makes minsort's rescan cost (200.0)
        // dwarf the cheap 8-pass nob merge.
        let choice = choose_after_run_gen(1000, 2000.0, 8, 10, 8, 512);
        assert_eq!(choice, MergeChoice::NobMerge);
    }
}
