//! In-memory quicksort used to order records within a freshly read page
//! before a merge pass (`spec.md` \S4.10.6), ported from the original
//! `in_memory_quick_sort`'s Hoare partition scheme.

use crate::record::RecordCompare;

/// Sort `records` (a flat buffer of `record_size`-byte records) in place.
pub fn quicksort<C: RecordCompare>(records: &mut [u8], record_size: usize, cmp: &C) {
    if record_size == 0 || records.is_empty() {
        return;
    }
    let num_records = records.len() / record_size;
    if num_records < 2 {
        return;
    }
    quicksort_range(records, record_size, cmp, 0, num_records - 1);
}

fn quicksort_range<C: RecordCompare>(
    records: &mut [u8],
    record_size: usize,
    cmp: &C,
    low: usize,
    high: usize,
) {
    if low >= high {
        return;
    }
    let split = partition(records, record_size, cmp, low, high);
    if split > low {
        quicksort_range(records, record_size, cmp, low, split);
    }
    quicksort_range(records, record_size, cmp, split + 1, high);
}

fn rec<'a>(records: &'a [u8], record_size: usize, i: usize) -> &'a [u8] {
    &records[i * record_size..(i + 1) * record_size]
}

fn swap(records: &mut [u8], record_size: usize, a: usize, b: usize) {
    if a == b {
        return;
    }
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    let (left, right) = records.split_at_mut(hi * record_size);
    let a_slice = &mut left[lo * record_size..(lo + 1) * record_size];
    let b_slice = &mut right[..record_size];
    a_slice.swap_with_slice(b_slice);
}

/// Hoare partition scheme: pivot is the low element; returns the split
/// point such that everything in `[low, split]` compares `<=` everything in
/// `(split, high]`.
fn partition<C: RecordCompare>(
    records: &mut [u8],
    record_size: usize,
    cmp: &C,
    low: usize,
    high: usize,
) -> usize {
    let pivot: alloc::vec::Vec<u8> = rec(records, record_size, low).to_vec();
    let mut i = low;
    let mut j = high + 1;
    loop {
        loop {
            i += 1;
            if i > high || cmp.compare(rec(records, record_size, i), &pivot) != core::cmp::Ordering::Less {
                break;
            }
        }
        loop {
            j -= 1;
            if cmp.compare(rec(records, record_size, j), &pivot) != core::cmp::Ordering::Greater {
                break;
            }
        }
        if i >= j {
            swap(records, record_size, low, j);
            return j;
        }
        swap(records, record_size, i, j);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cmp::Ordering;

    fn i32_cmp(a: &[u8], b: &[u8]) -> Ordering {
        i32::from_le_bytes(a.try_into().unwrap()).cmp(&i32::from_le_bytes(b.try_into().unwrap()))
    }

    #[test]
    fn sorts_boundary_scenario_7() {
        // spec.md \S8 scenario 7: [5,3,3,1,2,2,4] -> [1,2,2,3,3,4,5]
        let values = [5i32, 3, 3, 1, 2, 2, 4];
        let mut buf: alloc::vec::Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        quicksort(&mut buf, 4, &i32_cmp);
        let sorted: alloc::vec::Vec<i32> = buf
            .chunks(4)
            .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(sorted, vec![1, 2, 2, 3, 3, 4, 5]);
    }

    #[test]
    fn stride_with_offset_leaves_payload_intact() {
        // scenario 7's second half: 4-byte stride, 4-byte key offset,
        // sorting only by the trailing field must not corrupt the leading
        // one.
        #[derive(Clone, Copy)]
        struct Rec {
            tag: i32,
            key: i32,
        }
        let input = [
            Rec { tag: 100, key: 5 },
            Rec { tag: 200, key: 1 },
            Rec { tag: 300, key: 3 },
        ];
        let mut buf: alloc::vec::Vec<u8> = input
            .iter()
            .flat_map(|r| [r.tag.to_le_bytes(), r.key.to_le_bytes()].concat())
            .collect();
        let cmp = |a: &[u8], b: &[u8]| i32_cmp(&a[4..8], &b[4..8]);
        quicksort(&mut buf, 8, &cmp);
        let tags: alloc::vec::Vec<i32> = buf
            .chunks(8)
            .map(|c| i32::from_le_bytes(c[0..4].try_into().unwrap()))
            .collect();
        let keys: alloc::vec::Vec<i32> = buf
            .chunks(8)
            .map(|c| i32::from_le_bytes(c[4..8].try_into().unwrap()))
            .collect();
        assert_eq!(keys, vec![1, 3, 5]);
        assert_eq!(tags, vec![200, 300, 100]);
    }

    #[test]
    fn handles_already_sorted_and_single_element() {
        let mut one = [1u8, 2, 3, 4];
        quicksort(&mut one, 4, &i32_cmp);
        assert_eq!(one, [1, 2, 3, 4]);

        let values = [1i32, 2, 3, 4];
        let mut buf: alloc::vec::Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        quicksort(&mut buf, 4, &i32_cmp);
        let sorted: alloc::vec::Vec<i32> = buf
            .chunks(4)
            .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(sorted, vec![1, 2, 3, 4]);
    }
}
