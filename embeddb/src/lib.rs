#![cfg_attr(not(feature = "std"), no_std)]

//! Append-only, log-structured key-value store for page-oriented storage
//! with bounded RAM (`spec.md` \S1–\S2).
//!
//! [`Engine`] is the public facade: it owns the fixed-width data log (C5),
//! optional sparse index log (C7) and variable-length payload log (C6),
//! the spline key locator (C3), and the bitmap value filter (C4), behind
//! the `init/put/putVar/get/getVar/initIterator/next/nextVar/flush/close`
//! surface of `spec.md` \S6. [`crate::bitmap`] and [`crate::config`] are
//! the pieces an embedder configures before construction; everything else
//! is internal engine machinery.

extern crate alloc;

#[macro_use]
mod fmt;

pub mod bitmap;
pub mod config;
mod engine;
pub mod error;
mod index;
mod iterator;
mod page;
mod spline;
mod varlog;

pub use config::{Comparator, EngineConfig, Parameters};
pub use engine::{Engine, GetVarOutcome};
pub use error::Error;
pub use iterator::{EngineIterator, QueryBounds, VarRecord};
pub use varlog::VarStream;

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;
    use page_file::mock::MemoryPageFile;

    type Mem = MemoryPageFile<512, 64>;

    fn test_config(parameters: Parameters) -> EngineConfig {
        EngineConfig {
            key_size: 4,
            data_size: 8,
            page_size: 512,
            buffer_size_in_blocks: 6,
            num_data_pages: 32,
            num_index_pages: 16,
            num_var_pages: 16,
            erase_size_in_pages: 4,
            parameters,
            key_comparator: Comparator::U32,
            data_comparator: Comparator::U32,
            bitmap: Some(Box::new(bitmap::LinearBitmap8)),
            max_spline_error: 2,
        }
    }

    fn key(k: u32) -> [u8; 4] {
        k.to_le_bytes()
    }
    fn data(d: u32) -> [u8; 8] {
        (d as u64).to_le_bytes()
    }

    #[test]
    fn put_then_get_round_trips_without_wrap() {
        let mut engine = Engine::<Mem>::new(
            Mem::new(),
            None,
            None,
            test_config(Parameters::RESET_DATA),
        )
        .unwrap();
        for k in 0u32..500 {
            engine.put(&key(k), &data(k * 2)).unwrap();
        }
        engine.flush().unwrap();
        for k in 0u32..500 {
            let mut out = [0u8; 8];
            engine.get(&key(k), &mut out).unwrap();
            assert_eq!(out, data(k * 2));
        }
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let mut engine = Engine::<Mem>::new(
            Mem::new(),
            None,
            None,
            test_config(Parameters::RESET_DATA),
        )
        .unwrap();
        engine.put(&key(10), &data(1)).unwrap();
        engine.put(&key(20), &data(2)).unwrap();
        let err = engine.put(&key(15), &data(3)).unwrap_err();
        assert!(matches!(err, Error::DuplicateKey));
        let err = engine.put(&key(20), &data(3)).unwrap_err();
        assert!(matches!(err, Error::DuplicateKey));
    }

    #[test]
    fn not_found_for_missing_key() {
        let mut engine = Engine::<Mem>::new(
            Mem::new(),
            None,
            None,
            test_config(Parameters::RESET_DATA),
        )
        .unwrap();
        engine.put(&key(10), &data(1)).unwrap();
        let mut out = [0u8; 8];
        assert!(matches!(engine.get(&key(999), &mut out), Err(Error::NotFound)));
    }

    #[test]
    fn wrap_around_reclaims_oldest_pages_and_keeps_recent_ones_live() {
        let mut engine = Engine::<Mem>::new(
            Mem::new(),
            None,
            None,
            test_config(Parameters::RESET_DATA),
        )
        .unwrap();
        // Enough inserts to wrap the 32-page data log several times over.
        for k in 0u32..4000 {
            engine.put(&key(k), &data(k)).unwrap();
        }
        engine.flush().unwrap();

        assert!(engine.next_data_page_id() > engine.min_data_page_id());
        assert!(engine.num_avail_data_pages() < 32);

        let mut out = [0u8; 8];
        // The very first keys must be gone.
        assert!(matches!(engine.get(&key(0), &mut out), Err(Error::NotFound)));
        // The most recent key must still be live.
        engine.get(&key(3999), &mut out).unwrap();
        assert_eq!(out, data(3999));
    }

    #[test]
    fn second_consecutive_flush_performs_no_io() {
        let mut engine = Engine::<Mem>::new(
            Mem::new(),
            None,
            None,
            test_config(Parameters::RESET_DATA),
        )
        .unwrap();
        engine.put(&key(1), &data(1)).unwrap();
        engine.flush().unwrap();
        // Close the backing file so any further real write/flush call
        // would fail; a second `flush()` with nothing new written must be
        // a no-op and therefore still succeed.
        engine.close().unwrap();
        engine.flush().unwrap();
    }

    #[test]
    fn recovery_reconstructs_state_from_existing_files() {
        let file = Mem::new();
        let mut engine = Engine::<Mem>::new(file, None, None, test_config(Parameters::RESET_DATA)).unwrap();
        for k in 0u32..200 {
            engine.put(&key(k), &data(k)).unwrap();
        }
        engine.flush().unwrap();
        let next_before = engine.next_data_page_id();
        let min_before = engine.min_data_page_id();

        // Simulate reopen: hand the same backing storage to a fresh engine
        // without RESET_DATA.
        let reopened_file = extract_storage(engine);
        let mut reopened = Engine::<Mem>::new(reopened_file, None, None, test_config(Parameters::empty())).unwrap();

        assert_eq!(reopened.next_data_page_id(), next_before);
        assert_eq!(reopened.min_data_page_id(), min_before);
        for k in 0u32..200 {
            let mut out = [0u8; 8];
            reopened.get(&key(k), &mut out).unwrap();
            assert_eq!(out, data(k));
        }
        // Still append-able and monotonic after recovery.
        reopened.put(&key(200), &data(200)).unwrap();
        let mut out = [0u8; 8];
        reopened.get(&key(200), &mut out).unwrap();
        assert_eq!(out, data(200));
    }

    fn extract_storage(mut engine: Engine<Mem>) -> Mem {
        engine.close().unwrap();
        // `MemoryPageFile` carries its own storage; closing leaves it intact
        // for a fresh `Engine` to reopen against, matching how a real page
        // file would persist across a process restart.
        engine.into_data_file()
    }

    #[test]
    fn var_records_round_trip_and_report_deletion_after_reclaim() {
        let mut engine = Engine::<Mem>::new(
            Mem::new(),
            None,
            Some(MemoryPageFile::<512, 8>::new()),
            test_config(Parameters::RESET_DATA | Parameters::USE_VDATA),
        )
        .unwrap();
        engine.put_var(&key(1), &data(1), b"hello").unwrap();
        engine.flush().unwrap();
        let mut out = [0u8; 8];
        match engine.get_var(&key(1), &mut out).unwrap() {
            GetVarOutcome::Live { mut stream, length } => {
                assert_eq!(length, 5);
                let mut payload = [0u8; 5];
                engine.read_var_stream(&mut stream, &mut payload).unwrap();
                assert_eq!(&payload, b"hello");
            }
            GetVarOutcome::Deleted => panic!("expected live var record"),
        }
    }

    #[test]
    fn range_iterator_respects_key_and_data_bounds() {
        let mut engine = Engine::<Mem>::new(
            Mem::new(),
            Some(MemoryPageFile::<512, 16>::new()),
            None,
            test_config(Parameters::RESET_DATA | Parameters::USE_INDEX | Parameters::USE_BMAP),
        )
        .unwrap();
        for k in 0u32..300 {
            engine.put(&key(k), &data(k)).unwrap();
        }
        engine.flush().unwrap();

        let bounds = QueryBounds {
            min_key: Some(key(50).to_vec()),
            max_key: Some(key(100).to_vec()),
            min_data: None,
            max_data: None,
        };
        let mut it = engine.init_iterator(bounds);
        let mut seen = alloc::vec::Vec::new();
        let (mut k_out, mut d_out) = ([0u8; 4], [0u8; 8]);
        while it.next(&mut engine, &mut k_out, &mut d_out).unwrap() {
            seen.push(u32::from_le_bytes(k_out));
        }
        let expected: alloc::vec::Vec<u32> = (50..=100).collect();
        assert_eq!(seen, expected);
    }
}
