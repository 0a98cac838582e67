//! Adaptive external sort engine for embeddb's `ORDER BY` operator
//! (`spec.md` \S4.10).
//!
//! Records are pulled from a [`record::RecordSource`], spilled to a
//! [`tempfile::TempFile`], and sorted via whichever combination of
//! replacement selection, no-output-buffer merge, and Flash MinSort the
//! cost model in [`cost`] picks for the given buffer budget. [`strategy`]
//! ties the pieces together behind [`strategy::adaptive_sort`].

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

#[macro_use]
mod fmt;

pub mod cost;
pub mod error;
pub mod heap;
pub mod merge;
pub mod minsort;
pub mod minsort_sublist;
pub mod quicksort;
pub mod record;
pub mod replacement_selection;
pub mod strategy;
pub mod tempfile;

pub use cost::MergeChoice;
pub use error::Error;
pub use record::{KeyField, RecordCompare, RecordPageLayout, RecordSource, SortSchema};
pub use replacement_selection::{RunGenStats, RunMeta};
pub use strategy::{adaptive_sort, SortOutput, SortParams, SortStrategy};
pub use tempfile::TempFile;
