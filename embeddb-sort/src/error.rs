use core::fmt::Debug;

use thiserror::Error;

/// Error surfaced by a fallible `embeddb-sort` operation (`spec.md` \S7,
/// the subset relevant to the sort engine). Generic over both the upstream
/// [`crate::record::RecordSource`]'s error type and the backing page file's,
/// since [`crate::strategy::adaptive_sort`] can fail on either side.
#[derive(Debug, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<SE: Debug, FE: Debug> {
    /// The upstream row source failed.
    #[error("row source error")]
    Source(SE),
    /// The underlying temp-file page store reported `error()`.
    #[error("I/O error")]
    File(FE),
    /// Not enough working memory to run the requested sort strategy
    /// (e.g. too many sublists to fit one key+offset per sublist in the
    /// sublist MinSort variant).
    #[error("not enough working memory for the requested sort strategy")]
    CapacityExceeded,
}
