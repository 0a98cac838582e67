use core::fmt::Debug;

use page_file::PageFileError;
use thiserror::Error;

/// Error surfaced by a fallible `embeddb` operation (`spec.md` \S7).
#[derive(Debug, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E: Debug> {
    /// A mandatory parameter was out of range, or a backing file failed to open.
    #[error("engine initialization failed")]
    Init,
    /// The underlying page file reported `error()` after a read/write/seek/flush.
    #[error("I/O error")]
    Io(E),
    /// `put` was called with a key that is not strictly greater than the
    /// last inserted key.
    #[error("key is not greater than the last inserted key")]
    DuplicateKey,
    /// `get`/`getVar` could not locate the requested key.
    #[error("key not found")]
    NotFound,
    /// The fixed record was found but its variable-length payload has been
    /// reclaimed by var-log wrap-around.
    #[error("variable-length payload has been reclaimed")]
    VarDeleted,
    /// The sort engine could not allocate enough working memory.
    #[error("not enough working memory for the requested operation")]
    CapacityExceeded,
}

impl<E: Debug> Error<E> {
    pub(crate) fn from_page_file(e: E) -> Self
    where
        E: PageFileError,
    {
        Error::Io(e)
    }
}
