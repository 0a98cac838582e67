//! Engine construction parameters (`spec.md` \S3 "Engine State", \S6
//! "Parameters bitmask").

use core::cmp::Ordering;
use core::ops::BitOr;

use alloc::boxed::Box;

use crate::bitmap::BitmapScheme;

/// Parameters recognized by `init` (`spec.md` \S6). A plain struct of flags
/// rather than a bitmask type: the teacher workspace never reaches for a
/// bitmask crate for this kind of small fixed flag set, and combining
/// individual flags with `|` reads the same either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Parameters {
    /// Enable sparse index emission (C7).
    pub use_index: bool,
    /// Enable bitmap fields in data-page headers (C4 inline).
    pub use_bitmap: bool,
    /// Enable the variable-length payload log (C6).
    pub use_var_data: bool,
    /// Truncate existing files on `init` instead of recovering them.
    pub reset_data: bool,
}

impl Parameters {
    const NONE: Self = Self {
        use_index: false,
        use_bitmap: false,
        use_var_data: false,
        reset_data: false,
    };
    pub const USE_INDEX: Self = Self { use_index: true, ..Self::NONE };
    pub const USE_BMAP: Self = Self { use_bitmap: true, ..Self::NONE };
    pub const USE_VDATA: Self = Self { use_var_data: true, ..Self::NONE };
    pub const RESET_DATA: Self = Self { reset_data: true, ..Self::NONE };

    pub fn empty() -> Self {
        Self::NONE
    }
}

impl BitOr for Parameters {
    type Output = Parameters;
    fn bitor(self, rhs: Parameters) -> Parameters {
        Parameters {
            use_index: self.use_index || rhs.use_index,
            use_bitmap: self.use_bitmap || rhs.use_bitmap,
            use_var_data: self.use_var_data || rhs.use_var_data,
            reset_data: self.reset_data || rhs.reset_data,
        }
    }
}

/// Ordering over fixed-width byte keys/data. A tagged enum rather than a
/// trait object: the widths in play are small and known at configuration
/// time, and this avoids pinning a `dyn` comparator into `no_std` builds
/// without an allocator-friendly vtable story.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    I32,
    U32,
    I64,
    U64,
    /// Plain lexicographic byte comparison, for opaque/non-integer keys.
    Bytes,
}

impl Comparator {
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            Comparator::I32 => read_i32(a).cmp(&read_i32(b)),
            Comparator::U32 => read_u32(a).cmp(&read_u32(b)),
            Comparator::I64 => read_i64(a).cmp(&read_i64(b)),
            Comparator::U64 => read_u64(a).cmp(&read_u64(b)),
            Comparator::Bytes => a.cmp(b),
        }
    }
}

fn read_i32(b: &[u8]) -> i32 {
    let mut buf = [0u8; 4];
    buf[..b.len().min(4)].copy_from_slice(&b[..b.len().min(4)]);
    i32::from_le_bytes(buf)
}
fn read_u32(b: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf[..b.len().min(4)].copy_from_slice(&b[..b.len().min(4)]);
    u32::from_le_bytes(buf)
}
fn read_i64(b: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    buf[..b.len().min(8)].copy_from_slice(&b[..b.len().min(8)]);
    i64::from_le_bytes(buf)
}
fn read_u64(b: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf[..b.len().min(8)].copy_from_slice(&b[..b.len().min(8)]);
    u64::from_le_bytes(buf)
}

/// Construction parameters for an [`crate::engine::Engine`] (`spec.md`
/// \S3's "Engine State", minus the counters/watermarks that are runtime
/// state rather than configuration).
pub struct EngineConfig {
    pub key_size: usize,
    pub data_size: usize,
    pub page_size: usize,
    /// Number of page-sized slots in the buffer arena (C2). Must be at
    /// least 2 (write-data, read-data); 6 when index and var logs are
    /// both enabled.
    pub buffer_size_in_blocks: usize,
    pub num_data_pages: u32,
    pub num_index_pages: u32,
    pub num_var_pages: u32,
    /// Erase-block size in pages; wrap-around reclaims one erase block at
    /// a time.
    pub erase_size_in_pages: u32,
    pub parameters: Parameters,
    pub key_comparator: Comparator,
    pub data_comparator: Comparator,
    /// Bitmap scheme used for both inline page-header bitmaps and the
    /// sparse index; ignored unless `USE_BMAP`/`USE_INDEX` is set.
    pub bitmap: Option<Box<dyn BitmapScheme>>,
    /// Bound on the spline locator's absolute page-prediction error.
    pub max_spline_error: u32,
}

impl EngineConfig {
    pub fn bitmap_size(&self) -> usize {
        self.bitmap.as_ref().map(|b| b.width()).unwrap_or(0)
    }

    /// Validates the parameters that cannot be deferred to `init`'s file
    /// open calls (`spec.md` \S7: `INIT_ERROR` on out-of-range parameters).
    pub fn validate(&self) -> bool {
        if self.key_size == 0 || self.data_size == 0 || self.page_size == 0 {
            return false;
        }
        if self.buffer_size_in_blocks < 2 {
            return false;
        }
        if self.parameters.use_bitmap && self.bitmap.is_none() {
            return false;
        }
        if self.erase_size_in_pages == 0 {
            return false;
        }
        let header_min = 4 + 2 + 2 * self.key_size + 2 * self.data_size;
        if header_min + (self.key_size + self.data_size) > self.page_size {
            return false;
        }
        true
    }
}
