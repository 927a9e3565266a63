//! One-byte subclass compression
//!
//! Values below 128 travel as-is. Larger values must be a single power of
//! two and travel as `log2(v) | 0x80`.

use tracing::warn;

/// Flag marking a compressed (logarithmic) subclass byte
pub const SUBCLASS_LOG_FLAG: u8 = 0x80;

const MAX_SHIFT: u32 = 0x1F;

/// Compress a subclass into one byte.
///
/// A value with more than one bit set cannot be represented; it is logged
/// and sent as 0.
pub fn compress_subclass(subclass: u32) -> u8 {
    if subclass < SUBCLASS_LOG_FLAG as u32 {
        return subclass as u8;
    }
    if subclass.count_ones() != 1 {
        warn!("Can't compress subclass {}", subclass);
        return 0;
    }
    (subclass.trailing_zeros() as u8) | SUBCLASS_LOG_FLAG
}

/// Inverse of [`compress_subclass`]
pub fn uncompress_subclass(csub: u8) -> u32 {
    if csub & SUBCLASS_LOG_FLAG != 0 {
        1u32 << ((csub as u32) & MAX_SHIFT)
    } else {
        csub as u32
    }
}
