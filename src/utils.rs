/// Rounds `val` up to the next multiple of `align`.
///
/// `align` must be a power of two.
#[must_use]
pub const fn align_up(val: u64, align: u64) -> u64 {
    (val + align - 1) & !(align - 1)
}

/// Like [`align_up`], but reports overflow instead of wrapping.
#[must_use]
pub const fn checked_align_up(val: u64, align: u64) -> Option<u64> {
    match val.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

#[must_use]
pub const fn is_aligned(val: u64, align: u64) -> bool {
    val & (align - 1) == 0
}
