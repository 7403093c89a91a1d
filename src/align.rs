/// Size in bytes of a boundary tag word.
pub const WORD_SIZE: usize = 8;

/// Every block size and every payload address is a multiple of this.
pub const ALIGNMENT: usize = 8;

/// Header plus footer.
pub const TAGS_SIZE: usize = 2 * WORD_SIZE;

/// Header, footer, and room for the two free-list links.
pub const MIN_BLOCK_SIZE: usize = 4 * WORD_SIZE;

/// Rounds the given size up to the allocator's alignment unit.
///
/// # Examples
///
/// ```rust
/// use tagalloc::align;
///
/// assert_eq!(align!(0), 0);
/// assert_eq!(align!(1), 8);
/// assert_eq!(align!(13), 16);
/// assert_eq!(align!(24), 24);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + $crate::align::ALIGNMENT - 1) & !($crate::align::ALIGNMENT - 1)
  };
}

/// Total block size needed to serve a payload of `payload` bytes, or `None`
/// when the arithmetic would overflow.
///
/// Never below [`MIN_BLOCK_SIZE`], so every block can later be freed.
pub(crate) fn block_size_for(payload: usize) -> Option<usize> {
  payload
    .checked_add(ALIGNMENT - 1)
    .map(|v| v & !(ALIGNMENT - 1))
    .and_then(|v| v.checked_add(TAGS_SIZE))
    .map(|v| v.max(MIN_BLOCK_SIZE))
}
