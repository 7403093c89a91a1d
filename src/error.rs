use std::fmt;

/// The heap-growth collaborator could not extend the managed region.
///
/// These are recoverable: the request that needed more memory does not
/// complete, but every block handed out earlier stays valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
  /// The fixed-capacity arena has no room left.
  Exhausted { requested: usize, available: usize },

  /// `sbrk(2)` refused to move the program break.
  Sbrk { requested: usize, errno: i32 },

  /// Somebody else moved the program break between two of our extensions,
  /// so the region is no longer contiguous.
  NonContiguous { expected: usize, found: usize },

  /// The request does not fit the address arithmetic.
  TooLarge(usize),
}

impl fmt::Display for AllocError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      AllocError::Exhausted {
        requested,
        available,
      } => write!(
        f,
        "heap exhausted: requested {requested} bytes, {available} available"
      ),
      AllocError::Sbrk { requested, errno } => {
        write!(f, "sbrk({requested}) failed with errno {errno}")
      }
      AllocError::NonContiguous { expected, found } => write!(
        f,
        "program break moved externally: expected {expected:#x}, found {found:#x}"
      ),
      AllocError::TooLarge(size) => write!(f, "request of {size} bytes is too large"),
    }
  }
}

impl std::error::Error for AllocError {}

/// A broken heap invariant.
///
/// Offsets are relative to the start of the managed region. A `Corruption`
/// is never recovered from inside the allocator: see [`fatal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Corruption {
  /// A tag word lies outside the managed region.
  OutOfBounds { offset: usize, len: usize },

  /// A size that is not a multiple of the alignment unit.
  Misaligned { block: usize, size: usize },

  /// A footer was requested on a block too small to have one.
  NoFooter { block: usize, size: usize },

  /// Header and footer disagree.
  TagMismatch {
    block: usize,
    header: u64,
    footer: u64,
  },

  /// A real block smaller than the minimum block size.
  Undersized { block: usize, size: usize },

  /// Free-list links were touched on an allocated block.
  LinksOnAllocated { block: usize },

  /// A free block that has no free-list entry.
  NotInFreeList { block: usize },

  /// An allocated block (or no block at all) still has a free-list entry.
  StaleLink { block: usize },

  /// Two free blocks next to each other.
  AdjacentFree { first: usize, second: usize },

  /// Forward and backward links disagree.
  BrokenLinks { block: usize },

  /// A prologue or epilogue that is not a minimal allocated block.
  BadSentinel { block: usize },

  /// The heap walk did not land exactly on the epilogue.
  BadEpilogue { expected: usize, found: usize },

  /// A payload handle that does not name an allocated block.
  InvalidPayload { payload: usize },
}

impl fmt::Display for Corruption {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      Corruption::OutOfBounds { offset, len } => {
        write!(f, "tag word at {offset:#x} outside heap of {len:#x} bytes")
      }
      Corruption::Misaligned { block, size } => {
        write!(f, "block {block:#x}: size {size} is not aligned")
      }
      Corruption::NoFooter { block, size } => {
        write!(f, "block {block:#x}: size {size} too small for a footer")
      }
      Corruption::TagMismatch {
        block,
        header,
        footer,
      } => write!(
        f,
        "block {block:#x}: header {header:#x} != footer {footer:#x}"
      ),
      Corruption::Undersized { block, size } => {
        write!(f, "block {block:#x}: size {size} below minimum block size")
      }
      Corruption::LinksOnAllocated { block } => {
        write!(f, "block {block:#x}: free-list links used on allocated block")
      }
      Corruption::NotInFreeList { block } => {
        write!(f, "block {block:#x}: free but not in the free list")
      }
      Corruption::StaleLink { block } => {
        write!(f, "block {block:#x}: in the free list but not free")
      }
      Corruption::AdjacentFree { first, second } => {
        write!(f, "adjacent free blocks {first:#x} and {second:#x}")
      }
      Corruption::BrokenLinks { block } => {
        write!(f, "block {block:#x}: forward and backward links disagree")
      }
      Corruption::BadSentinel { block } => {
        write!(f, "sentinel {block:#x} is damaged")
      }
      Corruption::BadEpilogue { expected, found } => write!(
        f,
        "heap walk ended at {found:#x}, epilogue is at {expected:#x}"
      ),
      Corruption::InvalidPayload { payload } => {
        write!(f, "{payload:#x} is not the payload of an allocated block")
      }
    }
  }
}

impl std::error::Error for Corruption {}

/// Halts on a broken invariant.
///
/// Continuing after a corruption would rewrite the tags of unrelated blocks,
/// so this logs and panics instead of returning.
#[cold]
#[track_caller]
pub fn fatal(corruption: Corruption) -> ! {
  log::error!("heap corruption: {corruption}");
  panic!("heap corruption: {corruption}");
}
