//! Where the managed region comes from.
//!
//! ```text
//!   ┌─────────────────────────────────────────┬──────────────┐
//!   │              managed region             │   reserve    │
//!   └─────────────────────────────────────────┴──────────────┘
//!   ▲                                         ▲
//!   base                                      break: sbrk(n) moves it
//!                                             right by n and returns
//!                                             its old offset
//! ```

use std::{io, ptr, slice};

use libc::{c_void, intptr_t};

use crate::{align, align::WORD_SIZE, error::AllocError};

/// Default capacity of an [`ArenaHeap`]: 20 MiB.
pub const DEFAULT_ARENA_CAPACITY: usize = 20 * (1 << 20);

/// A contiguous region that can only grow at its end.
///
/// The allocator addresses the region by offset. Implementations must never
/// move bytes already handed out, and `base()` must be aligned to
/// [`ALIGNMENT`](crate::align::ALIGNMENT).
pub trait HeapGrower {
  /// Extends the region by `increment` bytes and returns the old end offset.
  fn sbrk(
    &mut self,
    increment: usize,
  ) -> Result<usize, AllocError>;

  /// The whole region, from offset 0 to the current break.
  fn bytes(&self) -> &[u8];

  fn bytes_mut(&mut self) -> &mut [u8];

  /// Absolute address of offset 0.
  fn base(&self) -> *const u8 {
    self.bytes().as_ptr()
  }

  fn len(&self) -> usize {
    self.bytes().len()
  }
}

/// A fixed reservation inside the process, grown one break at a time.
///
/// Backed by `u64` words so the base is 8-byte aligned, and never
/// reallocated so offsets stay at the same address for its whole life.
pub struct ArenaHeap {
  words: Box<[u64]>,
  brk: usize,
}

impl ArenaHeap {
  pub fn with_capacity(capacity: usize) -> Self {
    let words = vec![0u64; capacity.div_ceil(WORD_SIZE)].into_boxed_slice();
    Self { words, brk: 0 }
  }

  pub fn capacity(&self) -> usize {
    self.words.len() * WORD_SIZE
  }
}

impl Default for ArenaHeap {
  fn default() -> Self {
    Self::with_capacity(DEFAULT_ARENA_CAPACITY)
  }
}

impl HeapGrower for ArenaHeap {
  fn sbrk(
    &mut self,
    increment: usize,
  ) -> Result<usize, AllocError> {
    let available = self.capacity() - self.brk;
    if increment > available {
      return Err(AllocError::Exhausted {
        requested: increment,
        available,
      });
    }
    let old = self.brk;
    self.brk += increment;
    Ok(old)
  }

  fn bytes(&self) -> &[u8] {
    // SAFETY: `brk <= capacity()`, the words are initialised, and any bit
    // pattern is a valid `u8`.
    unsafe { slice::from_raw_parts(self.words.as_ptr().cast::<u8>(), self.brk) }
  }

  fn bytes_mut(&mut self) -> &mut [u8] {
    // SAFETY: as in `bytes`, and `&mut self` makes the view unique.
    unsafe { slice::from_raw_parts_mut(self.words.as_mut_ptr().cast::<u8>(), self.brk) }
  }
}

/// The process data segment, extended with `sbrk(2)`.
///
/// The first extension pads the break up to the alignment unit. Every later
/// extension must start exactly where the previous one ended; if anything
/// else moved the break in between, the extension is refused.
pub struct SbrkHeap {
  start: *mut u8,
  len: usize,
}

impl SbrkHeap {
  pub fn new() -> Self {
    Self {
      start: ptr::null_mut(),
      len: 0,
    }
  }

  /// Current program break, `sbrk(0)`.
  pub fn program_break() -> *mut c_void {
    unsafe { libc::sbrk(0) }
  }

  fn failed(result: *mut c_void) -> bool {
    result == usize::MAX as *mut c_void
  }

  fn errno() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(0)
  }
}

impl Default for SbrkHeap {
  fn default() -> Self {
    Self::new()
  }
}

impl HeapGrower for SbrkHeap {
  fn sbrk(
    &mut self,
    increment: usize,
  ) -> Result<usize, AllocError> {
    let delta: intptr_t = increment
      .try_into()
      .map_err(|_| AllocError::TooLarge(increment))?;

    unsafe {
      if self.start.is_null() {
        let current = libc::sbrk(0);
        if Self::failed(current) {
          return Err(AllocError::Sbrk {
            requested: increment,
            errno: Self::errno(),
          });
        }

        let pad = align!(current as usize) - current as usize;
        let total = delta
          .checked_add(pad as intptr_t)
          .ok_or(AllocError::TooLarge(increment))?;

        let old = libc::sbrk(total);
        if Self::failed(old) {
          return Err(AllocError::Sbrk {
            requested: increment,
            errno: Self::errno(),
          });
        }
        if old != current {
          return Err(AllocError::NonContiguous {
            expected: current as usize,
            found: old as usize,
          });
        }

        self.start = old.cast::<u8>().add(pad);
        self.len = increment;
        return Ok(0);
      }

      let expected = self.start.add(self.len);
      let old = libc::sbrk(delta);
      if Self::failed(old) {
        return Err(AllocError::Sbrk {
          requested: increment,
          errno: Self::errno(),
        });
      }
      if old.cast::<u8>() != expected {
        return Err(AllocError::NonContiguous {
          expected: expected as usize,
          found: old as usize,
        });
      }
    }

    let old = self.len;
    self.len += increment;
    Ok(old)
  }

  fn bytes(&self) -> &[u8] {
    if self.start.is_null() {
      return &[];
    }
    // SAFETY: `[start, start + len)` was mapped by our own `sbrk` calls and
    // is only reachable through this value.
    unsafe { slice::from_raw_parts(self.start, self.len) }
  }

  fn bytes_mut(&mut self) -> &mut [u8] {
    if self.start.is_null() {
      return &mut [];
    }
    // SAFETY: as in `bytes`, and `&mut self` makes the view unique.
    unsafe { slice::from_raw_parts_mut(self.start, self.len) }
  }
}
