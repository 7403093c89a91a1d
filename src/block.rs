//! Boundary tags.
//!
//! ```text
//!   ┌──────────┬──────────────────────────────┬──────────┐
//!   │  header  │           payload            │  footer  │
//!   │ size | a │                              │ size | a │
//!   └──────────┴──────────────────────────────┴──────────┘
//!   ▲          ▲                                         ▲
//!   block      payload = block + WORD_SIZE               next block
//! ```
//!
//! Both tag words hold the total block size with the allocated flag in bit 0.
//! Sizes are multiples of [`ALIGNMENT`], so bit 0 is always free for the flag.

use crate::align::{ALIGNMENT, TAGS_SIZE, WORD_SIZE};
use crate::error::{Corruption, fatal};

const ALLOCATED: u64 = 1;

/// A block as seen from the outside: either handed out, or threaded on the
/// free list with its two links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Block {
  Allocated { size: usize },
  Free { size: usize, next: usize, prev: usize },
}

impl Block {
  pub fn size(&self) -> usize {
    match *self {
      Block::Allocated { size } | Block::Free { size, .. } => size,
    }
  }

  pub fn is_free(&self) -> bool {
    matches!(self, Block::Free { .. })
  }
}

pub(crate) fn pack(
  size: usize,
  allocated: bool,
) -> u64 {
  size as u64 | if allocated { ALLOCATED } else { 0 }
}

pub(crate) fn unpack(word: u64) -> (usize, bool) {
  ((word & !ALLOCATED) as usize, word & ALLOCATED == ALLOCATED)
}

pub(crate) fn payload_to_block(payload: usize) -> usize {
  payload - WORD_SIZE
}

pub(crate) fn block_to_payload(block: usize) -> usize {
  block + WORD_SIZE
}

/// Reads and writes boundary tags inside the managed region.
///
/// Every offset is a block offset into the region. Out-of-range words and
/// malformed sizes are corruption, never a recoverable error.
pub(crate) trait TagCodec {
  fn word(
    &self,
    offset: usize,
  ) -> u64;

  fn set_word(
    &mut self,
    offset: usize,
    word: u64,
  );

  fn size(
    &self,
    block: usize,
  ) -> usize {
    unpack(self.word(block)).0
  }

  fn allocated(
    &self,
    block: usize,
  ) -> bool {
    unpack(self.word(block)).1
  }

  /// Offset of the footer word.
  fn end_tag(
    &self,
    block: usize,
  ) -> usize {
    let size = self.size(block);
    if size < TAGS_SIZE {
      fatal(Corruption::NoFooter { block, size });
    }
    block + size - WORD_SIZE
  }

  fn end_size(
    &self,
    block: usize,
  ) -> usize {
    unpack(self.word(self.end_tag(block))).0
  }

  fn end_allocated(
    &self,
    block: usize,
  ) -> bool {
    unpack(self.word(self.end_tag(block))).1
  }

  /// Writes `size` to both tags, keeping the allocated flag.
  fn set_size(
    &mut self,
    block: usize,
    size: usize,
  ) {
    if size & (ALIGNMENT - 1) != 0 {
      fatal(Corruption::Misaligned { block, size });
    }
    if size < TAGS_SIZE {
      fatal(Corruption::NoFooter { block, size });
    }
    let word = pack(size, self.allocated(block));
    self.set_word(block, word);
    self.set_word(block + size - WORD_SIZE, word);
  }

  fn set_allocated(
    &mut self,
    block: usize,
    allocated: bool,
  ) {
    let end = self.end_tag(block);
    let word = pack(self.size(block), allocated);
    self.set_word(block, word);
    self.set_word(end, word);
  }

  fn set_size_and_allocated(
    &mut self,
    block: usize,
    size: usize,
    allocated: bool,
  ) {
    self.set_size(block, size);
    self.set_allocated(block, allocated);
  }

  /// Size of the block that ends right before `block`, taken from its
  /// footer. Zero at the very start of the region.
  fn prev_size(
    &self,
    block: usize,
  ) -> usize {
    if block < WORD_SIZE {
      return 0;
    }
    unpack(self.word(block - WORD_SIZE)).0
  }

  fn prev_allocated(
    &self,
    block: usize,
  ) -> bool {
    if block < WORD_SIZE {
      return true;
    }
    unpack(self.word(block - WORD_SIZE)).1
  }

  /// The previous block, or `block` itself when there is none.
  fn prev(
    &self,
    block: usize,
  ) -> usize {
    block - self.prev_size(block)
  }

  fn next(
    &self,
    block: usize,
  ) -> usize {
    block + self.size(block)
  }

  fn next_allocated(
    &self,
    block: usize,
  ) -> bool {
    self.allocated(self.next(block))
  }

  fn next_size(
    &self,
    block: usize,
  ) -> usize {
    self.size(self.next(block))
  }
}

impl TagCodec for [u8] {
  fn word(
    &self,
    offset: usize,
  ) -> u64 {
    match offset
      .checked_add(WORD_SIZE)
      .and_then(|end| self.get(offset..end))
    {
      Some(bytes) => {
        let mut raw = [0u8; WORD_SIZE];
        raw.copy_from_slice(bytes);
        u64::from_ne_bytes(raw)
      }
      None => fatal(Corruption::OutOfBounds {
        offset,
        len: self.len(),
      }),
    }
  }

  fn set_word(
    &mut self,
    offset: usize,
    word: u64,
  ) {
    let len = self.len();
    match offset
      .checked_add(WORD_SIZE)
      .and_then(|end| self.get_mut(offset..end))
    {
      Some(bytes) => bytes.copy_from_slice(&word.to_ne_bytes()),
      None => fatal(Corruption::OutOfBounds { offset, len }),
    }
  }
}
