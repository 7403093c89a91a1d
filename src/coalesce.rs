use log::debug;

use crate::align::MIN_BLOCK_SIZE;
use crate::block::TagCodec;
use crate::error::{Corruption, fatal};
use crate::free_list::FreeList;

/// Carves an allocated block of exactly `size` bytes off the tail of `free`.
///
/// ```text
///   before:  ┌────────────────── free ──────────────────┐
///   after:   ┌──────── free ────────┬──── allocated ────┐
///                                   ▲
///                                   returned
/// ```
///
/// `free` shrinks in place and keeps whatever free-list membership it had.
pub(crate) fn split(
  bytes: &mut [u8],
  free: usize,
  size: usize,
) -> usize {
  let total = bytes.size(free);
  let remainder = total.saturating_sub(size);
  if remainder < MIN_BLOCK_SIZE {
    fatal(Corruption::Undersized {
      block: free,
      size: remainder,
    });
  }

  bytes.set_size(free, remainder);
  let block = bytes.next(free);
  bytes.set_size_and_allocated(block, size, true);

  debug!("split {free:#x} ({total}) -> free {remainder} + allocated {block:#x} ({size})");
  block
}

/// Merges a free block that is not on the list with its free neighbours and
/// puts the survivor on the list.
///
/// The survivor is `block` unless the previous neighbour was free, in which
/// case it absorbs `block` and keeps its own offset.
pub(crate) fn coalesce(
  bytes: &mut [u8],
  list: &mut FreeList,
  block: usize,
) -> usize {
  let mut block = block;

  if !bytes.next_allocated(block) {
    let next = bytes.next(block);
    list.remove(bytes, next);
    let size = bytes.size(block) + bytes.size(next);
    bytes.set_size_and_allocated(block, size, false);
    debug!("merged {next:#x} into {block:#x} -> {size}");
  }

  let prev = bytes.prev(block);
  if prev != block && !bytes.allocated(prev) {
    list.remove(bytes, prev);
    let size = bytes.size(prev) + bytes.size(block);
    bytes.set_size_and_allocated(prev, size, false);
    debug!("merged {block:#x} into {prev:#x} -> {size}");
    block = prev;
  }

  list.insert(bytes, block);
  block
}
