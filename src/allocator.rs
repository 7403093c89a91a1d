use log::{debug, trace, warn};

use crate::{
  align::{ALIGNMENT, MIN_BLOCK_SIZE, TAGS_SIZE, WORD_SIZE, block_size_for},
  block::{Block, TagCodec, block_to_payload, payload_to_block, unpack},
  coalesce::{coalesce, split},
  config::Config,
  error::{AllocError, Corruption, fatal},
  free_list::FreeList,
  heap::HeapGrower,
};

/// Handle to the usable bytes of an allocated block.
///
/// It is the payload's offset inside the managed region; use
/// [`Allocator::payload`] / [`Allocator::payload_mut`] to reach the bytes or
/// [`Allocator::as_ptr`] for the absolute address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Payload(usize);

impl Payload {
  pub fn offset(&self) -> usize {
    self.0
  }
}

/// Boundary-tag allocator with an explicit, circular free list.
///
/// ```text
///   ┌──────────┬─────────┬─────────┬─────────┬───────┬──────────┐
///   │ prologue │  alloc  │  free   │  alloc  │  ...  │ epilogue │
///   └──────────┴─────────┴────┬────┴─────────┴───────┴──────────┘
///                             │           ▲
///                             └─ free list┘ (circular, MRU first)
/// ```
///
/// All state lives here; nothing is global. Calls take `&mut self`, so a
/// multi-threaded user must put the whole allocator behind one lock.
pub struct Allocator<H: HeapGrower> {
  pub(crate) heap: H,
  pub(crate) free: FreeList,
  pub(crate) prologue: usize,
  pub(crate) epilogue: usize,
  pub(crate) config: Config,
}

impl<H: HeapGrower> Allocator<H> {
  /// Lays down the prologue and epilogue sentinels with the default config.
  pub fn init(heap: H) -> Result<Self, AllocError> {
    Self::init_with(heap, Config::default())
  }

  pub fn init_with(
    mut heap: H,
    config: Config,
  ) -> Result<Self, AllocError> {
    let prologue = heap.sbrk(TAGS_SIZE)?;
    heap
      .bytes_mut()
      .set_size_and_allocated(prologue, TAGS_SIZE, true);

    let epilogue = heap.sbrk(TAGS_SIZE)?;
    heap
      .bytes_mut()
      .set_size_and_allocated(epilogue, TAGS_SIZE, true);

    debug!("init: prologue at {prologue:#x}, epilogue at {epilogue:#x}");

    Ok(Self {
      heap,
      free: FreeList::new(),
      prologue,
      epilogue,
      config,
    })
  }

  /// Returns `None` for a zero-byte request or when the heap cannot grow.
  pub fn malloc(
    &mut self,
    size: usize,
  ) -> Option<Payload> {
    trace!("malloc({size})");
    if size == 0 {
      return None;
    }

    let Some(needed) = block_size_for(size) else {
      warn!("malloc({size}): {}", AllocError::TooLarge(size));
      return None;
    };

    let block = match self.find_fit(needed) {
      Some(block) => block,
      None => match self.extend(needed) {
        Ok(block) => block,
        Err(e) => {
          warn!("malloc({size}): {e}");
          return None;
        }
      },
    };

    self.audit();
    Some(Payload(block_to_payload(block)))
  }

  /// First fit, starting at the most recently freed block.
  fn find_fit(
    &mut self,
    size: usize,
  ) -> Option<usize> {
    let first = self.free.first()?;
    let bytes = self.heap.bytes_mut();
    let mut current = first;

    loop {
      let available = bytes.size(current);

      if available >= size && available - size >= MIN_BLOCK_SIZE {
        return Some(split(bytes, current, size));
      }

      if available >= size {
        self.free.remove(bytes, current);
        bytes.set_allocated(current, true);
        return Some(current);
      }

      current = self.free.next(bytes, current);
      if current == first {
        return None;
      }
    }
  }

  /// Grows the heap and returns an allocated block of exactly `size` bytes,
  /// or of the whole growth when the leftover could not stand alone.
  fn extend(
    &mut self,
    size: usize,
  ) -> Result<usize, AllocError> {
    let grow = size.max(self.config.growth_chunk());
    let old_end = self.heap.sbrk(grow)?;
    if old_end != self.epilogue + TAGS_SIZE {
      fatal(Corruption::BadEpilogue {
        expected: self.epilogue + TAGS_SIZE,
        found: old_end,
      });
    }

    let bytes = self.heap.bytes_mut();
    let region = self.epilogue;
    bytes.set_size_and_allocated(region, grow, true);
    self.epilogue = bytes.next(region);
    bytes.set_size_and_allocated(self.epilogue, TAGS_SIZE, true);
    debug!("grew heap by {grow} at {region:#x}, epilogue now at {:#x}", self.epilogue);

    if grow - size < MIN_BLOCK_SIZE {
      return Ok(region);
    }

    bytes.set_allocated(region, false);
    let block = split(bytes, region, size);
    coalesce(bytes, &mut self.free, region);
    Ok(block)
  }

  /// Releases a block. `None` is ignored.
  ///
  /// Freeing anything that is not a live allocation is fatal.
  pub fn free(
    &mut self,
    payload: Option<Payload>,
  ) {
    let Some(payload) = payload else {
      return;
    };
    trace!("free({:#x})", payload.0);

    let block = self.block_of(payload);
    let bytes = self.heap.bytes_mut();
    bytes.set_allocated(block, false);

    if bytes.prev_allocated(block) && bytes.next_allocated(block) {
      self.free.insert(bytes, block);
    } else {
      coalesce(bytes, &mut self.free, block);
    }

    self.audit();
  }

  /// Resizes an allocation, in place when the neighbours allow it.
  ///
  /// `None` behaves like [`malloc`](Self::malloc) and a zero size like
  /// [`free`](Self::free). When the block has to move and no memory is left,
  /// returns `None` and the original allocation stays valid.
  pub fn realloc(
    &mut self,
    payload: Option<Payload>,
    size: usize,
  ) -> Option<Payload> {
    let Some(payload) = payload else {
      return self.malloc(size);
    };
    trace!("realloc({:#x}, {size})", payload.0);

    if size == 0 {
      self.free(Some(payload));
      return None;
    }

    let block = self.block_of(payload);
    let Some(needed) = block_size_for(size) else {
      warn!("realloc({:#x}, {size}): {}", payload.0, AllocError::TooLarge(size));
      return None;
    };
    let current = self.heap.bytes().size(block);

    let result = if needed <= current {
      self.shrink(block, current, needed);
      Some(payload)
    } else if let Some(block) = self.grow_in_place(block, current, needed) {
      Some(Payload(block_to_payload(block)))
    } else {
      self.relocate(payload, size)
    };

    self.audit();
    result
  }

  fn shrink(
    &mut self,
    block: usize,
    current: usize,
    needed: usize,
  ) {
    if current - needed < MIN_BLOCK_SIZE {
      return;
    }

    let bytes = self.heap.bytes_mut();
    bytes.set_size(block, needed);
    let rest = bytes.next(block);
    bytes.set_size_and_allocated(rest, current - needed, false);
    debug!("shrunk {block:#x} to {needed}, released {}", current - needed);
    coalesce(bytes, &mut self.free, rest);
  }

  /// Tries the following block, then the preceding one, then both.
  fn grow_in_place(
    &mut self,
    block: usize,
    current: usize,
    needed: usize,
  ) -> Option<usize> {
    let bytes = self.heap.bytes_mut();
    let next = bytes.next(block);
    let prev = bytes.prev(block);
    let next_size = if bytes.allocated(next) { None } else { Some(bytes.next_size(block)) };
    let prev_size = if prev == block || bytes.allocated(prev) {
      None
    } else {
      Some(bytes.size(prev))
    };

    if let Some(next_size) = next_size {
      let total = current + next_size;
      if total >= needed {
        self.free.remove(bytes, next);
        if total - needed >= MIN_BLOCK_SIZE {
          bytes.set_size(block, needed);
          let rest = bytes.next(block);
          bytes.set_size_and_allocated(rest, total - needed, false);
          self.free.insert(bytes, rest);
        } else {
          bytes.set_size(block, total);
        }
        debug!("grew {block:#x} forward to {}", bytes.size(block));
        return Some(block);
      }
    }

    if let Some(prev_size) = prev_size {
      let total = prev_size + current;
      if total >= needed {
        return Some(self.slide_back(prev, block, current, total, needed));
      }
    }

    if let (Some(next_size), Some(prev_size)) = (next_size, prev_size) {
      let total = prev_size + current + next_size;
      if total >= needed {
        let bytes = self.heap.bytes_mut();
        self.free.remove(bytes, next);
        return Some(self.slide_back(prev, block, current, total, needed));
      }
    }

    None
  }

  /// Rebuilds `block` inside the `total` bytes that start at the free block
  /// `prev`, moving the payload to the new position.
  ///
  /// Any block after `block` that is part of `total` must already be off
  /// the free list.
  fn slide_back(
    &mut self,
    prev: usize,
    block: usize,
    current: usize,
    total: usize,
    needed: usize,
  ) -> usize {
    let bytes = self.heap.bytes_mut();
    let remainder = total - needed;
    let split = remainder >= MIN_BLOCK_SIZE;
    let (moved, moved_size) = if split { (prev + remainder, needed) } else { (prev, total) };

    // The new tags can land inside the old payload, so copy before writing them.
    let len = (current - TAGS_SIZE).min(moved_size - TAGS_SIZE);
    let from = block_to_payload(block);
    bytes.copy_within(from..from + len, block_to_payload(moved));

    if split {
      bytes.set_size(prev, remainder);
    } else {
      self.free.remove(bytes, prev);
    }
    bytes.set_size_and_allocated(moved, moved_size, true);
    debug!("moved {block:#x} back to {moved:#x}, copied {len} bytes");
    moved
  }

  fn relocate(
    &mut self,
    payload: Payload,
    size: usize,
  ) -> Option<Payload> {
    let moved = self.malloc(size)?;

    let old_len = self.usable_size(payload);
    let len = old_len.min(self.usable_size(moved));
    self
      .heap
      .bytes_mut()
      .copy_within(payload.0..payload.0 + len, moved.0);
    debug!("relocated {:#x} to {:#x}, copied {len} bytes", payload.0, moved.0);

    self.free(Some(payload));
    Some(moved)
  }

  /// The allocated block owning `payload`. Fatal for anything else.
  fn block_of(
    &self,
    payload: Payload,
  ) -> usize {
    let invalid = Corruption::InvalidPayload { payload: payload.0 };
    let bytes = self.heap.bytes();

    if payload.0 < WORD_SIZE || payload.0 % ALIGNMENT != 0 {
      fatal(invalid);
    }
    let block = payload_to_block(payload.0);
    if block <= self.prologue || block >= self.epilogue {
      fatal(invalid);
    }

    let (size, allocated) = unpack(bytes.word(block));
    if !allocated || size < MIN_BLOCK_SIZE || block + size > self.epilogue {
      fatal(invalid);
    }
    if bytes.end_size(block) != size || !bytes.end_allocated(block) {
      fatal(invalid);
    }
    block
  }

  fn audit(&self) {
    if !self.config.paranoid() {
      return;
    }
    if let Err(corruption) = self.check() {
      fatal(corruption);
    }
  }

  /// Bytes the caller may use, at least the size asked for.
  pub fn usable_size(
    &self,
    payload: Payload,
  ) -> usize {
    let block = self.block_of(payload);
    self.heap.bytes().size(block) - TAGS_SIZE
  }

  pub fn payload(
    &self,
    payload: Payload,
  ) -> &[u8] {
    let len = self.usable_size(payload);
    &self.heap.bytes()[payload.0..payload.0 + len]
  }

  pub fn payload_mut(
    &mut self,
    payload: Payload,
  ) -> &mut [u8] {
    let len = self.usable_size(payload);
    &mut self.heap.bytes_mut()[payload.0..payload.0 + len]
  }

  /// Absolute address of the payload, aligned to [`ALIGNMENT`].
  pub fn as_ptr(
    &self,
    payload: Payload,
  ) -> *const u8 {
    self.heap.base().wrapping_add(payload.0)
  }

  /// The block at `offset`, with its links if it is free.
  pub fn block(
    &self,
    offset: usize,
  ) -> Block {
    let bytes = self.heap.bytes();
    let size = bytes.size(offset);
    if bytes.allocated(offset) {
      return Block::Allocated { size };
    }
    match self.free.links(offset) {
      Some(links) => Block::Free {
        size,
        next: links.next,
        prev: links.prev,
      },
      None => fatal(Corruption::NotInFreeList { block: offset }),
    }
  }

  pub fn heap_size(&self) -> usize {
    self.heap.len()
  }

  pub fn free_list_len(&self) -> usize {
    self.free.len()
  }

  pub fn heap(&self) -> &H {
    &self.heap
  }

  pub fn config(&self) -> &Config {
    &self.config
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  use test_env_log::test;

  use crate::heap::ArenaHeap;

  fn allocator() -> Allocator<ArenaHeap> {
    Allocator::init_with(ArenaHeap::default(), Config::default().with_paranoid(true)).unwrap()
  }

  fn fill(
    alloc: &mut Allocator<ArenaHeap>,
    payload: Payload,
    seed: u8,
  ) {
    for (i, byte) in alloc.payload_mut(payload).iter_mut().enumerate() {
      *byte = seed.wrapping_add(i as u8);
    }
  }

  fn holds(
    alloc: &Allocator<ArenaHeap>,
    payload: Payload,
    seed: u8,
    len: usize,
  ) -> bool {
    alloc.payload(payload)[..len]
      .iter()
      .enumerate()
      .all(|(i, byte)| *byte == seed.wrapping_add(i as u8))
  }

  fn free_blocks(alloc: &Allocator<ArenaHeap>) -> Vec<(usize, usize)> {
    alloc
      .blocks()
      .filter(|(_, block)| block.is_free())
      .map(|(offset, block)| (offset, block.size()))
      .collect()
  }

  #[test]
  fn test_init_lays_down_sentinels() {
    let alloc = allocator();
    assert_eq!(alloc.heap_size(), 2 * TAGS_SIZE);
    assert_eq!(alloc.free_list_len(), 0);
    assert_eq!(alloc.blocks().count(), 0);
    alloc.check().unwrap();
  }

  #[test]
  fn test_init_fails_without_room() {
    let result = Allocator::init(ArenaHeap::with_capacity(TAGS_SIZE));
    assert_eq!(
      result.err(),
      Some(AllocError::Exhausted {
        requested: TAGS_SIZE,
        available: 0
      })
    );
  }

  #[test]
  fn test_reuse_of_freed_block() {
    let mut alloc = allocator();
    let p1 = alloc.malloc(16).unwrap();
    let p2 = alloc.malloc(32).unwrap();
    assert_ne!(p1, p2);

    let (lo, hi) = if p1 < p2 { (p1, p2) } else { (p2, p1) };
    assert!(lo.offset() + alloc.usable_size(lo) < hi.offset());

    alloc.free(Some(p1));
    let grown = alloc.heap_size();
    assert_eq!(alloc.malloc(16), Some(p1));
    assert_eq!(alloc.heap_size(), grown);
  }

  #[test]
  fn test_neighbours_merge_on_free() {
    let mut alloc = allocator();
    let p1 = alloc.malloc(16).unwrap();
    let p2 = alloc.malloc(16).unwrap();
    let size = alloc.heap_size();

    alloc.free(Some(p1));
    alloc.free(Some(p2));

    let free = free_blocks(&alloc);
    assert_eq!(free.len(), 1);
    let (_, merged) = free[0];
    assert!(merged >= 2 * MIN_BLOCK_SIZE);
    assert_eq!(alloc.free_list_len(), 1);

    let big = alloc.malloc(merged - TAGS_SIZE);
    assert!(big.is_some());
    assert_eq!(alloc.heap_size(), size);
    assert_eq!(alloc.free_list_len(), 0);
  }

  #[test]
  fn test_zero_malloc_changes_nothing() {
    let mut alloc = allocator();
    let mut twin = allocator();

    assert_eq!(alloc.malloc(0), None);
    assert_eq!(alloc.heap_size(), 2 * TAGS_SIZE);
    assert_eq!(alloc.free_list_len(), 0);

    assert_eq!(alloc.malloc(8), twin.malloc(8));
    assert_eq!(alloc.stats(), twin.stats());
  }

  #[test]
  fn test_realloc_edge_cases() {
    let mut alloc = allocator();
    let mut twin = allocator();

    let p = alloc.realloc(None, 24);
    assert_eq!(p, twin.malloc(24));
    assert_eq!(alloc.stats(), twin.stats());

    assert_eq!(alloc.realloc(p, 0), None);
    twin.free(p);
    assert_eq!(alloc.stats(), twin.stats());
    assert_eq!(alloc.blocks().collect::<Vec<_>>(), twin.blocks().collect::<Vec<_>>());
  }

  #[test]
  fn test_free_none_is_noop() {
    let mut alloc = allocator();
    let p = alloc.malloc(40);
    let before = alloc.stats();
    alloc.free(None);
    assert_eq!(alloc.stats(), before);
    assert!(p.is_some());
  }

  #[test]
  fn test_round_trip() {
    let mut alloc = allocator();
    let _guard = alloc.malloc(8).unwrap();

    for n in [1, 7, 8, 24, 100, 1000] {
      let p = alloc.malloc(n).unwrap();
      fill(&mut alloc, p, 3);
      alloc.free(Some(p));

      let q = alloc.malloc(n).unwrap();
      assert!(alloc.usable_size(q) >= n);
      alloc.payload_mut(q)[..n].fill(0xEE);
      alloc.check().unwrap();
      alloc.free(Some(q));
    }
  }

  #[test]
  fn test_payloads_are_aligned() {
    let mut alloc = allocator();
    for n in 1..64 {
      let p = alloc.malloc(n).unwrap();
      assert_eq!(alloc.as_ptr(p) as usize % ALIGNMENT, 0);
      assert!(alloc.usable_size(p) >= n);
    }
  }

  #[test]
  fn test_realloc_same_size_keeps_everything() {
    let mut alloc = allocator();
    let p = alloc.malloc(24).unwrap();
    fill(&mut alloc, p, 9);
    let usable = alloc.usable_size(p);
    let before = alloc.stats();

    assert_eq!(alloc.realloc(Some(p), usable), Some(p));
    assert!(holds(&alloc, p, 9, usable));
    assert_eq!(alloc.stats(), before);
  }

  #[test]
  fn test_realloc_shrink_splits_tail() {
    let mut alloc = allocator();
    let p = alloc.malloc(200).unwrap();
    fill(&mut alloc, p, 1);
    let free_before = alloc.free_list_len();

    assert_eq!(alloc.realloc(Some(p), 16), Some(p));
    assert_eq!(alloc.usable_size(p), 16);
    assert!(holds(&alloc, p, 1, 16));
    assert_eq!(alloc.free_list_len(), free_before + 1);
  }

  #[test]
  fn test_realloc_shrink_merges_with_free_follower() {
    let mut alloc = allocator();
    let a = alloc.malloc(16).unwrap();
    let p = alloc.malloc(200).unwrap();
    assert!(p < a);
    alloc.free(Some(a));
    let free_before = alloc.free_list_len();

    assert_eq!(alloc.realloc(Some(p), 16), Some(p));
    assert_eq!(alloc.free_list_len(), free_before);
    alloc.check().unwrap();
  }

  #[test]
  fn test_realloc_small_shrink_is_noop() {
    let mut alloc = allocator();
    let p = alloc.malloc(40).unwrap();
    let before = alloc.stats();
    assert_eq!(alloc.realloc(Some(p), 30), Some(p));
    assert_eq!(alloc.usable_size(p), 40);
    assert_eq!(alloc.stats(), before);
  }

  #[test]
  fn test_realloc_absorbs_next_whole() {
    let mut alloc = allocator();
    let _p1 = alloc.malloc(16).unwrap();
    let p2 = alloc.malloc(16).unwrap();
    let p3 = alloc.malloc(16).unwrap();
    fill(&mut alloc, p3, 5);
    alloc.free(Some(p2));

    assert_eq!(alloc.realloc(Some(p3), 40), Some(p3));
    assert_eq!(alloc.usable_size(p3), 48);
    assert!(holds(&alloc, p3, 5, 16));
  }

  #[test]
  fn test_realloc_absorbs_next_and_splits() {
    let mut alloc = allocator();
    let p1 = alloc.malloc(16).unwrap();
    let p2 = alloc.malloc(16).unwrap();
    let p3 = alloc.malloc(16).unwrap();
    fill(&mut alloc, p3, 5);
    alloc.free(Some(p1));
    alloc.free(Some(p2));
    let free_before = alloc.free_list_len();

    assert_eq!(alloc.realloc(Some(p3), 24), Some(p3));
    assert_eq!(alloc.usable_size(p3), 24);
    assert!(holds(&alloc, p3, 5, 16));
    assert_eq!(alloc.free_list_len(), free_before);
    assert!(free_blocks(&alloc).contains(&(payload_to_block(p3.offset()) + 40, 56)));
  }

  #[test]
  fn test_realloc_moves_into_prev_with_split() {
    let mut alloc = allocator();
    let _p1 = alloc.malloc(16).unwrap();
    let _p2 = alloc.malloc(16).unwrap();
    let p3 = alloc.malloc(16).unwrap();
    fill(&mut alloc, p3, 11);

    let moved = alloc.realloc(Some(p3), 64).unwrap();
    assert!(moved < p3);
    assert_eq!(alloc.usable_size(moved), 64);
    assert!(holds(&alloc, moved, 11, 16));
    assert_eq!(alloc.free_list_len(), 1);
  }

  #[test]
  fn test_realloc_moves_into_prev_whole() {
    let mut alloc = allocator();
    let _a = alloc.malloc(16).unwrap();
    let b = alloc.malloc(16).unwrap();
    let c = alloc.malloc(16).unwrap();
    let _d = alloc.malloc(16).unwrap();
    fill(&mut alloc, b, 21);
    alloc.free(Some(c));

    let moved = alloc.realloc(Some(b), 40).unwrap();
    assert_eq!(moved, c);
    assert_eq!(alloc.usable_size(moved), 48);
    assert!(holds(&alloc, moved, 21, 16));
  }

  #[test]
  fn test_realloc_moves_across_both_neighbours() {
    let mut alloc = allocator();
    let _a = alloc.malloc(16).unwrap();
    let b = alloc.malloc(16).unwrap();
    let c = alloc.malloc(16).unwrap();
    let d = alloc.malloc(16).unwrap();
    let _e = alloc.malloc(16).unwrap();
    fill(&mut alloc, c, 31);
    alloc.free(Some(b));
    alloc.free(Some(d));
    let free_before = alloc.free_list_len();

    let moved = alloc.realloc(Some(c), 64).unwrap();
    assert_eq!(moved, d);
    assert_eq!(alloc.usable_size(moved), 80);
    assert!(holds(&alloc, moved, 31, 16));
    assert_eq!(alloc.free_list_len(), free_before - 2);
  }

  #[test]
  fn test_realloc_grows_heap_when_needed() {
    let mut alloc = allocator();
    let a = alloc.malloc(16).unwrap();
    let _b = alloc.malloc(16).unwrap();
    fill(&mut alloc, a, 41);
    let size = alloc.heap_size();

    let moved = alloc.realloc(Some(a), 1000).unwrap();
    assert_ne!(moved, a);
    assert!(alloc.heap_size() > size);
    assert!(alloc.usable_size(moved) >= 1000);
    assert!(holds(&alloc, moved, 41, 16));
  }

  #[test]
  fn test_growth_merges_with_trailing_free_block() {
    let config = Config::default().with_growth_chunk(1024).with_paranoid(true);
    let mut alloc = Allocator::init_with(ArenaHeap::default(), config).unwrap();

    let a = alloc.malloc(16).unwrap();
    let _b = alloc.malloc(900).unwrap();
    alloc.free(Some(a));
    let tail = payload_to_block(a.offset());

    let c = alloc.malloc(100).unwrap();
    assert!(c > a);
    assert!(free_blocks(&alloc).contains(&(tail, 32 + 1024 - 120)));
  }

  #[test]
  fn test_exhaustion_leaves_heap_intact() {
    let mut alloc =
      Allocator::init_with(ArenaHeap::with_capacity(1024), Config::default().with_paranoid(true))
        .unwrap();

    let a = alloc.malloc(600).unwrap();
    fill(&mut alloc, a, 51);
    let size = alloc.heap_size();

    assert_eq!(alloc.malloc(600), None);
    assert_eq!(alloc.heap_size(), size);

    assert_eq!(alloc.realloc(Some(a), 2000), None);
    assert!(holds(&alloc, a, 51, 600));
    alloc.check().unwrap();

    assert_eq!(alloc.malloc(usize::MAX), None);
  }

  #[test]
  #[should_panic(expected = "not the payload of an allocated block")]
  fn test_double_free_is_fatal() {
    let mut alloc = allocator();
    let p = alloc.malloc(16);
    alloc.free(p);
    alloc.free(p);
  }

  #[test]
  #[should_panic(expected = "not the payload of an allocated block")]
  fn test_foreign_payload_is_fatal() {
    let mut alloc = allocator();
    let _p = alloc.malloc(16);
    alloc.free(Some(Payload(12)));
  }

  #[test]
  fn test_mixed_workload_keeps_invariants() {
    let mut alloc = allocator();
    let mut live: Vec<(Payload, u8, usize)> = Vec::new();
    let mut state: u32 = 0x2545_F491;
    let mut next = || {
      state ^= state << 13;
      state ^= state >> 17;
      state ^= state << 5;
      state
    };

    for round in 0..2000u32 {
      let roll = next();
      let seed = round as u8;
      match roll % 3 {
        0 if !live.is_empty() => {
          let (p, s, n) = live.swap_remove(next() as usize % live.len());
          assert!(holds(&alloc, p, s, n));
          alloc.free(Some(p));
        }
        1 if !live.is_empty() => {
          let i = next() as usize % live.len();
          let (p, s, n) = live[i];
          let size = 1 + next() as usize % 300;
          let q = alloc.realloc(Some(p), size).unwrap();
          assert!(holds(&alloc, q, s, n.min(size)));
          fill(&mut alloc, q, seed);
          live[i] = (q, seed, size);
        }
        _ => {
          let size = 1 + next() as usize % 300;
          let p = alloc.malloc(size).unwrap();
          fill(&mut alloc, p, seed);
          live.push((p, seed, size));
        }
      }
    }

    for (p, s, n) in live.drain(..) {
      assert!(holds(&alloc, p, s, n));
      alloc.free(Some(p));
    }
    let stats = alloc.check().unwrap();
    assert_eq!(stats.allocated_blocks, 0);
    assert_eq!(stats.free_blocks, 1);
  }
}
