//! Heap walking and consistency checks.

use std::collections::BTreeSet;

use crate::{
  Allocator,
  align::{ALIGNMENT, MIN_BLOCK_SIZE, TAGS_SIZE, WORD_SIZE},
  block::{Block, pack, unpack},
  error::Corruption,
  heap::HeapGrower,
};

/// Totals over the real blocks between the sentinels.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
  pub heap_size: usize,
  pub allocated_blocks: usize,
  pub allocated_bytes: usize,
  pub free_blocks: usize,
  pub free_bytes: usize,
  pub largest_free: usize,
}

impl HeapStats {
  fn count(
    &mut self,
    block: &Block,
  ) {
    match *block {
      Block::Allocated { size } => {
        self.allocated_blocks += 1;
        self.allocated_bytes += size;
      }
      Block::Free { size, .. } => {
        self.free_blocks += 1;
        self.free_bytes += size;
        self.largest_free = self.largest_free.max(size);
      }
    }
  }
}

fn word(
  bytes: &[u8],
  offset: usize,
) -> Result<u64, Corruption> {
  offset
    .checked_add(WORD_SIZE)
    .and_then(|end| bytes.get(offset..end))
    .map(|raw| {
      let mut word = [0u8; WORD_SIZE];
      word.copy_from_slice(raw);
      u64::from_ne_bytes(word)
    })
    .ok_or(Corruption::OutOfBounds {
      offset,
      len: bytes.len(),
    })
}

fn check_sentinel(
  bytes: &[u8],
  block: usize,
) -> Result<(), Corruption> {
  let header = word(bytes, block)?;
  let footer = word(bytes, block + TAGS_SIZE - WORD_SIZE)?;
  if header != pack(TAGS_SIZE, true) || footer != header {
    return Err(Corruption::BadSentinel { block });
  }
  Ok(())
}

/// Real blocks in address order, prologue and epilogue excluded.
pub struct Blocks<'a, H: HeapGrower> {
  alloc: &'a Allocator<H>,
  at: usize,
}

impl<H: HeapGrower> Iterator for Blocks<'_, H> {
  type Item = (usize, Block);

  fn next(&mut self) -> Option<Self::Item> {
    if self.at >= self.alloc.epilogue {
      return None;
    }
    let block = self.alloc.block(self.at);
    if block.size() == 0 {
      return None;
    }
    let at = self.at;
    self.at += block.size();
    Some((at, block))
  }
}

impl<H: HeapGrower> Allocator<H> {
  pub fn blocks(&self) -> Blocks<'_, H> {
    Blocks {
      alloc: self,
      at: self.prologue + TAGS_SIZE,
    }
  }

  /// Totals without validating the heap. Use [`check`](Self::check) when
  /// the heap may be damaged.
  pub fn stats(&self) -> HeapStats {
    let mut stats = HeapStats {
      heap_size: self.heap.len(),
      ..HeapStats::default()
    };
    for (_, block) in self.blocks() {
      stats.count(&block);
    }
    stats
  }

  /// Walks the whole heap and the free list and reports the first broken
  /// invariant.
  ///
  /// Between public calls every block has equal header and footer, an
  /// aligned size of at least the minimum block size, no two free blocks
  /// touch, and the free list holds exactly the free blocks.
  pub fn check(&self) -> Result<HeapStats, Corruption> {
    let bytes = self.heap.bytes();

    check_sentinel(bytes, self.prologue)?;
    check_sentinel(bytes, self.epilogue)?;
    if self.epilogue + TAGS_SIZE != bytes.len() {
      return Err(Corruption::BadSentinel {
        block: self.epilogue,
      });
    }

    let mut stats = HeapStats {
      heap_size: bytes.len(),
      ..HeapStats::default()
    };
    let mut free = BTreeSet::new();
    let mut prev_free = None;
    let mut at = self.prologue + TAGS_SIZE;

    while at < self.epilogue {
      let header = word(bytes, at)?;
      let (size, allocated) = unpack(header);

      if size % ALIGNMENT != 0 {
        return Err(Corruption::Misaligned { block: at, size });
      }
      if size < MIN_BLOCK_SIZE {
        return Err(Corruption::Undersized { block: at, size });
      }
      if at + size > self.epilogue {
        return Err(Corruption::BadEpilogue {
          expected: self.epilogue,
          found: at + size,
        });
      }

      let footer = word(bytes, at + size - WORD_SIZE)?;
      if footer != header {
        return Err(Corruption::TagMismatch {
          block: at,
          header,
          footer,
        });
      }

      if allocated {
        if self.free.contains(at) {
          return Err(Corruption::StaleLink { block: at });
        }
        stats.count(&Block::Allocated { size });
        prev_free = None;
      } else {
        if let Some(first) = prev_free {
          return Err(Corruption::AdjacentFree { first, second: at });
        }
        let Some(links) = self.free.links(at) else {
          return Err(Corruption::NotInFreeList { block: at });
        };
        stats.count(&Block::Free {
          size,
          next: links.next,
          prev: links.prev,
        });
        free.insert(at);
        prev_free = Some(at);
      }

      at += size;
    }

    if at != self.epilogue {
      return Err(Corruption::BadEpilogue {
        expected: self.epilogue,
        found: at,
      });
    }

    for (block, links) in self.free.entries() {
      if !free.contains(&block) {
        return Err(Corruption::StaleLink { block });
      }
      let forward = self.free.links(links.next).map(|l| l.prev);
      let backward = self.free.links(links.prev).map(|l| l.next);
      if forward != Some(block) || backward != Some(block) {
        return Err(Corruption::BrokenLinks { block });
      }
    }

    match self.free.first() {
      None if self.free.len() > 0 => {
        let block = self.free.entries().next().map_or(0, |(block, _)| block);
        return Err(Corruption::StaleLink { block });
      }
      Some(first) if self.free.iter().take(self.free.len() + 1).count() != self.free.len() => {
        return Err(Corruption::BrokenLinks { block: first });
      }
      _ => {}
    }

    Ok(stats)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  use test_env_log::test;

  use crate::{Config, block::TagCodec, heap::ArenaHeap};

  fn allocator() -> Allocator<ArenaHeap> {
    Allocator::init(ArenaHeap::default()).unwrap()
  }

  #[test]
  fn test_healthy_heap_stats() {
    let mut alloc = allocator();
    let _a = alloc.malloc(16);
    let b = alloc.malloc(100);
    alloc.free(b);

    let stats = alloc.check().unwrap();
    assert_eq!(stats, alloc.stats());
    assert_eq!(stats.allocated_blocks, 1);
    assert_eq!(stats.allocated_bytes, 32);
    assert_eq!(stats.free_blocks, 1);
    assert_eq!(stats.free_bytes, 512 - 32);
    assert_eq!(stats.largest_free, 512 - 32);
    assert_eq!(stats.heap_size, 512 + 2 * TAGS_SIZE);
  }

  #[test]
  fn test_blocks_walk_in_address_order() {
    let mut alloc = allocator();
    let _a = alloc.malloc(16);
    let _b = alloc.malloc(16);

    let blocks: Vec<_> = alloc.blocks().collect();
    assert_eq!(blocks.len(), 3);
    assert!(blocks.windows(2).all(|w| w[0].0 + w[0].1.size() == w[1].0));
    assert!(blocks[0].1.is_free());
    assert_eq!(blocks[1].1, Block::Allocated { size: 32 });
    assert_eq!(blocks[2].1, Block::Allocated { size: 32 });
  }

  #[test]
  fn test_detects_tag_mismatch() {
    let mut alloc = allocator();
    let p = alloc.malloc(16).unwrap();
    let block = p.offset() - WORD_SIZE;
    alloc.heap.bytes_mut().set_word(block + 24, pack(40, true));

    assert!(matches!(
      alloc.check(),
      Err(Corruption::TagMismatch { block: b, .. }) if b == block
    ));
  }

  #[test]
  fn test_detects_adjacent_free_blocks() {
    let mut alloc = allocator();
    let a = alloc.malloc(16).unwrap();
    let block = a.offset() - WORD_SIZE;
    // Mark it free behind the allocator's back, next to the free remainder.
    alloc.heap.bytes_mut().set_allocated(block, false);
    let bytes = alloc.heap.bytes();
    alloc.free.insert(bytes, block);

    assert!(matches!(alloc.check(), Err(Corruption::AdjacentFree { .. })));
  }

  #[test]
  fn test_detects_free_block_missing_from_list() {
    let mut alloc = allocator();
    let _a = alloc.malloc(16).unwrap();
    let b = alloc.malloc(16).unwrap();
    let _c = alloc.malloc(16).unwrap();
    let block = b.offset() - WORD_SIZE;
    alloc.heap.bytes_mut().set_allocated(block, false);

    assert_eq!(alloc.check(), Err(Corruption::NotInFreeList { block }));
  }

  #[test]
  fn test_detects_allocated_block_on_list() {
    let mut alloc = allocator();
    let _a = alloc.malloc(16).unwrap();
    let free = alloc.free.first().unwrap();
    alloc.heap.bytes_mut().set_allocated(free, true);

    assert_eq!(alloc.check(), Err(Corruption::StaleLink { block: free }));
  }

  #[test]
  fn test_detects_damaged_epilogue() {
    let mut alloc = allocator();
    let epilogue = alloc.epilogue;
    alloc.heap.bytes_mut().set_word(epilogue, pack(TAGS_SIZE, false));

    assert_eq!(
      alloc.check(),
      Err(Corruption::BadSentinel { block: epilogue })
    );
  }

  #[test]
  #[should_panic(expected = "heap corruption")]
  fn test_paranoid_mode_halts_on_corruption() {
    let mut alloc =
      Allocator::init_with(ArenaHeap::default(), Config::default().with_paranoid(true)).unwrap();
    let a = alloc.malloc(16).unwrap();
    let b = alloc.malloc(16).unwrap();
    let block = b.offset() - WORD_SIZE;
    alloc.heap.bytes_mut().set_word(block + 24, pack(64, true));
    alloc.free(Some(a));
  }
}
