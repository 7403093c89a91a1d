//! Circular, doubly linked list of free blocks.
//!
//! ```text
//!          first
//!            │
//!            ▼
//!        ┌───────┐ next ┌───────┐ next ┌───────┐
//!   ┌───►│   C   ├─────►│   B   ├─────►│   A   ├────┐
//!   │    └───────┘◄─────┴───────┘◄─────┴───────┘    │
//!   │               prev           prev             │
//!   └───────────────────────────────────────────────┘
//! ```
//!
//! Freed blocks are spliced in before `first` and become the new `first`, so
//! a forward walk visits the most recently freed block first.
//!
//! The links are not written into payload bytes. They live in a table keyed
//! by block offset that only holds entries for blocks currently on the list,
//! so an allocated block simply has no links to read.

use std::collections::BTreeMap;

use crate::block::TagCodec;
use crate::error::{Corruption, fatal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Links {
  pub next: usize,
  pub prev: usize,
}

#[derive(Debug, Default)]
pub struct FreeList {
  first: Option<usize>,
  links: BTreeMap<usize, Links>,
}

impl FreeList {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn first(&self) -> Option<usize> {
    self.first
  }

  pub fn is_empty(&self) -> bool {
    self.first.is_none()
  }

  pub fn len(&self) -> usize {
    self.links.len()
  }

  pub fn contains(
    &self,
    block: usize,
  ) -> bool {
    self.links.contains_key(&block)
  }

  /// Links of a free block, without the allocation check.
  pub fn links(
    &self,
    block: usize,
  ) -> Option<Links> {
    self.links.get(&block).copied()
  }

  /// Every block that has links, in address order.
  pub(crate) fn entries(&self) -> impl Iterator<Item = (usize, Links)> + '_ {
    self.links.iter().map(|(block, links)| (*block, *links))
  }

  fn checked_links(
    &self,
    bytes: &[u8],
    block: usize,
  ) -> Links {
    if bytes.allocated(block) {
      fatal(Corruption::LinksOnAllocated { block });
    }
    match self.links.get(&block) {
      Some(links) => *links,
      None => fatal(Corruption::NotInFreeList { block }),
    }
  }

  fn checked_links_mut(
    &mut self,
    bytes: &[u8],
    block: usize,
    target: usize,
  ) -> &mut Links {
    if bytes.allocated(block) {
      fatal(Corruption::LinksOnAllocated { block });
    }
    if bytes.allocated(target) {
      fatal(Corruption::LinksOnAllocated { block: target });
    }
    match self.links.get_mut(&block) {
      Some(links) => links,
      None => fatal(Corruption::NotInFreeList { block }),
    }
  }

  pub fn next(
    &self,
    bytes: &[u8],
    block: usize,
  ) -> usize {
    self.checked_links(bytes, block).next
  }

  pub fn prev(
    &self,
    bytes: &[u8],
    block: usize,
  ) -> usize {
    self.checked_links(bytes, block).prev
  }

  pub fn set_next(
    &mut self,
    bytes: &[u8],
    block: usize,
    next: usize,
  ) {
    self.checked_links_mut(bytes, block, next).next = next;
  }

  pub fn set_prev(
    &mut self,
    bytes: &[u8],
    block: usize,
    prev: usize,
  ) {
    self.checked_links_mut(bytes, block, prev).prev = prev;
  }

  /// Puts a free block at the head of the list.
  pub fn insert(
    &mut self,
    bytes: &[u8],
    block: usize,
  ) {
    if bytes.allocated(block) {
      fatal(Corruption::LinksOnAllocated { block });
    }
    if self.links.contains_key(&block) {
      fatal(Corruption::BrokenLinks { block });
    }

    match self.first {
      Some(first) => {
        let last = self.prev(bytes, first);
        self.links.insert(
          block,
          Links {
            next: first,
            prev: last,
          },
        );
        self.set_next(bytes, last, block);
        self.set_prev(bytes, first, block);
      }
      None => {
        self.links.insert(
          block,
          Links {
            next: block,
            prev: block,
          },
        );
      }
    }
    self.first = Some(block);
  }

  /// Unlinks a free block. The block must be on the list.
  pub fn remove(
    &mut self,
    bytes: &[u8],
    block: usize,
  ) {
    let Links { next, prev } = self.checked_links(bytes, block);

    if next == block {
      self.links.remove(&block);
      self.first = None;
      return;
    }

    self.set_prev(bytes, next, prev);
    self.set_next(bytes, prev, next);
    self.links.remove(&block);

    if self.first == Some(block) {
      self.first = Some(next);
    }
  }

  /// Walks forward from `first` for one full circuit.
  pub fn iter(&self) -> Iter<'_> {
    Iter {
      list: self,
      current: self.first,
    }
  }
}

pub struct Iter<'a> {
  list: &'a FreeList,
  current: Option<usize>,
}

impl Iterator for Iter<'_> {
  type Item = usize;

  fn next(&mut self) -> Option<usize> {
    let block = self.current?;
    self.current = self
      .list
      .links
      .get(&block)
      .map(|links| links.next)
      .filter(|next| Some(*next) != self.list.first);
    Some(block)
  }
}
