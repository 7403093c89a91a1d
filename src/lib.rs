//! # tagalloc - A Boundary-Tag Memory Allocator
//!
//! This crate provides a general purpose `malloc` / `free` / `realloc`
//! allocator over a single contiguous region that only ever grows at its end,
//! the way the program break does under `sbrk(2)`.
//!
//! ## Overview
//!
//! Every block carries its size twice, in a header and a footer, so both
//! neighbours of any block can be found in O(1):
//!
//! ```text
//!   Managed Region:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                                                                      │
//!   │  ┌────┬──────────────┬────────────────────┬──────────────┬────┐      │
//!   │  │ P  │ H  alloc   F │ H      free      F │ H  alloc   F │ E  │      │
//!   │  └────┴──────────────┴────────────────────┴──────────────┴────┘      │
//!   │   ▲                                                        ▲    ▲    │
//!   │   │                                                        │    │    │
//!   │  prologue                                           epilogue  break  │
//!   │                                                                      │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   H / F: header and footer, both hold size | allocated.
//!   Free blocks are also threaded on a circular, doubly linked free list.
//! ```
//!
//! - **malloc** scans the free list first fit, starting at the most recently
//!   freed block, splitting oversized blocks. When nothing fits it grows the
//!   heap by at least 512 bytes.
//! - **free** marks the block free and merges it with free neighbours right
//!   away, so two free blocks never touch.
//! - **realloc** shrinks in place, or grows into a free neighbour before it
//!   falls back to allocate, copy and free.
//!
//! ## Crate Structure
//!
//! ```text
//!   tagalloc
//!   ├── align      - Alignment constants and the align! macro
//!   ├── block      - Boundary tag encoding and neighbour lookups
//!   ├── free_list  - Circular doubly linked free list
//!   ├── coalesce   - Splitting and coalescing
//!   ├── allocator  - Allocator: init, malloc, free, realloc
//!   ├── check      - Heap walker and consistency checker
//!   ├── heap       - HeapGrower trait, ArenaHeap and SbrkHeap
//!   ├── config     - Config
//!   └── error      - AllocError and Corruption
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use tagalloc::{Allocator, ArenaHeap};
//!
//! let mut allocator = Allocator::init(ArenaHeap::default()).unwrap();
//!
//! let p = allocator.malloc(24).unwrap();
//! allocator.payload_mut(p)[..5].copy_from_slice(b"hello");
//!
//! let p = allocator.realloc(Some(p), 200).unwrap();
//! assert_eq!(&allocator.payload(p)[..5], b"hello");
//!
//! allocator.free(Some(p));
//! allocator.check().unwrap();
//! ```
//!
//! ## Errors
//!
//! Running out of memory is ordinary: `init` returns an [`AllocError`], and
//! `malloc` / `realloc` return `None`. A broken heap invariant (a bad
//! payload handle, a double free, a damaged tag) is a [`Corruption`] and
//! halts the program through [`fatal`].
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no synchronization primitives
//! - **Never shrinks**: memory is never given back to the OS
//! - **One policy**: first fit from the most recently freed block

pub mod align;
mod allocator;
mod block;
mod check;
mod coalesce;
mod config;
mod error;
mod free_list;
mod heap;

pub use allocator::{Allocator, Payload};
pub use block::Block;
pub use check::{Blocks, HeapStats};
pub use config::{Config, DEFAULT_GROWTH_CHUNK};
pub use error::{AllocError, Corruption, fatal};
pub use free_list::{FreeList, Links};
pub use heap::{ArenaHeap, DEFAULT_ARENA_CAPACITY, HeapGrower, SbrkHeap};
