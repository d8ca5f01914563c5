//! # tagalloc - A Boundary-Tag Heap Allocator
//!
//! This crate implements `allocate`, `release` and `reallocate` over a single
//! contiguous address range that only ever grows at its high end, the way
//! `sbrk(2)` grows a process' data segment.
//!
//! ## Overview
//!
//! Every block carries its size and allocated flag twice, in a header word in
//! front of the payload and in a footer word behind it:
//!
//! ```text
//!   Single Block:
//!   ┌──────────┬──────────────────────────────────────┬──────────┐
//!   │  header  │              payload                 │  footer  │
//!   │ size | a │                                      │ size | a │
//!   └──────────┴──────────────────────────────────────┴──────────┘
//!              ▲
//!              └── Pointer returned to user (16-byte aligned)
//!
//!   size: whole block in bytes, multiple of 16
//!   a:    allocated flag, least-significant bit
//! ```
//!
//! The header finds the next block, the footer of the block in front finds the
//! previous one. A permanently allocated prologue and a zero-sized epilogue
//! bound every walk over the heap:
//!
//! ```text
//!   ┌─────┬─────────┬─────────┬────────┬────────┬─────┬─────────┐
//!   │ pad │ prologue│ prologue│ block  │ block  │ ... │epilogue │
//!   │     │  header │  footer │        │        │     │ header  │
//!   └─────┴─────────┴─────────┴────────┴────────┴─────┴─────────┘
//!   ▲                                                           ▲
//!   low                                                       high
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   tagalloc
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── block      - Boundary tag codec and block navigation
//!   ├── growth     - HeapGrowth trait, the source of memory
//!   ├── sim        - SimHeap, a simulated growable range
//!   ├── sbrk       - SbrkHeap, the real program break (unix)
//!   ├── config     - HeapConfig and SearchMode
//!   ├── heap       - Heap: init, allocate, release, reallocate
//!   └── checker    - Heap walk, verify and check_heap
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use tagalloc::{Heap, SimHeap};
//!
//! let mut heap = Heap::init(SimHeap::new()).unwrap();
//!
//! let p = heap.allocate(100);
//! assert_eq!(p as usize % 16, 0);
//! assert_eq!(unsafe { heap.block_size(p) }, 128);
//!
//! unsafe {
//!   p.write_bytes(0xAB, 100);
//!   let q = heap.reallocate(p, 200);
//!   assert_eq!(*q, 0xAB);
//!   heap.release(q);
//! }
//!
//! assert!(heap.verify().is_ok());
//! ```
//!
//! ## Search Modes
//!
//! - [`SearchMode::Grow`] (default): every request grows the heap by exactly
//!   its block size. Released blocks are tagged free and never reused, so
//!   the heap only grows.
//! - [`SearchMode::FirstFit`]: requests take the first free block that fits
//!   and release merges neighbouring free blocks.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: a [`Heap`] is not `Send`; share it behind a lock
//! - **No pointer validation**: releasing a foreign pointer corrupts the heap
//! - **Never shrinks**: the range handed out by the growth service is kept
//!
//! ## Safety
//!
//! Releasing and reallocating take raw pointers and are `unsafe`: the caller
//! promises the pointer came from the same heap.

pub mod align;
pub mod block;
mod checker;
mod config;
mod error;
mod growth;
mod heap;
#[cfg(unix)]
mod sbrk;
mod sim;

pub use checker::{BlockInfo, Blocks, HeapReport};
pub use config::{DEFAULT_CHUNK_SIZE, HeapConfig, SearchMode};
pub use error::{AllocError, HeapCorruption};
pub use growth::{GrowthError, HeapGrowth};
pub use heap::{Heap, block_size_for};
#[cfg(unix)]
pub use sbrk::{SbrkHeap, program_break};
pub use sim::{DEFAULT_CAPACITY, SimHeap};

/// Size of a header or footer word.
pub const WSIZE: usize = 8;

/// Alignment of every block pointer and block size.
pub const ALIGNMENT: usize = 16;

/// Smallest block: header, footer and one alignment unit of payload.
pub const MIN_BLOCK_SIZE: usize = 2 * ALIGNMENT;

/// Size of the prologue block, header and footer only.
pub const PROLOGUE_SIZE: usize = 2 * WSIZE;
