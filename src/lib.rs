//! # segalloc - A Segregated-Fit Memory Allocator Library
//!
//! This crate provides a general-purpose **segregated free-list allocator**
//! with boundary-tag coalescing, managing one growable heap region obtained
//! from an `sbrk`-like memory source.
//!
//! ## Overview
//!
//! Every block carries its size and allocation bit twice, in a header before
//! the payload and in a footer after it:
//!
//! ```text
//!   Single Block:
//!   ┌──────────┬──────────────────────────────────────┬──────────┐
//!   │  header  │              payload                 │  footer  │
//!   │ size | a │                                      │ size | a │
//!   │ 4 bytes  │       size - 8 bytes usable          │ 4 bytes  │
//!   └──────────┴──────────────────────────────────────┴──────────┘
//!              ▲
//!              └── Pointer returned to user (8-byte aligned)
//! ```
//!
//! The footer lets a released block find its physical predecessor in O(1),
//! so free neighbors are merged immediately and two free blocks are never
//! adjacent. Free blocks are kept in ten size classes:
//!
//! ```text
//!   Segregated Free Lists:
//!
//!   bucket 0  (≤32)    ──▶ [24] ──▶ [32] ──▶ [24]
//!   bucket 1  (≤64)    ──▶ [48]
//!   bucket 2  (≤128)   ──▶ ∅
//!      ...
//!   bucket 9  (>8192)  ──▶ [16384]
//!
//!   Freed blocks are pushed at the head; a request scans its own bucket for
//!   the tightest of a few candidates, then falls through to larger buckets.
//! ```
//!
//! When nothing fits, the heap grows at its high end by the request or by
//! the current heap size, whichever is larger, capped at the growth chunk.
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── align      - Alignment macro (align!) and constants
//!   ├── block      - Boundary tags and block descriptors
//!   ├── source     - Memory sources (owned arena, program break)
//!   ├── heap       - Bounds-checked heap region on top of a source
//!   ├── seglist    - Segregated free lists and fit search
//!   ├── allocator  - SegregatedAllocator (internal)
//!   ├── checker    - Heap consistency checker and dumps (internal)
//!   └── config     - AllocatorConfig (internal)
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use segalloc::{ArenaSource, SegregatedAllocator};
//!
//! let mut allocator = SegregatedAllocator::new(ArenaSource::new(1 << 20));
//!
//! let ptr = allocator.allocate(100).unwrap();
//! unsafe {
//!   ptr.as_ptr().write_bytes(0xAB, 100);
//!   allocator.release(ptr.as_ptr());
//! }
//!
//! let report = allocator.check(false).unwrap();
//! assert_eq!(report.free_blocks, 1);
//! ```
//!
//! ## Heap Layout
//!
//! ```text
//!   offset  0: padding word
//!   offset  4: prologue header  (8 | a)
//!   offset  8: prologue footer  (8 | a)
//!   offset 12: first block header ...
//!          ...
//!   size - 4 : epilogue header  (0 | a)
//! ```
//!
//! The prologue and epilogue are allocated sentinels, so coalescing never
//! needs to special-case the edges of the heap.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: every operation takes `&mut self`
//! - **No hardening**: double or foreign releases are only caught by the checker
//! - **Never shrinks**: memory returns to the source only when the allocator is dropped
//! - **Unix-only** for [`SbrkSource`], which requires `libc` and `sbrk`

pub mod align;
pub mod block;
pub mod heap;
pub mod seglist;
pub mod source;

mod allocator;
mod checker;
mod config;

pub use allocator::{InitError, SegregatedAllocator};
pub use checker::{BlockInfo, BlockState, Blocks, HeapDump, HeapReport, HeapViolation};
pub use config::{AllocatorConfig, DEFAULT_GROWTH_CHUNK};
pub use source::{ArenaSource, MemorySource, SbrkSource, SourceError};
