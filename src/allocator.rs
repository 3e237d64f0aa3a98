//! Segregated-fit allocator over a growable heap region.

use std::ptr::{self, NonNull};

use snafu::{Location, ResultExt as _, Snafu};

use crate::{
  align,
  block::{self, Block, DSIZE, MIN_BLOCK_SIZE, Tag, WSIZE},
  config::AllocatorConfig,
  heap::HeapRegion,
  seglist::SegregatedFreeList,
  source::{ArenaSource, MemorySource, SourceError},
};

#[derive(Debug, Snafu)]
pub enum InitError {
  #[snafu(display("failed to reserve the heap sentinels"))]
  Sentinels {
    source: SourceError,
    #[snafu(implicit)]
    location: Location,
  },
  #[snafu(display("failed to create the initial free block of {bytes} bytes"))]
  InitialExtension {
    bytes: usize,
    source: SourceError,
    #[snafu(implicit)]
    location: Location,
  },
}

/// A general-purpose allocator built from boundary-tagged blocks and
/// segregated free lists.
///
/// ```text
///   ┌─────┬──────────┬─────────┬─────────┬─────────┬─ ─ ─ ─┬──────────┐
///   │ pad │ prologue │ block A │ block B │ block C │  ...  │ epilogue │
///   │  4  │  8 | a   │ n | a/f │ n | a/f │ n | a/f │       │  0 | a   │
///   └─────┴──────────┴─────────┴─────────┴─────────┴─ ─ ─ ─┴──────────┘
///                                                          grows this way ▶
/// ```
///
/// The heap is created lazily by the first call that needs it, never moves
/// and never shrinks. Free blocks are always coalesced with their physical
/// neighbors, so no two adjacent blocks are ever free at the same time.
///
/// The allocator is single-threaded: every operation takes `&mut self`.
#[derive(Debug)]
pub struct SegregatedAllocator<S: MemorySource = ArenaSource> {
  pub(crate) heap: HeapRegion<S>,
  pub(crate) free_list: SegregatedFreeList,
  pub(crate) config: AllocatorConfig,
  pub(crate) prologue: Option<Block>,
}

impl Default for SegregatedAllocator<ArenaSource> {
  fn default() -> Self {
    Self::new(ArenaSource::default())
  }
}

impl<S: MemorySource> SegregatedAllocator<S> {
  pub fn new(source: S) -> Self {
    Self::with_config(source, AllocatorConfig::default())
  }

  pub fn with_config(
    source: S,
    config: AllocatorConfig,
  ) -> Self {
    Self {
      heap: HeapRegion::new(source),
      free_list: SegregatedFreeList::new(),
      config: config.normalized(),
      prologue: None,
    }
  }

  pub fn config(&self) -> &AllocatorConfig {
    &self.config
  }

  pub fn source(&self) -> &S {
    self.heap.source()
  }

  /// Tears the allocator down and hands back its memory source.
  pub fn into_source(self) -> S {
    self.heap.into_source()
  }

  pub fn is_initialized(&self) -> bool {
    self.prologue.is_some()
  }

  /// Bytes currently obtained from the memory source.
  pub fn heap_size(&self) -> usize {
    self.heap.size()
  }

  pub fn free_list(&self) -> &SegregatedFreeList {
    &self.free_list
  }

  /// Lays out the prologue and epilogue sentinels and the initial free block.
  ///
  /// Called lazily by the allocation functions; calling it again is a no-op.
  /// When only the initial free block fails, the sentinels stay in place and
  /// later requests grow the heap on demand.
  pub fn initialize(&mut self) -> Result<(), InitError> {
    if self.prologue.is_some() {
      return Ok(());
    }

    let size = self.heap.size();
    let padding = size.next_multiple_of(DSIZE) - size;
    let start = self
      .heap
      .extend(padding + 4 * WSIZE)
      .context(SentinelsSnafu)?
      + padding;

    self.heap.put_word(start, 0);
    let prologue = Block::from_payload(start + DSIZE);
    self.heap.set_tags(prologue, DSIZE, true);
    self.heap.put_tag(prologue.next(DSIZE).header(), Tag::EPILOGUE);
    self.prologue = Some(prologue);
    log::debug!("heap sentinels laid out at {start:#x}");

    let bytes = self.config.initial_extension;
    if bytes > 0 {
      self
        .extend_heap(bytes)
        .context(InitialExtensionSnafu { bytes })?;
    }
    self.verify();
    Ok(())
  }

  /// Allocates at least `size` bytes, aligned to 8 bytes.
  ///
  /// Returns `None` for a zero-sized request or when the memory source cannot
  /// grow any further; the heap stays consistent either way.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Option<NonNull<u8>> {
    if let Err(err) = self.initialize() {
      log::warn!("heap initialization failed: {err}");
      if !self.is_initialized() {
        return None;
      }
    }
    if size == 0 {
      return None;
    }

    let asize = block::adjusted_size(size)?;
    let block = match self.find_fit(asize) {
      Some(block) => block,
      None => {
        let grow = asize.max(self.heap.size().min(self.config.growth_chunk));
        match self.extend_heap(grow) {
          Ok(block) => block,
          Err(err) => {
            log::warn!("cannot serve a request of {size} bytes: {err}");
            return None;
          }
        }
      }
    };
    self.place(block, asize);
    log::trace!("allocate({size}) -> {block:?}");

    self.verify();
    Some(self.heap.payload_ptr(block))
  }

  /// Returns a block to the allocator and merges it with free neighbors.
  ///
  /// A null pointer is ignored.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a pointer returned by this allocator that has not
  /// been released since. Releasing anything else corrupts the heap; only
  /// [`check`](Self::check) notices.
  ///
  /// # Panics
  ///
  /// Panics if `ptr` points outside of the heap.
  pub unsafe fn release(
    &mut self,
    ptr: *mut u8,
  ) {
    if ptr.is_null() || !self.is_initialized() {
      return;
    }

    let block = self.heap.block_of(ptr);
    let size = self.heap.header(block).size();
    self.heap.set_tags(block, size, false);
    let merged = self.coalesce(block);
    log::trace!("release({block:?}) -> {merged:?}");

    self.verify();
  }

  /// Resizes an allocation by moving it.
  ///
  /// A null `ptr` behaves like [`allocate`](Self::allocate) and a zero `size`
  /// like [`release`](Self::release) followed by returning `None`. Otherwise a
  /// new block is allocated, the common prefix copied and the old block
  /// released. If the new block cannot be allocated the old one is left
  /// untouched and `None` is returned.
  ///
  /// # Safety
  ///
  /// Same contract as [`release`](Self::release).
  pub unsafe fn reallocate(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> Option<NonNull<u8>> {
    if ptr.is_null() {
      return self.allocate(size);
    }
    if size == 0 {
      unsafe { self.release(ptr) };
      return None;
    }

    let old_usable = self.usable_size(ptr);
    let new = self.allocate(size)?;
    unsafe {
      ptr::copy_nonoverlapping(ptr, new.as_ptr(), old_usable.min(size));
      self.release(ptr);
    }
    Some(new)
  }

  /// Allocates `count * size` zeroed bytes.
  ///
  /// Returns `None` when the product overflows.
  pub fn allocate_zeroed(
    &mut self,
    count: usize,
    size: usize,
  ) -> Option<NonNull<u8>> {
    let bytes = count.checked_mul(size)?;
    let ptr = self.allocate(bytes)?;
    unsafe { ptr.as_ptr().write_bytes(0, bytes) };
    Some(ptr)
  }

  /// Payload bytes usable through `ptr`, at least what was requested.
  ///
  /// # Panics
  ///
  /// Panics if `ptr` points outside of the heap.
  pub fn usable_size(
    &self,
    ptr: *mut u8,
  ) -> usize {
    let block = self.heap.block_of(ptr);
    block::usable_size(self.heap.header(block).size())
  }

  fn find_fit(
    &self,
    asize: usize,
  ) -> Option<Block> {
    self
      .free_list
      .find_fit(asize, self.config.fit_candidates, |block| {
        self.heap.header(block).size()
      })
  }

  /// Marks the first `asize` bytes of free `block` allocated, splitting off
  /// the rest when it can stand as a block of its own.
  fn place(
    &mut self,
    block: Block,
    asize: usize,
  ) {
    let size = self.heap.header(block).size();
    self.free_list.remove(block, size);

    let remainder = size - asize;
    if remainder >= MIN_BLOCK_SIZE {
      self.heap.set_tags(block, asize, true);
      let rest = block.next(asize);
      self.heap.set_tags(rest, remainder, false);
      self.free_list.insert(rest, remainder);
    } else {
      self.heap.set_tags(block, size, true);
    }
  }

  /// Merges free `block` with its free physical neighbors and links the
  /// result into its bucket.
  fn coalesce(
    &mut self,
    block: Block,
  ) -> Block {
    let size = self.heap.header(block).size();
    let prev_allocated = self.heap.prev_allocated(block);
    let next = block.next(size);
    let next_tag = self.heap.header(next);

    let (block, size) = match (prev_allocated, next_tag.is_allocated()) {
      (true, true) => (block, size),
      (true, false) => {
        self.free_list.remove(next, next_tag.size());
        (block, size + next_tag.size())
      }
      (false, true) => {
        let prev = self.heap.prev_block(block);
        let prev_size = self.heap.header(prev).size();
        self.free_list.remove(prev, prev_size);
        (prev, prev_size + size)
      }
      (false, false) => {
        let prev = self.heap.prev_block(block);
        let prev_size = self.heap.header(prev).size();
        self.free_list.remove(prev, prev_size);
        self.free_list.remove(next, next_tag.size());
        (prev, prev_size + size + next_tag.size())
      }
    };

    self.heap.set_tags(block, size, false);
    self.free_list.insert(block, size);
    block
  }

  /// Appends a free block of at least `bytes` bytes and a fresh epilogue,
  /// then coalesces it with the old tail block.
  fn extend_heap(
    &mut self,
    bytes: usize,
  ) -> Result<Block, SourceError> {
    let size = align!(bytes);
    // The old epilogue header becomes the header of the new block.
    let block = Block::from_payload(self.heap.extend(size)?);
    self.heap.set_tags(block, size, false);
    self.heap.put_tag(block.next(size).header(), Tag::EPILOGUE);
    log::debug!("heap grew by {size} bytes to {}", self.heap.size());

    Ok(self.coalesce(block))
  }

  fn verify(&self) {
    if !self.config.check_each_operation {
      return;
    }
    if let Err(violation) = self.check(false) {
      panic!("heap corruption detected: {violation}");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    checker::HeapViolation,
    seglist::bucket_index,
    source::{ArenaSource, SbrkSource},
  };

  fn allocator() -> SegregatedAllocator {
    checked_allocator(AllocatorConfig::default())
  }

  fn checked_allocator(config: AllocatorConfig) -> SegregatedAllocator {
    SegregatedAllocator::with_config(
      ArenaSource::new(4 << 20),
      config.with_check_each_operation(true),
    )
  }

  fn fill(
    ptr: NonNull<u8>,
    len: usize,
    byte: u8,
  ) {
    unsafe { ptr.as_ptr().write_bytes(byte, len) };
  }

  fn holds(
    ptr: NonNull<u8>,
    len: usize,
    byte: u8,
  ) -> bool {
    unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len) }
      .iter()
      .all(|&b| b == byte)
  }

  #[test]
  fn test_initialize_is_idempotent() {
    let mut allocator = allocator();
    assert!(!allocator.is_initialized());
    assert_eq!(allocator.heap_size(), 0);

    allocator.initialize().unwrap();
    let size = allocator.heap_size();
    assert_eq!(size, 4 * WSIZE + 256);
    allocator.initialize().unwrap();
    assert_eq!(allocator.heap_size(), size);

    let report = allocator.check(false).unwrap();
    assert_eq!(report.free_blocks, 1);
    assert_eq!(report.free_bytes, 256);
  }

  #[test]
  fn test_allocate_zero() {
    let mut allocator = allocator();
    assert!(allocator.allocate(0).is_none());
    assert!(allocator.is_initialized());
  }

  #[test]
  fn test_allocate_alignment_and_usable_size() {
    let mut allocator = allocator();
    for size in [1, 7, 8, 16, 17, 24, 100, 1000, 5000] {
      let ptr = allocator.allocate(size).unwrap();
      assert_eq!(ptr.as_ptr().addr() % 8, 0);
      assert!(allocator.usable_size(ptr.as_ptr()) >= size);
      fill(ptr, size, 0x33);
    }
    allocator.check(false).unwrap();
  }

  #[test]
  fn test_payloads_do_not_overlap() {
    let mut allocator = allocator();
    let sizes = [24, 100, 8, 300, 64, 2000];
    let ptrs: Vec<_> = sizes
      .iter()
      .enumerate()
      .map(|(i, &size)| {
        let ptr = allocator.allocate(size).unwrap();
        fill(ptr, size, i as u8 + 1);
        ptr
      })
      .collect();

    for (i, (&ptr, &size)) in ptrs.iter().zip(&sizes).enumerate() {
      assert!(holds(ptr, size, i as u8 + 1));
    }
  }

  #[test]
  fn test_release_null_is_noop() {
    let mut allocator = allocator();
    unsafe { allocator.release(ptr::null_mut()) };
    assert!(!allocator.is_initialized());

    allocator.initialize().unwrap();
    let before = allocator.check(false).unwrap();
    unsafe { allocator.release(ptr::null_mut()) };
    assert_eq!(allocator.check(false).unwrap(), before);
  }

  #[test]
  fn test_split_leaves_free_remainder() {
    let mut allocator = allocator();
    let ptr = allocator.allocate(24).unwrap();
    assert_eq!(allocator.usable_size(ptr.as_ptr()), 24);

    let report = allocator.check(false).unwrap();
    assert_eq!(report.free_blocks, 1);
    assert_eq!(report.free_bytes, 256 - 32);
  }

  #[test]
  fn test_small_remainder_is_not_split() {
    let mut allocator = allocator();
    // 256 bytes free: a 240-byte block leaves 16 bytes, too few for a block.
    let ptr = allocator.allocate(232).unwrap();
    assert_eq!(allocator.usable_size(ptr.as_ptr()), 248);
    assert_eq!(allocator.check(false).unwrap().free_blocks, 0);
  }

  #[test]
  fn test_coalesce_all_cases() {
    let mut allocator = allocator();
    let blocks: Vec<_> = (0..5).map(|_| allocator.allocate(40).unwrap()).collect();
    let [a, b, c, d, e] = blocks[..] else {
      unreachable!()
    };
    let free_blocks = |allocator: &SegregatedAllocator| allocator.check(false).unwrap().free_blocks;
    let base = free_blocks(&allocator);

    unsafe {
      // No free neighbor.
      allocator.release(b.as_ptr());
      assert_eq!(free_blocks(&allocator), base + 1);
      // Free predecessor.
      allocator.release(c.as_ptr());
      assert_eq!(free_blocks(&allocator), base + 1);
      // Free successor.
      allocator.release(a.as_ptr());
      assert_eq!(free_blocks(&allocator), base + 1);
      allocator.release(e.as_ptr());
      assert_eq!(free_blocks(&allocator), base + 2);
      // Free on both sides.
      allocator.release(d.as_ptr());
      assert_eq!(free_blocks(&allocator), base + 1);
    }

    let report = allocator.check(false).unwrap();
    assert_eq!(report.blocks, 1);
    assert_eq!(report.allocated_bytes, 0);
  }

  #[test]
  fn test_merged_block_moves_bucket() {
    let mut allocator = allocator();
    let a = allocator.allocate(24).unwrap();
    let b = allocator.allocate(24).unwrap();
    let _guard = allocator.allocate(24).unwrap();

    unsafe {
      allocator.release(a.as_ptr());
      allocator.release(b.as_ptr());
    }
    let merged = allocator.heap.block_of(a.as_ptr());
    assert_eq!(allocator.heap.header(merged).size(), 64);
    assert_eq!(allocator.free_list.head(bucket_index(64)), Some(merged));
    assert!(allocator.free_list.bucket(0).all(|block| block != merged));
  }

  #[test]
  fn test_scenario_reuse_after_release() {
    let mut allocator = allocator();
    let first = allocator.allocate(100).unwrap();
    let _second = allocator.allocate(200).unwrap();
    unsafe { allocator.release(first.as_ptr()) };

    let third = allocator.allocate(50).unwrap();
    assert_eq!(third, first);
    allocator.check(false).unwrap();
  }

  #[test]
  fn test_scenario_lifo_reuse() {
    let mut allocator = allocator();
    let first = allocator.allocate(24).unwrap();
    unsafe { allocator.release(first.as_ptr()) };
    let second = allocator.allocate(24).unwrap();
    assert_eq!(first, second);
  }

  #[test]
  fn test_scenario_steady_state_does_not_grow() {
    let mut allocator = allocator();
    let mut cycle = |allocator: &mut SegregatedAllocator| {
      let ptr = allocator.allocate(16).unwrap();
      unsafe { allocator.release(ptr.as_ptr()) };
    };
    cycle(&mut allocator);
    cycle(&mut allocator);
    let size = allocator.heap_size();

    for _ in 0..1000 {
      cycle(&mut allocator);
    }
    assert_eq!(allocator.heap_size(), size);
  }

  #[test]
  fn test_scenario_large_request_outgrows_chunk() {
    let mut allocator = checked_allocator(AllocatorConfig::default().with_growth_chunk(1024));
    // Exhaust the initial free block.
    let _filler = allocator.allocate(232).unwrap();
    assert_eq!(allocator.check(false).unwrap().free_blocks, 0);

    let before = allocator.heap_size();
    let ptr = allocator.allocate(4000).unwrap();
    assert!(allocator.heap_size() - before >= 4000 + DSIZE);
    assert!(allocator.usable_size(ptr.as_ptr()) >= 4000);
  }

  #[test]
  fn test_growth_doubles_then_caps() {
    let mut allocator = checked_allocator(AllocatorConfig::default().with_growth_chunk(1024));
    let _filler = allocator.allocate(232).unwrap();

    // Heap is 272 bytes: a small miss grows by the current heap size.
    let before = allocator.heap_size();
    let _a = allocator.allocate(16).unwrap();
    assert_eq!(allocator.heap_size() - before, before);

    while allocator.heap_size() < 4096 {
      allocator.allocate(200).unwrap();
    }
    // Drain the tail block so the next small request must grow the heap.
    let free = allocator.check(false).unwrap().free_bytes;
    if free > 0 {
      allocator.allocate(free - DSIZE).unwrap();
    }
    assert_eq!(allocator.check(false).unwrap().free_blocks, 0);

    let before = allocator.heap_size();
    allocator.allocate(16).unwrap();
    assert_eq!(allocator.heap_size() - before, 1024);
  }

  #[test]
  fn test_best_of_candidates() {
    let mut allocator = allocator();
    // Free blocks of 112, 96 and 104 bytes in one bucket, separated by
    // allocated guards.
    let mut held = Vec::new();
    let mut freed = Vec::new();
    for size in [104, 88, 96] {
      freed.push(allocator.allocate(size).unwrap());
      held.push(allocator.allocate(8).unwrap());
    }
    for ptr in &freed {
      unsafe { allocator.release(ptr.as_ptr()) };
    }

    // 88 bytes need a 96-byte block: the exact fit wins over the more
    // recently freed 104-byte block.
    let ptr = allocator.allocate(88).unwrap();
    assert_eq!(ptr, freed[1]);
  }

  #[test]
  fn test_exhaustion_keeps_heap_valid() {
    let mut allocator = SegregatedAllocator::with_config(
      ArenaSource::new(2048),
      AllocatorConfig::default().with_check_each_operation(true),
    );
    let mut ptrs = Vec::new();
    while let Some(ptr) = allocator.allocate(100) {
      ptrs.push(ptr);
    }
    assert!(!ptrs.is_empty());
    assert!(allocator.allocate(4096).is_none());
    allocator.check(false).unwrap();

    for ptr in ptrs {
      unsafe { allocator.release(ptr.as_ptr()) };
    }
    let report = allocator.check(false).unwrap();
    assert_eq!(report.free_blocks, 1);
    assert!(allocator.allocate(100).is_some());
  }

  #[test]
  fn test_initialization_failure() {
    let mut allocator = SegregatedAllocator::new(ArenaSource::new(8));
    assert!(matches!(
      allocator.initialize(),
      Err(InitError::Sentinels { .. })
    ));
    assert!(allocator.allocate(8).is_none());

    let mut allocator = SegregatedAllocator::new(ArenaSource::new(64));
    assert!(matches!(
      allocator.initialize(),
      Err(InitError::InitialExtension { bytes: 256, .. })
    ));
    assert!(allocator.is_initialized());
    allocator.check(false).unwrap();
    // The sentinels are in place, so a small request can still grow the heap.
    assert!(allocator.allocate(8).is_some());
    allocator.check(false).unwrap();
  }

  #[test]
  fn test_reallocate() {
    let mut allocator = allocator();
    unsafe {
      let ptr = allocator.reallocate(ptr::null_mut(), 32).unwrap();
      fill(ptr, 32, 0x5A);

      let grown = allocator.reallocate(ptr.as_ptr(), 500).unwrap();
      assert!(holds(grown, 32, 0x5A));
      assert!(allocator.usable_size(grown.as_ptr()) >= 500);

      let shrunk = allocator.reallocate(grown.as_ptr(), 8).unwrap();
      assert!(holds(shrunk, 8, 0x5A));

      assert!(allocator.reallocate(shrunk.as_ptr(), 0).is_none());
    }
    let report = allocator.check(false).unwrap();
    assert_eq!(report.free_blocks, 1);
  }

  #[test]
  fn test_reallocate_failure_keeps_block() {
    let mut allocator = SegregatedAllocator::new(ArenaSource::new(1024));
    let ptr = allocator.allocate(64).unwrap();
    fill(ptr, 64, 0x77);

    assert!(unsafe { allocator.reallocate(ptr.as_ptr(), 4096) }.is_none());
    assert!(holds(ptr, 64, 0x77));
    allocator.check(false).unwrap();
  }

  #[test]
  fn test_allocate_zeroed() {
    let mut allocator = allocator();
    let dirty = allocator.allocate(160).unwrap();
    fill(dirty, 160, 0xFF);
    unsafe { allocator.release(dirty.as_ptr()) };

    let ptr = allocator.allocate_zeroed(20, 8).unwrap();
    assert_eq!(ptr, dirty);
    assert!(holds(ptr, 160, 0));

    assert!(allocator.allocate_zeroed(usize::MAX, 2).is_none());
    assert!(allocator.allocate_zeroed(0, 8).is_none());
  }

  #[test]
  fn test_double_release_is_flagged() {
    let mut allocator = SegregatedAllocator::new(ArenaSource::new(4096));
    let a = allocator.allocate(24).unwrap();
    let _b = allocator.allocate(24).unwrap();

    unsafe {
      allocator.release(a.as_ptr());
      allocator.check(false).unwrap();
      allocator.release(a.as_ptr());
    }
    assert!(matches!(
      allocator.check(false),
      Err(HeapViolation::Relisted { .. })
    ));
  }

  #[test]
  #[should_panic(expected = "heap corruption detected")]
  fn test_check_each_operation_panics() {
    let mut allocator = allocator();
    let a = allocator.allocate(24).unwrap();
    let _b = allocator.allocate(24).unwrap();
    unsafe {
      allocator.release(a.as_ptr());
      allocator.release(a.as_ptr());
    }
  }

  #[test]
  fn test_mixed_workload() {
    let mut allocator = allocator();
    let mut live: Vec<(NonNull<u8>, usize, u8)> = Vec::new();
    let mut seed = 0x2545_F491_u32;
    let mut next = || {
      seed ^= seed << 13;
      seed ^= seed >> 17;
      seed ^= seed << 5;
      seed
    };

    for round in 0..2000 {
      let roll = next();
      if live.is_empty() || roll % 3 != 0 {
        let size = (next() % 600) as usize + 1;
        let ptr = allocator.allocate(size).unwrap();
        let byte = round as u8;
        fill(ptr, size, byte);
        live.push((ptr, size, byte));
      } else {
        let index = next() as usize % live.len();
        let (ptr, size, byte) = live.swap_remove(index);
        assert!(holds(ptr, size, byte));
        if roll % 2 == 0 {
          unsafe { allocator.release(ptr.as_ptr()) };
        } else {
          let new_size = (next() % 900) as usize + 1;
          let moved = unsafe { allocator.reallocate(ptr.as_ptr(), new_size) }.unwrap();
          assert!(holds(moved, size.min(new_size), byte));
          fill(moved, new_size, byte);
          live.push((moved, new_size, byte));
        }
      }
    }

    for (ptr, size, byte) in live {
      assert!(holds(ptr, size, byte));
      unsafe { allocator.release(ptr.as_ptr()) };
    }
    let report = allocator.check(false).unwrap();
    assert_eq!(report.free_blocks, 1);
    assert_eq!(report.blocks, 1);
  }

  #[test]
  fn test_sbrk_backed_allocator() {
    // The break is shared with the rest of the process; losing the race to
    // another mover shows up as a failed allocation, never as corruption.
    let Ok(source) = SbrkSource::new() else {
      return;
    };
    let mut allocator = SegregatedAllocator::new(source);
    if let Some(ptr) = allocator.allocate(64) {
      fill(ptr, 64, 0x42);
      assert!(holds(ptr, 64, 0x42));
      unsafe { allocator.release(ptr.as_ptr()) };
    }
    allocator.check(false).unwrap();
  }
}
