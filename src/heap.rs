//! The heap region: one contiguous, growable byte range addressed by offset.
//!
//! Every metadata access goes through [`HeapRegion::word`] and
//! [`HeapRegion::put_word`], which are bounds-checked against the current
//! size of the memory source. A corrupted size can therefore make the
//! allocator panic, but never read or write outside of its own region.

use std::ptr::NonNull;

use snafu::ensure;

use crate::{
  block::{Block, Tag, WSIZE},
  source::{ExhaustedSnafu, MemorySource, SourceError},
};

/// Boundary tags are 32 bits wide, which caps the heap size.
pub const MAX_HEAP_SIZE: usize = u32::MAX as usize & !7;

#[derive(Debug)]
pub struct HeapRegion<S> {
  source: S,
}

impl<S: MemorySource> HeapRegion<S> {
  pub fn new(source: S) -> Self {
    Self { source }
  }

  pub fn source(&self) -> &S {
    &self.source
  }

  pub fn into_source(self) -> S {
    self.source
  }

  /// Bytes currently owned by the heap.
  pub fn size(&self) -> usize {
    self.source.size()
  }

  /// Whether `len` bytes starting at `offset` lie inside the heap.
  pub fn contains(
    &self,
    offset: usize,
    len: usize,
  ) -> bool {
    offset
      .checked_add(len)
      .is_some_and(|end| end <= self.size())
  }

  /// Grows the heap by `increment` bytes, returning the previous size.
  pub fn extend(
    &mut self,
    increment: usize,
  ) -> Result<usize, SourceError> {
    let size = self.size();
    ensure!(
      size
        .checked_add(increment)
        .is_some_and(|end| end <= MAX_HEAP_SIZE),
      ExhaustedSnafu {
        increment,
        size,
        limit: MAX_HEAP_SIZE,
      }
    );
    self.source.extend(increment)
  }

  pub fn word(
    &self,
    offset: usize,
  ) -> u32 {
    self.assert_word(offset);
    unsafe {
      self
        .source
        .base()
        .as_ptr()
        .add(offset)
        .cast::<u32>()
        .read()
    }
  }

  pub fn put_word(
    &mut self,
    offset: usize,
    value: u32,
  ) {
    self.assert_word(offset);
    unsafe {
      self
        .source
        .base()
        .as_ptr()
        .add(offset)
        .cast::<u32>()
        .write(value);
    }
  }

  /// Reads a word if it lies inside the heap and is word aligned.
  pub fn try_word(
    &self,
    offset: usize,
  ) -> Option<u32> {
    (offset % WSIZE == 0 && self.contains(offset, WSIZE)).then(|| self.word(offset))
  }

  pub fn tag(
    &self,
    offset: usize,
  ) -> Tag {
    Tag::from_raw(self.word(offset))
  }

  pub fn put_tag(
    &mut self,
    offset: usize,
    tag: Tag,
  ) {
    self.put_word(offset, tag.raw());
  }

  pub fn header(
    &self,
    block: Block,
  ) -> Tag {
    self.tag(block.header())
  }

  /// Footer of `block`, located with the size stored in its header.
  pub fn footer(
    &self,
    block: Block,
  ) -> Tag {
    self.tag(block.footer(self.header(block).size()))
  }

  /// Writes matching header and footer for `block`.
  pub fn set_tags(
    &mut self,
    block: Block,
    size: usize,
    allocated: bool,
  ) {
    let tag = Tag::pack(size, allocated);
    self.put_tag(block.header(), tag);
    self.put_tag(block.footer(size), tag);
  }

  pub fn next_block(
    &self,
    block: Block,
  ) -> Block {
    block.next(self.header(block).size())
  }

  pub fn prev_block(
    &self,
    block: Block,
  ) -> Block {
    block.prev(self.tag(block.prev_footer()).size())
  }

  /// Allocation bit of the block physically before `block`.
  pub fn prev_allocated(
    &self,
    block: Block,
  ) -> bool {
    self.tag(block.prev_footer()).is_allocated()
  }

  pub fn payload_ptr(
    &self,
    block: Block,
  ) -> NonNull<u8> {
    debug_assert!(self.contains(block.payload(), 0));
    unsafe { self.source.base().add(block.payload()) }
  }

  /// Maps a payload pointer back to its block descriptor.
  ///
  /// # Panics
  ///
  /// Panics if `ptr` does not point inside the heap.
  pub fn block_of(
    &self,
    ptr: *mut u8,
  ) -> Block {
    let base = self.source.base().as_ptr().addr();
    let offset = ptr.addr().wrapping_sub(base);
    assert!(
      offset >= WSIZE && offset < self.size(),
      "pointer {ptr:p} does not belong to this heap"
    );
    Block::from_payload(offset)
  }

  fn assert_word(
    &self,
    offset: usize,
  ) {
    assert!(
      offset % WSIZE == 0 && self.contains(offset, WSIZE),
      "word at {offset:#x} is misaligned or outside of the heap ({} bytes)",
      self.size()
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::source::ArenaSource;

  fn region(capacity: usize) -> HeapRegion<ArenaSource> {
    HeapRegion::new(ArenaSource::new(capacity))
  }

  #[test]
  fn test_words() {
    let mut heap = region(64);
    heap.extend(32).unwrap();

    heap.put_word(4, 0xDEAD_BEEF);
    assert_eq!(heap.word(4), 0xDEAD_BEEF);
    assert_eq!(heap.try_word(4), Some(0xDEAD_BEEF));
    assert_eq!(heap.try_word(5), None);
    assert_eq!(heap.try_word(32), None);
  }

  #[test]
  #[should_panic(expected = "outside of the heap")]
  fn test_word_out_of_bounds() {
    let mut heap = region(64);
    heap.extend(16).unwrap();
    heap.word(16);
  }

  #[test]
  fn test_tags_and_neighbors() {
    let mut heap = region(128);
    heap.extend(96).unwrap();

    let first = Block::from_payload(16);
    heap.set_tags(first, 32, true);
    let second = heap.next_block(first);
    assert_eq!(second, Block::from_payload(48));
    heap.set_tags(second, 40, false);

    assert_eq!(heap.header(first), Tag::pack(32, true));
    assert_eq!(heap.footer(first), Tag::pack(32, true));
    assert_eq!(heap.footer(second), Tag::pack(40, false));
    assert_eq!(heap.prev_block(second), first);
    assert!(heap.prev_allocated(second));
  }

  #[test]
  fn test_payload_ptr_roundtrip() {
    let mut heap = region(64);
    heap.extend(64).unwrap();

    let block = Block::from_payload(24);
    let ptr = heap.payload_ptr(block);
    assert_eq!(ptr.as_ptr().addr() % 8, 0);
    assert_eq!(heap.block_of(ptr.as_ptr()), block);
  }

  #[test]
  #[should_panic(expected = "does not belong to this heap")]
  fn test_foreign_pointer() {
    let mut heap = region(64);
    heap.extend(64).unwrap();
    let mut foreign = 0u64;
    heap.block_of((&raw mut foreign).cast());
  }

  #[test]
  fn test_size_limit() {
    let mut heap = region(64);
    let err = heap.extend(MAX_HEAP_SIZE + 8).unwrap_err();
    assert!(matches!(err, SourceError::Exhausted { .. }));
    assert_eq!(heap.size(), 0);
  }
}
