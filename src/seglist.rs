//! Segregated free lists.
//!
//! Free blocks are partitioned into [`BUCKET_COUNT`] size classes whose upper
//! bounds double from 32 bytes:
//!
//! ```text
//!   bucket:   0     1     2      3      4      5       6       7       8       9
//!   sizes:  ≤32   ≤64   ≤128   ≤256   ≤512   ≤1024   ≤2048   ≤4096   ≤8192   >8192
//! ```
//!
//! Each bucket is a doubly linked list used as a stack: freed blocks are
//! pushed at the head. The links live in a side table keyed by block, so the
//! payload of a free block is never interpreted as list metadata.

use std::collections::HashMap;

use crate::block::Block;

pub const BUCKET_COUNT: usize = 10;

/// Upper bound (inclusive) of every bucket but the last.
const BUCKET_LIMITS: [usize; BUCKET_COUNT - 1] = [32, 64, 128, 256, 512, 1024, 2048, 4096, 8192];

/// Size class of a block of `size` bytes.
pub fn bucket_index(size: usize) -> usize {
  BUCKET_LIMITS
    .iter()
    .position(|&limit| size <= limit)
    .unwrap_or(BUCKET_COUNT - 1)
}

/// Neighbors of a free block inside its bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Links {
  pub prev: Option<Block>,
  pub next: Option<Block>,
}

#[derive(Debug, Default)]
pub struct SegregatedFreeList {
  heads: [Option<Block>; BUCKET_COUNT],
  links: HashMap<Block, Links>,
}

impl SegregatedFreeList {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of linked blocks across all buckets.
  pub fn len(&self) -> usize {
    self.links.len()
  }

  pub fn is_empty(&self) -> bool {
    self.links.is_empty()
  }

  pub fn head(
    &self,
    index: usize,
  ) -> Option<Block> {
    self.heads[index]
  }

  pub fn links(
    &self,
    block: Block,
  ) -> Option<Links> {
    self.links.get(&block).copied()
  }

  pub fn contains(
    &self,
    block: Block,
  ) -> bool {
    self.links.contains_key(&block)
  }

  /// Pushes `block` at the head of the bucket for `size`.
  pub fn insert(
    &mut self,
    block: Block,
    size: usize,
  ) {
    let index = bucket_index(size);
    let next = self.heads[index];
    if let Some(links) = next.and_then(|next| self.links.get_mut(&next)) {
      links.prev = Some(block);
    }
    self.links.insert(block, Links { prev: None, next });
    self.heads[index] = Some(block);
  }

  /// Unlinks `block` from the bucket for `size`.
  ///
  /// `size` must be the size the block had when it was inserted.
  ///
  /// # Panics
  ///
  /// Panics if `block` is not linked into any bucket.
  pub fn remove(
    &mut self,
    block: Block,
    size: usize,
  ) {
    let index = bucket_index(size);
    let Some(Links { prev, next }) = self.links.remove(&block) else {
      panic!("{block:?} is not linked into bucket {index}");
    };

    match prev.and_then(|prev| self.links.get_mut(&prev)) {
      Some(links) => links.next = next,
      None => self.heads[index] = next,
    }
    if let Some(links) = next.and_then(|next| self.links.get_mut(&next)) {
      links.prev = prev;
    }
  }

  #[cfg(test)]
  pub(crate) fn relink(
    &mut self,
    block: Block,
    links: Links,
  ) {
    self.links.insert(block, links);
  }

  /// Walks bucket `index` from head to tail.
  ///
  /// The walk follows the stored links blindly; a corrupted bucket may cycle.
  pub fn bucket(
    &self,
    index: usize,
  ) -> Bucket<'_> {
    Bucket {
      list: self,
      cursor: self.heads[index],
    }
  }

  /// Bounded approximate best fit.
  ///
  /// Scans the bucket matching `asize` and keeps the candidate with the
  /// least leftover among the first `candidates` blocks that fit. When that
  /// bucket has nothing that fits, the first fitting block of the next
  /// non-empty larger bucket is taken as is.
  pub fn find_fit(
    &self,
    asize: usize,
    candidates: usize,
    size_of: impl Fn(Block) -> usize,
  ) -> Option<Block> {
    let start = bucket_index(asize);

    let mut best: Option<(Block, usize)> = None;
    let mut examined = 0;
    for block in self.bucket(start) {
      let size = size_of(block);
      if size < asize {
        continue;
      }
      let leftover = size - asize;
      if best.is_none_or(|(_, best_leftover)| leftover < best_leftover) {
        best = Some((block, leftover));
      }
      examined += 1;
      if examined >= candidates || leftover == 0 {
        break;
      }
    }
    if let Some((block, _)) = best {
      return Some(block);
    }

    (start + 1..BUCKET_COUNT)
      .find_map(|index| self.bucket(index).find(|&block| size_of(block) >= asize))
  }
}

pub struct Bucket<'a> {
  list: &'a SegregatedFreeList,
  cursor: Option<Block>,
}

impl Iterator for Bucket<'_> {
  type Item = Block;

  fn next(&mut self) -> Option<Self::Item> {
    let block = self.cursor?;
    self.cursor = self.list.links(block).and_then(|links| links.next);
    Some(block)
  }
}
