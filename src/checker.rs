//! Heap consistency checking and inspection.
//!
//! [`SegregatedAllocator::check`] validates the heap twice, independently:
//!
//! 1. a linear walk from the prologue to the epilogue, following block sizes;
//! 2. a walk of every bucket of the segregated free list, following links.
//!
//! Both walks must agree on which blocks are free. The first violation found
//! is returned with the offset of the block it concerns.

use std::{collections::HashSet, fmt};

use log::info;
use snafu::{OptionExt as _, Snafu, ensure};

use crate::{
  align::ALIGNMENT,
  allocator::SegregatedAllocator,
  block::{Block, DSIZE, MIN_BLOCK_SIZE, Tag, WSIZE},
  seglist::{BUCKET_COUNT, Links, bucket_index},
  source::MemorySource,
};

/// A broken heap invariant and where it was found.
///
/// Offsets are payload offsets from the start of the memory source unless
/// stated otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum HeapViolation {
  #[snafu(display("bad prologue at {offset:#x}"))]
  BadPrologue { offset: usize },
  #[snafu(display("bad epilogue header at {offset:#x}"))]
  BadEpilogue { offset: usize },
  #[snafu(display("block {offset:#x} is not inside the heap"))]
  OutOfBounds { offset: usize },
  #[snafu(display("block {offset:#x} is not 8-byte aligned"))]
  Misaligned { offset: usize },
  #[snafu(display("block {offset:#x} has invalid size {size}"))]
  BadSize { offset: usize, size: usize },
  #[snafu(display("block {offset:#x}: header {header:#x} does not match footer {footer:#x}"))]
  TagMismatch {
    offset: usize,
    header: u32,
    footer: u32,
  },
  #[snafu(display("free block {offset:#x} is not coalesced with its free predecessor"))]
  Uncoalesced { offset: usize },
  #[snafu(display("heap walk covers {walked} bytes but the heap holds {heap_size}"))]
  SizeMismatch { walked: usize, heap_size: usize },
  #[snafu(display("allocated block {offset:#x} is linked into bucket {bucket}"))]
  AllocatedInFreeList { offset: usize, bucket: usize },
  #[snafu(display("block {offset:#x} is in bucket {bucket} but belongs in bucket {expected}"))]
  WrongBucket {
    offset: usize,
    bucket: usize,
    expected: usize,
  },
  #[snafu(display("block {offset:#x} is reached twice while walking bucket {bucket}"))]
  Relisted { offset: usize, bucket: usize },
  #[snafu(display("block {offset:#x} in bucket {bucket} has a stale back link"))]
  BrokenLink { offset: usize, bucket: usize },
  #[snafu(display("block {offset:#x} in bucket {bucket} is not a free block of the heap"))]
  StrayListEntry { offset: usize, bucket: usize },
  #[snafu(display("heap holds {in_heap} free blocks but the buckets list {in_lists}"))]
  FreeCountMismatch { in_heap: usize, in_lists: usize },
}

impl HeapViolation {
  /// Offset of the offending block, when the violation concerns one.
  pub fn offset(&self) -> Option<usize> {
    match *self {
      Self::BadPrologue { offset }
      | Self::BadEpilogue { offset }
      | Self::OutOfBounds { offset }
      | Self::Misaligned { offset }
      | Self::BadSize { offset, .. }
      | Self::TagMismatch { offset, .. }
      | Self::Uncoalesced { offset }
      | Self::AllocatedInFreeList { offset, .. }
      | Self::WrongBucket { offset, .. }
      | Self::Relisted { offset, .. }
      | Self::BrokenLink { offset, .. }
      | Self::StrayListEntry { offset, .. } => Some(offset),
      Self::SizeMismatch { .. } | Self::FreeCountMismatch { .. } => None,
    }
  }
}

/// Summary of a consistent heap. Sentinels are not counted as blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapReport {
  pub heap_size: usize,
  pub blocks: usize,
  pub free_blocks: usize,
  pub free_bytes: usize,
  pub allocated_bytes: usize,
}

/// State of a block as seen by a heap walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
  Allocated,
  /// Marked free; `None` when the block is missing from every bucket.
  Free(Option<Links>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  pub block: Block,
  pub size: usize,
  pub state: BlockState,
}

impl<S: MemorySource> SegregatedAllocator<S> {
  /// Cross-validates the heap and the free lists.
  ///
  /// With `verbose`, every block and every bucket member is logged at `info`
  /// level as it is checked. An uninitialized allocator is trivially
  /// consistent.
  pub fn check(
    &self,
    verbose: bool,
  ) -> Result<HeapReport, HeapViolation> {
    let Some(prologue) = self.prologue else {
      return Ok(HeapReport::default());
    };
    if verbose {
      info!("heap ({} bytes), prologue at {:#x}:", self.heap.size(), prologue.payload());
    }

    let expected = Some(Tag::pack(DSIZE, true));
    ensure!(
      self.try_tag(prologue.header()) == expected
        && self.try_tag(prologue.footer(DSIZE)) == expected,
      BadPrologueSnafu {
        offset: prologue.payload(),
      }
    );

    let (report, free_blocks) = self.check_blocks(prologue, verbose)?;
    self.check_buckets(&free_blocks, verbose)?;
    Ok(report)
  }

  fn check_blocks(
    &self,
    prologue: Block,
    verbose: bool,
  ) -> Result<(HeapReport, HashSet<Block>), HeapViolation> {
    let heap_size = self.heap.size();
    let mut report = HeapReport {
      heap_size,
      ..HeapReport::default()
    };
    let mut free_blocks = HashSet::new();
    let mut prev_free = false;
    let mut block = prologue.next(DSIZE);

    loop {
      let offset = block.payload();
      let header = self
        .try_tag(block.header())
        .context(OutOfBoundsSnafu { offset })?;
      let size = header.size();

      if size == 0 {
        ensure!(
          header.is_allocated(),
          BadEpilogueSnafu {
            offset: block.header(),
          }
        );
        let walked = block.header() + WSIZE;
        ensure!(
          walked == heap_size,
          SizeMismatchSnafu { walked, heap_size }
        );
        break;
      }

      ensure!(offset % ALIGNMENT == 0, MisalignedSnafu { offset });
      ensure!(
        size % ALIGNMENT == 0 && size >= MIN_BLOCK_SIZE,
        BadSizeSnafu { offset, size }
      );
      // The epilogue header must still fit behind the block.
      ensure!(
        self.heap.contains(block.header(), size + WSIZE),
        OutOfBoundsSnafu { offset }
      );
      let footer = self.heap.tag(block.footer(size));
      ensure!(
        footer == header,
        TagMismatchSnafu {
          offset,
          header: header.raw(),
          footer: footer.raw(),
        }
      );
      if verbose {
        info!("{offset:#010x}: header {header:?} footer {footer:?}");
      }

      let free = !header.is_allocated();
      ensure!(!(free && prev_free), UncoalescedSnafu { offset });
      if free {
        free_blocks.insert(block);
        report.free_blocks += 1;
        report.free_bytes += size;
      } else {
        report.allocated_bytes += size;
      }
      report.blocks += 1;
      prev_free = free;
      block = block.next(size);
    }

    Ok((report, free_blocks))
  }

  fn check_buckets(
    &self,
    free_blocks: &HashSet<Block>,
    verbose: bool,
  ) -> Result<(), HeapViolation> {
    let mut seen = HashSet::new();

    for bucket in 0..BUCKET_COUNT {
      if verbose {
        info!("bucket {bucket}:");
      }
      let mut prev = None;
      for block in self.free_list.bucket(bucket) {
        let offset = block.payload();
        ensure!(seen.insert(block), RelistedSnafu { offset, bucket });
        let header = self
          .try_tag(block.header())
          .context(OutOfBoundsSnafu { offset })?;
        ensure!(
          !header.is_allocated(),
          AllocatedInFreeListSnafu { offset, bucket }
        );
        ensure!(
          free_blocks.contains(&block),
          StrayListEntrySnafu { offset, bucket }
        );
        let expected = bucket_index(header.size());
        ensure!(
          expected == bucket,
          WrongBucketSnafu {
            offset,
            bucket,
            expected,
          }
        );
        let links = self.free_list.links(block);
        ensure!(
          links.is_some_and(|links| links.prev == prev),
          BrokenLinkSnafu { offset, bucket }
        );
        if verbose {
          info!("  {offset:#010x}: {header:?} {links:?}");
        }
        prev = Some(block);
      }
    }

    ensure!(
      seen.len() == free_blocks.len(),
      FreeCountMismatchSnafu {
        in_heap: free_blocks.len(),
        in_lists: seen.len(),
      }
    );
    Ok(())
  }

  fn try_tag(
    &self,
    offset: usize,
  ) -> Option<Tag> {
    self.heap.try_word(offset).map(Tag::from_raw)
  }

  /// Walks the heap from the first block after the prologue to the epilogue.
  ///
  /// The walk stops early at the first header it cannot read.
  pub fn blocks(&self) -> Blocks<'_, S> {
    Blocks {
      allocator: self,
      cursor: self.prologue.map(|prologue| prologue.next(DSIZE)),
    }
  }

  /// A printable picture of every block and every bucket.
  pub fn dump(&self) -> HeapDump<'_, S> {
    HeapDump { allocator: self }
  }
}

pub struct Blocks<'a, S: MemorySource> {
  allocator: &'a SegregatedAllocator<S>,
  cursor: Option<Block>,
}

impl<S: MemorySource> Iterator for Blocks<'_, S> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<Self::Item> {
    let block = self.cursor.take()?;
    let header = self.allocator.try_tag(block.header())?;
    let size = header.size();
    if size == 0 {
      return None;
    }

    let state = if header.is_allocated() {
      BlockState::Allocated
    } else {
      BlockState::Free(self.allocator.free_list.links(block))
    };
    self.cursor = Some(block.next(size));
    Some(BlockInfo { block, size, state })
  }
}

pub struct HeapDump<'a, S: MemorySource> {
  allocator: &'a SegregatedAllocator<S>,
}

impl<S: MemorySource> fmt::Display for HeapDump<'_, S> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    let allocator = self.allocator;
    writeln!(f, "heap: {} bytes", allocator.heap_size())?;
    for info in allocator.blocks() {
      let flag = match info.state {
        BlockState::Allocated => 'a',
        BlockState::Free(_) => 'f',
      };
      writeln!(f, "  {:#010x}: [{}:{flag}]", info.block.payload(), info.size)?;
    }

    // A corrupted bucket may cycle; never print more entries than exist.
    let limit = allocator.free_list.len();
    for bucket in 0..BUCKET_COUNT {
      if allocator.free_list.head(bucket).is_none() {
        continue;
      }
      write!(f, "bucket {bucket}:")?;
      for block in allocator.free_list.bucket(bucket).take(limit) {
        write!(f, " {:#x}", block.payload())?;
      }
      writeln!(f)?;
    }
    Ok(())
  }
}
