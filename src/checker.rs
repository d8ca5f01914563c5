//! Heap consistency checking.
//!
//! [`Heap::check_heap`] is the debugging hook: it logs what it finds and never
//! fails. [`Heap::verify`] walks every block and reports the first broken
//! invariant as a [`HeapCorruption`].

use std::marker::PhantomData;

use crate::{
  ALIGNMENT, MIN_BLOCK_SIZE, PROLOGUE_SIZE, WSIZE,
  block::{self, Tag},
  config::SearchMode,
  error::HeapCorruption,
  growth::HeapGrowth,
  heap::Heap,
};

/// One block seen by a heap walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  pub ptr: *mut u8,
  pub header: Tag,
  pub footer: Tag,
}

impl BlockInfo {
  pub fn size(&self) -> usize {
    self.header.size()
  }

  pub fn is_allocated(&self) -> bool {
    self.header.is_allocated()
  }
}

/// Summary of a successful [`Heap::verify`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapReport {
  /// Blocks between prologue and epilogue.
  pub blocks: usize,
  pub allocated_blocks: usize,
  pub free_blocks: usize,
  pub allocated_bytes: usize,
  pub free_bytes: usize,
  pub heap_size: usize,
}

/// Lazy walk over the blocks of a heap, prologue first, epilogue excluded.
///
/// Every block is bounds-checked before its tags are read. The walk stops
/// after the first error it yields.
pub struct Blocks<'h> {
  next: *mut u8,
  low: usize,
  high: usize,
  epilogue: Option<*mut u8>,
  done: bool,
  _heap: PhantomData<&'h ()>,
}

impl Blocks<'_> {
  /// Address of the epilogue header, once the walk has reached it.
  pub fn epilogue(&self) -> Option<*mut u8> {
    self.epilogue
  }

  fn fail(
    &mut self,
    err: HeapCorruption,
  ) -> Option<Result<BlockInfo, HeapCorruption>> {
    self.done = true;
    Some(Err(err))
  }
}

impl Iterator for Blocks<'_> {
  type Item = Result<BlockInfo, HeapCorruption>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.done {
      return None;
    }

    let bp = self.next;
    let addr = bp as usize;

    if addr % ALIGNMENT != 0 {
      return self.fail(HeapCorruption::Misaligned { block: addr });
    }
    if addr < self.low + WSIZE || addr - 1 > self.high {
      return self.fail(HeapCorruption::OutOfBounds { block: addr });
    }

    let header = unsafe { block::get(block::header(bp)) };
    let size = header.size();

    if size == 0 {
      self.epilogue = Some(block::header(bp));
      self.done = true;
      return None;
    }

    // The footer's last byte must not reach past the heap.
    match addr.checked_add(size).and_then(|end| end.checked_sub(WSIZE + 1)) {
      Some(end) if end <= self.high => {},
      _ => return self.fail(HeapCorruption::OutOfBounds { block: addr }),
    }

    let footer = unsafe { block::get(block::footer(bp)) };
    self.next = bp.wrapping_add(size);

    Some(Ok(BlockInfo {
      ptr: bp,
      header,
      footer,
    }))
  }
}

impl<G: HeapGrowth> Heap<G> {
  /// Walks the heap block by block starting at the prologue.
  ///
  /// The walk can be restarted any time by calling `blocks` again.
  pub fn blocks(&self) -> Blocks<'_> {
    let growth = self.growth();
    Blocks {
      next: self.base(),
      low: growth.low() as usize,
      high: growth.high() as usize,
      epilogue: None,
      done: growth.size() == 0,
      _heap: PhantomData,
    }
  }

  /// Checks every block from prologue to epilogue.
  ///
  /// Verified: the base lies in the heap and is aligned, the prologue is
  /// intact, each block has matching header and footer, a size of at least
  /// [`MIN_BLOCK_SIZE`] and stays in bounds, the walk ends at an epilogue in the
  /// heap's last word, and under [`SearchMode::FirstFit`] no two free blocks
  /// are adjacent.
  pub fn verify(&self) -> Result<HeapReport, HeapCorruption> {
    let growth = self.growth();
    let base = self.base();

    if !growth.contains(base) {
      return Err(HeapCorruption::BaseOutOfBounds {
        base: base as usize,
      });
    }
    if base as usize % ALIGNMENT != 0 {
      return Err(HeapCorruption::Misaligned {
        block: base as usize,
      });
    }

    let coalesced = self.config().search() == SearchMode::FirstFit;
    let mut report = HeapReport {
      heap_size: growth.size(),
      ..HeapReport::default()
    };
    let mut prev_free: Option<*mut u8> = None;

    let mut blocks = self.blocks();
    for (i, info) in blocks.by_ref().enumerate() {
      let info = info?;

      if info.header != info.footer {
        return Err(HeapCorruption::TagMismatch {
          block: info.ptr as usize,
          header: info.header.bits(),
          footer: info.footer.bits(),
        });
      }

      if i == 0 {
        if info.header != Tag::pack(PROLOGUE_SIZE, true) {
          return Err(HeapCorruption::BadPrologue {
            tag: info.header.bits(),
          });
        }
        continue;
      }

      if info.size() < MIN_BLOCK_SIZE {
        return Err(HeapCorruption::BadBlockSize {
          block: info.ptr as usize,
          size: info.size(),
        });
      }

      report.blocks += 1;
      if info.is_allocated() {
        report.allocated_blocks += 1;
        report.allocated_bytes += info.size();
        prev_free = None;
      } else {
        if let Some(prev) = prev_free.filter(|_| coalesced) {
          return Err(HeapCorruption::UncoalescedFree {
            block: prev as usize,
          });
        }
        report.free_blocks += 1;
        report.free_bytes += info.size();
        prev_free = Some(info.ptr);
      }
    }

    let last_word = growth.high().wrapping_sub(WSIZE - 1);
    let epilogue = unsafe { block::get(last_word) };
    if blocks.epilogue() != Some(last_word) || epilogue != Tag::pack(0, true) {
      return Err(HeapCorruption::BadEpilogue {
        tag: epilogue.bits(),
      });
    }

    Ok(report)
  }

  /// Debugging hook: logs the state of the heap tagged with the caller's
  /// `line`. Does nothing for line 0 and in release builds.
  ///
  /// Always returns `true`; problems only show up in the log.
  pub fn check_heap(
    &self,
    line: u32,
  ) -> bool {
    #[cfg(debug_assertions)]
    {
      if line != 0 {
        self.log_checks(line);
      }
    }

    #[cfg(not(debug_assertions))]
    let _ = line;

    true
  }

  #[cfg(debug_assertions)]
  fn log_checks(
    &self,
    line: u32,
  ) {
    use log::{debug, warn};

    fn verdict(
      ok: bool,
      yes: &'static str,
      no: &'static str,
    ) -> &'static str {
      if ok { yes } else { no }
    }

    let growth = self.growth();
    let bp = self.base();

    debug!(
      "[line {line}] heap: first byte {:?}, last byte {:?}, size {}",
      growth.low(),
      growth.high(),
      growth.size()
    );

    let in_heap = growth.contains(block::header(bp)) && growth.contains(bp);
    debug!(
      "[line {line}] {}",
      verdict(in_heap, "base is in heap", "base is not in heap")
    );
    if !in_heap {
      warn!("[line {line}] heap base {bp:?} is unusable, skipping remaining checks");
      return;
    }

    debug!(
      "[line {line}] {}",
      verdict(
        bp as usize % ALIGNMENT == 0,
        "base is aligned",
        "base is not aligned"
      )
    );

    unsafe {
      let header = block::get(block::header(bp));
      let footer_at = block::footer(bp);
      let tags_match = growth.contains(footer_at) && block::get(footer_at) == header;
      debug!(
        "[line {line}] {}",
        verdict(
          tags_match,
          "prologue header and footer are the same",
          "prologue header and footer are different"
        )
      );

      debug!(
        "[line {line}] {}",
        verdict(
          header == Tag::pack(PROLOGUE_SIZE, true),
          "prologue is correct",
          "prologue is incorrect"
        )
      );

      debug!(
        "[line {line}] {}",
        verdict(
          growth.contains(block::next_block(bp)),
          "next block pointer is within heap bounds",
          "next block pointer is outside of heap"
        )
      );

      let prev_footer = bp.wrapping_sub(2 * WSIZE);
      let prev_in_heap = growth.contains(prev_footer) && growth.contains(block::prev_block(bp));
      debug!(
        "[line {line}] {}",
        verdict(
          prev_in_heap,
          "previous block pointer is within heap bounds",
          "previous block pointer is outside of heap"
        )
      );

      let last_word = growth.high().wrapping_sub(WSIZE - 1);
      let epilogue_ok =
        growth.contains(last_word) && block::get(last_word) == Tag::pack(0, true);
      debug!(
        "[line {line}] {}",
        verdict(epilogue_ok, "epilogue is correct", "epilogue is incorrect")
      );
    }

    match self.verify() {
      Ok(report) => debug!("[line {line}] {report:?}"),
      Err(err) => warn!("[line {line}] heap corrupted: {err}"),
    }
  }
}
