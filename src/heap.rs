use std::{
  cmp,
  ptr::{self, NonNull},
};

use crate::{
  ALIGNMENT, MIN_BLOCK_SIZE, PROLOGUE_SIZE, WSIZE,
  block::{self, Tag},
  config::{HeapConfig, SearchMode},
  error::AllocError,
  growth::HeapGrowth,
};

/// Size of the block that serves a `size`-byte request: payload plus one
/// alignment unit of header and footer, rounded up to the alignment unit and
/// never below [`MIN_BLOCK_SIZE`].
///
/// Returns `None` when the arithmetic overflows.
pub fn block_size_for(size: usize) -> Option<usize> {
  if size <= ALIGNMENT {
    return Some(MIN_BLOCK_SIZE);
  }

  size
    .checked_add(2 * ALIGNMENT - 1)
    .map(|padded| padded & !(ALIGNMENT - 1))
}

/// A boundary-tag heap on top of a [`HeapGrowth`] service.
///
/// The heap starts with a prologue block and ends with an epilogue header:
///
/// ```text
///   ┌─────┬──────────┬──────────┬─────────┬─────────┬─────┬──────────┐
///   │ pad │ pro hdr  │ pro ftr  │ block 1 │ block 2 │ ... │ epi hdr  │
///   │  0  │ 16 / 1   │ 16 / 1   │         │         │     │  0 / 1   │
///   └─────┴──────────┴──────────┴─────────┴─────────┴─────┴──────────┘
///                    ▲
///                    └── base
/// ```
///
/// Each heap owns its growth service, so independent heaps can live side by
/// side. A heap is single-threaded: every operation takes `&mut self`.
pub struct Heap<G: HeapGrowth> {
  growth: G,
  base: *mut u8,
  config: HeapConfig,
}

impl<G: HeapGrowth> Heap<G> {
  /// Initializes a heap with the default configuration.
  pub fn init(growth: G) -> Result<Self, AllocError> {
    Self::with_config(growth, HeapConfig::default())
  }

  pub fn with_config(
    growth: G,
    config: HeapConfig,
  ) -> Result<Self, AllocError> {
    let mut heap = Self {
      growth,
      base: ptr::null_mut(),
      config,
    };
    heap.reinit()?;
    Ok(heap)
  }

  /// Lays down the prologue and epilogue and grows the heap by one chunk.
  ///
  /// Running this again starts a fresh heap right after whatever the growth
  /// service already handed out; blocks of the previous heap are abandoned.
  /// On failure the heap must not be used until a later `reinit` succeeds.
  pub fn reinit(&mut self) -> Result<(), AllocError> {
    let start = self.grow(4 * WSIZE)?.as_ptr();

    unsafe {
      block::put(start, Tag::from_bits(0));
      block::put(start.add(WSIZE), Tag::pack(PROLOGUE_SIZE, true));
      block::put(start.add(2 * WSIZE), Tag::pack(PROLOGUE_SIZE, true));
      block::put(start.add(3 * WSIZE), Tag::pack(0, true));
    }
    self.base = start.wrapping_add(2 * WSIZE);

    self.extend(self.config.chunk_size())?;

    log::debug!(
      "heap initialized at {:?}, {} bytes",
      self.base,
      self.growth.size()
    );
    Ok(())
  }

  /// Allocates a block with room for at least `size` bytes.
  ///
  /// The returned pointer is aligned to [`ALIGNMENT`].
  pub fn try_allocate(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    if size == 0 {
      return Err(AllocError::ZeroSize);
    }

    let asize = block_size_for(size).ok_or(AllocError::SizeOverflow(size))?;

    let bp = match self.config.search() {
      SearchMode::Grow => self.extend(asize)?,
      SearchMode::FirstFit => match self.find_fit(asize) {
        Some(bp) => bp,
        None => self.extend(cmp::max(asize, self.config.chunk_size()))?,
      },
    };

    unsafe { Self::place(bp, asize) };

    log::trace!("allocate({size}) -> {bp:?}, block size {asize}");

    // Block pointers are derived from non-null growth results.
    Ok(unsafe { NonNull::new_unchecked(bp) })
  }

  /// Like [`try_allocate`](Self::try_allocate), but returns null for zero-sized
  /// requests and when the heap cannot grow.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    match self.try_allocate(size) {
      Ok(bp) => bp.as_ptr(),
      Err(AllocError::ZeroSize) => ptr::null_mut(),
      Err(err) => {
        log::warn!("allocate({size}) failed: {err}");
        ptr::null_mut()
      },
    }
  }

  /// Marks the block at `ptr` as free. Null is ignored.
  ///
  /// Under [`SearchMode::Grow`] the block is only re-tagged; its space is never
  /// handed out again. Releasing a block twice rewrites the same tags.
  ///
  /// # Safety
  /// `ptr` must be null or a pointer returned by this heap. Under
  /// [`SearchMode::FirstFit`] it must also not have been released already.
  pub unsafe fn release(
    &mut self,
    ptr: *mut u8,
  ) {
    if ptr.is_null() {
      return;
    }

    unsafe {
      let size = block::get(block::header(ptr)).size();
      block::set_tags(ptr, Tag::pack(size, false));

      log::trace!("release({ptr:?}), block size {size}");

      if self.config.search() == SearchMode::FirstFit {
        Self::coalesce(ptr);
      }
    }
  }

  /// Resizes the allocation at `ptr` to `size` bytes.
  ///
  /// - `size == 0` releases `ptr` and returns null.
  /// - A null `ptr` is the same as [`allocate`](Self::allocate).
  /// - If `size` maps to the block size `ptr` already has, `ptr` is returned.
  /// - Otherwise the contents move to a new block and the old one is released.
  ///   If no new block can be had, null is returned and `ptr` is left intact.
  ///
  /// # Safety
  /// `ptr` must be null or a live pointer returned by this heap.
  pub unsafe fn reallocate(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> *mut u8 {
    if size == 0 {
      unsafe { self.release(ptr) };
      return ptr::null_mut();
    }

    if ptr.is_null() {
      return self.allocate(size);
    }

    let old_size = unsafe { self.block_size(ptr) };
    if block_size_for(size) == Some(old_size) {
      log::trace!("reallocate({ptr:?}, {size}) kept in place");
      return ptr;
    }

    let new = self.allocate(size);
    if new.is_null() {
      return ptr::null_mut();
    }

    let payload = old_size - 2 * WSIZE;
    unsafe {
      ptr::copy_nonoverlapping(ptr, new, cmp::min(size, payload));
      self.release(ptr);
    }

    log::trace!("reallocate({ptr:?}, {size}) -> {new:?}");
    new
  }

  /// Total size of the block owning `ptr`, header and footer included.
  ///
  /// # Safety
  /// `ptr` must be a pointer returned by this heap.
  pub unsafe fn block_size(
    &self,
    ptr: *mut u8,
  ) -> usize {
    unsafe { block::get(block::header(ptr)) }.size()
  }

  /// Block pointer of the prologue, the starting point of every heap walk.
  pub fn base(&self) -> *mut u8 {
    self.base
  }

  pub fn growth(&self) -> &G {
    &self.growth
  }

  /// Mutable access to the growth service, e.g. to
  /// [`reset`](crate::SimHeap::reset) it before a [`reinit`](Self::reinit).
  pub fn growth_mut(&mut self) -> &mut G {
    &mut self.growth
  }

  pub fn config(&self) -> &HeapConfig {
    &self.config
  }

  pub fn into_growth(self) -> G {
    self.growth
  }

  fn grow(
    &mut self,
    delta: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    self
      .growth
      .grow(delta)
      .map_err(|source| AllocError::OutOfMemory {
        requested: delta,
        source,
      })
  }

  /// Grows the heap by `size` bytes and turns the new region into one free
  /// block, moving the epilogue to the new end.
  ///
  /// The new block's header overwrites the old epilogue.
  fn extend(
    &mut self,
    size: usize,
  ) -> Result<*mut u8, AllocError> {
    let bp = self.grow(size)?.as_ptr();

    unsafe {
      block::set_tags(bp, Tag::pack(size, false));
      block::put(block::header(block::next_block(bp)), Tag::pack(0, true));
    }

    log::debug!("extended heap by {size} bytes at {bp:?}");

    Ok(match self.config.search() {
      SearchMode::Grow => bp,
      SearchMode::FirstFit => unsafe { Self::coalesce(bp) },
    })
  }

  /// First free block of at least `asize` bytes, walking from the prologue.
  fn find_fit(
    &self,
    asize: usize,
  ) -> Option<*mut u8> {
    let mut bp = self.base;

    unsafe {
      loop {
        let tag = block::get(block::header(bp));
        if tag.size() == 0 {
          return None;
        }
        if !tag.is_allocated() && tag.size() >= asize {
          return Some(bp);
        }
        bp = block::next_block(bp);
      }
    }
  }

  /// Marks the first `asize` bytes of the free block `bp` allocated, splitting
  /// off the rest as a free block when it can stand on its own.
  ///
  /// # Safety
  /// `bp` must be a free block of at least `asize` bytes.
  unsafe fn place(
    bp: *mut u8,
    asize: usize,
  ) {
    unsafe {
      let csize = block::get(block::header(bp)).size();

      if csize - asize >= MIN_BLOCK_SIZE {
        block::set_tags(bp, Tag::pack(asize, true));
        let rest = block::next_block(bp);
        block::set_tags(rest, Tag::pack(csize - asize, false));
      } else {
        block::set_tags(bp, Tag::pack(csize, true));
      }
    }
  }

  /// Merges the free block `bp` with its free neighbours and returns the block
  /// pointer of the merged block.
  ///
  /// # Safety
  /// `bp` must be a free block strictly between prologue and epilogue.
  unsafe fn coalesce(bp: *mut u8) -> *mut u8 {
    unsafe {
      let prev_alloc = block::get(bp.sub(2 * WSIZE)).is_allocated();
      let next = block::next_block(bp);
      let next_alloc = block::get(block::header(next)).is_allocated();
      let mut size = block::get(block::header(bp)).size();

      match (prev_alloc, next_alloc) {
        (true, true) => bp,
        (true, false) => {
          size += block::get(block::header(next)).size();
          block::set_tags(bp, Tag::pack(size, false));
          bp
        },
        (false, true) => {
          let prev = block::prev_block(bp);
          size += block::get(block::header(prev)).size();
          block::set_tags(prev, Tag::pack(size, false));
          prev
        },
        (false, false) => {
          let prev = block::prev_block(bp);
          size += block::get(block::header(prev)).size();
          size += block::get(block::header(next)).size();
          block::set_tags(prev, Tag::pack(size, false));
          prev
        },
      }
    }
  }
}

impl<G: HeapGrowth + core::fmt::Debug> core::fmt::Debug for Heap<G> {
  fn fmt(
    &self,
    f: &mut core::fmt::Formatter<'_>,
  ) -> core::fmt::Result {
    f.debug_struct("Heap")
      .field("growth", &self.growth)
      .field("base", &self.base)
      .field("config", &self.config)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    SimHeap,
    growth::{GrowthError, HeapGrowth},
  };

  fn heap() -> Heap<SimHeap> {
    Heap::init(SimHeap::with_capacity(1 << 20).unwrap()).unwrap()
  }

  fn first_fit_heap() -> Heap<SimHeap> {
    let config = HeapConfig::new().with_search(SearchMode::FirstFit);
    Heap::with_config(SimHeap::with_capacity(1 << 20).unwrap(), config).unwrap()
  }

  #[test]
  fn test_block_size_for() {
    assert_eq!(block_size_for(1), Some(32));
    assert_eq!(block_size_for(8), Some(32));
    assert_eq!(block_size_for(16), Some(32));
    assert_eq!(block_size_for(17), Some(48));
    assert_eq!(block_size_for(50), Some(80));
    assert_eq!(block_size_for(100), Some(128));
    assert_eq!(block_size_for(112), Some(128));
    assert_eq!(block_size_for(113), Some(144));
    assert_eq!(block_size_for(usize::MAX), None);
  }

  #[test]
  fn test_init_layout() {
    let heap = heap();
    let low = heap.growth().low();

    assert_eq!(heap.base(), low.wrapping_add(16));
    assert_eq!(heap.growth().size(), 32 + 4096);

    unsafe {
      assert_eq!(block::get(low), Tag::from_bits(0));
      assert_eq!(block::get(low.add(8)), Tag::pack(16, true));
      assert_eq!(block::get(low.add(16)), Tag::pack(16, true));

      // The initial chunk sits where the first epilogue used to be.
      let chunk = block::next_block(heap.base());
      assert_eq!(chunk, low.add(32));
      assert_eq!(block::get(block::header(chunk)), Tag::pack(4096, false));
      assert_eq!(block::get(block::footer(chunk)), Tag::pack(4096, false));

      let epilogue = heap.growth().high().sub(7);
      assert_eq!(block::get(epilogue), Tag::pack(0, true));
    }
  }

  #[test]
  fn test_init_out_of_memory() {
    let err = Heap::init(SimHeap::with_capacity(16).unwrap()).unwrap_err();
    assert!(matches!(
      err,
      AllocError::OutOfMemory {
        requested: 32,
        source: GrowthError::Exhausted { .. },
      }
    ));

    // The sentinels fit but the first chunk does not.
    let err = Heap::init(SimHeap::with_capacity(64).unwrap()).unwrap_err();
    assert!(matches!(
      err,
      AllocError::OutOfMemory { requested: 4096, .. }
    ));
  }

  #[test]
  fn test_allocate_rounds_block_size() {
    let mut heap = heap();

    let p = heap.allocate(100);
    assert!(!p.is_null());
    assert_eq!(p as usize % ALIGNMENT, 0);
    assert_eq!(unsafe { heap.block_size(p) }, 128);

    let q = heap.allocate(8);
    assert_eq!(q as usize % ALIGNMENT, 0);
    assert_eq!(unsafe { heap.block_size(q) }, 32);
  }

  #[test]
  fn test_allocate_zero() {
    let mut heap = heap();
    let size = heap.growth().size();

    assert!(heap.allocate(0).is_null());
    assert!(matches!(heap.try_allocate(0), Err(AllocError::ZeroSize)));
    assert_eq!(heap.growth().size(), size);
  }

  #[test]
  fn test_allocate_grows_by_block_size() {
    let mut heap = heap();
    let before = heap.growth().size();

    let p = heap.allocate(200);
    assert_eq!(heap.growth().size(), before + 224);

    unsafe {
      assert_eq!(block::get(block::header(p)), Tag::pack(224, true));
      assert_eq!(block::get(block::footer(p)), Tag::pack(224, true));
      assert_eq!(block::get(block::header(block::next_block(p))), Tag::pack(0, true));
    }
  }

  #[test]
  fn test_allocate_out_of_memory() {
    let mut heap = Heap::init(SimHeap::with_capacity(32 + 4096 + 64).unwrap()).unwrap();

    assert!(!heap.allocate(40).is_null());
    let size = heap.growth().size();

    assert!(heap.allocate(40).is_null());
    assert!(matches!(
      heap.try_allocate(40),
      Err(AllocError::OutOfMemory { requested: 64, .. })
    ));
    assert_eq!(heap.growth().size(), size);
  }

  #[test]
  fn test_allocate_huge_request() {
    let mut heap = heap();
    let size = heap.growth().size();

    assert!(matches!(
      heap.try_allocate(usize::MAX),
      Err(AllocError::SizeOverflow(usize::MAX))
    ));
    assert!(heap.allocate(usize::MAX).is_null());
    assert!(matches!(
      heap.try_allocate(isize::MAX as usize),
      Err(AllocError::OutOfMemory { .. })
    ));
    assert!(heap.allocate(isize::MAX as usize).is_null());

    assert_eq!(heap.growth().size(), size);
    assert!(heap.verify().is_ok());
  }

  #[test]
  fn test_first_fit_huge_request() {
    let mut heap = first_fit_heap();
    let size = heap.growth().size();

    assert!(heap.allocate(usize::MAX).is_null());
    assert!(heap.allocate(isize::MAX as usize).is_null());
    assert_eq!(heap.growth().size(), size);
  }

  #[test]
  fn test_reallocate_huge_request_keeps_block() {
    let mut heap = heap();
    let p = heap.allocate(24);

    unsafe {
      ptr::write_bytes(p, 0x3C, 24);
      let size = heap.growth().size();

      assert!(heap.reallocate(p, usize::MAX).is_null());
      assert!(heap.reallocate(p, isize::MAX as usize).is_null());

      assert_eq!(heap.growth().size(), size);
      assert_eq!(block::get(block::header(p)), Tag::pack(48, true));
      assert!(std::slice::from_raw_parts(p, 24).iter().all(|b| *b == 0x3C));
    }
  }

  #[test]
  fn test_release_does_not_reuse() {
    let mut heap = heap();

    let p = heap.allocate(200);
    let high = heap.growth().high();
    unsafe { heap.release(p) };

    let q = heap.allocate(200);
    assert_ne!(p, q);
    assert!(heap.growth().high() > high);

    unsafe {
      assert_eq!(block::get(block::header(p)), Tag::pack(224, false));
      assert_eq!(block::get(block::footer(p)), Tag::pack(224, false));
    }
  }

  #[test]
  fn test_release_null_and_twice() {
    let mut heap = heap();
    unsafe { heap.release(ptr::null_mut()) };

    let p = heap.allocate(24);
    unsafe {
      heap.release(p);
      let tags = (block::get(block::header(p)), block::get(block::footer(p)));
      heap.release(p);
      assert_eq!(
        (block::get(block::header(p)), block::get(block::footer(p))),
        tags
      );
    }
  }

  #[test]
  fn test_place_splits_large_block() {
    let mut heap = first_fit_heap();

    // The first request carves its block out of the initial 4096-byte chunk.
    let p = heap.allocate(100);
    unsafe {
      assert_eq!(p, block::next_block(heap.base()));
      assert_eq!(heap.block_size(p), 128);

      let rest = block::next_block(p);
      assert_eq!(block::get(block::header(rest)), Tag::pack(4096 - 128, false));
      assert_eq!(block::get(block::footer(rest)), Tag::pack(4096 - 128, false));
    }
  }

  #[test]
  fn test_place_keeps_small_remainder() {
    let config = HeapConfig::new()
      .with_search(SearchMode::FirstFit)
      .with_chunk_size(48);
    let mut heap = Heap::with_config(SimHeap::with_capacity(4096).unwrap(), config).unwrap();

    // A 32-byte block leaves 16 bytes, too little to split off.
    let p = heap.allocate(8);
    assert_eq!(unsafe { heap.block_size(p) }, 48);
  }

  #[test]
  fn test_reallocate_zero_releases() {
    let mut heap = heap();
    let p = heap.allocate(64);

    unsafe {
      assert!(heap.reallocate(p, 0).is_null());
      assert!(!block::get(block::header(p)).is_allocated());
    }
  }

  #[test]
  fn test_reallocate_null_allocates() {
    let mut heap = heap();

    let p = unsafe { heap.reallocate(ptr::null_mut(), 100) };
    assert!(!p.is_null());
    assert_eq!(unsafe { heap.block_size(p) }, 128);
  }

  #[test]
  fn test_reallocate_same_block_size() {
    let mut heap = heap();
    let p = heap.allocate(50);
    let size = heap.growth().size();

    unsafe {
      ptr::write_bytes(p, 0x5A, 50);

      let r = heap.reallocate(p, 50);
      assert_eq!(r, p);
      assert_eq!(heap.growth().size(), size);

      // 60 bytes still fit the same 80-byte block.
      assert_eq!(heap.reallocate(p, 60), p);
      assert!(std::slice::from_raw_parts(p, 50).iter().all(|b| *b == 0x5A));
    }
  }

  #[test]
  fn test_reallocate_moves_contents() {
    let mut heap = heap();
    let p = heap.allocate(10);

    unsafe {
      ptr::write_bytes(p, 0xAB, 10);

      let r = heap.reallocate(p, 100);
      assert_ne!(r, p);
      assert_eq!(heap.block_size(r), 128);
      assert!(std::slice::from_raw_parts(r, 10).iter().all(|b| *b == 0xAB));
      assert!(!block::get(block::header(p)).is_allocated());
    }
  }

  #[test]
  fn test_reallocate_shrink_copies_prefix() {
    let mut heap = heap();
    let p = heap.allocate(200);

    unsafe {
      for i in 0..200 {
        p.add(i).write(i as u8);
      }

      let r = heap.reallocate(p, 20);
      assert_eq!(heap.block_size(r), 48);
      for i in 0..20 {
        assert_eq!(r.add(i).read(), i as u8);
      }
    }
  }

  #[test]
  fn test_reallocate_out_of_memory_keeps_block() {
    let mut heap = Heap::init(SimHeap::with_capacity(32 + 4096 + 32).unwrap()).unwrap();
    let p = heap.allocate(8);

    unsafe {
      ptr::write_bytes(p, 0x11, 8);

      assert!(heap.reallocate(p, 100).is_null());
      assert!(block::get(block::header(p)).is_allocated());
      assert!(std::slice::from_raw_parts(p, 8).iter().all(|b| *b == 0x11));
    }
  }

  #[test]
  fn test_first_fit_reuses_released_block() {
    let mut heap = first_fit_heap();

    let p = heap.allocate(200);
    let _guard = heap.allocate(16);
    let size = heap.growth().size();

    unsafe { heap.release(p) };
    let q = heap.allocate(200);

    assert_eq!(p, q);
    assert_eq!(heap.growth().size(), size);
  }

  #[test]
  fn test_first_fit_coalesces_neighbours() {
    let mut heap = first_fit_heap();

    let a = heap.allocate(40);
    let b = heap.allocate(40);
    let c = heap.allocate(40);
    let _guard = heap.allocate(40);

    unsafe {
      heap.release(a);
      heap.release(c);
      heap.release(b);

      // a, b and c merge into one 3 * 64 byte block.
      assert_eq!(block::get(block::header(a)), Tag::pack(192, false));
      assert_eq!(block::get(block::footer(a)), Tag::pack(192, false));
    }

    let d = heap.allocate(150);
    assert_eq!(d, a);
  }

  #[test]
  fn test_first_fit_extends_on_miss() {
    let mut heap = first_fit_heap();
    let before = heap.growth().size();

    let p = heap.allocate(8000);
    assert!(!p.is_null());

    // The trailing free chunk merges with the new region.
    assert_eq!(p, unsafe { block::next_block(heap.base()) });
    assert_eq!(heap.growth().size(), before + 8016);
  }

  #[test]
  fn test_reinit_after_reset() {
    let mut heap = heap();
    heap.allocate(1000);

    heap.growth_mut().reset();
    heap.reinit().unwrap();

    assert_eq!(heap.base(), heap.growth().low().wrapping_add(16));
    assert_eq!(heap.growth().size(), 32 + 4096);
  }

  #[test]
  fn test_reinit_without_reset() {
    let mut heap = heap();
    let old_base = heap.base();

    heap.reinit().unwrap();

    assert!(heap.base() > old_base);
    assert_eq!(heap.growth().size(), 2 * (32 + 4096));
  }
}
