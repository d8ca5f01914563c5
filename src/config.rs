use crate::MIN_BLOCK_SIZE;

/// Size of the free region laid down by heap initialization, and the minimum
/// growth step of [`SearchMode::FirstFit`].
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 12;

/// How an allocation request finds room for its block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
  /// Never look at existing blocks: grow the heap by exactly the block size.
  ///
  /// Released blocks are tagged free but never handed out again, so the heap
  /// only ever grows.
  #[default]
  Grow,
  /// Walk the heap from its base and use the first free block that fits,
  /// growing only on a miss. Release coalesces adjacent free blocks.
  FirstFit,
}

/// Tunables of a [`Heap`](crate::Heap).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
  chunk_size: usize,
  search: SearchMode,
}

impl HeapConfig {
  pub const fn new() -> Self {
    Self {
      chunk_size: DEFAULT_CHUNK_SIZE,
      search: SearchMode::Grow,
    }
  }

  /// Sets the chunk size, rounded up to the alignment unit and no smaller
  /// than [`MIN_BLOCK_SIZE`].
  pub const fn with_chunk_size(
    mut self,
    chunk_size: usize,
  ) -> Self {
    let chunk_size = if chunk_size < MIN_BLOCK_SIZE {
      MIN_BLOCK_SIZE
    } else {
      chunk_size
    };
    self.chunk_size = crate::align!(chunk_size);
    self
  }

  pub const fn with_search(
    mut self,
    search: SearchMode,
  ) -> Self {
    self.search = search;
    self
  }

  pub const fn chunk_size(&self) -> usize {
    self.chunk_size
  }

  pub const fn search(&self) -> SearchMode {
    self.search
  }
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self::new()
  }
}
