use crate::growth::GrowthError;

/// Why an allocation or heap initialization did not produce memory.
#[derive(Debug, thiserror::Error)]
pub enum AllocError {
  #[error("zero-sized allocation request")]
  ZeroSize,
  #[error("request of {0} bytes overflows the block size")]
  SizeOverflow(usize),
  #[error("out of memory: cannot grow heap by {requested} bytes")]
  OutOfMemory {
    requested: usize,
    #[source]
    source: GrowthError,
  },
}

/// A heap invariant found broken by [`Heap::verify`](crate::Heap::verify).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeapCorruption {
  #[error("heap base {base:#x} lies outside the heap")]
  BaseOutOfBounds { base: usize },
  #[error("block {block:#x} is not aligned to the alignment unit")]
  Misaligned { block: usize },
  #[error("block {block:#x} extends past the heap bounds")]
  OutOfBounds { block: usize },
  #[error("block {block:#x} has invalid size {size}")]
  BadBlockSize { block: usize, size: usize },
  #[error("block {block:#x}: header {header:#x} does not match footer {footer:#x}")]
  TagMismatch {
    block: usize,
    header: u64,
    footer: u64,
  },
  #[error("prologue is malformed: {tag:#x}")]
  BadPrologue { tag: u64 },
  #[error("epilogue is malformed: {tag:#x}")]
  BadEpilogue { tag: u64 },
  #[error("free blocks {block:#x} and its successor were not coalesced")]
  UncoalescedFree { block: usize },
}
