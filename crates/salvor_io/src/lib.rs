//! # Salvor IO
//!
//! Block-source adapters for the Salvor recovery engine: a seek+read
//! reader with 512-byte sector alignment for raw devices, a zero-copy
//! mmap reader with automatic fallback, and chunk iterators that apply
//! inter-chunk overlap and empty-block skipping.

mod chunks;
mod reader;

pub use chunks::{
    ChunkIter, ChunkOptions, DEFAULT_BLOCK_SIZE, DEFAULT_OVERLAP, RangeChunkIter, is_all_zero,
};
pub use reader::{DiskReader, MmapReader, Reader};
