//! Raw memory block bookkeeping for unsafe natives
//!
//! Natives that hand out raw addresses allocate blocks here; any address
//! inside a block resolves back to the block's start.

use crate::{VmError, VmResult};
use std::collections::BTreeMap;

/// First address handed out; 0 stays invalid
const FIRST_ADDRESS: u64 = 1;

/// Sparse map from block start address to block size
#[derive(Debug, Clone)]
pub struct MemoryBlockTable {
    blocks: BTreeMap<u64, u64>,
    next_addr: u64,
}

impl MemoryBlockTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            blocks: BTreeMap::new(),
            next_addr: FIRST_ADDRESS,
        }
    }

    /// Reserve a block of `size` bytes; returns its start address
    ///
    /// Zero-sized requests still get a one-byte block so every allocation
    /// has a distinct address.
    pub fn allocate(&mut self, size: u64) -> u64 {
        let size = size.max(1);
        let start = self.next_addr;
        self.next_addr = start.saturating_add(size);
        self.blocks.insert(start, size);
        start
    }

    /// Release the block starting at `addr`; returns its size
    pub fn free(&mut self, addr: u64) -> VmResult<u64> {
        self.blocks
            .remove(&addr)
            .ok_or(VmError::InvalidMemoryAccess(addr))
    }

    /// Start of the block containing `addr`
    pub fn block_addr(&self, addr: u64) -> VmResult<u64> {
        match self.blocks.range(..=addr).next_back() {
            Some((&start, &size)) if addr - start < size => Ok(start),
            _ => Err(VmError::InvalidMemoryAccess(addr)),
        }
    }

    /// Size of the block starting at `addr`
    pub fn block_size(&self, addr: u64) -> Option<u64> {
        self.blocks.get(&addr).copied()
    }

    /// Number of live blocks
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether no block is allocated
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl Default for MemoryBlockTable {
    fn default() -> Self {
        Self::new()
    }
}
