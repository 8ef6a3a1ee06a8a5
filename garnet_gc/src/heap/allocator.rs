//! Per-size-class cell allocators.

use std::ptr::NonNull;

use crate::cell::CellHeader;
use crate::heap::block::HeapBlock;

/// Owns the blocks of one cell size.
///
/// Blocks are partitioned into *usable* (at least one free slot) and
/// *full*. Allocation always serves from a usable block, creating a new
/// block when none exists. Sweep notifies the allocator when a block
/// empties (the block is released) or when a full block regains a slot
/// (the block re-enters the usable set).
pub struct CellAllocator {
    index: usize,
    cell_size: usize,
    usable_blocks: Vec<NonNull<HeapBlock>>,
    full_blocks: Vec<NonNull<HeapBlock>>,
}

impl CellAllocator {
    /// Create an allocator for `cell_size` cells. `index` is its position
    /// in the heap's allocator list, recorded in every block it creates.
    pub fn new(index: usize, cell_size: usize) -> Self {
        assert!(cell_size >= HeapBlock::MIN_POSSIBLE_CELL_SIZE);
        Self {
            index,
            cell_size,
            usable_blocks: Vec::new(),
            full_blocks: Vec::new(),
        }
    }

    /// The fixed cell size served by this allocator.
    #[inline]
    pub fn cell_size(&self) -> usize {
        self.cell_size
    }

    /// Take a free slot from a usable block, creating a block if needed.
    pub fn allocate_cell(&mut self) -> NonNull<CellHeader> {
        if self.usable_blocks.is_empty() {
            self.usable_blocks
                .push(HeapBlock::create(self.index, self.cell_size));
        }

        let block_ptr = *self.usable_blocks.last().unwrap();
        let block = unsafe { &mut *block_ptr.as_ptr() };
        let cell = block
            .allocate()
            .expect("usable block must have a free slot");

        if block.is_full() {
            self.usable_blocks.pop();
            self.full_blocks.push(block_ptr);
        }
        cell
    }

    /// Sweep found `block` empty: release it.
    pub fn block_did_become_empty(&mut self, block: NonNull<HeapBlock>) {
        let removed = remove_block(&mut self.usable_blocks, block)
            || remove_block(&mut self.full_blocks, block);
        assert!(removed, "block not owned by this allocator");
        unsafe { HeapBlock::destroy(block) };
    }

    /// Sweep freed a slot in a previously-full `block`: it is usable again.
    pub fn block_did_become_usable(&mut self, block: NonNull<HeapBlock>) {
        let removed = remove_block(&mut self.full_blocks, block);
        assert!(removed, "block was not in the full set");
        self.usable_blocks.push(block);
    }

    /// Invoke `f` for every block owned by this allocator.
    pub fn for_each_block<F>(&self, f: &mut F)
    where
        F: FnMut(NonNull<HeapBlock>),
    {
        for &block in self.usable_blocks.iter().chain(self.full_blocks.iter()) {
            f(block);
        }
    }

    /// Number of blocks owned by this allocator.
    pub fn block_count(&self) -> usize {
        self.usable_blocks.len() + self.full_blocks.len()
    }
}

impl Drop for CellAllocator {
    fn drop(&mut self) {
        for &block in self.usable_blocks.iter().chain(self.full_blocks.iter()) {
            unsafe { HeapBlock::destroy(block) };
        }
    }
}

fn remove_block(blocks: &mut Vec<NonNull<HeapBlock>>, block: NonNull<HeapBlock>) -> bool {
    match blocks.iter().position(|&b| b == block) {
        Some(i) => {
            blocks.swap_remove(i);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{Cell, CellOps, CellState};
    use crate::trace::Visitor;

    struct Stub;

    unsafe impl Cell for Stub {
        fn class_name(&self) -> &'static str {
            "Stub"
        }

        fn visit_edges(&self, _visitor: &mut dyn Visitor) {}
    }

    fn make_live(cell: NonNull<CellHeader>) {
        unsafe {
            cell.as_ptr()
                .write(CellHeader::new(CellOps::of::<Stub>(), CellState::Live));
        }
    }

    #[test]
    fn test_allocates_lazily() {
        let allocator = CellAllocator::new(0, 64);
        assert_eq!(allocator.block_count(), 0);
    }

    #[test]
    fn test_serves_cells_of_fixed_size() {
        let mut allocator = CellAllocator::new(0, 64);
        let a = allocator.allocate_cell();
        make_live(a);
        let b = allocator.allocate_cell();
        make_live(b);

        assert_ne!(a, b);
        assert_eq!(allocator.block_count(), 1);
        let block = unsafe { &*HeapBlock::from_cell(a.as_ptr()) };
        assert_eq!(block.cell_size(), 64);
    }

    #[test]
    fn test_full_block_migrates_and_new_block_created() {
        let mut allocator = CellAllocator::new(0, 1024);
        let per_block = {
            let cell = allocator.allocate_cell();
            make_live(cell);
            unsafe { &*HeapBlock::from_cell(cell.as_ptr()) }.cell_count()
        };

        for _ in 1..per_block {
            make_live(allocator.allocate_cell());
        }
        assert_eq!(allocator.block_count(), 1);
        assert!(allocator.usable_blocks.is_empty());

        // The next allocation must come from a fresh block.
        make_live(allocator.allocate_cell());
        assert_eq!(allocator.block_count(), 2);
        assert_eq!(allocator.usable_blocks.len(), 1);
    }

    #[test]
    fn test_block_becomes_usable_again() {
        let mut allocator = CellAllocator::new(0, 1024);
        let first = allocator.allocate_cell();
        make_live(first);
        let block_ptr =
            NonNull::new(HeapBlock::from_cell(first.as_ptr())).unwrap();
        let per_block = unsafe { block_ptr.as_ref() }.cell_count();
        for _ in 1..per_block {
            make_live(allocator.allocate_cell());
        }
        assert_eq!(allocator.full_blocks.len(), 1);

        unsafe { (*block_ptr.as_ptr()).deallocate(first) };
        allocator.block_did_become_usable(block_ptr);
        assert_eq!(allocator.usable_blocks.len(), 1);
        assert!(allocator.full_blocks.is_empty());
    }

    #[test]
    fn test_empty_block_is_released() {
        let mut allocator = CellAllocator::new(0, 64);
        let cell = allocator.allocate_cell();
        make_live(cell);
        let block_ptr = NonNull::new(HeapBlock::from_cell(cell.as_ptr())).unwrap();

        unsafe { (*block_ptr.as_ptr()).deallocate(cell) };
        allocator.block_did_become_empty(block_ptr);
        assert_eq!(allocator.block_count(), 0);
    }
}
