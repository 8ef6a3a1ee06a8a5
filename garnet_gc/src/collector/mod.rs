//! The collection driver: gather roots, mark, finalize, sweep.

pub(crate) mod conservative;

use std::ptr::NonNull;
use std::time::Instant;

use smallvec::SmallVec;

use crate::cell::{CellState, RawCell};
use crate::heap::{Heap, HeapBlock};
use crate::roots::{RootOrigin, RootSet};
use crate::stats::{self, CycleStats};
use crate::trace::Visitor;

/// What a collection cycle is allowed to assume about liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionType {
    /// Normal cycle: gather roots, mark, then reclaim the unmarked.
    CollectGarbage,
    /// Teardown cycle: skip marking entirely so every cell that does not
    /// insist on surviving is finalized and reclaimed.
    CollectEverything,
}

/// Clears the `collecting_garbage` flag when dropped, so the flag is
/// restored on every exit from [`Heap::collect_garbage`] — the deferral
/// early return, normal completion, and an unwinding finalizer alike.
struct CollectingGuard {
    flag: *mut bool,
}

impl Drop for CollectingGuard {
    fn drop(&mut self) {
        unsafe { *self.flag = false };
    }
}

/// The marking visitor. Seeded from the root set, then drained LIFO; depth
/// first is fine because only reachability matters.
struct MarkingVisitor {
    work_queue: Vec<RawCell>,
}

impl MarkingVisitor {
    fn new() -> Self {
        Self {
            work_queue: Vec::with_capacity(256),
        }
    }

    fn mark_all_live_cells(&mut self) {
        while let Some(cell) = self.work_queue.pop() {
            cell.visit_edges(self);
        }
    }
}

impl Visitor for MarkingVisitor {
    fn visit(&mut self, cell: RawCell) {
        debug_assert_eq!(cell.state(), CellState::Live);
        if cell.is_marked() {
            return;
        }
        cell.set_marked(true);
        self.work_queue.push(cell);
    }
}

impl Heap {
    /// Run a collection cycle.
    ///
    /// A `CollectGarbage` request made while collection is deferred is
    /// recorded and executed when the last deferral scope ends;
    /// `CollectEverything` ignores deferrals. Re-entering while a cycle is
    /// in flight is a bug and aborts.
    pub fn collect_garbage(&mut self, collection_type: CollectionType, print_report: bool) {
        assert!(!self.collecting_garbage, "re-entrant garbage collection");
        self.collecting_garbage = true;
        let _guard = CollectingGuard {
            flag: &mut self.collecting_garbage,
        };

        let start = Instant::now();

        if collection_type == CollectionType::CollectGarbage {
            if self.gc_deferrals > 0 {
                self.should_gc_when_deferral_ends = true;
                return;
            }
            let mut roots = RootSet::new();
            self.gather_roots(&mut roots);
            self.mark_live_cells(&roots);
        }
        self.finalize_unmarked_cells();
        self.sweep_dead_cells(print_report, start);
    }

    /// Collect every root source into `roots`: runtime roots, the
    /// conservative scan, live handles, and marked-vector contents.
    pub(crate) fn gather_roots(&self, roots: &mut RootSet) {
        let mut vm_roots = Vec::new();
        self.runtime.gather_roots(&mut vm_roots);
        for cell in vm_roots {
            roots.add(cell, RootOrigin::Vm);
        }

        if self.config.conservative_scan {
            conservative::gather_conservative_roots(self, roots);
        }

        let registry = self.roots.borrow();
        for cell in registry.handle_cells() {
            roots.add(cell, RootOrigin::Handle);
        }
        for cell in registry.marked_vector_contents() {
            roots.add(cell, RootOrigin::MarkedVector);
        }
        drop(registry);

        if self.config.trace {
            eprintln!("gather_roots:");
            for (cell, origin) in roots.iter() {
                eprintln!("  + {:#x} ({})", cell.addr(), origin.description());
            }
        }
    }

    fn mark_live_cells(&mut self, roots: &RootSet) {
        let mut visitor = MarkingVisitor::new();
        for (cell, _) in roots.iter() {
            visitor.visit(cell);
        }

        // The interpreter's references are walked here rather than gathered
        // as roots; the visitor reaches its internal state transitively.
        self.runtime.visit_edges(&mut visitor);

        visitor.mark_all_live_cells();

        for cell in self.uprooted_cells.drain(..) {
            cell.set_marked(false);
        }
    }

    fn finalize_unmarked_cells(&mut self) {
        self.for_each_block(|block| {
            let block = unsafe { block.as_ref() };
            block.for_each_cell_in_state(CellState::Live, |cell| {
                let cell = RawCell::from_non_null(cell);
                if !cell.is_marked() && !cell.must_survive_garbage_collection() {
                    cell.finalize();
                }
            });
        });
    }

    fn sweep_dead_cells(&mut self, print_report: bool, start: Instant) {
        let mut empty_blocks: SmallVec<[NonNull<HeapBlock>; 32]> = SmallVec::new();
        let mut full_blocks_that_became_usable: SmallVec<[NonNull<HeapBlock>; 32]> =
            SmallVec::new();

        let mut collected_cells = 0usize;
        let mut live_cells = 0usize;
        let mut collected_cell_bytes = 0usize;
        let mut live_cell_bytes = 0usize;

        let mut blocks: Vec<NonNull<HeapBlock>> = Vec::new();
        self.for_each_block(|block| blocks.push(block));

        for block_ptr in &blocks {
            let block = block_ptr.as_ptr();
            let block_was_full = unsafe { (*block).is_full() };
            let cell_size = unsafe { (*block).cell_size() };

            let mut dead: SmallVec<[NonNull<_>; 32]> = SmallVec::new();
            let mut block_has_live_cells = false;
            unsafe {
                (*block).for_each_cell_in_state(CellState::Live, |cell_ptr| {
                    let cell = RawCell::from_non_null(cell_ptr);
                    if !cell.is_marked() && !cell.must_survive_garbage_collection() {
                        dead.push(cell_ptr);
                    } else {
                        cell.set_marked(false);
                        block_has_live_cells = true;
                        live_cells += 1;
                        live_cell_bytes += cell_size;
                    }
                });
            }

            for cell_ptr in dead {
                if self.config.trace {
                    eprintln!("  ~ {:#x}", cell_ptr.as_ptr() as usize);
                }
                unsafe { (*block).deallocate(cell_ptr) };
                collected_cells += 1;
                collected_cell_bytes += cell_size;
            }

            if !block_has_live_cells {
                empty_blocks.push(*block_ptr);
            } else if block_was_full != unsafe { (*block).is_full() } {
                full_blocks_that_became_usable.push(*block_ptr);
            }
        }

        // Weak containers observe the final liveness while dead slots are
        // still addressable: after deallocation, before any block is freed.
        for container in self.roots.borrow().weak_containers() {
            container.remove_dead_cells();
        }

        let freed_blocks = empty_blocks.len();
        for block_ptr in empty_blocks {
            let index = unsafe { block_ptr.as_ref().allocator_index() };
            if self.config.trace {
                eprintln!(
                    " - heap block empty @ {:#x}: cell_size={}",
                    block_ptr.as_ptr() as usize,
                    unsafe { block_ptr.as_ref().cell_size() }
                );
            }
            self.allocators[index].block_did_become_empty(block_ptr);
        }

        for block_ptr in full_blocks_that_became_usable {
            let index = unsafe { block_ptr.as_ref().allocator_index() };
            self.allocators[index].block_did_become_usable(block_ptr);
        }

        self.gc_bytes_threshold = live_cell_bytes.max(self.config.gc_min_bytes_threshold);

        let cycle = CycleStats {
            live_cells,
            live_bytes: live_cell_bytes,
            collected_cells,
            collected_bytes: collected_cell_bytes,
            live_blocks: self.block_count(),
            freed_blocks,
            duration: start.elapsed(),
        };
        self.stats.record_collection(cycle);

        if print_report {
            stats::print_report(&cycle);
        }
    }
}
