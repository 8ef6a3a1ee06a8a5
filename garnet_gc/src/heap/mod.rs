//! The cell heap.
//!
//! A [`Heap`] owns one [`CellAllocator`] per size class and all the root
//! registries. Allocation rounds the request up to the smallest class that
//! fits and bumps a byte counter; crossing the counter's threshold triggers
//! a collection before the allocation proceeds.
//!
//! A heap is strictly single-threaded: it is owned by one runtime on one
//! thread, and collection stops that thread until the sweep completes.

mod allocator;
mod block;

pub use allocator::CellAllocator;
pub use block::{HeapBlock, HEAP_BLOCK_SIZE};

use std::cell::RefCell;
use std::ptr::NonNull;
use std::rc::Rc;

use garnet_core::StackInfo;

use crate::cell::{Cell, CellHeader, CellOps, CellSlot, CellState, GcPtr, RawCell};
use crate::collector::CollectionType;
use crate::config::GcConfig;
use crate::roots::{Handle, MarkedVector, RootRegistry, WeakContainer, WeakRegistration};
use crate::runtime::{NullRuntime, Runtime};
use crate::stats::GcStats;

/// Cell sizes served by the heap, ascending. Classes smaller than the
/// block's minimum cell size are skipped at heap construction.
pub const CELL_SIZE_CLASSES: &[usize] = &[16, 32, 64, 96, 128, 256, 512, 1024, 3072];

const _: () = assert!(
    HeapBlock::MIN_POSSIBLE_CELL_SIZE <= 24,
    "cell tracking uses too much slot space"
);

/// A mark-and-sweep heap of fixed-size cells.
pub struct Heap {
    pub(crate) config: GcConfig,
    pub(crate) allocators: Vec<CellAllocator>,
    pub(crate) roots: Rc<RefCell<RootRegistry>>,
    pub(crate) uprooted_cells: Vec<RawCell>,
    pub(crate) allocated_bytes_since_last_gc: usize,
    pub(crate) gc_bytes_threshold: usize,
    pub(crate) collecting_garbage: bool,
    pub(crate) gc_deferrals: usize,
    pub(crate) should_gc_when_deferral_ends: bool,
    pub(crate) runtime: Rc<dyn Runtime>,
    pub(crate) stack_info: StackInfo,
    pub(crate) stats: GcStats,
}

impl Heap {
    /// Create a heap with no runtime attached. Roots come from handles,
    /// marked vectors, and the conservative scan only.
    pub fn new(config: GcConfig) -> Self {
        Self::with_runtime(config, Rc::new(NullRuntime))
    }

    /// Create a heap owned by `runtime`. Must be called on the thread that
    /// will use the heap; the stack bounds are captured here.
    pub fn with_runtime(config: GcConfig, runtime: Rc<dyn Runtime>) -> Self {
        config.validate().expect("invalid GC configuration");

        let mut allocators = Vec::new();
        for &cell_size in CELL_SIZE_CLASSES {
            if cell_size < HeapBlock::MIN_POSSIBLE_CELL_SIZE {
                continue;
            }
            allocators.push(CellAllocator::new(allocators.len(), cell_size));
        }

        let gc_bytes_threshold = config.gc_min_bytes_threshold;
        Self {
            config,
            allocators,
            roots: Rc::new(RefCell::new(RootRegistry::default())),
            uprooted_cells: Vec::new(),
            allocated_bytes_since_last_gc: 0,
            gc_bytes_threshold,
            collecting_garbage: false,
            gc_deferrals: 0,
            should_gc_when_deferral_ends: false,
            runtime,
            stack_info: StackInfo::capture(),
            stats: GcStats::default(),
        }
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Allocate `value` as a heap cell.
    ///
    /// May collect before the slot is reserved. Cell references held inside
    /// `value` are not roots during that collection; root them first (a
    /// [`MarkedVector`] is the usual tool) or defer collection around the
    /// construction.
    pub fn allocate<T: Cell>(&mut self, value: T) -> GcPtr<T> {
        assert!(
            std::mem::align_of::<CellSlot<T>>() <= 16,
            "cell type alignment exceeds slot alignment"
        );
        let size = std::mem::size_of::<CellSlot<T>>();
        let cell = self.allocate_cell(size);
        unsafe {
            let slot = cell.cast::<CellSlot<T>>();
            std::ptr::addr_of_mut!((*slot.as_ptr()).header)
                .write(CellHeader::new(CellOps::of::<T>(), CellState::NewlyAllocated));
            std::ptr::addr_of_mut!((*slot.as_ptr()).value).write(value);
            (*slot.as_ptr()).header.set_state(CellState::Live);
            GcPtr::from_slot(slot)
        }
    }

    pub(crate) fn allocate_cell(&mut self, size: usize) -> NonNull<CellHeader> {
        if self.config.collect_on_every_allocation {
            self.allocated_bytes_since_last_gc = 0;
            self.collect_garbage(CollectionType::CollectGarbage, false);
        } else if self.allocated_bytes_since_last_gc + size > self.gc_bytes_threshold {
            self.allocated_bytes_since_last_gc = 0;
            self.collect_garbage(CollectionType::CollectGarbage, false);
        }

        self.allocated_bytes_since_last_gc += size;
        self.allocator_for_size(size).allocate_cell()
    }

    fn allocator_for_size(&mut self, cell_size: usize) -> &mut CellAllocator {
        match self
            .allocators
            .iter()
            .position(|allocator| allocator.cell_size() >= cell_size)
        {
            Some(index) => &mut self.allocators[index],
            None => panic!(
                "no cell allocator for cell size {cell_size}, largest available is {}",
                self.allocators.last().unwrap().cell_size()
            ),
        }
    }

    /// The size class an allocation of `size` bytes lands in.
    ///
    /// Panics when `size` exceeds the largest class.
    pub fn size_class_for(&self, size: usize) -> usize {
        match self
            .allocators
            .iter()
            .find(|allocator| allocator.cell_size() >= size)
        {
            Some(allocator) => allocator.cell_size(),
            None => panic!(
                "no cell allocator for cell size {size}, largest available is {}",
                self.allocators.last().unwrap().cell_size()
            ),
        }
    }

    pub(crate) fn for_each_block<F>(&self, mut f: F)
    where
        F: FnMut(NonNull<HeapBlock>),
    {
        for allocator in &self.allocators {
            allocator.for_each_block(&mut f);
        }
    }

    /// Number of blocks currently owned by the heap.
    pub fn block_count(&self) -> usize {
        self.allocators
            .iter()
            .map(CellAllocator::block_count)
            .sum()
    }

    // =========================================================================
    // Roots
    // =========================================================================

    /// Root `ptr` for the lifetime of the returned handle.
    pub fn make_handle<T: Cell>(&self, ptr: GcPtr<T>) -> Handle<T> {
        Handle::new(self.roots.clone(), ptr)
    }

    /// Create an empty marked vector registered with this heap.
    pub fn make_marked_vector(&self) -> MarkedVector {
        MarkedVector::new(self.roots.clone())
    }

    /// Register a weak container. It is notified after every sweep until
    /// the returned registration is dropped.
    pub fn register_weak_container(
        &self,
        container: Rc<dyn WeakContainer>,
    ) -> WeakRegistration {
        WeakRegistration::new(self.roots.clone(), container)
    }

    /// Number of live handles.
    pub fn handle_count(&self) -> usize {
        self.roots.borrow().handle_count()
    }

    /// Number of registered marked vectors.
    pub fn marked_vector_count(&self) -> usize {
        self.roots.borrow().marked_vector_count()
    }

    /// Number of registered weak containers.
    pub fn weak_container_count(&self) -> usize {
        self.roots.borrow().weak_container_count()
    }

    // =========================================================================
    // Deferral and uprooting
    // =========================================================================

    /// Suppress collection until the matching [`Heap::undefer_gc`]. Nests.
    pub fn defer_gc(&mut self) {
        self.gc_deferrals += 1;
    }

    /// End a deferral scope. When the last scope ends, a collection that
    /// was requested while deferred runs immediately.
    pub fn undefer_gc(&mut self) {
        assert!(self.gc_deferrals > 0, "undefer_gc without matching defer_gc");
        self.gc_deferrals -= 1;

        if self.gc_deferrals == 0 && self.should_gc_when_deferral_ends {
            self.should_gc_when_deferral_ends = false;
            self.collect_garbage(CollectionType::CollectGarbage, false);
        }
    }

    /// Schedule `cell`'s mark bit to be cleared right after the next mark
    /// phase, so a cell that was rooted only transiently does not survive
    /// on the strength of that old rootedness.
    pub fn uproot_cell(&mut self, cell: RawCell) {
        self.uprooted_cells.push(cell);
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The configuration this heap was built with.
    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    /// Collector statistics.
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Current allocation-triggered collection threshold.
    pub fn gc_bytes_threshold(&self) -> usize {
        self.gc_bytes_threshold
    }

    /// Bytes allocated since the last collection.
    pub fn allocated_bytes_since_last_gc(&self) -> usize {
        self.allocated_bytes_since_last_gc
    }

    /// Stack bounds of the owning thread.
    pub fn stack_info(&self) -> &StackInfo {
        &self.stack_info
    }

    /// Toggle the collect-before-every-allocation stress hook.
    pub fn set_should_collect_on_every_allocation(&mut self, value: bool) {
        self.config.collect_on_every_allocation = value;
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        self.runtime.clone().teardown();
        self.collect_garbage(CollectionType::CollectEverything, false);
    }
}
