//! Garnet cell heap.
//!
//! A stop-the-world mark-and-sweep collector for the garnet runtime. Cells
//! are allocated out of size-classed, block-based allocators and reclaimed
//! by tracing a root set that mixes precise sources (handles, marked
//! vectors, runtime roots) with a conservative scan of the stack, the saved
//! registers, and registered custom memory ranges.
//!
//! # Architecture
//!
//! - **Blocks** ([`heap::HeapBlock`]): 16KB aligned slabs of one cell size
//!   with an intrusive free list. Alignment makes pointer-to-block lookup a
//!   mask.
//! - **Allocators** ([`heap::CellAllocator`]): one per size class, serving
//!   from usable blocks and creating blocks on demand.
//! - **Heap** ([`heap::Heap`]): owns the allocators and registries, counts
//!   allocated bytes, and triggers collection when the byte threshold is
//!   crossed.
//! - **Collector**: gather roots → mark (LIFO work queue) → finalize
//!   unmarked cells → sweep. The threshold is re-derived from the surviving
//!   byte count after every cycle.
//!
//! # Usage
//!
//! ```ignore
//! use garnet_gc::{GcConfig, Heap};
//!
//! let mut heap = Heap::new(GcConfig::default());
//! let node = heap.allocate(MyNode::new());
//! let handle = heap.make_handle(node);
//!
//! // Collection happens automatically on allocation pressure, or on
//! // demand:
//! heap.collect_garbage(garnet_gc::CollectionType::CollectGarbage, false);
//! ```
//!
//! # Threading
//!
//! A heap is single-threaded: one heap, one runtime, one thread. The
//! custom-scan-range registry is per-thread for the same reason.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cell;
pub mod config;
pub mod heap;
pub mod roots;
pub mod runtime;
pub mod safe_function;
pub mod stats;
pub mod trace;

mod collector;
mod graph;

pub use cell::{Cell, CellOps, CellState, GcPtr, RawCell};
pub use collector::CollectionType;
pub use config::{ConfigError, GcConfig};
pub use heap::{Heap, CELL_SIZE_CLASSES, HEAP_BLOCK_SIZE};
pub use roots::{
    Handle, MarkedVector, RootOrigin, RootSet, WeakCellSet, WeakContainer, WeakRegistration,
};
pub use runtime::{NullRuntime, Runtime};
pub use safe_function::{register_safe_function_closure, unregister_safe_function_closure};
pub use stats::{CycleStats, GcStats};
pub use trace::Visitor;
