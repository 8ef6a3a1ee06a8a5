//! The seam between the heap and the runtime that embeds it.
//!
//! The heap never sees interpreter frames, globals, or caches directly; it
//! asks the [`Runtime`] for them at collection time. One heap is owned by
//! one runtime on one thread.

use crate::cell::RawCell;
use crate::trace::Visitor;

/// Hooks a runtime provides to its heap.
pub trait Runtime {
    /// Contribute the runtime's precise roots (globals, exception state,
    /// caches that must survive). The heap tags every contributed cell with
    /// the `VM` root origin.
    fn gather_roots(&self, _roots: &mut Vec<RawCell>) {}

    /// Visit the references held by the bytecode interpreter (frames,
    /// register windows, pending completions). Called once per mark phase,
    /// in addition to the gathered roots.
    fn visit_edges(&self, _visitor: &mut dyn Visitor) {}

    /// Called once, at the start of heap teardown, before the final
    /// collect-everything pass. Runtimes clear caches that hold cells
    /// (string caches, interned symbols) here.
    fn teardown(&self) {}
}

/// A runtime with no state of its own. Used by tests and by embedders that
/// only ever root cells through handles.
#[derive(Default)]
pub struct NullRuntime;

impl Runtime for NullRuntime {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::CountingVisitor;

    #[test]
    fn test_null_runtime_contributes_nothing() {
        let runtime = NullRuntime;
        let mut roots = Vec::new();
        runtime.gather_roots(&mut roots);
        assert!(roots.is_empty());

        let mut visitor = CountingVisitor::default();
        runtime.visit_edges(&mut visitor);
        assert_eq!(visitor.cells, 0);
    }
}
