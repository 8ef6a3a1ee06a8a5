//! Edge visitation.
//!
//! The collector traverses the object graph through a single seam: cells
//! report their outgoing references to a [`Visitor`]. The marking pass and
//! the graph dump are the two visitors in the crate; both are driven by the
//! same [`Cell::visit_edges`](crate::cell::Cell::visit_edges) calls.

use garnet_core::Value;

use crate::cell::RawCell;

/// Receiver for the edges of a cell.
///
/// Implementations decide what "visiting" means: the marking visitor sets
/// mark bits and queues cells, the graph visitor records edges.
pub trait Visitor {
    /// Visit a reference to another cell.
    fn visit(&mut self, cell: RawCell);

    /// Visit a [`Value`] that may carry a cell pointer. Non-cell values are
    /// ignored.
    fn visit_value(&mut self, value: Value) {
        if let Some(ptr) = value.as_cell_ptr() {
            if let Some(cell) = RawCell::from_addr(ptr as usize) {
                self.visit(cell);
            }
        }
    }

    /// Visit an optional cell reference.
    fn visit_opt(&mut self, cell: Option<RawCell>) {
        if let Some(cell) = cell {
            self.visit(cell);
        }
    }
}

/// Counts visits without following anything. Test helper.
#[derive(Default)]
pub struct CountingVisitor {
    /// Number of cells visited.
    pub cells: usize,
}

impl Visitor for CountingVisitor {
    fn visit(&mut self, _cell: RawCell) {
        self.cells += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visit_value_ignores_non_cells() {
        let mut visitor = CountingVisitor::default();
        visitor.visit_value(Value::int32(7));
        visitor.visit_value(Value::undefined());
        visitor.visit_value(Value::double(1.5));
        assert_eq!(visitor.cells, 0);
    }

    #[test]
    fn test_visit_value_follows_cells() {
        let mut visitor = CountingVisitor::default();
        let addr = 0x1000usize;
        visitor.visit_value(Value::object(addr as *const ()));
        assert_eq!(visitor.cells, 1);
    }
}
