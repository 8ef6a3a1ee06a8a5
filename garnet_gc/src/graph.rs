//! Debug object-graph dump.
//!
//! Walks reachability from the gathered roots and emits a JSON object
//! keyed by decimal cell address, one node per cell:
//! `{"root": origin?, "class_name": name, "edges": [address, ...]}`.
//! The walk never touches mark bits, so dumping has no effect on liveness.
//! No stability is promised for the output.

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{json, Map, Value as JsonValue};

use crate::cell::RawCell;
use crate::heap::Heap;
use crate::roots::{RootOrigin, RootSet};
use crate::trace::Visitor;

#[derive(Default)]
struct GraphNode {
    root_origin: Option<RootOrigin>,
    class_name: &'static str,
    edges: FxHashSet<usize>,
}

struct GraphConstructorVisitor {
    graph: FxHashMap<usize, GraphNode>,
    node_being_visited: Option<usize>,
    work_queue: Vec<RawCell>,
}

impl GraphConstructorVisitor {
    fn new(roots: &RootSet) -> Self {
        let mut visitor = Self {
            graph: FxHashMap::default(),
            node_being_visited: None,
            work_queue: Vec::new(),
        };
        for (cell, origin) in roots.iter() {
            visitor.visit(cell);
            let node = visitor.graph.get_mut(&cell.addr()).unwrap();
            node.class_name = cell.class_name();
            node.root_origin = Some(origin);
        }
        visitor
    }

    fn visit_all_cells(&mut self) {
        while let Some(cell) = self.work_queue.pop() {
            let addr = cell.addr();
            self.graph.get_mut(&addr).unwrap().class_name = cell.class_name();
            self.node_being_visited = Some(addr);
            cell.visit_edges(self);
            self.node_being_visited = None;
        }
    }

    fn into_json(self) -> JsonValue {
        let mut graph = Map::new();
        for (addr, node) in &self.graph {
            let mut entry = Map::new();
            if let Some(origin) = node.root_origin {
                entry.insert("root".to_string(), json!(origin.description()));
            }
            entry.insert("class_name".to_string(), json!(node.class_name));
            let edges: Vec<String> = node.edges.iter().map(|edge| edge.to_string()).collect();
            entry.insert("edges".to_string(), json!(edges));
            graph.insert(addr.to_string(), JsonValue::Object(entry));
        }
        JsonValue::Object(graph)
    }
}

impl Visitor for GraphConstructorVisitor {
    fn visit(&mut self, cell: RawCell) {
        if let Some(current) = self.node_being_visited {
            self.graph
                .get_mut(&current)
                .unwrap()
                .edges
                .insert(cell.addr());
        }
        if self.graph.contains_key(&cell.addr()) {
            return;
        }
        self.graph.insert(cell.addr(), GraphNode::default());
        self.work_queue.push(cell);
    }
}

impl Heap {
    /// Build the reachability graph as a JSON value. Debug facility; the
    /// shape of the output is not stable.
    pub fn graph(&self) -> JsonValue {
        let mut roots = RootSet::new();
        self.gather_roots(&mut roots);
        let mut visitor = GraphConstructorVisitor::new(&roots);
        self.runtime.visit_edges(&mut visitor);
        visitor.visit_all_cells();
        visitor.into_json()
    }

    /// Print the reachability graph to stderr.
    pub fn dump_graph(&self) {
        eprintln!("{}", self.graph());
    }
}

#[cfg(test)]
mod tests {
    use crate::cell::{Cell, RawCell};
    use crate::config::GcConfig;
    use crate::heap::Heap;
    use crate::trace::Visitor;

    struct Leaf;

    unsafe impl Cell for Leaf {
        fn class_name(&self) -> &'static str {
            "Leaf"
        }
    }

    struct Branch {
        child: RawCell,
    }

    unsafe impl Cell for Branch {
        fn class_name(&self) -> &'static str {
            "Branch"
        }

        fn visit_edges(&self, visitor: &mut dyn Visitor) {
            visitor.visit(self.child);
        }
    }

    #[test]
    fn test_graph_records_roots_and_edges() {
        let mut heap = Heap::new(GcConfig::deterministic());
        let leaf = heap.allocate(Leaf);
        let branch = heap.allocate(Branch {
            child: leaf.as_raw(),
        });
        let _handle = heap.make_handle(branch);

        let graph = heap.graph();
        let nodes = graph.as_object().unwrap();
        assert_eq!(nodes.len(), 2);

        let branch_node = &nodes[&branch.addr().to_string()];
        assert_eq!(branch_node["root"], "Handle");
        assert_eq!(branch_node["class_name"], "Branch");
        let edges = branch_node["edges"].as_array().unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0], leaf.addr().to_string());

        let leaf_node = &nodes[&leaf.addr().to_string()];
        assert!(leaf_node.get("root").is_none());
        assert_eq!(leaf_node["class_name"], "Leaf");
    }

    #[test]
    fn test_graph_does_not_mark() {
        let mut heap = Heap::new(GcConfig::deterministic());
        let leaf = heap.allocate(Leaf);
        let _handle = heap.make_handle(leaf);

        let _ = heap.graph();
        assert!(!leaf.as_raw().is_marked());
    }

    #[test]
    fn test_graph_handles_cycles() {
        let mut heap = Heap::new(GcConfig::deterministic());
        let placeholder = heap.allocate(Leaf);
        let a = heap.allocate(Branch {
            child: placeholder.as_raw(),
        });
        let b = heap.allocate(Branch { child: a.as_raw() });
        unsafe {
            let slot = a.as_raw().as_header_ptr() as *mut crate::cell::CellSlot<Branch>;
            (*slot).value.child = b.as_raw();
        }
        let _handle = heap.make_handle(a);

        let graph = heap.graph();
        assert_eq!(graph.as_object().unwrap().len(), 2);
    }
}
