//! Precise roots: handles, marked vectors, and weak containers.
//!
//! Each registration kind follows the same contract: an owner object
//! registers itself on creation and unregisters on drop, and the registry
//! asserts both edges. The registries live behind a shared
//! `Rc<RefCell<RootRegistry>>` so owner objects can unregister without
//! holding a borrow of the heap itself.

use std::cell::RefCell;
use std::ops::Deref;
use std::panic::Location;
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::cell::{Cell, CellState, GcPtr, RawCell};

/// Where a root came from. Only the graph dump looks at this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootOrigin {
    /// A live [`Handle`].
    Handle,
    /// An entry of a live [`MarkedVector`].
    MarkedVector,
    /// A word found in the saved register snapshot.
    RegisterPointer,
    /// A word found on the machine stack.
    StackPointer,
    /// A precise root contributed by the runtime.
    Vm,
    /// A word found in a registered custom scan range.
    SafeFunction(&'static Location<'static>),
}

impl RootOrigin {
    /// Human-readable form used by the graph dump.
    pub fn description(&self) -> String {
        match self {
            RootOrigin::Handle => "Handle".to_string(),
            RootOrigin::MarkedVector => "MarkedVector".to_string(),
            RootOrigin::RegisterPointer => "RegisterPointer".to_string(),
            RootOrigin::StackPointer => "StackPointer".to_string(),
            RootOrigin::Vm => "VM".to_string(),
            RootOrigin::SafeFunction(location) => {
                format!("SafeFunction {}:{}", location.file(), location.line())
            }
        }
    }
}

/// The set of roots gathered for one collection or graph dump.
#[derive(Default)]
pub struct RootSet {
    cells: FxHashMap<RawCell, RootOrigin>,
}

impl RootSet {
    /// An empty root set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a root. A cell rooted through several sources keeps the origin
    /// added last.
    pub fn add(&mut self, cell: RawCell, origin: RootOrigin) {
        self.cells.insert(cell, origin);
    }

    /// Iterate over all roots.
    pub fn iter(&self) -> impl Iterator<Item = (RawCell, RootOrigin)> + '_ {
        self.cells.iter().map(|(&cell, &origin)| (cell, origin))
    }

    /// Number of roots.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// True if no roots were gathered.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// The origin recorded for `cell`, if it is a root.
    pub fn origin_of(&self, cell: RawCell) -> Option<RootOrigin> {
        self.cells.get(&cell).copied()
    }
}

/// Containers that hold cells weakly and must drop entries whose referent
/// did not survive a collection.
pub trait WeakContainer {
    /// Remove every entry whose referent is no longer live. Called at the
    /// end of sweep, after dead cells have been returned to their blocks
    /// but before any block is released.
    fn remove_dead_cells(&self);
}

/// A weak set of cells; entries vanish when their cell is collected.
#[derive(Default)]
pub struct WeakCellSet {
    cells: RefCell<FxHashSet<RawCell>>,
}

impl WeakCellSet {
    /// An empty weak set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a cell to the set.
    pub fn insert(&self, cell: RawCell) {
        self.cells.borrow_mut().insert(cell);
    }

    /// Remove a cell from the set.
    pub fn remove(&self, cell: RawCell) {
        self.cells.borrow_mut().remove(&cell);
    }

    /// True if the set currently holds `cell`.
    pub fn contains(&self, cell: RawCell) -> bool {
        self.cells.borrow().contains(&cell)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.cells.borrow().len()
    }

    /// True if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.cells.borrow().is_empty()
    }
}

impl WeakContainer for WeakCellSet {
    fn remove_dead_cells(&self) {
        self.cells
            .borrow_mut()
            .retain(|cell| cell.state() == CellState::Live);
    }
}

/// Registries of every precise root source attached to a heap.
#[derive(Default)]
pub(crate) struct RootRegistry {
    next_id: u64,
    handles: FxHashMap<u64, RawCell>,
    marked_vectors: FxHashMap<u64, Rc<RefCell<Vec<RawCell>>>>,
    weak_containers: FxHashMap<u64, Rc<dyn WeakContainer>>,
}

impl RootRegistry {
    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn did_create_handle(&mut self, id: u64, cell: RawCell) {
        let previous = self.handles.insert(id, cell);
        assert!(previous.is_none(), "handle {id} registered twice");
    }

    fn did_destroy_handle(&mut self, id: u64) {
        let removed = self.handles.remove(&id);
        assert!(removed.is_some(), "handle {id} was never registered");
    }

    fn did_create_marked_vector(&mut self, id: u64, cells: Rc<RefCell<Vec<RawCell>>>) {
        let previous = self.marked_vectors.insert(id, cells);
        assert!(previous.is_none(), "marked vector {id} registered twice");
    }

    fn did_destroy_marked_vector(&mut self, id: u64) {
        let removed = self.marked_vectors.remove(&id);
        assert!(removed.is_some(), "marked vector {id} was never registered");
    }

    fn did_create_weak_container(&mut self, id: u64, container: Rc<dyn WeakContainer>) {
        let previous = self.weak_containers.insert(id, container);
        assert!(previous.is_none(), "weak container {id} registered twice");
    }

    fn did_destroy_weak_container(&mut self, id: u64) {
        let removed = self.weak_containers.remove(&id);
        assert!(removed.is_some(), "weak container {id} was never registered");
    }

    pub(crate) fn handle_cells(&self) -> impl Iterator<Item = RawCell> + '_ {
        self.handles.values().copied()
    }

    pub(crate) fn marked_vector_contents(&self) -> Vec<RawCell> {
        let mut cells = Vec::new();
        for vector in self.marked_vectors.values() {
            cells.extend(vector.borrow().iter().copied());
        }
        cells
    }

    pub(crate) fn weak_containers(&self) -> Vec<Rc<dyn WeakContainer>> {
        self.weak_containers.values().cloned().collect()
    }

    pub(crate) fn handle_count(&self) -> usize {
        self.handles.len()
    }

    pub(crate) fn marked_vector_count(&self) -> usize {
        self.marked_vectors.len()
    }

    pub(crate) fn weak_container_count(&self) -> usize {
        self.weak_containers.len()
    }
}

/// A strong root for a single cell.
///
/// The cell stays alive for exactly as long as the handle exists; dropping
/// the handle unregisters it.
pub struct Handle<T: Cell> {
    registry: Rc<RefCell<RootRegistry>>,
    id: u64,
    ptr: GcPtr<T>,
}

impl<T: Cell> Handle<T> {
    pub(crate) fn new(registry: Rc<RefCell<RootRegistry>>, ptr: GcPtr<T>) -> Self {
        let id = {
            let mut registry = registry.borrow_mut();
            let id = registry.allocate_id();
            registry.did_create_handle(id, ptr.as_raw());
            id
        };
        Self { registry, id, ptr }
    }

    /// The rooted cell.
    #[inline]
    pub fn ptr(&self) -> GcPtr<T> {
        self.ptr
    }
}

impl<T: Cell> Deref for Handle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.ptr
    }
}

impl<T: Cell> AsRef<T> for Handle<T> {
    fn as_ref(&self) -> &T {
        self
    }
}

impl<T: Cell> Drop for Handle<T> {
    fn drop(&mut self) {
        self.registry.borrow_mut().did_destroy_handle(self.id);
    }
}

/// A growable set of rooted cells.
///
/// Every cell pushed into the vector is treated as a root for as long as
/// the vector exists. This is the tool for keeping intermediate results
/// alive while building structures that are not yet reachable from
/// anywhere.
pub struct MarkedVector {
    registry: Rc<RefCell<RootRegistry>>,
    id: u64,
    cells: Rc<RefCell<Vec<RawCell>>>,
}

impl MarkedVector {
    pub(crate) fn new(registry: Rc<RefCell<RootRegistry>>) -> Self {
        let cells = Rc::new(RefCell::new(Vec::new()));
        let id = {
            let mut registry = registry.borrow_mut();
            let id = registry.allocate_id();
            registry.did_create_marked_vector(id, cells.clone());
            id
        };
        Self {
            registry,
            id,
            cells,
        }
    }

    /// Root `cell` for the lifetime of this vector.
    pub fn push(&self, cell: RawCell) {
        self.cells.borrow_mut().push(cell);
    }

    /// Root a typed pointer for the lifetime of this vector.
    pub fn push_ptr<T: Cell>(&self, ptr: GcPtr<T>) {
        self.push(ptr.as_raw());
    }

    /// The cell at `index`.
    pub fn get(&self, index: usize) -> Option<RawCell> {
        self.cells.borrow().get(index).copied()
    }

    /// Number of rooted cells.
    pub fn len(&self) -> usize {
        self.cells.borrow().len()
    }

    /// True if nothing is rooted.
    pub fn is_empty(&self) -> bool {
        self.cells.borrow().is_empty()
    }

    /// Drop all entries without unregistering the vector.
    pub fn clear(&self) {
        self.cells.borrow_mut().clear();
    }
}

impl Drop for MarkedVector {
    fn drop(&mut self) {
        self.registry.borrow_mut().did_destroy_marked_vector(self.id);
    }
}

/// Keeps a [`WeakContainer`] registered with a heap; dropping this
/// unregisters the container.
pub struct WeakRegistration {
    registry: Rc<RefCell<RootRegistry>>,
    id: u64,
}

impl WeakRegistration {
    pub(crate) fn new(
        registry: Rc<RefCell<RootRegistry>>,
        container: Rc<dyn WeakContainer>,
    ) -> Self {
        let id = {
            let mut registry = registry.borrow_mut();
            let id = registry.allocate_id();
            registry.did_create_weak_container(id, container);
            id
        };
        Self { registry, id }
    }
}

impl Drop for WeakRegistration {
    fn drop(&mut self) {
        self.registry.borrow_mut().did_destroy_weak_container(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_set_keeps_last_origin() {
        let mut roots = RootSet::new();
        let cell = RawCell::from_addr(0x1000).unwrap();

        roots.add(cell, RootOrigin::RegisterPointer);
        roots.add(cell, RootOrigin::Handle);

        assert_eq!(roots.len(), 1);
        assert_eq!(roots.origin_of(cell), Some(RootOrigin::Handle));
    }

    #[test]
    fn test_registry_round_trip() {
        let mut registry = RootRegistry::default();
        let cell = RawCell::from_addr(0x2000).unwrap();

        let id = registry.allocate_id();
        registry.did_create_handle(id, cell);
        assert_eq!(registry.handle_count(), 1);
        registry.did_destroy_handle(id);
        assert_eq!(registry.handle_count(), 0);
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn test_double_register_is_fatal() {
        let mut registry = RootRegistry::default();
        let cell = RawCell::from_addr(0x2000).unwrap();
        let id = registry.allocate_id();
        registry.did_create_handle(id, cell);
        registry.did_create_handle(id, cell);
    }

    #[test]
    #[should_panic(expected = "never registered")]
    fn test_unregister_unknown_is_fatal() {
        let mut registry = RootRegistry::default();
        registry.did_destroy_marked_vector(99);
    }

    #[test]
    fn test_origin_descriptions() {
        assert_eq!(RootOrigin::Handle.description(), "Handle");
        assert_eq!(RootOrigin::MarkedVector.description(), "MarkedVector");
        assert_eq!(RootOrigin::Vm.description(), "VM");
        let location = Location::caller();
        assert!(RootOrigin::SafeFunction(location)
            .description()
            .starts_with("SafeFunction "));
    }
}
