//! The cell model.
//!
//! A *cell* is the unit of heap allocation. Every cell lives in a slot of a
//! [`HeapBlock`](crate::heap::HeapBlock) and starts with a [`CellHeader`]:
//! a pointer to the per-type [`CellOps`] function table, the slot state, and
//! the mark bit. The function table is how the collector traces, finalizes,
//! and drops cells without knowing their concrete types.

use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::NonNull;

use garnet_core::Value;

use crate::trace::Visitor;

/// State of a heap slot.
///
/// `Dead` is zero so freshly mapped (zero-filled) block memory reads as a
/// region of dead slots.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    /// The slot is free (threaded on the block's free list).
    Dead = 0,
    /// The slot holds a fully constructed cell.
    Live = 1,
    /// The slot is reserved while a cell is being constructed in it.
    NewlyAllocated = 2,
}

/// A heap-managed object.
///
/// # Safety
///
/// `visit_edges` must report *every* reference to another cell that this
/// object holds. A missed edge lets the collector free a reachable cell,
/// which is undefined behavior on the next access.
pub unsafe trait Cell: 'static {
    /// The dynamic class name, used by diagnostics and the graph dump.
    fn class_name(&self) -> &'static str;

    /// Visit every outgoing cell reference.
    fn visit_edges(&self, _visitor: &mut dyn Visitor) {}

    /// Invoked exactly once after the mark phase if the cell is unmarked and
    /// not forced to survive. The cell is still addressable and its edges
    /// are still valid; no sweeping has happened yet.
    fn finalize(&mut self) {}

    /// Cells that return true are kept alive even when unreachable.
    fn must_survive_garbage_collection(&self) -> bool {
        false
    }
}

/// Per-type function table stored behind every live cell header.
///
/// This is the type-erasure seam between the collector and concrete cell
/// types; all functions take a pointer to the *slot* (header address).
pub struct CellOps {
    pub(crate) class_name: unsafe fn(*const ()) -> &'static str,
    pub(crate) visit_edges: unsafe fn(*const (), &mut dyn Visitor),
    pub(crate) finalize: unsafe fn(*mut ()),
    pub(crate) must_survive: unsafe fn(*const ()) -> bool,
    pub(crate) drop_value: unsafe fn(*mut ()),
}

unsafe fn class_name_erased<T: Cell>(slot: *const ()) -> &'static str {
    unsafe { (*slot.cast::<CellSlot<T>>()).value.class_name() }
}

unsafe fn visit_edges_erased<T: Cell>(slot: *const (), visitor: &mut dyn Visitor) {
    unsafe { (*slot.cast::<CellSlot<T>>()).value.visit_edges(visitor) }
}

unsafe fn finalize_erased<T: Cell>(slot: *mut ()) {
    unsafe { (*slot.cast::<CellSlot<T>>()).value.finalize() }
}

unsafe fn must_survive_erased<T: Cell>(slot: *const ()) -> bool {
    unsafe { (*slot.cast::<CellSlot<T>>()).value.must_survive_garbage_collection() }
}

unsafe fn drop_erased<T: Cell>(slot: *mut ()) {
    unsafe { std::ptr::drop_in_place(std::ptr::addr_of_mut!((*slot.cast::<CellSlot<T>>()).value)) }
}

trait HasOps {
    const OPS: CellOps;
}

impl<T: Cell> HasOps for T {
    const OPS: CellOps = CellOps {
        class_name: class_name_erased::<T>,
        visit_edges: visit_edges_erased::<T>,
        finalize: finalize_erased::<T>,
        must_survive: must_survive_erased::<T>,
        drop_value: drop_erased::<T>,
    };
}

impl CellOps {
    /// The function table for `T`.
    pub fn of<T: Cell>() -> &'static CellOps {
        &<T as HasOps>::OPS
    }
}

/// Header at the start of every heap slot.
#[repr(C)]
pub struct CellHeader {
    /// Function table; null while the slot is dead.
    ops: *const CellOps,
    state: CellState,
    marked: bool,
}

impl CellHeader {
    /// Size of the header, which fixes the payload offset inside a slot.
    pub const SIZE: usize = std::mem::size_of::<CellHeader>();

    pub(crate) fn new(ops: &'static CellOps, state: CellState) -> Self {
        Self {
            ops,
            state,
            marked: false,
        }
    }

    pub(crate) fn dead() -> Self {
        Self {
            ops: std::ptr::null(),
            state: CellState::Dead,
            marked: false,
        }
    }

    /// Current slot state.
    #[inline]
    pub fn state(&self) -> CellState {
        self.state
    }

    #[inline]
    pub(crate) fn set_state(&mut self, state: CellState) {
        self.state = state;
    }

    /// Whether the mark bit is set.
    #[inline]
    pub fn is_marked(&self) -> bool {
        self.marked
    }

    #[inline]
    pub(crate) fn set_marked(&mut self, marked: bool) {
        self.marked = marked;
    }

    #[inline]
    pub(crate) fn ops(&self) -> &'static CellOps {
        debug_assert!(!self.ops.is_null());
        unsafe { &*self.ops }
    }
}

/// A slot as laid out in block storage: header first, then the payload.
#[repr(C)]
pub(crate) struct CellSlot<T> {
    pub(crate) header: CellHeader,
    pub(crate) value: T,
}

/// An untyped reference to a heap cell (the slot's header address).
///
/// This is the currency of the collector: root sets, work queues, and edge
/// visits all carry `RawCell`s. A `RawCell` does not keep its referent
/// alive; dereferencing one after its cell was swept is undefined behavior.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawCell(NonNull<CellHeader>);

impl RawCell {
    #[inline]
    pub(crate) fn from_non_null(ptr: NonNull<CellHeader>) -> Self {
        Self(ptr)
    }

    /// Reinterpret a cell address previously obtained from [`RawCell::addr`]
    /// or [`GcPtr::addr`]. Returns `None` for null.
    #[inline]
    pub fn from_addr(addr: usize) -> Option<Self> {
        NonNull::new(addr as *mut CellHeader).map(Self)
    }

    /// The slot address.
    #[inline]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    #[inline]
    pub(crate) fn as_header_ptr(self) -> *mut CellHeader {
        self.0.as_ptr()
    }

    /// Current state of the slot.
    #[inline]
    pub fn state(self) -> CellState {
        unsafe { (*self.0.as_ptr()).state() }
    }

    /// Whether the mark bit is set.
    #[inline]
    pub fn is_marked(self) -> bool {
        unsafe { (*self.0.as_ptr()).is_marked() }
    }

    #[inline]
    pub(crate) fn set_marked(self, marked: bool) {
        unsafe { (*self.0.as_ptr()).set_marked(marked) }
    }

    /// The cell's dynamic class name. The cell must be live.
    pub fn class_name(self) -> &'static str {
        debug_assert_eq!(self.state(), CellState::Live);
        unsafe {
            let header = &*self.0.as_ptr();
            (header.ops().class_name)(self.0.as_ptr() as *const ())
        }
    }

    pub(crate) fn visit_edges(self, visitor: &mut dyn Visitor) {
        unsafe {
            let header = &*self.0.as_ptr();
            (header.ops().visit_edges)(self.0.as_ptr() as *const (), visitor)
        }
    }

    pub(crate) fn finalize(self) {
        unsafe {
            let header = &*self.0.as_ptr();
            (header.ops().finalize)(self.0.as_ptr() as *mut ())
        }
    }

    pub(crate) fn must_survive_garbage_collection(self) -> bool {
        unsafe {
            let header = &*self.0.as_ptr();
            (header.ops().must_survive)(self.0.as_ptr() as *const ())
        }
    }
}

impl std::fmt::Debug for RawCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RawCell({:#x})", self.addr())
    }
}

/// A typed pointer to a heap cell.
///
/// `GcPtr` is a plain pointer: copying it is free and it does *not* root the
/// cell. To keep a cell alive across a collection point, put it in a
/// [`Handle`](crate::roots::Handle), a
/// [`MarkedVector`](crate::roots::MarkedVector), or reach it from another
/// live cell.
pub struct GcPtr<T: Cell> {
    slot: NonNull<CellSlot<T>>,
    _marker: PhantomData<*const T>,
}

impl<T: Cell> GcPtr<T> {
    pub(crate) unsafe fn from_slot(slot: NonNull<CellSlot<T>>) -> Self {
        Self {
            slot,
            _marker: PhantomData,
        }
    }

    /// The untyped cell reference for this pointer.
    #[inline]
    pub fn as_raw(self) -> RawCell {
        RawCell(self.slot.cast())
    }

    /// The slot address.
    #[inline]
    pub fn addr(self) -> usize {
        self.slot.as_ptr() as usize
    }

    /// Pointer to the payload.
    #[inline]
    pub fn as_ptr(self) -> *const T {
        unsafe { std::ptr::addr_of!((*self.slot.as_ptr()).value) }
    }

    /// Encode this pointer as a runtime [`Value`].
    #[inline]
    pub fn to_value(self) -> Value {
        Value::object(self.addr() as *const ())
    }
}

impl<T: Cell> Clone for GcPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Cell> Copy for GcPtr<T> {}

impl<T: Cell> PartialEq for GcPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot
    }
}

impl<T: Cell> Eq for GcPtr<T> {}

impl<T: Cell> std::hash::Hash for GcPtr<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.slot.hash(state);
    }
}

impl<T: Cell> Deref for GcPtr<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &self.slot.as_ref().value }
    }
}

impl<T: Cell> std::fmt::Debug for GcPtr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GcPtr({:#x})", self.addr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy {
        dropped: std::rc::Rc<std::cell::Cell<bool>>,
    }

    unsafe impl Cell for Dummy {
        fn class_name(&self) -> &'static str {
            "Dummy"
        }
    }

    impl Drop for Dummy {
        fn drop(&mut self) {
            self.dropped.set(true);
        }
    }

    #[test]
    fn test_header_is_sixteen_bytes() {
        assert_eq!(CellHeader::SIZE, 16);
    }

    #[test]
    fn test_ops_table_dispatches() {
        let dropped = std::rc::Rc::new(std::cell::Cell::new(false));
        let mut slot = CellSlot {
            header: CellHeader::new(CellOps::of::<Dummy>(), CellState::Live),
            value: Dummy {
                dropped: dropped.clone(),
            },
        };
        let slot_ptr = &mut slot as *mut CellSlot<Dummy> as *mut ();

        unsafe {
            assert_eq!((slot.header.ops().class_name)(slot_ptr as *const ()), "Dummy");
            assert!(!(slot.header.ops().must_survive)(slot_ptr as *const ()));
            (slot.header.ops().drop_value)(slot_ptr);
        }
        assert!(dropped.get());
        slot.header = CellHeader::dead();
        std::mem::forget(slot);
    }

    #[test]
    fn test_dead_header_state() {
        let header = CellHeader::dead();
        assert_eq!(header.state(), CellState::Dead);
        assert!(!header.is_marked());
    }

    #[test]
    fn test_raw_cell_addr_round_trip() {
        let mut header = CellHeader::dead();
        let nn = NonNull::from(&mut header);
        let raw = RawCell::from_non_null(nn);
        assert_eq!(RawCell::from_addr(raw.addr()), Some(raw));
        assert_eq!(RawCell::from_addr(0), None);
    }
}
