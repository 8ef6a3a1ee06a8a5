//! Garnet core types.
//!
//! This crate holds the pieces of the runtime that everything else builds on:
//!
//! - [`Value`]: the NaN-boxed value word. Heap pointers are stored in
//!   non-canonical form inside the NaN payload, so the garbage collector
//!   needs to know the cell tag pattern and how to recover a canonical
//!   pointer from an encoded word. That knowledge lives here and nowhere
//!   else.
//! - [`StackInfo`]: the bounds of the current thread's stack, queried from
//!   the platform. The collector's conservative scanner walks the region
//!   between a live stack frame and [`StackInfo::top`].
//!
//! The crate is deliberately small: no interpreter types, no objects, no
//! allocation. It must stay dependency-light because every other crate in
//! the workspace links it.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod stack_info;
mod value;

pub use stack_info::StackInfo;
pub use value::{Value, IS_CELL_PATTERN, SHIFTED_IS_CELL_PATTERN, TAG_SHIFT};
