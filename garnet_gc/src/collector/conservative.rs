//! Conservative root discovery.
//!
//! The compiler is free to keep the only reference to a cell in a register
//! or a stack slot, so the collector pattern-matches every word it can see:
//! a snapshot of the callee-saved registers, the stack between a local in
//! this frame and the thread's stack top, and every registered custom scan
//! range. Words that look like NaN-boxed cell values are unshifted to their
//! canonical pointer first; everything else is taken as a raw pointer
//! candidate and resolved against the live blocks.
//!
//! False positives pin a cell for one cycle. False negatives cannot happen
//! for pointers the mutator can still reach.

use rustc_hash::{FxHashMap, FxHashSet};

use garnet_core::Value;

use crate::cell::{CellState, RawCell};
use crate::heap::{Heap, HeapBlock};
use crate::roots::{RootOrigin, RootSet};
use crate::safe_function;

const WORD_SIZE: usize = std::mem::size_of::<usize>();

/// Record `data` as a possible pointer with `origin`.
///
/// On 64-bit targets a pointer and a value word are the same width, and
/// values store pointers in non-canonical form; words matching the cell tag
/// pattern are unshifted before being recorded. On narrower targets every
/// word is recorded raw; the two halves of a value are scanned separately
/// by the word loop.
fn add_possible_value(
    possible_pointers: &mut FxHashMap<usize, RootOrigin>,
    data: usize,
    origin: RootOrigin,
) {
    #[cfg(target_pointer_width = "64")]
    {
        let word = data as u64;
        if (word & garnet_core::SHIFTED_IS_CELL_PATTERN) == garnet_core::SHIFTED_IS_CELL_PATTERN {
            possible_pointers.insert(Value::extract_pointer_bits(word), origin);
            return;
        }
    }
    possible_pointers.insert(data, origin);
}

/// Buffer the register snapshot is spilled into.
type RegisterBuffer = [usize; 16];

#[cfg(target_arch = "x86_64")]
fn capture_callee_saved_registers(buffer: &mut RegisterBuffer) {
    unsafe {
        core::arch::asm!(
            "mov [{buf}], rbx",
            "mov [{buf} + 8], rbp",
            "mov [{buf} + 16], rsp",
            "mov [{buf} + 24], r12",
            "mov [{buf} + 32], r13",
            "mov [{buf} + 40], r14",
            "mov [{buf} + 48], r15",
            buf = in(reg) buffer.as_mut_ptr(),
            options(nostack, preserves_flags),
        );
    }
}

#[cfg(target_arch = "aarch64")]
fn capture_callee_saved_registers(buffer: &mut RegisterBuffer) {
    unsafe {
        core::arch::asm!(
            "stp x19, x20, [{buf}]",
            "stp x21, x22, [{buf}, #16]",
            "stp x23, x24, [{buf}, #32]",
            "stp x25, x26, [{buf}, #48]",
            "stp x27, x28, [{buf}, #64]",
            "mov {tmp}, sp",
            "stp x29, {tmp}, [{buf}, #80]",
            buf = in(reg) buffer.as_mut_ptr(),
            tmp = out(reg) _,
            options(nostack, preserves_flags),
        );
    }
}

// Targets without a spill sequence rely on the stack walk alone; the call
// into the scanner forces the interesting registers to the stack on most of
// them anyway.
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn capture_callee_saved_registers(_buffer: &mut RegisterBuffer) {}

/// Scan registers, stack, and custom ranges, resolving every candidate word
/// against the live blocks.
#[inline(never)]
pub(crate) fn gather_conservative_roots(heap: &Heap, roots: &mut RootSet) {
    let mut possible_pointers: FxHashMap<usize, RootOrigin> = FxHashMap::default();

    let mut register_buffer: RegisterBuffer = [0; 16];
    capture_callee_saved_registers(&mut register_buffer);
    for &word in register_buffer.iter() {
        add_possible_value(&mut possible_pointers, word, RootOrigin::RegisterPointer);
    }

    // The register buffer is a local of this frame, so its address is the
    // low end of the window; everything from here to the stack top belongs
    // to callers and may hold mutator pointers.
    let stack_reference = register_buffer.as_ptr() as usize;
    let stack_top = heap.stack_info().top();
    let mut stack_address = stack_reference;
    while stack_address + WORD_SIZE <= stack_top {
        let data = unsafe { std::ptr::read_volatile(stack_address as *const usize) };
        add_possible_value(&mut possible_pointers, data, RootOrigin::StackPointer);
        #[cfg(feature = "address-sanitizer")]
        asan::gather_fake_stack_roots(&mut possible_pointers, data);
        stack_address += WORD_SIZE;
    }

    safe_function::for_each_registered_range(|base, len, location| {
        let words = len / WORD_SIZE;
        for i in 0..words {
            let data = unsafe { std::ptr::read_volatile((base as *const usize).add(i)) };
            add_possible_value(
                &mut possible_pointers,
                data,
                RootOrigin::SafeFunction(location),
            );
        }
    });

    let mut all_live_heap_blocks: FxHashSet<usize> = FxHashSet::default();
    heap.for_each_block(|block| {
        all_live_heap_blocks.insert(block.as_ptr() as usize);
    });

    for (&possible_pointer, &origin) in possible_pointers.iter() {
        if possible_pointer == 0 {
            continue;
        }
        let block_base = HeapBlock::base_of(possible_pointer);
        if !all_live_heap_blocks.contains(&block_base) {
            continue;
        }
        let block = unsafe { &*(block_base as *const HeapBlock) };
        if let Some(cell_ptr) = block.cell_from_possible_pointer(possible_pointer) {
            let cell = RawCell::from_non_null(cell_ptr);
            if cell.state() == CellState::Live {
                if heap.config().trace {
                    eprintln!("  ?-> {:#x}", cell.addr());
                }
                roots.add(cell, origin);
            } else if heap.config().trace {
                eprintln!("  #-> {:#x}", cell.addr());
            }
        }
    }
}

/// Chasing of AddressSanitizer fake-stack frames. When ASan moves a frame
/// to its fake stack, the word found on the real stack points into the fake
/// frame; the words of the real frame must be scanned as well.
#[cfg(feature = "address-sanitizer")]
mod asan {
    use super::{add_possible_value, WORD_SIZE};
    use crate::roots::RootOrigin;
    use rustc_hash::FxHashMap;
    use std::ffi::c_void;

    extern "C" {
        fn __asan_get_current_fake_stack() -> *mut c_void;
        fn __asan_addr_is_in_fake_stack(
            fake_stack: *mut c_void,
            addr: *mut c_void,
            beg: *mut *mut c_void,
            end: *mut *mut c_void,
        ) -> *mut c_void;
    }

    pub(super) fn gather_fake_stack_roots(
        possible_pointers: &mut FxHashMap<usize, RootOrigin>,
        data: usize,
    ) {
        unsafe {
            let mut begin: *mut c_void = std::ptr::null_mut();
            let mut end: *mut c_void = std::ptr::null_mut();
            let real_stack = __asan_addr_is_in_fake_stack(
                __asan_get_current_fake_stack(),
                data as *mut c_void,
                &mut begin,
                &mut end,
            );
            if real_stack.is_null() {
                return;
            }
            let mut addr = begin as usize;
            while addr + WORD_SIZE <= end as usize {
                let word = std::ptr::read_volatile(addr as *const usize);
                if word != 0 {
                    add_possible_value(possible_pointers, word, RootOrigin::StackPointer);
                }
                addr += WORD_SIZE;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use garnet_core::{SHIFTED_IS_CELL_PATTERN, TAG_SHIFT};

    #[test]
    fn test_raw_words_are_recorded_as_is() {
        let mut possible = FxHashMap::default();
        add_possible_value(&mut possible, 0x1234_5678, RootOrigin::StackPointer);
        assert!(possible.contains_key(&0x1234_5678));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_boxed_cell_words_are_unshifted() {
        let addr = 0x5555_0000_1230usize;
        let encoded = Value::object(addr as *const ()).raw();
        assert_eq!(encoded & SHIFTED_IS_CELL_PATTERN, SHIFTED_IS_CELL_PATTERN);

        let mut possible = FxHashMap::default();
        add_possible_value(&mut possible, encoded as usize, RootOrigin::StackPointer);
        assert!(possible.contains_key(&addr));
        assert!(!possible.contains_key(&(encoded as usize)));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_non_cell_tags_stay_raw() {
        let encoded = (0xFFFAu64 << TAG_SHIFT) | 0x1000;
        let mut possible = FxHashMap::default();
        add_possible_value(&mut possible, encoded as usize, RootOrigin::StackPointer);
        assert!(possible.contains_key(&(encoded as usize)));
    }

    #[test]
    fn test_register_capture_spills_stack_pointer() {
        let mut buffer: RegisterBuffer = [0; 16];
        capture_callee_saved_registers(&mut buffer);
        if cfg!(any(target_arch = "x86_64", target_arch = "aarch64")) {
            let here = &buffer as *const _ as usize;
            // One of the captured words is the stack pointer, which must be
            // within a few pages of this frame.
            assert!(buffer
                .iter()
                .any(|&w| w != 0 && w.abs_diff(here) < 64 * 1024));
        }
    }
}
