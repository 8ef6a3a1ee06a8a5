//! Custom conservative scan ranges.
//!
//! A safe callable stores captured cell references in heap memory the stack
//! scan cannot see. Registering the capture storage here makes the
//! conservative scanner walk it like stack memory, with the registration
//! site's source location preserved for graph-dump attribution.
//!
//! The registry is per-thread, matching the one-runtime-per-thread model,
//! and is torn down automatically at thread exit.

use std::cell::RefCell;
use std::panic::Location;

use rustc_hash::FxHashMap;

struct CustomRange {
    len: usize,
    location: &'static Location<'static>,
}

thread_local! {
    static CUSTOM_RANGES_FOR_CONSERVATIVE_SCAN: RefCell<FxHashMap<usize, CustomRange>> =
        RefCell::new(FxHashMap::default());
}

/// Register `len` bytes at `base` for conservative scanning.
///
/// Registering the same base twice is a bug and aborts. The range must be
/// unregistered with [`unregister_safe_function_closure`] before the memory
/// is freed.
#[track_caller]
pub fn register_safe_function_closure(base: *const u8, len: usize) {
    let location = Location::caller();
    CUSTOM_RANGES_FOR_CONSERVATIVE_SCAN.with(|ranges| {
        let previous = ranges
            .borrow_mut()
            .insert(base as usize, CustomRange { len, location });
        assert!(
            previous.is_none(),
            "scan range at {base:p} registered twice"
        );
    });
}

/// Remove a range added by [`register_safe_function_closure`].
///
/// The range must be present with exactly the registered length.
pub fn unregister_safe_function_closure(base: *const u8, len: usize) {
    CUSTOM_RANGES_FOR_CONSERVATIVE_SCAN.with(|ranges| {
        let removed = ranges.borrow_mut().remove(&(base as usize));
        match removed {
            Some(range) => assert_eq!(
                range.len, len,
                "scan range at {base:p} unregistered with the wrong length"
            ),
            None => panic!("scan range at {base:p} was never registered"),
        }
    });
}

/// Invoke `f` for every registered range on this thread.
pub(crate) fn for_each_registered_range<F>(mut f: F)
where
    F: FnMut(usize, usize, &'static Location<'static>),
{
    CUSTOM_RANGES_FOR_CONSERVATIVE_SCAN.with(|ranges| {
        for (&base, range) in ranges.borrow().iter() {
            f(base, range.len, range.location);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_unregister_round_trip() {
        let storage = [0usize; 4];
        let base = storage.as_ptr() as *const u8;
        let len = std::mem::size_of_val(&storage);

        register_safe_function_closure(base, len);
        let mut seen = 0;
        for_each_registered_range(|range_base, range_len, _| {
            if range_base == base as usize {
                assert_eq!(range_len, len);
                seen += 1;
            }
        });
        assert_eq!(seen, 1);

        unregister_safe_function_closure(base, len);
        let mut remaining = 0;
        for_each_registered_range(|range_base, _, _| {
            if range_base == base as usize {
                remaining += 1;
            }
        });
        assert_eq!(remaining, 0);
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn test_double_register_is_fatal() {
        // Leaked so the dangling registration left behind by the panic can
        // never alias another test's storage.
        let storage: &'static [usize; 2] = Box::leak(Box::new([0; 2]));
        let base = storage.as_ptr() as *const u8;
        register_safe_function_closure(base, 16);
        register_safe_function_closure(base, 16);
    }

    #[test]
    #[should_panic(expected = "never registered")]
    fn test_unregister_unknown_is_fatal() {
        let storage = [0usize; 2];
        unregister_safe_function_closure(storage.as_ptr() as *const u8, 16);
    }

    #[test]
    fn test_registry_is_per_thread() {
        let storage = Box::new([0usize; 2]);
        let base = storage.as_ptr() as *const u8;
        register_safe_function_closure(base, 16);

        let base_addr = base as usize;
        std::thread::spawn(move || {
            let mut seen = 0;
            for_each_registered_range(|range_base, _, _| {
                if range_base == base_addr {
                    seen += 1;
                }
            });
            assert_eq!(seen, 0);
        })
        .join()
        .unwrap();

        unregister_safe_function_closure(base, 16);
    }
}
