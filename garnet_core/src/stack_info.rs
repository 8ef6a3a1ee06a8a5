//! Stack bounds for the current thread.
//!
//! The collector scans the machine stack conservatively, so it needs to know
//! where the stack ends. The bounds are queried from the platform once, on
//! the thread that owns the heap, and cached.

/// Bounds of the current thread's stack.
///
/// `base` is the lowest usable address, `top` one past the highest. The
/// stack grows downward on every supported platform, so a frame that is
/// currently live sits somewhere in `base..top` and everything between its
/// address and `top` belongs to callers.
#[derive(Debug, Clone, Copy)]
pub struct StackInfo {
    base: usize,
    top: usize,
}

/// Window assumed below the anchor address when the platform cannot report
/// exact bounds.
const FALLBACK_STACK_SIZE: usize = 8 * 1024 * 1024;

impl StackInfo {
    /// Capture the stack bounds of the calling thread.
    pub fn capture() -> Self {
        if let Some((base, top)) = current_thread_bounds() {
            return Self { base, top };
        }
        // No platform query available: anchor the window at a local captured
        // now. Frames entered after this call sit below the anchor, which is
        // all the conservative scanner needs.
        let anchor = 0usize;
        let top = &anchor as *const usize as usize;
        Self {
            base: top.saturating_sub(FALLBACK_STACK_SIZE),
            top,
        }
    }

    /// Lowest usable stack address.
    #[inline]
    pub fn base(&self) -> usize {
        self.base
    }

    /// One past the highest usable stack address.
    #[inline]
    pub fn top(&self) -> usize {
        self.top
    }

    /// Size of the usable stack in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.top - self.base
    }

    /// True if `addr` lies inside the stack.
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.top
    }
}

#[cfg(target_os = "linux")]
fn current_thread_bounds() -> Option<(usize, usize)> {
    unsafe {
        let mut attr: libc::pthread_attr_t = std::mem::zeroed();
        if libc::pthread_getattr_np(libc::pthread_self(), &mut attr) != 0 {
            return None;
        }
        let mut stack_addr: *mut libc::c_void = std::ptr::null_mut();
        let mut stack_size: libc::size_t = 0;
        let rc = libc::pthread_attr_getstack(&attr, &mut stack_addr, &mut stack_size);
        libc::pthread_attr_destroy(&mut attr);
        if rc != 0 {
            return None;
        }
        let base = stack_addr as usize;
        Some((base, base + stack_size))
    }
}

#[cfg(target_os = "macos")]
fn current_thread_bounds() -> Option<(usize, usize)> {
    unsafe {
        let thread = libc::pthread_self();
        // On macOS the "stack address" is the high end of the stack.
        let top = libc::pthread_get_stackaddr_np(thread) as usize;
        let size = libc::pthread_get_stacksize_np(thread);
        if top == 0 || size == 0 {
            return None;
        }
        Some((top - size, top))
    }
}

#[cfg(windows)]
fn current_thread_bounds() -> Option<(usize, usize)> {
    use windows_sys::Win32::System::Threading::GetCurrentThreadStackLimits;

    let mut low: usize = 0;
    let mut high: usize = 0;
    unsafe { GetCurrentThreadStackLimits(&mut low, &mut high) };
    if low == 0 || high == 0 {
        return None;
    }
    Some((low, high))
}

#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
fn current_thread_bounds() -> Option<(usize, usize)> {
    None
}
