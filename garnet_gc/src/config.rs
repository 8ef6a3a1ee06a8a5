//! Heap configuration.

/// Configuration for a [`Heap`](crate::heap::Heap).
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Floor for the allocation-triggered collection threshold.
    ///
    /// After each collection the threshold is set to
    /// `max(live_cell_bytes, gc_min_bytes_threshold)`, so the next cycle
    /// runs after roughly a doubling of the surviving set.
    ///
    /// Default: 4MB
    pub gc_min_bytes_threshold: usize,

    /// Collect before every allocation. Slow; stress-testing hook.
    ///
    /// Default: false
    pub collect_on_every_allocation: bool,

    /// Scan the stack, saved registers, and registered custom ranges for
    /// possible pointers when gathering roots.
    ///
    /// Disabling this leaves only precise roots (handles, marked vectors,
    /// runtime roots), which makes collection counts deterministic; tests
    /// that assert exact reclamation rely on it.
    ///
    /// Default: true
    pub conservative_scan: bool,

    /// Log collector activity to stderr.
    ///
    /// Default: false
    pub trace: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            gc_min_bytes_threshold: 4 * 1024 * 1024,
            collect_on_every_allocation: false,
            conservative_scan: true,
            trace: false,
        }
    }
}

impl GcConfig {
    /// Configuration with only precise roots, for tests that assert exact
    /// collection counts.
    pub fn deterministic() -> Self {
        Self {
            conservative_scan: false,
            ..Default::default()
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gc_min_bytes_threshold == 0 {
            return Err(ConfigError::ZeroGcThreshold);
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The threshold floor must be non-zero or every allocation collects.
    ZeroGcThreshold,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ZeroGcThreshold => {
                write!(f, "gc_min_bytes_threshold must be non-zero")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
