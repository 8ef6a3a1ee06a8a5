//! Collection statistics and the textual report.

use std::time::Duration;

use crate::heap::HEAP_BLOCK_SIZE;

/// Numbers from a single completed collection cycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleStats {
    /// Cells that survived the cycle.
    pub live_cells: usize,
    /// Bytes occupied by surviving cells.
    pub live_bytes: usize,
    /// Cells reclaimed by the sweep.
    pub collected_cells: usize,
    /// Bytes reclaimed by the sweep.
    pub collected_bytes: usize,
    /// Blocks still owned by allocators after the sweep.
    pub live_blocks: usize,
    /// Blocks released back to the system.
    pub freed_blocks: usize,
    /// Wall-clock duration of the cycle.
    pub duration: Duration,
}

/// Statistics about collector activity.
#[derive(Debug, Default, Clone)]
pub struct GcStats {
    /// Completed collections.
    pub collections: u64,
    /// Cells reclaimed over the heap's lifetime.
    pub total_cells_collected: u64,
    /// Bytes reclaimed over the heap's lifetime.
    pub total_bytes_collected: u64,
    /// Time spent collecting over the heap's lifetime.
    pub total_pause: Duration,
    /// The most recent cycle.
    pub last_cycle: CycleStats,
}

impl GcStats {
    pub(crate) fn record_collection(&mut self, cycle: CycleStats) {
        self.collections += 1;
        self.total_cells_collected += cycle.collected_cells as u64;
        self.total_bytes_collected += cycle.collected_bytes as u64;
        self.total_pause += cycle.duration;
        self.last_cycle = cycle;
    }
}

pub(crate) fn print_report(cycle: &CycleStats) {
    eprintln!("Garbage collection report");
    eprintln!("=============================================");
    eprintln!("     Time spent: {} ms", cycle.duration.as_millis());
    eprintln!(
        "     Live cells: {} ({} bytes)",
        cycle.live_cells, cycle.live_bytes
    );
    eprintln!(
        "Collected cells: {} ({} bytes)",
        cycle.collected_cells, cycle.collected_bytes
    );
    eprintln!(
        "    Live blocks: {} ({} bytes)",
        cycle.live_blocks,
        cycle.live_blocks * HEAP_BLOCK_SIZE
    );
    eprintln!(
        "   Freed blocks: {} ({} bytes)",
        cycle.freed_blocks,
        cycle.freed_blocks * HEAP_BLOCK_SIZE
    );
    eprintln!("=============================================");
}

/// Format bytes in human-readable form.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_collection_accumulates() {
        let mut stats = GcStats::default();
        stats.record_collection(CycleStats {
            collected_cells: 10,
            collected_bytes: 640,
            ..Default::default()
        });
        stats.record_collection(CycleStats {
            collected_cells: 5,
            collected_bytes: 320,
            ..Default::default()
        });

        assert_eq!(stats.collections, 2);
        assert_eq!(stats.total_cells_collected, 15);
        assert_eq!(stats.total_bytes_collected, 960);
        assert_eq!(stats.last_cycle.collected_cells, 5);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 bytes");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
        assert_eq!(format_bytes(1073741824), "1.00 GB");
    }
}
