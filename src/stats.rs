//! Per-session counters for -c mode

use crate::dispatcher::IgnoreReason;

/// Counters describing what a session did with its notifications
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceStats {
    /// Notifications handled by the owning process and thread
    pub events: u64,
    /// Calls pushed onto the shadow stack
    pub calls: u64,
    /// Returns matched and popped
    pub returns: u64,
    /// Records written to the sink
    pub records: u64,
    /// Edge records skipped by the dedup memo
    pub duplicates: u64,
    /// Calls suppressed by the filter
    pub suppressed: u64,
    /// Returns dropped because no frame matched
    pub unmatched_returns: u64,
    /// Block returns resolved against the frame below
    pub block_returns: u64,
    /// Failed sink writes
    pub write_errors: u64,
    /// Deepest shadow stack seen
    pub max_depth: usize,
    ignored: [u64; IgnoreReason::COUNT],
}

impl TraceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_ignored(&mut self, reason: IgnoreReason) {
        self.ignored[reason.index()] += 1;
    }

    pub fn ignored(&self, reason: IgnoreReason) -> u64 {
        self.ignored[reason.index()]
    }

    pub fn total_ignored(&self) -> u64 {
        self.ignored.iter().sum()
    }

    pub fn observe_depth(&mut self, depth: usize) {
        self.max_depth = self.max_depth.max(depth);
    }

    /// Print session summary to stderr
    pub fn print_summary(&self) {
        eprintln!("\n╔════════════════════════════════════════════════════════════╗");
        eprintln!("║  Call Trace Summary                                        ║");
        eprintln!("╚════════════════════════════════════════════════════════════╝");
        eprintln!();
        eprintln!("{:<30} {:>12}", "Notifications", self.events);
        eprintln!("{:<30} {:>12}", "Calls tracked", self.calls);
        eprintln!("{:<30} {:>12}", "Returns matched", self.returns);
        eprintln!("{:<30} {:>12}", "Records written", self.records);
        eprintln!("{:<30} {:>12}", "Duplicate edges", self.duplicates);
        eprintln!("{:<30} {:>12}", "Suppressed calls", self.suppressed);
        eprintln!("{:<30} {:>12}", "Unmatched returns", self.unmatched_returns);
        eprintln!("{:<30} {:>12}", "Block returns", self.block_returns);
        eprintln!("{:<30} {:>12}", "Max stack depth", self.max_depth);
        if self.write_errors > 0 {
            eprintln!("{:<30} {:>12}", "Write errors", self.write_errors);
        }
        eprintln!("{}", "─".repeat(43));
        for reason in IgnoreReason::ALL {
            let count = self.ignored(reason);
            if count > 0 {
                eprintln!("{:<30} {:>12}", format!("Ignored ({})", reason.as_str()), count);
            }
        }
        eprintln!("{:<30} {:>12}", "Ignored total", self.total_ignored());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_default_is_zero() {
        let stats = TraceStats::new();
        assert_eq!(stats.events, 0);
        assert_eq!(stats.total_ignored(), 0);
    }

    #[test]
    fn test_ignored_counts_per_reason() {
        let mut stats = TraceStats::new();
        stats.record_ignored(IgnoreReason::ForeignThread);
        stats.record_ignored(IgnoreReason::ForeignThread);
        stats.record_ignored(IgnoreReason::ForkedChild);
        assert_eq!(stats.ignored(IgnoreReason::ForeignThread), 2);
        assert_eq!(stats.ignored(IgnoreReason::ForkedChild), 1);
        assert_eq!(stats.ignored(IgnoreReason::NotTracing), 0);
        assert_eq!(stats.total_ignored(), 3);
    }

    #[test]
    fn test_observe_depth_keeps_maximum() {
        let mut stats = TraceStats::new();
        stats.observe_depth(3);
        stats.observe_depth(1);
        assert_eq!(stats.max_depth, 3);
    }

    #[test]
    fn test_print_summary_with_data() {
        let mut stats = TraceStats::new();
        stats.events = 10;
        stats.records = 4;
        stats.write_errors = 1;
        stats.record_ignored(IgnoreReason::TracerInternal);
        // Should not panic
        stats.print_summary();
    }
}
