//! Overall progress across a multi-partition session.

/// Blends per-partition sub-progress into one session-wide percentage.
///
/// Partition `i` of `N` owns the slice `[i/N, (i+1)/N)` of the range; its
/// own 0-100 progress is mapped linearly into that slice. The reported value
/// never decreases, even if a tool restarts its own counter.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressAggregator {
    total: usize,
    completed: usize,
    current_sub: u8,
    reported: u8,
}

impl ProgressAggregator {
    pub fn new(total: usize) -> Self {
        ProgressAggregator {
            total,
            completed: 0,
            current_sub: 0,
            reported: 0,
        }
    }

    pub fn overall(&self) -> u8 {
        self.reported
    }

    /// Record sub-progress for the partition in flight; returns the overall value.
    pub fn update(&mut self, sub_percent: u8) -> u8 {
        self.current_sub = sub_percent.min(100);
        self.recompute()
    }

    /// Mark the partition in flight finished, whatever its verdict.
    pub fn partition_finished(&mut self) -> u8 {
        self.completed = (self.completed + 1).min(self.total);
        self.current_sub = 0;
        self.recompute()
    }

    fn recompute(&mut self) -> u8 {
        if self.total == 0 {
            return self.reported;
        }
        let blended = (self.completed as f64 + self.current_sub as f64 / 100.0) / self.total as f64 * 100.0;
        let value = blended.floor().clamp(0.0, 100.0) as u8;
        self.reported = self.reported.max(value);
        self.reported
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blend_into_partition_slice() {
        let mut agg = ProgressAggregator::new(4);
        assert_eq!(agg.update(50), 12);
        assert_eq!(agg.partition_finished(), 25);
        assert_eq!(agg.update(100), 50);
        assert_eq!(agg.partition_finished(), 50);
    }

    #[test]
    fn test_monotonic_when_tool_restarts_counter() {
        let mut agg = ProgressAggregator::new(2);
        agg.update(80);
        let before = agg.overall();
        assert_eq!(agg.update(10), before);
    }

    #[test]
    fn test_all_finished_is_100() {
        let mut agg = ProgressAggregator::new(3);
        for _ in 0..3 {
            agg.partition_finished();
        }
        assert_eq!(agg.overall(), 100);
        assert_eq!(agg.partition_finished(), 100);
    }
}
