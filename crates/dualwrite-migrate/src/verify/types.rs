//! Type definitions for consistency validation.

use serde::{Deserialize, Serialize};

/// What a scan does when a read fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanErrorPolicy {
    /// Stop the scan and return the error.
    Abort,
    /// Skip the failed page, or end the scan cleanly if the driving store
    /// cannot be read.
    Continue,
}

/// Counters for one scan direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    /// Pages read from the driving store.
    pub pages: u64,
    /// Rows read from the driving store.
    pub rows_scanned: u64,
    pub target_missing: u64,
    pub base_missing: u64,
    pub not_equal: u64,
    /// Pages whose lookup on the other store failed.
    pub pages_skipped: u64,
    /// Events the sink rejected or did not accept in time.
    pub events_failed: u64,
}

impl ScanStats {
    /// Inconsistencies found by this scan.
    pub fn inconsistencies(&self) -> u64 {
        self.target_missing + self.base_missing + self.not_equal
    }
}

/// Result of one validation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Base-to-target scan.
    pub forward: ScanStats,
    /// Target-to-base scan.
    pub reverse: ScanStats,
}

impl ValidationReport {
    pub fn inconsistencies(&self) -> u64 {
        self.forward.inconsistencies() + self.reverse.inconsistencies()
    }

    /// No divergence found and nothing was skipped.
    pub fn is_consistent(&self) -> bool {
        self.inconsistencies() == 0
            && self.forward.pages_skipped == 0
            && self.reverse.pages_skipped == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_totals() {
        let report = ValidationReport {
            forward: ScanStats {
                target_missing: 2,
                not_equal: 1,
                ..Default::default()
            },
            reverse: ScanStats {
                base_missing: 3,
                ..Default::default()
            },
        };
        assert_eq!(report.inconsistencies(), 6);
        assert!(!report.is_consistent());
        assert!(ValidationReport::default().is_consistent());
    }

    #[test]
    fn test_policy_names() {
        let p: ScanErrorPolicy = serde_yaml::from_str("continue").unwrap();
        assert_eq!(p, ScanErrorPolicy::Continue);
    }
}
