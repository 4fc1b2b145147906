//! # Statistics Reporter
//!
//! Read-only projection of [`AggregateStats`] for external consumers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::AggregateStats;

/// Stable snapshot handed to collaborators
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_items: usize,
    pub total_size_bytes: u64,
    pub hit_count: u64,
    pub miss_count: u64,
    /// `hits / (hits + misses)`, 0 when no lookups happened
    pub hit_rate: f64,
    /// `1 - hit_rate`, 0 when no lookups happened
    pub miss_rate: f64,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

pub struct StatisticsReporter;

impl StatisticsReporter {
    pub fn report(stats: &AggregateStats) -> CacheStats {
        let lookups = stats.hit_count + stats.miss_count;
        let (hit_rate, miss_rate) = if lookups == 0 {
            (0.0, 0.0)
        } else {
            let hit_rate = stats.hit_count as f64 / lookups as f64;
            (hit_rate, 1.0 - hit_rate)
        };

        CacheStats {
            total_items: stats.total_items,
            total_size_bytes: stats.total_size_bytes,
            hit_count: stats.hit_count,
            miss_count: stats.miss_count,
            hit_rate,
            miss_rate,
            oldest_entry: stats.oldest_entry,
            newest_entry: stats.newest_entry,
        }
    }
}

impl From<&AggregateStats> for CacheStats {
    fn from(stats: &AggregateStats) -> Self {
        StatisticsReporter::report(stats)
    }
}

/// Byte count rendered as `B`, `KB`, `MB` or `GB` with one decimal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanSize(pub u64);

impl fmt::Display for HumanSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const KB: f64 = 1024.0;
        const MB: f64 = KB * 1024.0;
        const GB: f64 = MB * 1024.0;

        let bytes = self.0 as f64;
        if bytes < KB {
            write!(f, "{} B", self.0)
        } else if bytes < MB {
            write!(f, "{:.1} KB", bytes / KB)
        } else if bytes < GB {
            write!(f, "{:.1} MB", bytes / MB)
        } else {
            write!(f, "{:.1} GB", bytes / GB)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates_are_zero_without_lookups() {
        let report = StatisticsReporter::report(&AggregateStats::default());
        assert_eq!(report.hit_rate, 0.0);
        assert_eq!(report.miss_rate, 0.0);
        assert!(!report.hit_rate.is_nan());
    }

    #[test]
    fn test_rates() {
        let stats = AggregateStats {
            hit_count: 3,
            miss_count: 1,
            ..Default::default()
        };
        let report = CacheStats::from(&stats);
        assert_eq!(report.hit_rate, 0.75);
        assert_eq!(report.miss_rate, 0.25);
    }

    #[test]
    fn test_only_misses() {
        let stats = AggregateStats {
            miss_count: 4,
            ..Default::default()
        };
        let report = StatisticsReporter::report(&stats);
        assert_eq!(report.hit_rate, 0.0);
        assert_eq!(report.miss_rate, 1.0);
    }

    #[test]
    fn test_human_size() {
        assert_eq!(HumanSize(512).to_string(), "512 B");
        assert_eq!(HumanSize(1536).to_string(), "1.5 KB");
        assert_eq!(HumanSize(5 * 1024 * 1024).to_string(), "5.0 MB");
        assert_eq!(HumanSize(3 * 1024 * 1024 * 1024).to_string(), "3.0 GB");
    }
}
