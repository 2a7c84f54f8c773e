//! Data quality threshold for dropped samples and log lines

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// 不正データの破棄率の許容上限
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataQualityPolicy {
    /// 0.0..=1.0, ratio of dropped items above which the result is rejected
    pub max_drop_ratio: f64,
}

impl Default for DataQualityPolicy {
    fn default() -> Self {
        Self {
            max_drop_ratio: 0.5,
        }
    }
}

impl DataQualityPolicy {
    pub fn new(max_drop_ratio: f64) -> Self {
        Self {
            max_drop_ratio: max_drop_ratio.clamp(0.0, 1.0),
        }
    }

    /// Fails with `DataQualityDegraded` when `dropped / total` exceeds the limit.
    pub fn check(&self, what: &str, total: usize, dropped: usize) -> Result<()> {
        if total == 0 || dropped == 0 {
            return Ok(());
        }
        let ratio = dropped as f64 / total as f64;
        if ratio > self.max_drop_ratio {
            return Err(Error::DataQualityDegraded(format!(
                "{} of {} {} were malformed ({:.0}% > {:.0}% allowed)",
                dropped,
                total,
                what,
                ratio * 100.0,
                self.max_drop_ratio * 100.0
            )));
        }
        Ok(())
    }
}
