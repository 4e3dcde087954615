//! Plant tag reconciliation results

use serde::{Deserialize, Serialize};

/// Outcome of one `assign_tags` call
///
/// Rejections are per tag; a bad entry never aborts the rest of the call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagAssignmentResult {
    /// Newly assigned tags, in submission order
    pub assigned: Vec<String>,
    /// Tags already on this batch (or repeated in the submission), once each
    pub skipped_duplicates: Vec<String>,
    /// Tags rejected with a reason
    pub invalid: Vec<InvalidTag>,
    /// Set when the batch now carries more tags than plants
    pub mismatch_warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidTag {
    pub tag: String,
    pub reason: String,
}

/// Tagging progress for a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagCompletion {
    pub tagged: i64,
    pub total: i64,
    /// `tagged / total * 100`, 0 when `total` is 0; may exceed 100
    pub percentage: f64,
    /// Tagged exceeds plant count (reported, never truncated)
    pub over_assigned: bool,
}

impl TagCompletion {
    pub fn compute(tagged: i64, total: i64) -> Self {
        let percentage = if total > 0 {
            tagged as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        Self {
            tagged,
            total,
            percentage,
            over_assigned: tagged > total,
        }
    }

    pub fn mismatch_warning(&self) -> Option<String> {
        self.over_assigned.then(|| {
            format!(
                "{} tags assigned for {} plants; plant count may need finalization",
                self.tagged, self.total
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_percentage() {
        let c = TagCompletion::compute(25, 100);
        assert_eq!(c.percentage, 25.0);
        assert!(!c.over_assigned);
        assert!(c.mismatch_warning().is_none());
    }

    #[test]
    fn test_completion_zero_total() {
        let c = TagCompletion::compute(0, 0);
        assert_eq!(c.percentage, 0.0);
        assert!(!c.over_assigned);
    }

    #[test]
    fn test_over_assignment_not_truncated() {
        let c = TagCompletion::compute(120, 100);
        assert_eq!(c.tagged, 120);
        assert_eq!(c.percentage, 120.0);
        assert!(c.over_assigned);
        assert!(c.mismatch_warning().unwrap().contains("120 tags"));
    }
}
