//! Importance promotion and explicit feedback

use serde::{Deserialize, Serialize};

use crate::record::{MemoryRecord, MemoryState};

/// Direction of explicit caller feedback on a memory's importance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackDirection {
    Promote,
    Demote,
}

/// Knobs for importance adjustments and the dormancy guard
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportanceConfig {
    /// Importance assigned to new records
    pub default_importance: f64,

    /// Step applied on explicit promote/demote feedback
    pub feedback_step: f64,

    /// Boost applied when a dormant or low-importance record surfaces in a
    /// high-leverage moment
    pub high_leverage_boost: f64,

    /// Records at or below this importance count as low-importance for the
    /// high-leverage boost
    pub low_importance_ceiling: f64,

    /// Records at or above this importance are shielded from the
    /// maintenance sweep's Active -> Dormant transition
    pub dormancy_guard: f64,
}

impl Default for ImportanceConfig {
    fn default() -> Self {
        Self {
            default_importance: 0.3,
            feedback_step: 0.2,
            high_leverage_boost: 0.15,
            low_importance_ceiling: 0.4,
            dormancy_guard: 0.5,
        }
    }
}

/// Adjusts importance through recall events and explicit feedback
///
/// Importance only ever moves through these operations; demotion in
/// particular is explicit-only so user-corrected memories are never
/// silently discarded.
#[derive(Debug, Clone, Default)]
pub struct ImportancePromoter {
    config: ImportanceConfig,
}

impl ImportancePromoter {
    pub fn new(config: ImportanceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ImportanceConfig {
        &self.config
    }

    /// Importance for a freshly created record
    pub fn initial_importance(&self, high_leverage: bool) -> f64 {
        let base = self.config.default_importance;
        if high_leverage {
            clamp_unit(base + self.config.high_leverage_boost)
        } else {
            base
        }
    }

    /// Retroactive importance: a dormant or low-importance record surfacing
    /// in a caller-flagged high-leverage moment gains importance, which in
    /// turn raises its effective dormancy floor. Returns whether the record
    /// changed.
    pub fn on_recall(&self, record: &mut MemoryRecord, high_leverage: bool) -> bool {
        if !high_leverage {
            return false;
        }
        let eligible = record.state == MemoryState::Dormant
            || record.importance <= self.config.low_importance_ceiling;
        if !eligible {
            return false;
        }
        let boosted = clamp_unit(record.importance + self.config.high_leverage_boost);
        let changed = boosted != record.importance;
        record.importance = boosted;
        changed
    }

    /// Explicit feedback, bounded to [0, 1]
    pub fn apply_feedback(&self, record: &mut MemoryRecord, direction: FeedbackDirection) {
        let step = match direction {
            FeedbackDirection::Promote => self.config.feedback_step,
            FeedbackDirection::Demote => -self.config.feedback_step,
        };
        record.importance = clamp_unit(record.importance + step);
    }

    /// Whether importance shields this record from the dormancy sweep
    pub fn shields_from_dormancy(&self, record: &MemoryRecord) -> bool {
        record.importance >= self.config.dormancy_guard
    }
}

fn clamp_unit(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn promoter() -> ImportancePromoter {
        ImportancePromoter::default()
    }

    fn record_with_importance(importance: f64) -> MemoryRecord {
        MemoryRecord::new("keeps a standing desk", vec![0.0; 4]).with_importance(importance)
    }

    #[test]
    fn feedback_moves_importance_and_clamps() {
        let p = promoter();

        let mut r = record_with_importance(0.9);
        p.apply_feedback(&mut r, FeedbackDirection::Promote);
        assert_eq!(r.importance, 1.0);

        let mut r = record_with_importance(0.1);
        p.apply_feedback(&mut r, FeedbackDirection::Demote);
        assert_eq!(r.importance, 0.0);

        let mut r = record_with_importance(0.5);
        p.apply_feedback(&mut r, FeedbackDirection::Promote);
        assert!((r.importance - 0.7).abs() < 1e-12);
    }

    #[test]
    fn high_leverage_recall_boosts_only_eligible_records() {
        let p = promoter();

        let mut low = record_with_importance(0.2);
        assert!(p.on_recall(&mut low, true));
        assert!((low.importance - 0.35).abs() < 1e-12);

        let mut dormant = record_with_importance(0.8);
        dormant.mark_dormant();
        assert!(p.on_recall(&mut dormant, true));

        let mut settled = record_with_importance(0.8);
        assert!(!p.on_recall(&mut settled, true));
        assert_eq!(settled.importance, 0.8);
    }

    #[test]
    fn recall_without_the_flag_never_mutates() {
        let p = promoter();
        let mut r = record_with_importance(0.1);
        assert!(!p.on_recall(&mut r, false));
        assert_eq!(r.importance, 0.1);
    }

    #[test]
    fn initial_importance_reflects_leverage() {
        let p = promoter();
        assert_eq!(p.initial_importance(false), 0.3);
        assert!((p.initial_importance(true) - 0.45).abs() < 1e-12);
    }

    #[test]
    fn dormancy_guard_uses_the_threshold() {
        let p = promoter();
        assert!(p.shields_from_dormancy(&record_with_importance(0.5)));
        assert!(!p.shields_from_dormancy(&record_with_importance(0.49)));
    }
}
