//! Spaced-repetition decay: retrievability, stability growth, lapses

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{MemoryRecord, MAX_DIFFICULTY, MIN_DIFFICULTY};

/// Reviews closer together than this count as same-day re-reviews and get a
/// damped stability bump
const SAME_DAY_WINDOW_DAYS: f64 = 1.0;

/// Outcome signal for a recall event, reported by the host agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecallSignal {
    /// The memory failed when it was needed (routes to the lapse path)
    Failed,
    /// Recalled, but barely useful
    Hard,
    /// Recalled and useful
    Good,
    /// Recalled effortlessly and exactly right
    Easy,
}

impl RecallSignal {
    /// Parse the numeric 1..4 form used on the wire
    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            1 => Some(RecallSignal::Failed),
            2 => Some(RecallSignal::Hard),
            3 => Some(RecallSignal::Good),
            4 => Some(RecallSignal::Easy),
            _ => None,
        }
    }

    pub fn value(self) -> u8 {
        match self {
            RecallSignal::Failed => 1,
            RecallSignal::Hard => 2,
            RecallSignal::Good => 3,
            RecallSignal::Easy => 4,
        }
    }

    /// Signed distance from the neutral signal (Good)
    fn offset(self) -> f64 {
        f64::from(self.value()) - 3.0
    }
}

impl std::fmt::Display for RecallSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecallSignal::Failed => write!(f, "failed"),
            RecallSignal::Hard => write!(f, "hard"),
            RecallSignal::Good => write!(f, "good"),
            RecallSignal::Easy => write!(f, "easy"),
        }
    }
}

/// Tunable decay parameters (FSRS-6 lineage defaults)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayParams {
    /// Exponent of the power-law forgetting curve
    pub decay_exponent: f64,

    /// Stability assigned to freshly created records, in days
    pub stability_seed: f64,

    /// Smallest legal stability; updates clamp here, lower stored values are
    /// invariant violations
    pub stability_floor: f64,

    /// Exponent applied to the growth multiplier on same-day re-reviews
    pub same_day_damping: f64,

    /// Scale of post-lapse stability
    pub lapse_scale: f64,

    /// How strongly difficulty suppresses post-lapse stability
    pub lapse_difficulty_exp: f64,

    /// Sub-linear credit for pre-lapse stability
    pub lapse_stability_exp: f64,

    /// Sensitivity of post-lapse stability to how expected the failure was
    pub lapse_surprise_exp: f64,

    /// Per-signal stability growth rate on successful recall
    pub recall_gain: f64,

    /// Small positive offset keeping neutral-signal reviews net-positive
    pub recall_signal_offset: f64,

    /// Saturation exponent: higher stability earns smaller relative gains
    pub recall_saturation: f64,

    /// Mean-reversion target for difficulty
    pub difficulty_target: f64,

    /// Difficulty shift per unit of signal away from neutral
    pub difficulty_step: f64,

    /// Fraction of the gap to the target closed per review
    pub difficulty_reversion: f64,
}

impl Default for DecayParams {
    fn default() -> Self {
        Self {
            decay_exponent: 0.1542,
            stability_seed: 1.0,
            stability_floor: 0.01,
            same_day_damping: 0.5,
            lapse_scale: 1.4835,
            lapse_difficulty_exp: 0.0614,
            lapse_stability_exp: 0.2629,
            lapse_surprise_exp: 1.6483,
            recall_gain: 0.5425,
            recall_signal_offset: 0.0912,
            recall_saturation: 0.0658,
            difficulty_target: 5.0,
            difficulty_step: 0.8,
            difficulty_reversion: 0.05,
        }
    }
}

/// Computes retrievability and applies recall/lapse updates to records
///
/// The forgetting curve is `R(t, S) = (1 + f * t / S) ^ -d` with `d` the
/// configured decay exponent. `f` is not a free parameter: it is derived
/// from the anchor condition `R(S, S) = 0.9` ("stability is the number of
/// days until retrievability reaches 90%"), which gives
/// `f = 0.9 ^ (-1 / d) - 1`.
#[derive(Debug, Clone)]
pub struct DecayEngine {
    params: DecayParams,
    decay_factor: f64,
}

impl DecayEngine {
    pub fn new(params: DecayParams) -> Self {
        let decay_factor = 0.9_f64.powf(-1.0 / params.decay_exponent) - 1.0;
        Self {
            params,
            decay_factor,
        }
    }

    pub fn params(&self) -> &DecayParams {
        &self.params
    }

    /// The anchor-derived curve factor `f`
    pub fn decay_factor(&self) -> f64 {
        self.decay_factor
    }

    /// Retrievability for a given stability after `elapsed_days`
    pub fn retrievability_at(&self, stability: f64, elapsed_days: f64) -> f64 {
        if elapsed_days <= 0.0 {
            return 1.0;
        }
        let stability = stability.max(self.params.stability_floor);
        (1.0 + self.decay_factor * elapsed_days / stability).powf(-self.params.decay_exponent)
    }

    /// Current retrievability of a record
    pub fn retrievability(&self, record: &MemoryRecord, now: DateTime<Utc>) -> f64 {
        self.retrievability_at(record.stability, elapsed_days(record.last_reviewed_at, now))
    }

    /// Apply a recall event. Successful signals grow stability
    /// logarithmically (gains shrink as stability rises, and a success never
    /// shrinks it); a Failed signal routes to [`DecayEngine::apply_lapse`].
    pub fn apply_recall(&self, record: &mut MemoryRecord, now: DateTime<Utc>, signal: RecallSignal) {
        if signal == RecallSignal::Failed {
            return self.apply_lapse(record, now);
        }

        let p = &self.params;
        let elapsed = elapsed_days(record.last_reviewed_at, now);
        let mut multiplier = (p.recall_gain * (signal.offset() + p.recall_signal_offset)).exp()
            * record.stability.powf(-p.recall_saturation);
        if elapsed < SAME_DAY_WINDOW_DAYS {
            multiplier = multiplier.powf(p.same_day_damping);
        }

        let grown = (record.stability * multiplier).max(record.stability);
        record.stability = grown.max(p.stability_floor);
        record.difficulty = self.reviewed_difficulty(record.difficulty, signal);
        record.last_reviewed_at = now;
        record.review_count += 1;
    }

    /// Apply a lapse (failed recall or detected contradiction). The less
    /// expected the failure was - the higher retrievability stood at that
    /// moment - the harder stability is cut. Never increases stability.
    pub fn apply_lapse(&self, record: &mut MemoryRecord, now: DateTime<Utc>) {
        let p = &self.params;
        let r = self.retrievability(record, now);
        let shrunk = p.lapse_scale
            * record.difficulty.powf(-p.lapse_difficulty_exp)
            * ((record.stability + 1.0).powf(p.lapse_stability_exp) - 1.0)
            * (p.lapse_surprise_exp * (1.0 - r)).exp();

        record.stability = shrunk.min(record.stability).max(p.stability_floor);
        record.difficulty = self.reviewed_difficulty(record.difficulty, RecallSignal::Failed);
        record.last_reviewed_at = now;
        record.review_count += 1;
    }

    /// Mean-revert difficulty toward the target without a review signal.
    /// Used when the maintenance sweep ages a record into Dormant.
    pub fn revert_difficulty(&self, difficulty: f64) -> f64 {
        let p = &self.params;
        let reverted =
            p.difficulty_reversion * p.difficulty_target + (1.0 - p.difficulty_reversion) * difficulty;
        reverted.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
    }

    /// Post-review difficulty: step away from neutral by the signal, then
    /// mean-revert toward the target so difficulty cannot lock at an extreme
    fn reviewed_difficulty(&self, difficulty: f64, signal: RecallSignal) -> f64 {
        let p = &self.params;
        let stepped = difficulty - p.difficulty_step * signal.offset();
        let reverted =
            p.difficulty_reversion * p.difficulty_target + (1.0 - p.difficulty_reversion) * stepped;
        reverted.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
    }
}

impl Default for DecayEngine {
    fn default() -> Self {
        Self::new(DecayParams::default())
    }
}

/// Fractional days between two instants, clamped at zero
fn elapsed_days(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    ((to - from).num_milliseconds() as f64 / 86_400_000.0).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn engine() -> DecayEngine {
        DecayEngine::default()
    }

    fn record_with_stability(stability: f64) -> MemoryRecord {
        MemoryRecord::new("the capital of France is Paris", vec![0.0; 4])
            .with_stability(stability)
    }

    #[test]
    fn factor_satisfies_the_90_percent_anchor() {
        let e = engine();
        let d = e.params().decay_exponent;
        let anchored = (1.0 + e.decay_factor()).powf(-d);
        assert!((anchored - 0.9).abs() < 1e-12);
    }

    #[test]
    fn retrievability_at_stability_days_is_90_percent() {
        let e = engine();
        for s in [0.5, 1.0, 7.0, 30.0, 365.0] {
            assert!((e.retrievability_at(s, s) - 0.9).abs() < 1e-9);
        }
    }

    #[test]
    fn retrievability_is_one_with_no_elapsed_time() {
        let e = engine();
        assert_eq!(e.retrievability_at(3.0, 0.0), 1.0);
        assert_eq!(e.retrievability_at(3.0, -2.0), 1.0);
    }

    #[test]
    fn retrievability_decreases_with_elapsed_time() {
        let e = engine();
        let mut last = 1.0;
        for t in [1.0, 5.0, 30.0, 120.0, 1000.0] {
            let r = e.retrievability_at(10.0, t);
            assert!(r < last, "R should fall as {} days elapse", t);
            assert!(r > 0.0);
            last = r;
        }
    }

    #[test]
    fn recall_resets_retrievability_to_one() {
        let e = engine();
        let now = Utc::now();
        let mut r = record_with_stability(2.0);
        r.last_reviewed_at = now - Duration::days(10);

        e.apply_recall(&mut r, now, RecallSignal::Good);
        assert!((e.retrievability(&r, now) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn repeated_good_recalls_gain_less_each_time() {
        let e = engine();
        let mut r = record_with_stability(e.params().stability_seed);
        let mut now = Utc::now();
        let mut previous = r.stability;
        let mut previous_gain = f64::MAX;

        for _ in 0..6 {
            now += Duration::days(2);
            e.apply_recall(&mut r, now, RecallSignal::Good);
            let gain = r.stability - previous;
            assert!(gain > 0.0, "stability should keep rising");
            assert!(gain < previous_gain, "gains should decelerate");
            previous = r.stability;
            previous_gain = gain;
        }
    }

    #[test]
    fn young_memories_gain_proportionally_more() {
        let e = engine();
        let now = Utc::now();

        let mut young = record_with_stability(1.0);
        young.last_reviewed_at = now - Duration::days(2);
        let mut old = record_with_stability(1.8);
        old.last_reviewed_at = now - Duration::days(2);

        e.apply_recall(&mut young, now, RecallSignal::Good);
        e.apply_recall(&mut old, now, RecallSignal::Good);

        assert!(young.stability / 1.0 > old.stability / 1.8);
    }

    #[test]
    fn successful_recall_never_shrinks_stability() {
        // Far above the growth fixed point the raw multiplier dips below 1;
        // the update clamps instead of shrinking.
        let e = engine();
        let now = Utc::now();
        let mut r = record_with_stability(30.0);
        r.last_reviewed_at = now - Duration::days(10);

        e.apply_recall(&mut r, now, RecallSignal::Good);
        assert!(r.stability >= 30.0);
    }

    #[test]
    fn same_day_re_review_is_damped() {
        let e = engine();
        let now = Utc::now();

        let mut immediate = record_with_stability(1.0);
        immediate.last_reviewed_at = now;
        e.apply_recall(&mut immediate, now, RecallSignal::Easy);

        let mut spaced = record_with_stability(1.0);
        spaced.last_reviewed_at = now - Duration::days(3);
        e.apply_recall(&mut spaced, now, RecallSignal::Easy);

        assert!(immediate.stability < spaced.stability);
        assert!(immediate.stability > 1.0);
    }

    #[test]
    fn lapse_never_increases_stability() {
        let e = engine();
        let now = Utc::now();
        for s in [0.05, 1.0, 30.0, 400.0] {
            let mut r = record_with_stability(s);
            r.last_reviewed_at = now - Duration::days(45);
            e.apply_lapse(&mut r, now);
            assert!(r.stability <= s, "lapse grew stability from {}", s);
            assert!(r.stability >= e.params().stability_floor);
        }
    }

    #[test]
    fn expected_failures_cut_less_than_surprising_ones() {
        let e = engine();
        let now = Utc::now();

        // Failing right after a review (retrievability near 1) is the
        // surprising case and should leave less stability behind.
        let mut surprising = record_with_stability(30.0);
        surprising.last_reviewed_at = now - Duration::days(1);
        e.apply_lapse(&mut surprising, now);

        let mut expected = record_with_stability(30.0);
        expected.last_reviewed_at = now - Duration::days(900);
        e.apply_lapse(&mut expected, now);

        assert!(surprising.stability < expected.stability);
    }

    #[test]
    fn failed_signal_routes_to_lapse() {
        let e = engine();
        let now = Utc::now();
        let mut via_signal = record_with_stability(12.0);
        via_signal.last_reviewed_at = now - Duration::days(20);
        let mut via_lapse = via_signal.clone();

        e.apply_recall(&mut via_signal, now, RecallSignal::Failed);
        e.apply_lapse(&mut via_lapse, now);

        assert_eq!(via_signal.stability, via_lapse.stability);
        assert_eq!(via_signal.review_count, 1);
    }

    #[test]
    fn difficulty_moves_with_signal_and_stays_bounded() {
        let e = engine();
        let now = Utc::now();

        let mut hard = record_with_stability(1.0).with_difficulty(5.0);
        hard.last_reviewed_at = now - Duration::days(2);
        e.apply_recall(&mut hard, now, RecallSignal::Hard);
        assert!(hard.difficulty > 5.0);

        let mut easy = record_with_stability(1.0).with_difficulty(5.0);
        easy.last_reviewed_at = now - Duration::days(2);
        e.apply_recall(&mut easy, now, RecallSignal::Easy);
        assert!(easy.difficulty < 5.0);

        let mut pinned = record_with_stability(1.0).with_difficulty(MAX_DIFFICULTY);
        for _ in 0..50 {
            let t = pinned.last_reviewed_at + Duration::days(2);
            e.apply_recall(&mut pinned, t, RecallSignal::Failed);
            assert!(pinned.difficulty <= MAX_DIFFICULTY);
        }
    }

    #[test]
    fn difficulty_mean_reverts_toward_target() {
        let e = engine();
        let now = Utc::now();
        let mut r = record_with_stability(1.0).with_difficulty(9.0);
        r.last_reviewed_at = now - Duration::days(2);

        // A neutral review should pull difficulty down toward the target.
        e.apply_recall(&mut r, now, RecallSignal::Good);
        assert!(r.difficulty < 9.0);
        assert!(r.difficulty > e.params().difficulty_target);

        assert!(e.revert_difficulty(9.0) < 9.0);
        assert!(e.revert_difficulty(2.0) > 2.0);
    }

    #[test]
    fn recall_signal_numeric_round_trip() {
        for v in 1..=4u8 {
            assert_eq!(RecallSignal::from_value(v).unwrap().value(), v);
        }
        assert!(RecallSignal::from_value(0).is_none());
        assert!(RecallSignal::from_value(5).is_none());
    }
}
