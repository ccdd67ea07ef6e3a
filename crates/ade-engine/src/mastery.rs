//! Mastery estimation from attempt context
//!
//! A correct answer earns a base gain that depends on how it was reached
//! (first try, after one miss, after several), scaled by difficulty and the
//! question's cognitive domain. Wrong answers cost an escalating penalty,
//! halved for beginners. Until enough attempts exist the result is capped so
//! a short lucky run cannot report high confidence.

use serde::{Deserialize, Serialize};
use tracing::info;

use ade_core::util::{finite_or_zero, round2};
use ade_core::{AdeError, CognitiveDomain, Mastery, MasteryLevel, Result};
use ade_rl::LearnerTopicState;

/// Gain and penalty constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasteryConfig {
    pub first_try_base: f64,
    pub first_try_per_level: f64,
    pub one_miss_base: f64,
    pub one_miss_per_level: f64,
    pub many_misses_base: f64,
    pub many_misses_per_level: f64,
    pub many_misses_scale: f64,
    pub first_miss_penalty: f64,
    pub second_miss_penalty: f64,
    pub repeated_miss_penalty: f64,
    /// Bonus per consecutive correct answer once the streak reaches `consistency_min_streak`
    pub consistency_per_answer: f64,
    pub consistency_max: f64,
    pub consistency_min_streak: u32,
    /// Below this prior mastery, penalties are scaled by `beginner_penalty_scale`
    pub beginner_threshold: f64,
    pub beginner_penalty_scale: f64,
}

impl Default for MasteryConfig {
    fn default() -> Self {
        Self {
            first_try_base: 18.0,
            first_try_per_level: 1.4,
            one_miss_base: 10.0,
            one_miss_per_level: 1.0,
            many_misses_base: 5.0,
            many_misses_per_level: 0.6,
            many_misses_scale: 0.8,
            first_miss_penalty: 5.0,
            second_miss_penalty: 7.0,
            repeated_miss_penalty: 10.0,
            consistency_per_answer: 0.5,
            consistency_max: 3.0,
            consistency_min_streak: 3,
            beginner_threshold: 30.0,
            beginner_penalty_scale: 0.5,
        }
    }
}

impl MasteryConfig {
    pub fn validate(&self) -> Result<()> {
        let values = [
            self.first_try_base,
            self.first_try_per_level,
            self.one_miss_base,
            self.one_miss_per_level,
            self.many_misses_base,
            self.many_misses_per_level,
            self.many_misses_scale,
            self.first_miss_penalty,
            self.second_miss_penalty,
            self.repeated_miss_penalty,
            self.consistency_per_answer,
            self.consistency_max,
            self.beginner_penalty_scale,
        ];
        if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(AdeError::Config(
                "mastery gains and penalties must be finite and non-negative".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.beginner_threshold) {
            return Err(AdeError::Config(format!(
                "mastery.beginner_threshold must be in [0, 100], got {}",
                self.beginner_threshold
            )));
        }
        Ok(())
    }
}

/// Something noteworthy that happened during a mastery update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MasteryEvent {
    /// Mastery crossed into a higher band on this answer
    Milestone { level: MasteryLevel, mastery: Mastery },
}

/// Result of applying one answer to a learner state
#[derive(Debug, Clone)]
pub struct MasteryUpdate {
    /// Updated state: mastery, streaks and counters
    pub state: LearnerTopicState,
    pub previous: Mastery,
    pub mastery: Mastery,
    pub delta: f64,
    pub events: Vec<MasteryEvent>,
}

#[derive(Debug, Clone, Default)]
pub struct MasteryEstimator {
    config: MasteryConfig,
}

impl MasteryEstimator {
    pub fn new(config: MasteryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MasteryConfig {
        &self.config
    }

    /// Ceiling on mastery after `total_attempts` answers; `None` once uncapped
    pub fn confidence_cap(total_attempts: u32) -> Option<f64> {
        match total_attempts {
            0 | 1 => Some(25.0),
            2 => Some(45.0),
            3 => Some(65.0),
            4 => Some(75.0),
            5..=7 => Some(85.0),
            _ => None,
        }
    }

    /// Gain for a correct answer before the consistency bonus
    fn correct_gain(&self, prev: &LearnerTopicState, domain: CognitiveDomain) -> f64 {
        let c = &self.config;
        let level = f64::from(prev.difficulty.level());
        let base = match prev.wrong_streak {
            0 => c.first_try_base + c.first_try_per_level * level,
            1 => c.one_miss_base + c.one_miss_per_level * level,
            _ => (c.many_misses_base + c.many_misses_per_level * level) * c.many_misses_scale,
        };
        base * domain.gain_multiplier()
    }

    /// Penalty for the `nth` consecutive miss
    fn penalty(&self, nth_miss: u32, prior: f64) -> f64 {
        let c = &self.config;
        let penalty = match nth_miss {
            0 | 1 => c.first_miss_penalty,
            2 => c.second_miss_penalty,
            _ => c.repeated_miss_penalty,
        };
        if prior < c.beginner_threshold {
            penalty * c.beginner_penalty_scale
        } else {
            penalty
        }
    }

    fn consistency_bonus(&self, correct_streak: u32) -> f64 {
        let c = &self.config;
        if correct_streak >= c.consistency_min_streak {
            (c.consistency_per_answer * f64::from(correct_streak)).min(c.consistency_max)
        } else {
            0.0
        }
    }

    /// Apply one answer: update streaks, counters and mastery
    pub fn update(
        &self,
        prev: &LearnerTopicState,
        was_correct: bool,
        domain: CognitiveDomain,
    ) -> MasteryUpdate {
        let previous = prev.mastery;
        let prior = previous.value();
        let mut state = prev.clone();
        state.total_attempts = prev.total_attempts.saturating_add(1);

        let raw = if was_correct {
            state.correct_answers = prev.correct_answers.saturating_add(1);
            state.correct_streak = prev.correct_streak.saturating_add(1);
            state.wrong_streak = 0;
            prior + self.correct_gain(prev, domain) + self.consistency_bonus(state.correct_streak)
        } else {
            state.wrong_answers = prev.wrong_answers.saturating_add(1);
            state.wrong_streak = prev.wrong_streak.saturating_add(1);
            state.correct_streak = 0;
            prior - self.penalty(state.wrong_streak, prior)
        };

        let mut value = finite_or_zero(raw, "mastery");
        if let Some(cap) = Self::confidence_cap(state.total_attempts) {
            value = value.min(cap);
        }
        let mastery = Mastery::new(value);
        state.mastery = mastery;

        let events = milestones(previous, mastery);
        for event in &events {
            let MasteryEvent::Milestone { level, mastery } = event;
            info!(
                student = %state.student_id,
                topic = %state.topic_id,
                level = level.as_str(),
                mastery = mastery.value(),
                "Mastery milestone reached"
            );
        }

        MasteryUpdate {
            state,
            previous,
            mastery,
            delta: round2(mastery.value() - prior),
            events,
        }
    }
}

/// Edge-triggered milestone events for crossing the Advanced and Expert bounds
fn milestones(previous: Mastery, current: Mastery) -> Vec<MasteryEvent> {
    [
        (Mastery::ADVANCED, MasteryLevel::Advanced),
        (Mastery::EXPERT, MasteryLevel::Expert),
    ]
    .into_iter()
    .filter(|(bound, _)| previous.value() < *bound && current.value() >= *bound)
    .map(|(_, level)| MasteryEvent::Milestone {
        level,
        mastery: current,
    })
    .collect()
}
