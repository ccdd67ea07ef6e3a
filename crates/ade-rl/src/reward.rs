//! Reward shaping for tutoring transitions
//!
//! The reward is the sum of an ordered list of named rules. Each rule is a
//! pure function of the transition and returns a delta (0 when it does not
//! apply), so rules can be unit tested in isolation and every decision can
//! be audited by the rules that fired.
//!
//! Components are tuned to stay within roughly [-15, +25]; no clamping is
//! applied.

use serde::{Deserialize, Serialize};
use tracing::debug;

use ade_core::util::finite_or_zero;

use crate::state::{Action, LearnerTopicState};

/// Reward constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardTable {
    pub first_try: f64,
    pub after_hint: f64,
    pub after_retry: f64,
    /// Correct after a single miss without a hint earns this share of `after_hint`
    pub after_one_wrong_scale: f64,
    pub optimal_challenge: f64,
    pub optimal_challenge_min: f64,
    pub optimal_challenge_max: f64,
    pub wrong_answer: f64,
    pub mastery_delta_weight: f64,
    pub maintained_high_mastery: f64,
    pub high_mastery_threshold: f64,
    pub advance_topic: f64,
    pub fast_advance_bonus: f64,
    pub fast_advance_attempts: u32,
    pub frustration_severe: f64,
    pub frustration_mild: f64,
    pub boredom: f64,
    pub efficiency: f64,
    pub baseline_seconds: f64,
    pub difficulty_appropriate: f64,
}

impl Default for RewardTable {
    fn default() -> Self {
        Self {
            first_try: 10.0,
            after_hint: 6.0,
            after_retry: 4.0,
            after_one_wrong_scale: 0.8,
            optimal_challenge: 7.0,
            optimal_challenge_min: 70.0,
            optimal_challenge_max: 85.0,
            wrong_answer: -4.0,
            mastery_delta_weight: 0.5,
            maintained_high_mastery: 3.0,
            high_mastery_threshold: 75.0,
            advance_topic: 10.0,
            fast_advance_bonus: 8.0,
            fast_advance_attempts: 20,
            frustration_severe: -8.0,
            frustration_mild: -4.0,
            boredom: -3.0,
            efficiency: 1.0,
            baseline_seconds: 60.0,
            difficulty_appropriate: 2.0,
        }
    }
}

/// Everything a reward rule may look at
#[derive(Debug, Clone, Copy)]
pub struct RewardContext<'a> {
    /// State before the answer
    pub prev: &'a LearnerTopicState,
    /// State after the mastery update for the answer
    pub next: &'a LearnerTopicState,
    pub action: Action,
    pub was_correct: bool,
    pub elapsed_seconds: f64,
}

/// A named, pure reward component
#[derive(Clone, Copy)]
pub struct RewardRule {
    pub name: &'static str,
    pub apply: fn(&RewardContext<'_>, &RewardTable) -> f64,
}

impl std::fmt::Debug for RewardRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewardRule").field("name", &self.name).finish()
    }
}

/// A rule that contributed a non-zero delta
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiredRule {
    pub name: String,
    pub delta: f64,
}

/// Total reward plus the rules that produced it
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RewardBreakdown {
    pub total: f64,
    pub fired: Vec<FiredRule>,
}

fn correctness_context(ctx: &RewardContext<'_>, t: &RewardTable) -> f64 {
    if !ctx.was_correct {
        return 0.0;
    }
    if ctx.prev.wrong_streak == 0 {
        t.first_try
    } else if ctx.prev.last_action == Some(Action::HintThenRetry) {
        t.after_hint
    } else if ctx.prev.wrong_streak >= 2 {
        t.after_retry
    } else {
        t.after_hint * t.after_one_wrong_scale
    }
}

fn optimal_challenge(ctx: &RewardContext<'_>, t: &RewardTable) -> f64 {
    let m = ctx.next.mastery.value();
    if (t.optimal_challenge_min..=t.optimal_challenge_max).contains(&m) {
        t.optimal_challenge
    } else {
        0.0
    }
}

fn wrong_answer(ctx: &RewardContext<'_>, t: &RewardTable) -> f64 {
    if ctx.was_correct {
        0.0
    } else {
        t.wrong_answer
    }
}

fn mastery_delta(ctx: &RewardContext<'_>, t: &RewardTable) -> f64 {
    t.mastery_delta_weight * (ctx.next.mastery.value() - ctx.prev.mastery.value())
}

fn maintained_high_mastery(ctx: &RewardContext<'_>, t: &RewardTable) -> f64 {
    if ctx.prev.mastery.value() >= t.high_mastery_threshold
        && ctx.next.mastery.value() >= t.high_mastery_threshold
    {
        t.maintained_high_mastery
    } else {
        0.0
    }
}

fn advance_topic(ctx: &RewardContext<'_>, t: &RewardTable) -> f64 {
    if ctx.action != Action::AdvanceTopic {
        return 0.0;
    }
    if ctx.next.total_attempts < t.fast_advance_attempts {
        t.advance_topic + t.fast_advance_bonus
    } else {
        t.advance_topic
    }
}

fn frustration(ctx: &RewardContext<'_>, t: &RewardTable) -> f64 {
    match ctx.next.wrong_streak {
        0..=2 => 0.0,
        3..=4 => t.frustration_mild,
        _ => t.frustration_severe,
    }
}

fn boredom(ctx: &RewardContext<'_>, t: &RewardTable) -> f64 {
    if ctx.next.correct_streak >= 10 && ctx.next.difficulty.level() <= 2 {
        t.boredom
    } else {
        0.0
    }
}

fn efficiency(ctx: &RewardContext<'_>, t: &RewardTable) -> f64 {
    if ctx.elapsed_seconds <= 0.0 {
        return 0.0;
    }
    if ctx.elapsed_seconds > t.baseline_seconds {
        -t.efficiency
    } else if ctx.was_correct && ctx.elapsed_seconds < t.baseline_seconds {
        t.efficiency
    } else {
        0.0
    }
}

fn difficulty_appropriateness(ctx: &RewardContext<'_>, t: &RewardTable) -> f64 {
    let target = (ctx.next.mastery.value() / 20.0).ceil() as i32;
    let gap = (i32::from(ctx.next.difficulty.level()) - target).abs();
    if gap <= 1 {
        t.difficulty_appropriate
    } else {
        0.0
    }
}

/// Rules in evaluation order
pub const REWARD_RULES: [RewardRule; 10] = [
    RewardRule { name: "correctness_context", apply: correctness_context },
    RewardRule { name: "optimal_challenge", apply: optimal_challenge },
    RewardRule { name: "wrong_answer", apply: wrong_answer },
    RewardRule { name: "mastery_delta", apply: mastery_delta },
    RewardRule { name: "maintained_high_mastery", apply: maintained_high_mastery },
    RewardRule { name: "advance_topic", apply: advance_topic },
    RewardRule { name: "frustration", apply: frustration },
    RewardRule { name: "boredom", apply: boredom },
    RewardRule { name: "efficiency", apply: efficiency },
    RewardRule { name: "difficulty_appropriateness", apply: difficulty_appropriateness },
];

/// Sums the reward rules for a transition
#[derive(Debug, Clone, Default)]
pub struct RewardCalculator {
    table: RewardTable,
}

impl RewardCalculator {
    pub fn new(table: RewardTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &RewardTable {
        &self.table
    }

    pub fn calculate(&self, ctx: &RewardContext<'_>) -> RewardBreakdown {
        let mut breakdown = RewardBreakdown::default();

        for rule in &REWARD_RULES {
            let delta = finite_or_zero((rule.apply)(ctx, &self.table), rule.name);
            if delta != 0.0 {
                breakdown.total += delta;
                breakdown.fired.push(FiredRule {
                    name: rule.name.to_string(),
                    delta,
                });
            }
        }

        breakdown.total = finite_or_zero(breakdown.total, "reward");
        debug!(
            action = %ctx.action,
            total = breakdown.total,
            fired = ?breakdown.fired.iter().map(|r| (r.name.as_str(), r.delta)).collect::<Vec<_>>(),
            "Reward computed"
        );
        breakdown
    }

    pub fn reward(&self, ctx: &RewardContext<'_>) -> f64 {
        self.calculate(ctx).total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ade_core::{Difficulty, Mastery, StudentId, TopicId};

    fn base_state() -> LearnerTopicState {
        LearnerTopicState::new(StudentId::from("s1"), TopicId::from("t1"))
    }

    fn rule(name: &str) -> RewardRule {
        *REWARD_RULES.iter().find(|r| r.name == name).unwrap()
    }

    fn eval(name: &str, ctx: &RewardContext<'_>) -> f64 {
        (rule(name).apply)(ctx, &RewardTable::default())
    }

    fn ctx<'a>(
        prev: &'a LearnerTopicState,
        next: &'a LearnerTopicState,
        action: Action,
        was_correct: bool,
    ) -> RewardContext<'a> {
        RewardContext {
            prev,
            next,
            action,
            was_correct,
            elapsed_seconds: 0.0,
        }
    }

    #[test]
    fn test_correctness_context_variants() {
        let next = base_state();
        let mut prev = base_state();
        assert_eq!(eval("correctness_context", &ctx(&prev, &next, Action::MaintainDifficulty, true)), 10.0);

        prev.wrong_streak = 1;
        prev.last_action = Some(Action::HintThenRetry);
        assert_eq!(eval("correctness_context", &ctx(&prev, &next, Action::MaintainDifficulty, true)), 6.0);

        prev.last_action = None;
        let after_one_wrong = eval("correctness_context", &ctx(&prev, &next, Action::MaintainDifficulty, true));
        assert!((after_one_wrong - 4.8).abs() < 1e-12);

        prev.wrong_streak = 2;
        assert_eq!(eval("correctness_context", &ctx(&prev, &next, Action::MaintainDifficulty, true)), 4.0);

        assert_eq!(eval("correctness_context", &ctx(&prev, &next, Action::MaintainDifficulty, false)), 0.0);
    }

    #[test]
    fn test_optimal_challenge_window() {
        let prev = base_state();
        let mut next = base_state();
        next.mastery = Mastery::new(70.0);
        assert_eq!(eval("optimal_challenge", &ctx(&prev, &next, Action::MaintainDifficulty, true)), 7.0);
        next.mastery = Mastery::new(85.0);
        assert_eq!(eval("optimal_challenge", &ctx(&prev, &next, Action::MaintainDifficulty, true)), 7.0);
        next.mastery = Mastery::new(85.01);
        assert_eq!(eval("optimal_challenge", &ctx(&prev, &next, Action::MaintainDifficulty, true)), 0.0);
    }

    #[test]
    fn test_mastery_delta_sign() {
        let mut prev = base_state();
        let mut next = base_state();
        prev.mastery = Mastery::new(50.0);
        next.mastery = Mastery::new(40.0);
        assert_eq!(eval("mastery_delta", &ctx(&prev, &next, Action::MaintainDifficulty, false)), -5.0);
        next.mastery = Mastery::new(60.0);
        assert_eq!(eval("mastery_delta", &ctx(&prev, &next, Action::MaintainDifficulty, true)), 5.0);
    }

    #[test]
    fn test_advance_topic_bonus() {
        let prev = base_state();
        let mut next = base_state();
        next.total_attempts = 12;
        assert_eq!(eval("advance_topic", &ctx(&prev, &next, Action::AdvanceTopic, true)), 18.0);
        next.total_attempts = 20;
        assert_eq!(eval("advance_topic", &ctx(&prev, &next, Action::AdvanceTopic, true)), 10.0);
        assert_eq!(eval("advance_topic", &ctx(&prev, &next, Action::RepeatCurrent, true)), 0.0);
    }

    #[test]
    fn test_frustration_levels() {
        let prev = base_state();
        let mut next = base_state();
        next.wrong_streak = 2;
        assert_eq!(eval("frustration", &ctx(&prev, &next, Action::HintThenRetry, false)), 0.0);
        next.wrong_streak = 4;
        assert_eq!(eval("frustration", &ctx(&prev, &next, Action::HintThenRetry, false)), -4.0);
        next.wrong_streak = 5;
        assert_eq!(eval("frustration", &ctx(&prev, &next, Action::HintThenRetry, false)), -8.0);
    }

    #[test]
    fn test_boredom() {
        let prev = base_state();
        let mut next = base_state();
        next.correct_streak = 10;
        next.difficulty = Difficulty::new(2);
        assert_eq!(eval("boredom", &ctx(&prev, &next, Action::MaintainDifficulty, true)), -3.0);
        next.difficulty = Difficulty::new(3);
        assert_eq!(eval("boredom", &ctx(&prev, &next, Action::MaintainDifficulty, true)), 0.0);
    }

    #[test]
    fn test_efficiency() {
        let prev = base_state();
        let next = base_state();
        let mut c = ctx(&prev, &next, Action::MaintainDifficulty, true);
        c.elapsed_seconds = 30.0;
        assert_eq!(eval("efficiency", &c), 1.0);
        c.elapsed_seconds = 90.0;
        assert_eq!(eval("efficiency", &c), -1.0);
        c.elapsed_seconds = 0.0;
        assert_eq!(eval("efficiency", &c), 0.0);
    }

    #[test]
    fn test_difficulty_appropriateness() {
        let prev = base_state();
        let mut next = base_state();
        next.mastery = Mastery::new(50.0); // target 3
        next.difficulty = Difficulty::new(4);
        assert_eq!(eval("difficulty_appropriateness", &ctx(&prev, &next, Action::MaintainDifficulty, true)), 2.0);
        next.difficulty = Difficulty::new(5);
        assert_eq!(eval("difficulty_appropriateness", &ctx(&prev, &next, Action::MaintainDifficulty, true)), 0.0);
    }

    #[test]
    fn test_first_try_total() {
        // Fresh learner answers correctly at difficulty 3 in 30s; mastery 0 -> 22.2
        let prev = base_state();
        let mut next = base_state();
        next.mastery = Mastery::new(22.2);
        next.total_attempts = 1;
        next.correct_streak = 1;
        let mut c = ctx(&prev, &next, Action::MaintainDifficulty, true);
        c.elapsed_seconds = 30.0;

        let breakdown = RewardCalculator::default().calculate(&c);
        let names: Vec<&str> = breakdown.fired.iter().map(|r| r.name.as_str()).collect();
        assert!(names.contains(&"correctness_context"));
        assert!(names.contains(&"efficiency"));
        // 10 + 0.5 * 22.2 + 1 + 2 (difficulty 3 vs ceil(22.2/20) = 2)
        assert!((breakdown.total - 24.1).abs() < 1e-9);
    }

    #[test]
    fn test_wrong_answer_is_negative() {
        let mut prev = base_state();
        prev.mastery = Mastery::new(40.0);
        let mut next = prev.clone();
        next.mastery = Mastery::new(35.0);
        next.wrong_streak = 1;
        let total = RewardCalculator::default().reward(&ctx(&prev, &next, Action::HintThenRetry, false));
        // -4 wrong, -2.5 delta, +2 appropriateness (3 vs ceil(35/20) = 2)
        assert!((total - -4.5).abs() < 1e-9);
    }
}
